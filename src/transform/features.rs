//! Per-filter derived features of one object.
use crate::loader::RawFilterSeries;
use crate::table::Cell;
use crate::transform::background::BackgroundDraw;
use crate::utils::lightcurves::{argmax, argmin, cadence, flux2mag, median, snr, snr2magerr};
use simfake_config::{BackgroundModel, MagFlux, MagobsMode, QualityConfig};

/// Per-epoch quality cut, evaluated on the values before masking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityCut {
    pub snr_threshold: f64,
    pub mag_threshold: Option<f64>,
}

impl QualityCut {
    /// The magnitude cut only applies to the noisy background model.
    pub fn new(quality: &QualityConfig, model: BackgroundModel) -> Self {
        let mag_threshold = match model {
            BackgroundModel::Noisy => Some(quality.mag_threshold),
            BackgroundModel::DeterministicOffset => None,
        };
        QualityCut {
            snr_threshold: quality.snr_threshold,
            mag_threshold,
        }
    }

    pub fn keeps(&self, snr: f64, mag: f64) -> bool {
        snr >= self.snr_threshold && self.mag_threshold.map_or(true, |max_mag| mag <= max_mag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureParams {
    pub zero_point: f64,
    pub magerr_clip: f64,
    pub mag_flux: MagFlux,
    pub magobs: MagobsMode,
    pub cut: QualityCut,
}

/// Brightest post-mask flux point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FluxPeak {
    pub index: usize,
    pub flux: f64,
    pub flux_err: f64,
}

/// Post-mask epoch of minimum magnitude.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrightestEpoch {
    pub mag: f64,
    pub snr: f64,
}

/// Features of one object in one filter.
///
/// `snr`, `mag`, `magerr`, `photflag`, `mjd`, `fluxcal` and `fluxcalerr` only
/// hold the epochs that passed the quality cut. `photprob`, `psf_sig1`,
/// `sky_sig`, `zeropt` and `delta_t` describe all epochs.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedFilterFeatures {
    pub mjd: Vec<f64>,
    pub fluxcal: Vec<f64>,
    pub fluxcalerr: Vec<f64>,
    pub photflag: Vec<i64>,
    pub photprob: Vec<f64>,
    pub psf_sig1: Vec<f64>,
    pub sky_sig: Vec<f64>,
    pub zeropt: Vec<f64>,
    pub mag: Vec<f64>,
    pub snr: Vec<f64>,
    pub magerr: Vec<f64>,
    pub delta_t: Vec<f64>,
    pub median_delta_t: f64,
    pub magobs: Option<f64>,
    pub peak: Option<FluxPeak>,
    pub brightest: Option<BrightestEpoch>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterFeatures {
    /// The object was not observed in this filter
    NoData,
    Observed(DerivedFilterFeatures),
}

impl FilterFeatures {
    pub fn observed(&self) -> Option<&DerivedFilterFeatures> {
        match self {
            FilterFeatures::NoData => None,
            FilterFeatures::Observed(features) => Some(features),
        }
    }

    /// Named values of the filter, in column order.
    ///
    /// Without data only empty `fluxcal` and `fluxcalerr` are emitted.
    pub fn cells(&self) -> Vec<(&'static str, Cell)> {
        match self {
            FilterFeatures::NoData => vec![
                ("fluxcal", Cell::Floats(Vec::new())),
                ("fluxcalerr", Cell::Floats(Vec::new())),
            ],
            FilterFeatures::Observed(f) => {
                let mut cells = vec![
                    ("mjd", Cell::Floats(f.mjd.clone())),
                    ("fluxcal", Cell::Floats(f.fluxcal.clone())),
                    ("fluxcalerr", Cell::Floats(f.fluxcalerr.clone())),
                    ("photflag", Cell::Ints(f.photflag.clone())),
                    ("photprob", Cell::Floats(f.photprob.clone())),
                    ("psf_sig1", Cell::Floats(f.psf_sig1.clone())),
                    ("sky_sig", Cell::Floats(f.sky_sig.clone())),
                    ("zeropt", Cell::Floats(f.zeropt.clone())),
                    ("mag", Cell::Floats(f.mag.clone())),
                    ("snr", Cell::Floats(f.snr.clone())),
                    ("magerr", Cell::Floats(f.magerr.clone())),
                    ("delta_t", Cell::Floats(f.delta_t.clone())),
                    ("median_delta_t", Cell::Float(f.median_delta_t)),
                ];
                if let Some(magobs) = f.magobs {
                    cells.push(("magobs", Cell::Float(magobs)));
                }
                match f.peak {
                    Some(peak) => cells.extend([
                        ("maxfluxidx", Cell::Int(peak.index as i64)),
                        ("maxflux", Cell::Float(peak.flux)),
                        ("maxfluxerr", Cell::Float(peak.flux_err)),
                    ]),
                    None => cells.extend([
                        ("maxfluxidx", Cell::Empty),
                        ("maxflux", Cell::Empty),
                        ("maxfluxerr", Cell::Empty),
                    ]),
                }
                match f.brightest {
                    Some(brightest) => cells.extend([
                        ("max_epoch", Cell::Float(brightest.mag)),
                        ("snr_at_max_epoch", Cell::Float(brightest.snr)),
                    ]),
                    None => cells.extend([
                        ("max_epoch", Cell::Empty),
                        ("snr_at_max_epoch", Cell::Empty),
                    ]),
                }
                cells
            }
        }
    }
}

fn apply_mask<T>(keep: &[bool], values: Vec<T>) -> Vec<T> {
    values
        .into_iter()
        .zip(keep)
        .filter_map(|(value, &kept)| kept.then_some(value))
        .collect()
}

/// Derives the features of one filter from its raw series and background.
pub fn derive_features(
    series: RawFilterSeries,
    background: &BackgroundDraw,
    params: &FeatureParams,
) -> DerivedFilterFeatures {
    let RawFilterSeries {
        mjd,
        fluxcal: raw_fluxcal,
        fluxcalerr: raw_fluxcalerr,
        photflag,
        photprob,
        psf_sig1,
        sky_sig,
        zeropt,
    } = series;

    let fluxcal: Vec<f64> = raw_fluxcal
        .iter()
        .map(|flux| background.apply_flux(*flux))
        .collect();
    let fluxcalerr: Vec<f64> = raw_fluxcalerr
        .iter()
        .map(|flux_err| background.apply_flux_err(*flux_err))
        .collect();

    let mag_flux = match params.mag_flux {
        MagFlux::Adjusted => &fluxcal,
        MagFlux::Raw => &raw_fluxcal,
    };
    let mag: Vec<f64> = mag_flux
        .iter()
        .map(|flux| flux2mag(*flux, params.zero_point))
        .collect();
    let snr: Vec<f64> = fluxcal
        .iter()
        .zip(&fluxcalerr)
        .map(|(flux, flux_err)| snr(*flux, *flux_err))
        .collect();
    let magerr: Vec<f64> = snr
        .iter()
        .map(|s| snr2magerr(*s, params.magerr_clip))
        .collect();

    let delta_t = cadence(&mjd);
    let median_delta_t = median(&delta_t);
    let magobs = match params.magobs {
        MagobsMode::MedianCadence => Some(median_delta_t),
        MagobsMode::Omit => None,
    };

    // one mask from the pre-mask values, shared by every masked series
    let keep: Vec<bool> = snr
        .iter()
        .zip(&mag)
        .map(|(s, m)| params.cut.keeps(*s, *m))
        .collect();
    let snr = apply_mask(&keep, snr);
    let mag = apply_mask(&keep, mag);
    let magerr = apply_mask(&keep, magerr);
    let photflag = apply_mask(&keep, photflag);
    let mjd = apply_mask(&keep, mjd);
    let fluxcal = apply_mask(&keep, fluxcal);
    let fluxcalerr = apply_mask(&keep, fluxcalerr);

    let peak = argmax(&fluxcal).map(|index| FluxPeak {
        index,
        flux: fluxcal[index],
        flux_err: fluxcalerr[index],
    });
    let brightest = argmin(&mag).map(|index| BrightestEpoch {
        mag: mag[index],
        snr: snr[index],
    });

    DerivedFilterFeatures {
        mjd,
        fluxcal,
        fluxcalerr,
        photflag,
        photprob,
        psf_sig1,
        sky_sig,
        zeropt,
        mag,
        snr,
        magerr,
        delta_t,
        median_delta_t,
        magobs,
        peak,
        brightest,
    }
}
