//! Synthetic sky background added to the simulated fluxes.
//!
//! The noisy model draws one Gaussian background flux per object and filter.
//! Its mean is the flux of a reference background magnitude and its scatter is
//! the empirical magnitude scatter of Malanchev et al. 2021 (page 12),
//! propagated to flux units. The deterministic model adds the mean flux only.
use crate::utils::lightcurves::mag2flux;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use simfake_config::{BackgroundConfig, BackgroundModel, Reseed};

// sigma_mag = SLOPE * mag + INTERCEPT, in mag units
const SIGMA_MAG_SLOPE: f64 = 0.0297;
const SIGMA_MAG_INTERCEPT: f64 = -0.4179;

#[derive(thiserror::Error, Debug)]
pub enum NoiseModelError {
    #[error("background magnitude scatter {0} is not positive at the reference magnitude")]
    NonPositiveScatter(f64),
    #[error("invalid background distribution")]
    Normal(#[from] rand_distr::NormalError),
}

/// Source of the random generators used for the background draws.
///
/// Each object/filter unit gets its own generator so that the result of a
/// unit never depends on the order in which units are processed.
pub trait NoiseSource: Sync {
    type Generator: Rng;

    fn rng_for(&self, object_id: &str, filter: &str) -> Self::Generator;
}

/// Generators derived from a single integer seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeededNoise {
    seed: u64,
    reseed: Reseed,
}

impl SeededNoise {
    pub fn new(seed: u64, reseed: Reseed) -> Self {
        SeededNoise { seed, reseed }
    }

    pub fn from_config(config: &BackgroundConfig) -> Self {
        SeededNoise::new(config.seed, config.reseed)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl NoiseSource for SeededNoise {
    type Generator = StdRng;

    fn rng_for(&self, object_id: &str, filter: &str) -> StdRng {
        match self.reseed {
            Reseed::Fixed => StdRng::seed_from_u64(self.seed),
            Reseed::PerUnit => StdRng::seed_from_u64(unit_seed(self.seed, object_id, filter)),
        }
    }
}

// FNV-1a over the seed, object id and filter; stable across platforms and releases
fn unit_seed(seed: u64, object_id: &str, filter: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET;
    let bytes = seed
        .to_le_bytes()
        .into_iter()
        .chain(object_id.bytes())
        .chain(std::iter::once(0xff))
        .chain(filter.bytes());
    for byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Mean and scatter of the background, in flux units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackgroundFlux {
    pub sigma_mag: f64,
    pub mu: f64,
    pub sigma: f64,
}

impl BackgroundFlux {
    pub fn at_reference(reference_mag: f64, zero_point: f64) -> Self {
        let sigma_mag = SIGMA_MAG_SLOPE * reference_mag + SIGMA_MAG_INTERCEPT;
        let mu = mag2flux(reference_mag, zero_point);
        let sigma = 0.4 * std::f64::consts::LN_10 * mu * sigma_mag;
        BackgroundFlux {
            sigma_mag,
            mu,
            sigma,
        }
    }
}

/// Background actually added to one object in one filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackgroundDraw {
    pub flux: f64,
    /// flux uncertainty to add in quadrature, if any
    pub sigma: Option<f64>,
}

impl BackgroundDraw {
    pub fn apply_flux(&self, flux: f64) -> f64 {
        flux + self.flux
    }

    pub fn apply_flux_err(&self, flux_err: f64) -> f64 {
        match self.sigma {
            Some(sigma) => (flux_err.powi(2) + sigma.powi(2)).sqrt(),
            None => flux_err,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Background {
    Noisy {
        flux: BackgroundFlux,
        normal: Normal<f64>,
    },
    DeterministicOffset {
        flux: BackgroundFlux,
    },
}

impl Background {
    pub fn new(config: &BackgroundConfig) -> Result<Self, NoiseModelError> {
        let flux = BackgroundFlux::at_reference(config.reference_mag, config.zero_point);
        match config.model {
            BackgroundModel::Noisy => {
                if !(flux.sigma_mag > 0.0) {
                    return Err(NoiseModelError::NonPositiveScatter(flux.sigma_mag));
                }
                let normal = Normal::new(flux.mu, flux.sigma)?;
                Ok(Background::Noisy { flux, normal })
            }
            BackgroundModel::DeterministicOffset => Ok(Background::DeterministicOffset { flux }),
        }
    }

    pub fn model(&self) -> BackgroundModel {
        match self {
            Background::Noisy { .. } => BackgroundModel::Noisy,
            Background::DeterministicOffset { .. } => BackgroundModel::DeterministicOffset,
        }
    }

    pub fn flux(&self) -> &BackgroundFlux {
        match self {
            Background::Noisy { flux, .. } | Background::DeterministicOffset { flux } => flux,
        }
    }

    pub fn draw<N: NoiseSource>(&self, source: &N, object_id: &str, filter: &str) -> BackgroundDraw {
        match self {
            Background::Noisy { flux, normal } => {
                let mut rng = source.rng_for(object_id, filter);
                BackgroundDraw {
                    flux: normal.sample(&mut rng),
                    sigma: Some(flux.sigma),
                }
            }
            Background::DeterministicOffset { flux } => BackgroundDraw {
                flux: flux.mu,
                sigma: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_flux_at_reference() {
        let flux = BackgroundFlux::at_reference(20.0, 27.5);
        assert!((flux.sigma_mag - 0.1761).abs() < 1e-12);
        assert!((flux.mu - 1000.0).abs() < 1e-9);
        let expected_sigma = 0.4 * 10.0_f64.ln() * 1000.0 * 0.1761;
        assert!((flux.sigma - expected_sigma).abs() < 1e-6);
    }

    #[test]
    fn test_fixed_reseed_repeats_the_draw() {
        let background = Background::new(&BackgroundConfig::default()).unwrap();
        let source = SeededNoise::new(42, Reseed::Fixed);
        let a = background.draw(&source, "1", "g");
        let b = background.draw(&source, "2", "r");
        assert_eq!(a, b);
        assert_eq!(a.sigma, Some(background.flux().sigma));
    }

    #[test]
    fn test_per_unit_reseed_is_reproducible() {
        let background = Background::new(&BackgroundConfig::default()).unwrap();
        let source = SeededNoise::new(42, Reseed::PerUnit);
        let a = background.draw(&source, "1", "g");
        assert_eq!(a, background.draw(&source, "1", "g"));
        assert_ne!(a, background.draw(&source, "1", "r"));
        assert_ne!(a, background.draw(&source, "2", "g"));
        assert_ne!(unit_seed(42, "ab", "c"), unit_seed(42, "a", "bc"));
    }

    #[test]
    fn test_deterministic_offset() {
        let config = BackgroundConfig {
            model: BackgroundModel::DeterministicOffset,
            ..BackgroundConfig::default()
        };
        let background = Background::new(&config).unwrap();
        let draw = background.draw(&SeededNoise::new(0, Reseed::Fixed), "1", "g");
        assert!((draw.flux - 1000.0).abs() < 1e-9);
        assert_eq!(draw.apply_flux_err(-3.0), -3.0);
    }

    #[test]
    fn test_quadrature_error() {
        let draw = BackgroundDraw {
            flux: 10.0,
            sigma: Some(4.0),
        };
        assert_eq!(draw.apply_flux(5.0), 15.0);
        assert_eq!(draw.apply_flux_err(3.0), 5.0);
    }

    #[test]
    fn test_bright_reference_is_rejected() {
        let config = BackgroundConfig {
            reference_mag: 10.0,
            ..BackgroundConfig::default()
        };
        assert!(matches!(
            Background::new(&config),
            Err(NoiseModelError::NonPositiveScatter(_))
        ));
    }
}
