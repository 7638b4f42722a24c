pub const SNANA_ZP: f64 = 27.5; // Zero point of SNANA calibrated fluxes (FLUXCAL)
const FACTOR: f64 = 1.086; // 2.5 / ln(10)

/// Magnitude of a (possibly non-positive) calibrated flux.
///
/// The absolute value keeps negative fluxes (noise below the background)
/// on the magnitude scale; a zero flux gives `+inf`.
pub fn flux2mag(flux: f64, zp: f64) -> f64 {
    -2.5 * flux.abs().log10() + zp
}

pub fn mag2flux(mag: f64, zp: f64) -> f64 {
    10.0_f64.powf(-0.4 * (mag - zp))
}

pub fn snr(flux: f64, flux_err: f64) -> f64 {
    flux / flux_err.abs()
}

/// Magnitude uncertainty from the signal-to-noise ratio, clipped to `clip`.
///
/// NaN and negative values pass through untouched.
pub fn snr2magerr(snr: f64, clip: f64) -> f64 {
    let magerr = FACTOR / snr;
    if magerr > clip {
        clip
    } else {
        magerr
    }
}

/// Gaps between consecutive epochs, one shorter than `times`.
pub fn cadence(times: &[f64]) -> Vec<f64> {
    times.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Median of the values, NaN if empty or if any value is NaN.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() || values.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

// first NaN wins, otherwise the first occurrence of the extremum
fn arg_extremum(values: &[f64], better: impl Fn(f64, f64) -> bool) -> Option<usize> {
    if values.is_empty() {
        return None;
    }
    if let Some(nan_idx) = values.iter().position(|v| v.is_nan()) {
        return Some(nan_idx);
    }
    let mut best = 0;
    for (i, value) in values.iter().enumerate().skip(1) {
        if better(*value, values[best]) {
            best = i;
        }
    }
    Some(best)
}

pub fn argmax(values: &[f64]) -> Option<usize> {
    arg_extremum(values, |candidate, best| candidate > best)
}

pub fn argmin(values: &[f64]) -> Option<usize> {
    arg_extremum(values, |candidate, best| candidate < best)
}
