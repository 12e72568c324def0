//! Descriptive statistics used by the fitters

/// Linear-interpolation percentile (`p` in [0, 100]) over finite values
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() || !p.is_finite() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    Some(percentile_sorted(&sorted, p))
}

/// Percentile of an already sorted, non-empty slice
pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + frac * (sorted[hi] - sorted[lo])
}

/// Tukey fences `(Q1 - k*IQR, Q3 + k*IQR)`
pub fn iqr_bounds(values: &[f64], k: f64) -> Option<(f64, f64)> {
    let q1 = percentile(values, 25.0)?;
    let q3 = percentile(values, 75.0)?;
    let iqr = q3 - q1;
    Some((q1 - k * iqr, q3 + k * iqr))
}

pub fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation
pub fn std_dev(values: &[f64]) -> f64 {
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Sample skewness (biased, moment estimator)
pub fn skewness(values: &[f64]) -> f64 {
    let m = mean(values);
    let sd = std_dev(values);
    if sd == 0.0 {
        return 0.0;
    }
    values.iter().map(|v| ((v - m) / sd).powi(3)).sum::<f64>() / values.len() as f64
}

pub fn min(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::INFINITY, f64::min)
}

pub fn max(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}
