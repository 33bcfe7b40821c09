//! Numeric helpers that turn every degenerate case into an explicit fallback.
//!
//! Nothing produced here is NaN or infinite: undefined results collapse to the
//! caller-supplied fallback instead of leaking into score columns.

/// Divide, returning `fallback` when the denominator is zero or the result is not finite.
pub fn checked_div(num: f64, den: f64, fallback: f64) -> f64 {
    if den == 0.0 || !den.is_finite() {
        return fallback;
    }
    finite_or(num / den, fallback)
}

/// Replace NaN and infinities with `fallback`.
pub fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let m = values.iter().sum::<f64>() / values.len() as f64;
    m.is_finite().then_some(m)
}

/// Sample standard deviation (ddof = 1).
///
/// `None` for fewer than two samples or a non-finite result.
pub fn safe_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    let std = var.sqrt();
    std.is_finite().then_some(std)
}

/// Standard deviation to divide by: zero or undefined deviations become 1.
pub fn divisor_std(values: &[f64]) -> f64 {
    match safe_std(values) {
        Some(s) if s > 0.0 => s,
        _ => 1.0,
    }
}

/// Quantile with linear interpolation between closest ranks.
///
/// `q` is clamped to [0, 1]. Returns `None` for an empty slice.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    if lower == upper {
        return Some(sorted[lower]);
    }
    let frac = pos - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}

/// Min-max scale into [0, 1]; `eps` keeps constant inputs from dividing by zero.
pub fn min_max_normalize(values: &[f64], eps: f64) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    values
        .iter()
        .map(|&v| checked_div(v - min, max - min + eps, 0.0).clamp(0.0, 1.0))
        .collect()
}
