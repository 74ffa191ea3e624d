//! Math utilities for the decoding pipeline
//!
//! This module provides:
//! - Moments (mean, population variance, standard deviation)
//! - Ordinary least-squares slope
//! - Numerically stable two-class softmax

// ============================================================================
// Constants
// ============================================================================

/// Numeric constants shared across stages
pub mod constants {
    /// Curve lengths at or below this value are treated as degenerate
    pub const CURVE_LENGTH_EPSILON: f64 = 1e-10;

    /// Offset added to variances before taking logarithms
    pub const LOG_POWER_EPSILON: f64 = 1e-10;

    /// Standard deviations below this value are replaced by 1 when scaling
    pub const SCALE_EPSILON: f64 = 1e-12;

    /// Tolerance for probability pairs summing to 1
    pub const PROBABILITY_TOLERANCE: f64 = 1e-6;
}

// ============================================================================
// Statistics
// ============================================================================

/// Arithmetic mean (0 for an empty slice).
#[must_use]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance (divides by `n`).
#[must_use]
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
#[must_use]
pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Least-squares slope of `y` against `x`.
///
/// Returns `None` with fewer than two points or when `x` has no spread.
#[must_use]
pub fn ols_slope(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len().min(y.len());
    if n < 2 {
        return None;
    }

    let mx = mean(&x[..n]);
    let my = mean(&y[..n]);

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (&xi, &yi) in x.iter().zip(y.iter()) {
        let dx = xi - mx;
        sxy += dx * (yi - my);
        sxx += dx * dx;
    }

    if sxx > 0.0 {
        Some(sxy / sxx)
    } else {
        None
    }
}

/// Softmax over two log-scores; the result sums to 1.
#[must_use]
pub fn softmax2(a: f64, b: f64) -> [f64; 2] {
    let max = a.max(b);
    let ea = (a - max).exp();
    let eb = (b - max).exp();
    let total = ea + eb;
    [ea / total, eb / total]
}
