//! Enhanced Higuchi fractal-dimension estimator
//!
//! For every scale `k` the signal is decimated at each offset `m < k` and the
//! normalized curve length of each decimated sequence is measured:
//!
//! ```text
//! L_m(k) = sum |x[m + ik] - x[m + (i-1)k]| * (N - 1) / (floor((N - m - 1) / k) * k) / k
//! ```
//!
//! `L(k)` is the mean over offsets and `std(k)` the population standard
//! deviation over offsets. The fractal dimension is the least-squares slope of
//! `ln L(k)` against `ln(1/k)`. The enhanced descriptor adds the mean of
//! `L(k)` and the mean of `std(k)` over the scales used in the regression.

use fractal_bci_core::math::{self, constants::CURVE_LENGTH_EPSILON};
use fractal_bci_core::{Degeneracy, FractalDescriptor};

/// Curve-length statistics at one scale
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ScaleLength {
    /// Scale (decimation step)
    pub k: usize,
    /// Mean curve length over offsets, `L(k)`
    pub mean: f64,
    /// Population standard deviation over offsets, `std(k)`
    pub std: f64,
}

impl ScaleLength {
    /// Whether this scale can enter the log-log regression
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.mean.is_finite() && self.mean > CURVE_LENGTH_EPSILON
    }
}

/// Higuchi estimator with a fixed maximum scale.
///
/// Pure function of `(signal, k_max)`; holds no state between calls.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HiguchiEstimator {
    k_max: usize,
}

impl Default for HiguchiEstimator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_K_MAX)
    }
}

impl HiguchiEstimator {
    /// Default maximum scale
    pub const DEFAULT_K_MAX: usize = 100;

    /// Create an estimator; `k_max` is clamped to at least 1
    #[must_use]
    pub fn new(k_max: usize) -> Self {
        Self { k_max: k_max.max(1) }
    }

    /// Maximum scale
    #[must_use]
    pub const fn k_max(&self) -> usize {
        self.k_max
    }

    /// Curve-length statistics for every scale `1..=min(k_max, N-1)`.
    ///
    /// Offsets whose decimated sequence has no consecutive pair are skipped.
    #[must_use]
    pub fn curve_lengths(&self, signal: &[f64]) -> Vec<ScaleLength> {
        let n = signal.len();
        if n < 2 {
            return Vec::new();
        }
        let k_top = self.k_max.min(n - 1);
        let mut scales = Vec::with_capacity(k_top);
        let mut per_offset = Vec::with_capacity(k_top);

        for k in 1..=k_top {
            per_offset.clear();
            for m in 0..k {
                let steps = (n - m - 1) / k;
                if steps == 0 {
                    continue;
                }
                let mut total = 0.0;
                for i in 1..=steps {
                    total += (signal[m + i * k] - signal[m + (i - 1) * k]).abs();
                }
                let norm = (n - 1) as f64 / (steps * k) as f64;
                per_offset.push(total * norm / k as f64);
            }
            scales.push(ScaleLength {
                k,
                mean: math::mean(&per_offset),
                std: math::std_dev(&per_offset),
            });
        }
        scales
    }

    /// Estimate `(slope, mean_Lk, std_Lk)` for one centered signal.
    ///
    /// Never fails: flat or too-short signals return a zero descriptor with
    /// [`FractalDescriptor::degeneracy`] set.
    #[must_use]
    pub fn estimate(&self, signal: &[f64]) -> FractalDescriptor {
        let scales = self.curve_lengths(signal);

        if !scales.is_empty() && scales.iter().all(|s| s.mean.is_finite() && s.mean <= CURVE_LENGTH_EPSILON) {
            return FractalDescriptor::degenerate(Degeneracy::FlatCurve);
        }

        let usable: Vec<ScaleLength> = scales.into_iter().filter(ScaleLength::is_usable).collect();
        if usable.len() < 2 {
            return FractalDescriptor::degenerate(Degeneracy::TooShort { usable_scales: usable.len() });
        }

        let log_inv_k: Vec<f64> = usable.iter().map(|s| -(s.k as f64).ln()).collect();
        let log_l: Vec<f64> = usable.iter().map(|s| s.mean.ln()).collect();

        let Some(slope) = math::ols_slope(&log_inv_k, &log_l) else {
            return FractalDescriptor::degenerate(Degeneracy::TooShort { usable_scales: usable.len() });
        };

        let means: Vec<f64> = usable.iter().map(|s| s.mean).collect();
        let stds: Vec<f64> = usable.iter().map(|s| s.std).collect();

        FractalDescriptor {
            slope,
            mean_lk: math::mean(&means),
            std_lk: math::mean(&stds),
            degeneracy: None,
        }
    }
}

/// Estimate the enhanced Higuchi descriptor with the given maximum scale.
#[must_use]
pub fn higuchi(signal: &[f64], k_max: usize) -> FractalDescriptor {
    HiguchiEstimator::new(k_max).estimate(signal)
}
