//! Spatial filtering
//!
//! [`SpatialFilter`] is the collaborator contract; [`SpatialFilterAdapter`]
//! enforces the shape contract around any implementation, and [`Csp`] is the
//! per-band common spatial patterns implementation shipped with the crate.

use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array4, ArrayView2, ArrayView4, Axis};

use fractal_bci_core::Label;

use crate::error::{PipelineError, PipelineResult, ShapeError};

/// Spatial-filter collaborator contract.
///
/// `transform` replaces the channel axis of a `(trial, band, channel, sample)`
/// tensor with a component axis.
pub trait SpatialFilter: Send {
    /// Fit on labeled trials
    ///
    /// # Errors
    ///
    /// Returns a model-fit error when the data cannot support the model.
    fn fit(&mut self, x: ArrayView4<'_, f64>, y: &[Label]) -> PipelineResult<()>;

    /// Apply the fitted filters
    ///
    /// # Errors
    ///
    /// Returns a model-fit error when called before [`SpatialFilter::fit`].
    fn transform(&self, x: ArrayView4<'_, f64>) -> PipelineResult<Array4<f64>>;

    /// Name used in error messages
    fn name(&self) -> &'static str;
}

/// Shape-checking wrapper around a [`SpatialFilter`].
///
/// The returned tensor is rank 4 by construction; the adapter checks that
/// trials, bands and samples are preserved and that no more components than
/// channels are produced.
#[derive(Debug)]
pub struct SpatialFilterAdapter<S> {
    inner: S,
}

impl<S: SpatialFilter> SpatialFilterAdapter<S> {
    /// Wrap a spatial filter
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Fit the wrapped filter
    ///
    /// # Errors
    ///
    /// Returns a shape error when labels and trials disagree, or the wrapped
    /// filter's fit error.
    pub fn fit(&mut self, x: ArrayView4<'_, f64>, y: &[Label]) -> PipelineResult<()> {
        let trials = x.len_of(Axis(0));
        if y.len() != trials {
            return Err(ShapeError::Mismatch { what: "label count", expected: trials, got: y.len() }
                .into());
        }
        self.inner.fit(x, y)
    }

    /// Transform and check the output contract
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ContractViolation`] when the output does not
    /// match the input layout.
    pub fn transform(&self, x: ArrayView4<'_, f64>) -> PipelineResult<Array4<f64>> {
        let out = self.inner.transform(x.view())?;
        let (trials, bands, channels, samples) = x.dim();
        let (out_trials, out_bands, components, out_samples) = out.dim();

        if out_trials != trials {
            return Err(self.violation(format!("returned {out_trials} trials for {trials}")));
        }
        if out_bands != bands {
            return Err(self.violation(format!("returned {out_bands} bands for {bands}")));
        }
        if out_samples != samples {
            return Err(self.violation(format!("returned {out_samples} samples for {samples}")));
        }
        if components == 0 || components > channels {
            return Err(self.violation(format!(
                "returned {components} components for {channels} channels"
            )));
        }
        Ok(out)
    }

    /// Fit on `x` and transform it
    ///
    /// # Errors
    ///
    /// See [`Self::fit`] and [`Self::transform`].
    pub fn fit_transform(&mut self, x: ArrayView4<'_, f64>, y: &[Label]) -> PipelineResult<Array4<f64>> {
        self.fit(x.view(), y)?;
        self.transform(x)
    }

    fn violation(&self, reason: String) -> PipelineError {
        PipelineError::contract(self.inner.name(), reason)
    }
}

// ============================================================================
// Common Spatial Patterns
// ============================================================================

/// Per-band common spatial patterns.
///
/// One filter matrix is learned per band. Filters are ordered by the
/// left-hand variance ratio; the first `ceil(n/2)` and last `floor(n/2)` are
/// kept.
#[derive(Clone, Debug)]
pub struct Csp {
    n_components: usize,
    /// Per band: \[component\]\[channel\]
    filters: Vec<DMatrix<f64>>,
}

impl Csp {
    /// Relative floor applied to composite-covariance eigenvalues
    const EIGEN_FLOOR: f64 = 1e-12;

    /// Create an unfitted CSP keeping `n_components` filters per band
    #[must_use]
    pub fn new(n_components: usize) -> Self {
        Self { n_components, filters: Vec::new() }
    }

    fn fit_band(&self, trials: &[ArrayView2<'_, f64>], y: &[Label]) -> PipelineResult<DMatrix<f64>> {
        let channels = trials[0].nrows();
        let mut class_cov = [DMatrix::<f64>::zeros(channels, channels), DMatrix::zeros(channels, channels)];
        let mut counts = [0usize; 2];

        for (trial, label) in trials.iter().zip(y) {
            let cov = normalized_covariance(trial);
            class_cov[label.index()] += cov;
            counts[label.index()] += 1;
        }

        for label in Label::ALL {
            if counts[label.index()] == 0 {
                return Err(PipelineError::model_fit(
                    "CSP",
                    format!("no trials of class {label} to estimate a covariance"),
                ));
            }
            class_cov[label.index()] /= counts[label.index()] as f64;
        }

        let composite = &class_cov[0] + &class_cov[1];
        let eig = SymmetricEigen::new(composite);
        let max_eig = eig.eigenvalues.max();
        if !(max_eig > 0.0) {
            return Err(PipelineError::model_fit("CSP", "composite covariance is zero"));
        }
        let floor = max_eig * Self::EIGEN_FLOOR;

        // Whitening: P = D^-1/2 U^T
        let inv_sqrt = DMatrix::from_diagonal(&eig.eigenvalues.map(|v| 1.0 / v.max(floor).sqrt()));
        let whitening = inv_sqrt * eig.eigenvectors.transpose();

        let s1 = &whitening * &class_cov[0] * whitening.transpose();
        let s1 = (&s1 + s1.transpose()) * 0.5;
        let rot = SymmetricEigen::new(s1);

        let mut order: Vec<usize> = (0..channels).collect();
        order.sort_by(|&a, &b| rot.eigenvalues[b].total_cmp(&rot.eigenvalues[a]));

        let n = self.n_components.min(channels);
        let head = (n + 1) / 2;
        let tail = n / 2;
        let picked: Vec<usize> = order[..head]
            .iter()
            .chain(order[channels - tail..].iter())
            .copied()
            .collect();

        let all = rot.eigenvectors.transpose() * whitening;
        Ok(DMatrix::from_fn(picked.len(), channels, |i, j| all[(picked[i], j)]))
    }
}

impl SpatialFilter for Csp {
    fn fit(&mut self, x: ArrayView4<'_, f64>, y: &[Label]) -> PipelineResult<()> {
        if x.len_of(Axis(0)) == 0 || x.len_of(Axis(2)) == 0 {
            return Err(PipelineError::model_fit("CSP", "no trials or channels"));
        }

        let mut filters = Vec::with_capacity(x.len_of(Axis(1)));
        for band in x.axis_iter(Axis(1)) {
            let trials: Vec<ArrayView2<'_, f64>> = band.outer_iter().collect();
            filters.push(self.fit_band(&trials, y)?);
        }
        self.filters = filters;
        Ok(())
    }

    fn transform(&self, x: ArrayView4<'_, f64>) -> PipelineResult<Array4<f64>> {
        let (trials, bands, channels, samples) = x.dim();
        if self.filters.len() != bands {
            return Err(PipelineError::model_fit(
                "CSP",
                format!("fitted for {} bands, got {bands}", self.filters.len()),
            ));
        }
        if let Some(w) = self.filters.first() {
            if w.ncols() != channels {
                return Err(ShapeError::Mismatch {
                    what: "CSP channel count",
                    expected: w.ncols(),
                    got: channels,
                }
                .into());
            }
        }
        let components = self.filters.first().map_or(0, DMatrix::nrows);

        let mut out = Array4::<f64>::zeros((trials, bands, components, samples));
        for t in 0..trials {
            for (b, w) in self.filters.iter().enumerate() {
                let signal = x.slice(ndarray::s![t, b, .., ..]);
                for k in 0..components {
                    for c in 0..channels {
                        let weight = w[(k, c)];
                        if weight == 0.0 {
                            continue;
                        }
                        let mut lane = out.slice_mut(ndarray::s![t, b, k, ..]);
                        lane.scaled_add(weight, &signal.row(c));
                    }
                }
            }
        }
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "CSP"
    }
}

/// Trace-normalized spatial covariance `X X^T / tr(X X^T)`.
fn normalized_covariance(trial: &ArrayView2<'_, f64>) -> DMatrix<f64> {
    let (channels, samples) = trial.dim();
    let x = DMatrix::from_fn(channels, samples, |i, j| trial[[i, j]]);
    let cov = &x * x.transpose();
    let trace = cov.trace();
    if trace > 0.0 {
        cov / trace
    } else {
        cov
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Two classes whose variance lives on different channels.
    fn lateralized(trials_per_class: usize) -> (Array4<f64>, Vec<Label>) {
        let mut rng = StdRng::seed_from_u64(7);
        let n = 2 * trials_per_class;
        let mut x = Array4::<f64>::zeros((n, 1, 3, 200));
        let mut y = Vec::with_capacity(n);
        for t in 0..n {
            let label = if t < trials_per_class { Label::LeftHand } else { Label::RightHand };
            let gains = match label {
                Label::LeftHand => [3.0, 1.0, 0.3],
                Label::RightHand => [0.3, 1.0, 3.0],
            };
            for c in 0..3 {
                for s in 0..200 {
                    x[[t, 0, c, s]] = gains[c] * (rng.gen::<f64>() - 0.5);
                }
            }
            y.push(label);
        }
        (x, y)
    }

    #[test]
    fn test_csp_separates_variance() {
        let (x, y) = lateralized(10);
        let mut adapter = SpatialFilterAdapter::new(Csp::new(2));
        let out = adapter.fit_transform(x.view(), &y).unwrap();
        assert_eq!(out.dim(), (20, 1, 2, 200));

        let var = |t: usize, k: usize| {
            let lane = out.slice(ndarray::s![t, 0, k, ..]);
            lane.iter().map(|v| v * v).sum::<f64>() / lane.len() as f64
        };
        let left_first: f64 = (0..10).map(|t| var(t, 0) / var(t, 1)).sum::<f64>() / 10.0;
        let right_first: f64 = (10..20).map(|t| var(t, 0) / var(t, 1)).sum::<f64>() / 10.0;
        assert!(left_first > right_first);
    }

    #[test]
    fn test_csp_requires_both_classes() {
        let (x, _) = lateralized(5);
        let y = vec![Label::LeftHand; 10];
        let mut csp = Csp::new(2);
        let err = csp.fit(x.view(), &y).unwrap_err();
        assert!(matches!(err, PipelineError::ModelFit { model: "CSP", .. }));
    }

    #[test]
    fn test_components_capped_by_channels() {
        let (x, y) = lateralized(5);
        let mut adapter = SpatialFilterAdapter::new(Csp::new(8));
        let out = adapter.fit_transform(x.view(), &y).unwrap();
        assert_eq!(out.dim().2, 3);
    }

    struct DroppingFilter;

    impl SpatialFilter for DroppingFilter {
        fn fit(&mut self, _x: ArrayView4<'_, f64>, _y: &[Label]) -> PipelineResult<()> {
            Ok(())
        }

        fn transform(&self, x: ArrayView4<'_, f64>) -> PipelineResult<Array4<f64>> {
            let (t, b, c, s) = x.dim();
            Ok(Array4::zeros((t - 1, b, c, s)))
        }

        fn name(&self) -> &'static str {
            "dropping"
        }
    }

    #[test]
    fn test_adapter_rejects_trial_loss() {
        let x = Array4::<f64>::zeros((4, 1, 2, 10));
        let y = vec![Label::LeftHand, Label::RightHand, Label::LeftHand, Label::RightHand];
        let mut adapter = SpatialFilterAdapter::new(DroppingFilter);
        let err = adapter.fit_transform(x.view(), &y).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ContractViolation { collaborator: "dropping", .. }
        ));
    }

    #[test]
    fn test_adapter_rejects_label_mismatch() {
        let x = Array4::<f64>::zeros((4, 1, 2, 10));
        let mut adapter = SpatialFilterAdapter::new(Csp::new(2));
        let err = adapter.fit(x.view(), &[Label::LeftHand]).unwrap_err();
        assert!(matches!(err, PipelineError::Shape(ShapeError::Mismatch { .. })));
    }
}
