//! Feature assembly from spatially filtered trials
//!
//! Each trial of a `(trial, band, component, sample)` tensor becomes one row.
//! Signals are visited band-major, component-minor and centered before
//! extraction, so train and test rows always share the same column order.

use ndarray::{Array2, Array3, ArrayView3, ArrayView4, Axis};
use rayon::prelude::*;

use fractal_bci_core::math::{self, constants::LOG_POWER_EPSILON};
use fractal_bci_core::FeatureKind;

use crate::error::{PipelineResult, ShapeError};
use crate::processing::fractal::HiguchiEstimator;

/// Per-trial feature rows with degeneracy bookkeeping
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureMatrix {
    /// `(trial, feature)` values
    pub values: Array2<f64>,
    /// `(trial, band, component)` mask of signals whose fractal descriptor
    /// fell back to zeros
    pub degenerate: Array3<bool>,
}

impl FeatureMatrix {
    /// Total number of degenerate signals
    #[must_use]
    pub fn degenerate_signals(&self) -> usize {
        self.degenerate.iter().filter(|&&d| d).count()
    }

    /// Degenerate signals of each trial
    #[must_use]
    pub fn degenerate_per_trial(&self) -> Vec<usize> {
        self.degenerate.outer_iter().map(|t| t.iter().filter(|&&d| d).count()).collect()
    }

    /// Number of feature columns
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.values.ncols()
    }
}

/// Turns spatial components into flat feature vectors.
#[derive(Copy, Clone, Debug)]
pub struct FeatureAssembler {
    kind: FeatureKind,
    estimator: HiguchiEstimator,
}

impl FeatureAssembler {
    /// Create an assembler for the given feature kind
    #[must_use]
    pub fn new(kind: FeatureKind, estimator: HiguchiEstimator) -> Self {
        Self { kind, estimator }
    }

    /// Expected row length for a given band and component count
    #[must_use]
    pub const fn row_len(&self, bands: usize, components: usize) -> usize {
        self.kind.width() * bands * components
    }

    /// Assemble one row per trial.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::FeatureLength`] when trials produce rows of
    /// different lengths.
    pub fn assemble(&self, x: ArrayView4<'_, f64>) -> PipelineResult<FeatureMatrix> {
        let (n_trials, n_bands, n_components, _) = x.dim();
        let rows: Vec<(Vec<f64>, Vec<bool>)> = (0..n_trials)
            .into_par_iter()
            .map(|t| self.trial_row(x.index_axis(Axis(0), t)))
            .collect();

        let (rows, flags): (Vec<Vec<f64>>, Vec<Vec<bool>>) = rows.into_iter().unzip();
        let degenerate = Array3::from_shape_vec((n_trials, n_bands, n_components), flags.concat())
            .map_err(|_| ShapeError::Mismatch {
                what: "degeneracy mask size",
                expected: n_trials * n_bands * n_components,
                got: flags.iter().map(Vec::len).sum(),
            })?;
        let values = stack_rows(rows)?;

        let matrix = FeatureMatrix { values, degenerate };
        let count = matrix.degenerate_signals();
        if count > 0 {
            tracing::debug!(
                "{} of {} signals produced degenerate fractal descriptors",
                count,
                n_trials * n_bands * n_components
            );
        }
        Ok(matrix)
    }

    /// Features of one `(band, component, sample)` trial and the
    /// band-major degeneracy flags of its signals
    fn trial_row(&self, trial: ArrayView3<'_, f64>) -> (Vec<f64>, Vec<bool>) {
        let (bands, components, _) = trial.dim();
        let mut row = Vec::with_capacity(self.row_len(bands, components));
        let mut degenerate = Vec::with_capacity(bands * components);

        for band in trial.outer_iter() {
            for component in band.outer_iter() {
                let mut signal = component.to_vec();
                let m = math::mean(&signal);
                signal.iter_mut().for_each(|v| *v -= m);

                match self.kind {
                    FeatureKind::Fractal => {
                        let descriptor = self.estimator.estimate(&signal);
                        degenerate.push(descriptor.is_degenerate());
                        row.extend_from_slice(&descriptor.values());
                    }
                    FeatureKind::LogPower => {
                        degenerate.push(false);
                        row.push((math::variance(&signal) + LOG_POWER_EPSILON).ln());
                    }
                }
            }
        }
        (row, degenerate)
    }
}

/// Stack per-trial rows into a matrix.
///
/// # Errors
///
/// Returns [`ShapeError::FeatureLength`] naming the first row whose length
/// differs from the first row's.
pub fn stack_rows(rows: Vec<Vec<f64>>) -> Result<Array2<f64>, ShapeError> {
    let expected = rows.first().map_or(0, Vec::len);
    if let Some((trial, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != expected) {
        return Err(ShapeError::FeatureLength { trial, got: row.len(), expected });
    }

    let n = rows.len();
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((n, expected), flat).map_err(|_| ShapeError::Mismatch {
        what: "feature matrix size",
        expected: n * expected,
        got: 0,
    })
}
