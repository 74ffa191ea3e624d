//! Column standardization
//!
//! Statistics are fitted on training rows only and then applied unchanged to
//! any other rows.

use ndarray::{Array1, Array2, ArrayView2, Axis};

use fractal_bci_core::math::constants::SCALE_EPSILON;

use crate::error::{PipelineError, PipelineResult, ShapeError};

/// Zero-mean, unit-variance column scaler
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StandardScaler {
    mean: Option<Array1<f64>>,
    scale: Option<Array1<f64>>,
}

impl StandardScaler {
    /// Create an unfitted scaler
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fit column means and population standard deviations.
    ///
    /// Columns with a standard deviation below [`SCALE_EPSILON`] get a scale
    /// of 1.
    ///
    /// # Errors
    ///
    /// Returns a model-fit error for an empty matrix.
    pub fn fit(&mut self, x: ArrayView2<'_, f64>) -> PipelineResult<()> {
        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| PipelineError::model_fit("StandardScaler", "no rows to fit"))?;
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s < SCALE_EPSILON { 1.0 } else { s });
        self.mean = Some(mean);
        self.scale = Some(scale);
        Ok(())
    }

    /// Apply the fitted statistics
    ///
    /// # Errors
    ///
    /// Returns a model-fit error if unfitted, or a shape error when the
    /// column count differs from the fitted one.
    pub fn transform(&self, x: ArrayView2<'_, f64>) -> PipelineResult<Array2<f64>> {
        let (Some(mean), Some(scale)) = (&self.mean, &self.scale) else {
            return Err(PipelineError::model_fit("StandardScaler", "transform called before fit"));
        };
        if x.ncols() != mean.len() {
            return Err(ShapeError::Mismatch {
                what: "scaler column count",
                expected: mean.len(),
                got: x.ncols(),
            }
            .into());
        }
        Ok((&x - mean) / scale)
    }

    /// Fit on `x` and transform it
    ///
    /// # Errors
    ///
    /// See [`Self::fit`].
    pub fn fit_transform(&mut self, x: ArrayView2<'_, f64>) -> PipelineResult<Array2<f64>> {
        self.fit(x.view())?;
        self.transform(x)
    }

    /// Fitted column means
    #[must_use]
    pub fn mean(&self) -> Option<&Array1<f64>> {
        self.mean.as_ref()
    }

    /// Fitted column scales
    #[must_use]
    pub fn scale(&self) -> Option<&Array1<f64>> {
        self.scale.as_ref()
    }
}
