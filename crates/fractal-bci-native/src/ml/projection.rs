//! Principal component projection

use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::error::{PipelineError, PipelineResult, ShapeError};

/// PCA onto the leading `n_components` directions.
///
/// Components are eigenvectors of the unbiased sample covariance, ordered by
/// decreasing eigenvalue. Each component's sign is fixed so that its largest
/// absolute loading is positive, which makes the projection deterministic.
#[derive(Clone, Debug)]
pub struct Pca {
    n_components: usize,
    mean: Option<Array1<f64>>,
    /// `(component, feature)`
    components: Option<Array2<f64>>,
    explained_variance: Vec<f64>,
}

impl Pca {
    /// Create an unfitted PCA
    #[must_use]
    pub fn new(n_components: usize) -> Self {
        Self { n_components, mean: None, components: None, explained_variance: Vec::new() }
    }

    /// Fit on `(row, feature)` data
    ///
    /// # Errors
    ///
    /// Returns a model-fit error with fewer than two rows or more components
    /// than features.
    pub fn fit(&mut self, x: ArrayView2<'_, f64>) -> PipelineResult<()> {
        let (n, d) = x.dim();
        if n < 2 {
            return Err(PipelineError::model_fit("PCA", format!("need at least 2 rows, got {n}")));
        }
        if self.n_components == 0 || self.n_components > d {
            return Err(PipelineError::model_fit(
                "PCA",
                format!("cannot keep {} components of {d} features", self.n_components),
            ));
        }

        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| PipelineError::model_fit("PCA", "no rows"))?;
        let centered = &x - &mean;
        let cov = centered.t().dot(&centered) / (n - 1) as f64;

        let eig = SymmetricEigen::new(DMatrix::from_fn(d, d, |i, j| cov[[i, j]]));
        let mut order: Vec<usize> = (0..d).collect();
        order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));

        let mut components = Array2::zeros((self.n_components, d));
        for (k, &idx) in order.iter().take(self.n_components).enumerate() {
            let v = eig.eigenvectors.column(idx);
            let pivot = v.iter().copied().fold(0.0_f64, |acc, x| if x.abs() > acc.abs() { x } else { acc });
            let sign = if pivot < 0.0 { -1.0 } else { 1.0 };
            for j in 0..d {
                components[[k, j]] = sign * v[j];
            }
        }

        self.explained_variance = order
            .iter()
            .take(self.n_components)
            .map(|&idx| eig.eigenvalues[idx].max(0.0))
            .collect();
        self.mean = Some(mean);
        self.components = Some(components);
        Ok(())
    }

    /// Project rows onto the fitted components
    ///
    /// # Errors
    ///
    /// Returns a model-fit error if unfitted, or a shape error on a feature
    /// count mismatch.
    pub fn transform(&self, x: ArrayView2<'_, f64>) -> PipelineResult<Array2<f64>> {
        let (Some(mean), Some(components)) = (&self.mean, &self.components) else {
            return Err(PipelineError::model_fit("PCA", "transform called before fit"));
        };
        if x.ncols() != mean.len() {
            return Err(ShapeError::Mismatch {
                what: "PCA feature count",
                expected: mean.len(),
                got: x.ncols(),
            }
            .into());
        }
        Ok((&x - mean).dot(&components.t()))
    }

    /// Fit on `x` and project it
    ///
    /// # Errors
    ///
    /// See [`Self::fit`].
    pub fn fit_transform(&mut self, x: ArrayView2<'_, f64>) -> PipelineResult<Array2<f64>> {
        self.fit(x.view())?;
        self.transform(x)
    }

    /// Variance along each kept component
    #[must_use]
    pub fn explained_variance(&self) -> &[f64] {
        &self.explained_variance
    }
}
