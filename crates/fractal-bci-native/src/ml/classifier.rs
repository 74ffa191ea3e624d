//! Probabilistic two-class classifiers
//!
//! - [`Lda`]: linear discriminant with a pooled covariance, used per fold
//! - [`Qda`]: regularized quadratic discriminant, used for refinement
//!
//! Both return `(row, class)` probability matrices whose rows sum to 1.

use nalgebra::{DMatrix, DVector};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use fractal_bci_core::math::softmax2;
use fractal_bci_core::Label;

use crate::error::{PipelineError, PipelineResult, ShapeError};

/// Classifier collaborator contract.
pub trait ProbabilisticClassifier: Send {
    /// Fit on `(row, feature)` data
    ///
    /// # Errors
    ///
    /// Returns a model-fit error when the data cannot support the model.
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: &[Label]) -> PipelineResult<()>;

    /// Class probabilities `[left, right]` per row
    ///
    /// # Errors
    ///
    /// Returns a model-fit error when unfitted.
    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> PipelineResult<Array2<f64>>;

    /// Name used in error messages
    fn name(&self) -> &'static str;
}

/// Classifier selection
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    /// Linear discriminant analysis
    Lda,
    /// Quadratic discriminant analysis with covariance shrinkage
    Qda {
        /// Weight of the identity in the class covariances
        reg_param: f64,
    },
}

impl ClassifierKind {
    /// Build a fresh, unfitted classifier
    #[must_use]
    pub fn build(self) -> Box<dyn ProbabilisticClassifier> {
        match self {
            Self::Lda => Box::new(Lda::new()),
            Self::Qda { reg_param } => Box::new(Qda::new(reg_param)),
        }
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

fn to_matrix(x: &ArrayView2<'_, f64>) -> DMatrix<f64> {
    DMatrix::from_fn(x.nrows(), x.ncols(), |i, j| x[[i, j]])
}

/// Per-class row indices, rejecting a missing class
fn split_classes(model: &'static str, n_rows: usize, y: &[Label]) -> PipelineResult<[Vec<usize>; 2]> {
    if y.len() != n_rows {
        return Err(ShapeError::Mismatch { what: "label count", expected: n_rows, got: y.len() }.into());
    }
    let mut classes = [Vec::new(), Vec::new()];
    for (i, label) in y.iter().enumerate() {
        classes[label.index()].push(i);
    }
    if let Some(label) = Label::ALL.into_iter().find(|l| classes[l.index()].is_empty()) {
        return Err(PipelineError::model_fit(model, format!("no training rows of class {label}")));
    }
    Ok(classes)
}

fn class_mean(x: &DMatrix<f64>, rows: &[usize]) -> DVector<f64> {
    let mut mean = DVector::zeros(x.ncols());
    for &r in rows {
        mean += x.row(r).transpose();
    }
    mean / rows.len() as f64
}

/// Scatter matrix `sum (x - mean)(x - mean)^T` over the given rows
fn scatter(x: &DMatrix<f64>, rows: &[usize], mean: &DVector<f64>) -> DMatrix<f64> {
    let mut s = DMatrix::zeros(x.ncols(), x.ncols());
    for &r in rows {
        let d = x.row(r).transpose() - mean;
        s += &d * d.transpose();
    }
    s
}

fn check_columns(model: &'static str, expected: usize, x: &ArrayView2<'_, f64>) -> PipelineResult<()> {
    if x.ncols() != expected {
        return Err(ShapeError::Mismatch { what: model, expected, got: x.ncols() }.into());
    }
    Ok(())
}

fn proba_from_scores(scores: impl Iterator<Item = [f64; 2]>, n: usize) -> Array2<f64> {
    let mut out = Array2::zeros((n, 2));
    for (i, [a, b]) in scores.enumerate() {
        let p = softmax2(a, b);
        out[[i, 0]] = p[0];
        out[[i, 1]] = p[1];
    }
    out
}

// ============================================================================
// LDA
// ============================================================================

#[derive(Clone, Debug)]
struct LdaModel {
    /// Per class: coefficient vector
    coef: [DVector<f64>; 2],
    /// Per class: intercept including the log prior
    intercept: [f64; 2],
}

/// Linear discriminant analysis.
///
/// The pooled within-class covariance is inverted with an SVD
/// pseudo-inverse, so collinear features do not fail the fit.
#[derive(Clone, Debug, Default)]
pub struct Lda {
    model: Option<LdaModel>,
}

impl Lda {
    /// Singular values below this fraction of the largest are discarded
    const RCOND: f64 = 1e-10;

    /// Create an unfitted LDA
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProbabilisticClassifier for Lda {
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: &[Label]) -> PipelineResult<()> {
        let classes = split_classes("LDA", x.nrows(), y)?;
        let n = x.nrows();
        let xm = to_matrix(&x);

        let means = [class_mean(&xm, &classes[0]), class_mean(&xm, &classes[1])];
        let pooled = (scatter(&xm, &classes[0], &means[0]) + scatter(&xm, &classes[1], &means[1]))
            / n.saturating_sub(2).max(1) as f64;

        let svd = pooled.svd(true, true);
        let tol = svd.singular_values.max() * Self::RCOND;
        let precision = svd
            .pseudo_inverse(tol)
            .map_err(|e| PipelineError::model_fit("LDA", e))?;

        let mut coef = [DVector::zeros(0), DVector::zeros(0)];
        let mut intercept = [0.0; 2];
        for label in Label::ALL {
            let c = label.index();
            let prior = classes[c].len() as f64 / n as f64;
            let w = &precision * &means[c];
            intercept[c] = -0.5 * means[c].dot(&w) + prior.ln();
            coef[c] = w;
        }

        self.model = Some(LdaModel { coef, intercept });
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> PipelineResult<Array2<f64>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| PipelineError::model_fit("LDA", "predict called before fit"))?;
        check_columns("LDA feature count", model.coef[0].len(), &x)?;

        let scores = x.outer_iter().map(|row| {
            let mut s = model.intercept;
            for (c, score) in s.iter_mut().enumerate() {
                *score += row.iter().zip(model.coef[c].iter()).map(|(a, b)| a * b).sum::<f64>();
            }
            s
        });
        Ok(proba_from_scores(scores, x.nrows()))
    }

    fn name(&self) -> &'static str {
        "LDA"
    }
}

// ============================================================================
// QDA
// ============================================================================

#[derive(Clone, Debug)]
struct QdaClass {
    mean: DVector<f64>,
    /// Cholesky factor of the regularized covariance
    chol: nalgebra::Cholesky<f64, nalgebra::Dyn>,
    log_det: f64,
    log_prior: f64,
}

/// Quadratic discriminant analysis with covariance regularization.
///
/// Each class covariance is `(1 - reg_param) * S + reg_param * I`, with `S`
/// the unbiased sample covariance.
#[derive(Clone, Debug)]
pub struct Qda {
    reg_param: f64,
    classes: Option<[QdaClass; 2]>,
}

impl Qda {
    /// Create an unfitted QDA
    #[must_use]
    pub fn new(reg_param: f64) -> Self {
        Self { reg_param, classes: None }
    }

    fn fit_class(&self, xm: &DMatrix<f64>, rows: &[usize], n: usize) -> PipelineResult<QdaClass> {
        if rows.len() < 2 {
            return Err(PipelineError::model_fit(
                "QDA",
                format!("class covariance needs at least 2 rows, got {}", rows.len()),
            ));
        }
        let d = xm.ncols();
        let mean = class_mean(xm, rows);
        let cov = scatter(xm, rows, &mean) / (rows.len() - 1) as f64;
        let reg = cov * (1.0 - self.reg_param) + DMatrix::identity(d, d) * self.reg_param;

        let chol = reg
            .cholesky()
            .ok_or_else(|| PipelineError::model_fit("QDA", "class covariance is not positive definite"))?;
        let log_det = 2.0 * chol.l().diagonal().iter().map(|v| v.ln()).sum::<f64>();

        Ok(QdaClass { mean, chol, log_det, log_prior: (rows.len() as f64 / n as f64).ln() })
    }
}

impl ProbabilisticClassifier for Qda {
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: &[Label]) -> PipelineResult<()> {
        let classes = split_classes("QDA", x.nrows(), y)?;
        let xm = to_matrix(&x);
        let n = x.nrows();
        self.classes = Some([
            self.fit_class(&xm, &classes[0], n)?,
            self.fit_class(&xm, &classes[1], n)?,
        ]);
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> PipelineResult<Array2<f64>> {
        let classes = self
            .classes
            .as_ref()
            .ok_or_else(|| PipelineError::model_fit("QDA", "predict called before fit"))?;
        check_columns("QDA feature count", classes[0].mean.len(), &x)?;

        let scores = x.outer_iter().map(|row| {
            let v = DVector::from_iterator(row.len(), row.iter().copied());
            let mut s = [0.0; 2];
            for (c, class) in classes.iter().enumerate() {
                let diff = &v - &class.mean;
                let mahalanobis = diff.dot(&class.chol.solve(&diff));
                s[c] = -0.5 * (class.log_det + mahalanobis) + class.log_prior;
            }
            s
        });
        Ok(proba_from_scores(scores, x.nrows()))
    }

    fn name(&self) -> &'static str {
        "QDA"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_blobs() -> (Array2<f64>, Vec<Label>) {
        let x = array![
            [0.0, 0.1],
            [0.2, -0.1],
            [-0.1, 0.0],
            [0.1, 0.2],
            [2.0, 2.1],
            [2.2, 1.9],
            [1.9, 2.0],
            [2.1, 2.2],
        ];
        let y = [[Label::LeftHand; 4], [Label::RightHand; 4]].concat();
        (x, y)
    }

    fn assert_valid(p: &Array2<f64>) {
        for row in p.outer_iter() {
            assert!((row[0] + row[1] - 1.0).abs() < 1e-12);
            assert!(row.iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn test_lda_separates_blobs() {
        let (x, y) = two_blobs();
        let mut lda = Lda::new();
        lda.fit(x.view(), &y).unwrap();
        let p = lda.predict_proba(array![[0.0, 0.0], [2.0, 2.0]].view()).unwrap();
        assert_valid(&p);
        assert!(p[[0, 0]] > 0.9);
        assert!(p[[1, 1]] > 0.9);
    }

    #[test]
    fn test_lda_handles_collinear_features() {
        let (x, y) = two_blobs();
        // Duplicate column makes the pooled covariance singular
        let x = ndarray::concatenate![ndarray::Axis(1), x, x.column(0).insert_axis(ndarray::Axis(1))];
        let mut lda = Lda::new();
        lda.fit(x.view(), &y).unwrap();
        let p = lda.predict_proba(x.view()).unwrap();
        assert_valid(&p);
        assert!(p[[0, 0]] > 0.5);
        assert!(p[[7, 1]] > 0.5);
    }

    #[test]
    fn test_qda_separates_by_spread() {
        // Same mean, different spread
        let x = array![[-0.1], [0.1], [-0.05], [0.05], [-3.0], [3.0], [-2.5], [2.5]];
        let y = [[Label::LeftHand; 4], [Label::RightHand; 4]].concat();
        let mut qda = Qda::new(0.1);
        qda.fit(x.view(), &y).unwrap();
        let p = qda.predict_proba(array![[0.0], [4.0]].view()).unwrap();
        assert_valid(&p);
        assert!(p[[0, 0]] > 0.5);
        assert!(p[[1, 1]] > 0.5);
    }

    #[test]
    fn test_missing_class_fails_fit() {
        let x = array![[0.0], [1.0], [2.0]];
        let y = vec![Label::RightHand; 3];
        for kind in [ClassifierKind::Lda, ClassifierKind::Qda { reg_param: 0.1 }] {
            let mut model = kind.build();
            let err = model.fit(x.view(), &y).unwrap_err();
            assert!(matches!(err, PipelineError::ModelFit { .. }), "{}", model.name());
        }
    }

    #[test]
    fn test_predict_before_fit() {
        let lda = Lda::new();
        assert!(lda.predict_proba(array![[1.0]].view()).is_err());
    }
}
