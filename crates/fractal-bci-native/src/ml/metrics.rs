//! Evaluation metrics
//!
//! Accuracy and Cohen's kappa over prediction rows, per fold and per subject,
//! plus the serializable summaries written next to the result tables.

use serde::{Deserialize, Serialize};

use fractal_bci_core::{math, Label, PredictionRow};

/// Fraction of rows whose predicted class matches the true label
#[must_use]
pub fn accuracy(rows: &[PredictionRow]) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    rows.iter().filter(|r| r.is_correct()).count() as f64 / rows.len() as f64
}

/// Cohen's kappa between predicted and true labels.
///
/// Returns 0 when the expected agreement is 1 (a single class everywhere).
#[must_use]
pub fn cohen_kappa(rows: &[PredictionRow]) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    let n = rows.len() as f64;
    let observed = accuracy(rows);

    let expected: f64 = Label::ALL
        .iter()
        .map(|&class| {
            let truth = rows.iter().filter(|r| r.true_label == class).count() as f64 / n;
            let predicted = rows.iter().filter(|r| r.predicted() == class).count() as f64 / n;
            truth * predicted
        })
        .sum();

    if (1.0 - expected).abs() < f64::EPSILON {
        0.0
    } else {
        (observed - expected) / (1.0 - expected)
    }
}

/// Mean probability assigned to the true class
#[must_use]
pub fn mean_correct_prob(rows: &[PredictionRow]) -> f64 {
    let probs: Vec<f64> = rows.iter().map(PredictionRow::correct_prob).collect();
    math::mean(&probs)
}

/// Metrics of one cross-validation fold
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FoldMetrics {
    /// Fold index
    pub fold: usize,
    /// Held-out trials
    pub n_trials: usize,
    /// Held-out accuracy
    pub accuracy: f64,
    /// Held-out Cohen's kappa
    pub kappa: f64,
}

impl FoldMetrics {
    /// Metrics for each fold present in `rows`, ascending by fold
    #[must_use]
    pub fn per_fold(rows: &[PredictionRow]) -> Vec<Self> {
        let mut folds: Vec<usize> = rows.iter().map(|r| r.fold).collect();
        folds.sort_unstable();
        folds.dedup();

        folds
            .into_iter()
            .map(|fold| {
                let held_out: Vec<PredictionRow> = rows.iter().filter(|r| r.fold == fold).cloned().collect();
                Self {
                    fold,
                    n_trials: held_out.len(),
                    accuracy: accuracy(&held_out),
                    kappa: cohen_kappa(&held_out),
                }
            })
            .collect()
    }
}

/// Summary of one processed subject
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubjectSummary {
    /// Subject identifier
    pub subject_id: u32,
    /// Rows in the final table
    pub n_trials: usize,
    /// Held-out accuracy before refinement
    pub cv_accuracy: f64,
    /// Held-out kappa before refinement
    pub cv_kappa: f64,
    /// Mean of the fold accuracies
    pub fold_accuracy_mean: f64,
    /// Population standard deviation of the fold accuracies
    pub fold_accuracy_std: f64,
    /// Accuracy of the final table (in-sample when refined)
    pub final_accuracy: f64,
    /// Whether the final table was refined in-sample
    pub refined: bool,
    /// Folds that could not be fitted
    pub failed_folds: usize,
    /// Held-out (trial, band, component) signals with degenerate fractal
    /// descriptors
    pub degenerate_signals: usize,
    /// Per-fold metrics
    pub folds: Vec<FoldMetrics>,
}

/// A subject that produced no table
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Subject identifier
    pub subject_id: u32,
    /// Skipped for too few trials rather than failed
    pub skipped: bool,
    /// Error description
    pub error: String,
}

/// Summary of a batch run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Pipeline variant name
    pub variant: String,
    /// Subjects that completed, in subject order
    pub subjects: Vec<SubjectSummary>,
    /// Subjects that failed or were skipped
    pub failures: Vec<FailureRecord>,
    /// Rows in the combined table
    pub combined_rows: usize,
    /// Accuracy of the combined table
    pub combined_accuracy: f64,
    /// Mean probability of the true class in the combined table
    pub mean_correct_prob: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fold: usize, label: Label, left: f64) -> PredictionRow {
        PredictionRow::new(1, fold, label, left, 1.0 - left)
    }

    #[test]
    fn test_accuracy_and_kappa() {
        let rows = vec![
            row(0, Label::LeftHand, 0.8),
            row(0, Label::RightHand, 0.3),
            row(1, Label::LeftHand, 0.2),
            row(1, Label::RightHand, 0.1),
        ];
        assert!((accuracy(&rows) - 0.75).abs() < 1e-12);
        // p_o = 0.75, p_e = 0.5 * 0.25 + 0.5 * 0.75 = 0.5
        assert!((cohen_kappa(&rows) - 0.5).abs() < 1e-12);
        assert!((mean_correct_prob(&rows) - (0.8 + 0.7 + 0.2 + 0.9) / 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_kappa_single_class() {
        let rows = vec![row(0, Label::LeftHand, 0.9), row(0, Label::LeftHand, 0.6)];
        assert_eq!(cohen_kappa(&rows), 0.0);
        assert_eq!(cohen_kappa(&[]), 0.0);
    }

    #[test]
    fn test_per_fold() {
        let rows = vec![
            row(2, Label::LeftHand, 0.8),
            row(0, Label::RightHand, 0.3),
            row(2, Label::LeftHand, 0.2),
        ];
        let folds = FoldMetrics::per_fold(&rows);
        assert_eq!(folds.len(), 2);
        assert_eq!(folds[0].fold, 0);
        assert_eq!(folds[1].n_trials, 2);
        assert!((folds[1].accuracy - 0.5).abs() < 1e-12);
    }
}
