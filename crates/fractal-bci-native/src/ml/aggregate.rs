//! Per-subject result aggregation and refinement
//!
//! [`ResultAggregator`] collects fold predictions into a [`SubjectResult`]
//! ordered by trial index. [`refine`] is an optional in-sample recalibration
//! of the probability columns.

use ndarray::Array2;

use fractal_bci_core::{Label, PredictionRow, SubjectResult};

use crate::error::{PipelineError, PipelineResult};
use crate::ml::classifier::{ProbabilisticClassifier, Qda};
use crate::ml::cv::{check_probabilities, FoldPrediction};
use crate::ml::projection::Pca;
use crate::ml::scaler::StandardScaler;

/// Collects fold predictions for one subject.
#[derive(Clone, Debug)]
pub struct ResultAggregator {
    subject_id: u32,
    labels: Vec<Label>,
    slots: Vec<Option<PredictionRow>>,
}

impl ResultAggregator {
    /// Create an aggregator for a subject with the given trial labels
    #[must_use]
    pub fn new(subject_id: u32, labels: &[Label]) -> Self {
        Self { subject_id, labels: labels.to_vec(), slots: vec![None; labels.len()] }
    }

    /// Record one held-out prediction.
    ///
    /// # Errors
    ///
    /// Returns a contract violation for an unknown trial or a trial that was
    /// already held out by another fold.
    pub fn push(&mut self, prediction: FoldPrediction) -> PipelineResult<()> {
        let FoldPrediction { fold, trial, probs } = prediction;
        let Some(slot) = self.slots.get_mut(trial) else {
            return Err(PipelineError::contract(
                "cross-validator",
                format!("trial {trial} out of range for {} trials", self.labels.len()),
            ));
        };
        if let Some(previous) = slot {
            return Err(PipelineError::contract(
                "cross-validator",
                format!("trial {trial} held out by folds {} and {fold}", previous.fold),
            ));
        }
        *slot = Some(PredictionRow::new(self.subject_id, fold, self.labels[trial], probs[0], probs[1]));
        Ok(())
    }

    /// Record every prediction of a fold run
    ///
    /// # Errors
    ///
    /// See [`Self::push`].
    pub fn extend(&mut self, predictions: impl IntoIterator<Item = FoldPrediction>) -> PipelineResult<()> {
        predictions.into_iter().try_for_each(|p| self.push(p))
    }

    /// Number of trials without a prediction (held out by a failed fold)
    #[must_use]
    pub fn missing(&self) -> usize {
        self.slots.iter().filter(|s| s.is_none()).count()
    }

    /// Rows in trial order; trials of failed folds are omitted
    #[must_use]
    pub fn finish(self) -> SubjectResult {
        SubjectResult::new(self.subject_id, self.slots.into_iter().flatten().collect())
    }
}

/// In-sample recalibration of a completed result.
///
/// The `[left, right]` columns are standardized, projected onto their first
/// principal component, and a regularized QDA is fitted on that projection
/// against the true labels. Its predictions on the same rows replace the
/// probability columns.
///
/// The refitted probabilities are scored on the rows they were fitted on, so
/// accuracies computed from them are optimistic and are not held-out
/// estimates.
///
/// # Errors
///
/// Returns a model-fit error when a class has fewer than two rows.
pub fn refine(result: &SubjectResult, reg_param: f64) -> PipelineResult<SubjectResult> {
    let rows = result.rows();
    let probs = Array2::from_shape_fn((rows.len(), 2), |(i, j)| rows[i].probs()[j]);
    let labels: Vec<Label> = rows.iter().map(|r| r.true_label).collect();

    let z = StandardScaler::new().fit_transform(probs.view())?;
    let projected = Pca::new(1).fit_transform(z.view())?;

    let mut qda = Qda::new(reg_param);
    qda.fit(projected.view(), &labels)?;
    let refit = qda.predict_proba(projected.view())?;

    let refined = rows
        .iter()
        .zip(refit.outer_iter())
        .map(|(row, p)| {
            check_probabilities([p[0], p[1]])?;
            Ok(PredictionRow { left_prob: p[0], right_prob: p[1], ..row.clone() })
        })
        .collect::<PipelineResult<Vec<_>>>()?;

    Ok(SubjectResult::new(result.subject_id(), refined))
}

/// Concatenate subject results in the given order into one table
#[must_use]
pub fn combine<'a>(results: impl IntoIterator<Item = &'a SubjectResult>) -> Vec<PredictionRow> {
    results.into_iter().flat_map(|r| r.rows().iter().cloned()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(fold: usize, trial: usize, left: f64) -> FoldPrediction {
        FoldPrediction { fold, trial, probs: [left, 1.0 - left] }
    }

    #[test]
    fn test_rows_ordered_by_trial() {
        let labels = [Label::LeftHand, Label::RightHand, Label::LeftHand, Label::RightHand];
        let mut agg = ResultAggregator::new(3, &labels);
        agg.extend([prediction(1, 3, 0.2), prediction(0, 0, 0.9), prediction(1, 1, 0.4), prediction(0, 2, 0.6)])
            .unwrap();
        assert_eq!(agg.missing(), 0);

        let result = agg.finish();
        let folds: Vec<usize> = result.rows().iter().map(|r| r.fold).collect();
        assert_eq!(folds, vec![0, 1, 0, 1]);
        assert_eq!(result.rows()[3].true_label, Label::RightHand);
        assert!((result.accuracy() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_duplicate_trial_rejected() {
        let labels = [Label::LeftHand, Label::RightHand];
        let mut agg = ResultAggregator::new(1, &labels);
        agg.push(prediction(0, 1, 0.3)).unwrap();
        assert!(matches!(
            agg.push(prediction(2, 1, 0.3)),
            Err(PipelineError::ContractViolation { collaborator: "cross-validator", .. })
        ));
        assert!(agg.push(prediction(0, 5, 0.3)).is_err());
        assert_eq!(agg.missing(), 1);
        assert_eq!(agg.finish().len(), 1);
    }

    #[test]
    fn test_refine_keeps_identity_and_validity() {
        let lefts = [0.9, 0.7, 0.55, 0.45, 0.2, 0.35, 0.6, 0.1];
        let rows: Vec<PredictionRow> = lefts
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                let label = if i % 2 == 0 { Label::LeftHand } else { Label::RightHand };
                PredictionRow::new(9, i % 4, label, p, 1.0 - p)
            })
            .collect();
        let result = SubjectResult::new(9, rows);

        let refined = refine(&result, 0.1).unwrap();
        assert_eq!(refined.len(), result.len());
        for (before, after) in result.rows().iter().zip(refined.rows()) {
            assert_eq!(before.subject_id, after.subject_id);
            assert_eq!(before.fold, after.fold);
            assert_eq!(before.true_label, after.true_label);
            assert!((after.left_prob + after.right_prob - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_combine_in_subject_order() {
        let a = SubjectResult::new(1, vec![PredictionRow::new(1, 0, Label::LeftHand, 0.8, 0.2)]);
        let b = SubjectResult::new(2, vec![
            PredictionRow::new(2, 0, Label::RightHand, 0.1, 0.9),
            PredictionRow::new(2, 1, Label::LeftHand, 0.6, 0.4),
        ]);
        let combined = combine([&a, &b]);
        let ids: Vec<u32> = combined.iter().map(|r| r.subject_id).collect();
        assert_eq!(ids, vec![1, 2, 2]);
    }
}
