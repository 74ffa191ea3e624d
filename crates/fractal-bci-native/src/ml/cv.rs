//! Stratified k-fold cross-validation
//!
//! The partition is a pure function of `(labels, folds, seed)`. Every fold
//! builds its own models through [`FoldModel::fit_predict`], so folds can run
//! on separate threads without sharing state.

use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;

use fractal_bci_core::math::constants::PROBABILITY_TOLERANCE;
use fractal_bci_core::{CvConfig, Label};

use crate::error::{PipelineError, PipelineResult};
use crate::ml::classifier::ClassifierKind;
use crate::ml::scaler::StandardScaler;

/// One train/test split
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fold {
    /// Fold index
    pub index: usize,
    /// Training trial indices, ascending
    pub train: Vec<usize>,
    /// Held-out trial indices, ascending
    pub test: Vec<usize>,
}

/// Out-of-sample probabilities for one held-out trial
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FoldPrediction {
    /// Fold in which the trial was held out
    pub fold: usize,
    /// Original trial index
    pub trial: usize,
    /// `[left, right]` probabilities
    pub probs: [f64; 2],
}

/// Fold-local model: fits on the training indices only.
pub trait FoldModel: Sync {
    /// Fit on `train` and return `[left, right]` probabilities for each
    /// index of `test`, in order.
    ///
    /// # Errors
    ///
    /// Model-fit errors fail the fold; other errors fail the subject.
    fn fit_predict(&self, train: &[usize], test: &[usize]) -> PipelineResult<Vec<[f64; 2]>>;
}

/// Cross-validation output
#[derive(Debug, Default)]
pub struct CvOutcome {
    /// Predictions of every fold that succeeded
    pub predictions: Vec<FoldPrediction>,
    /// Folds that could not be fitted
    pub failed_folds: Vec<PipelineError>,
}

/// Stratified k-fold runner
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CrossValidator {
    folds: usize,
    seed: u64,
}

impl CrossValidator {
    /// Create a validator with `folds` folds and a shuffle seed
    #[must_use]
    pub const fn new(folds: usize, seed: u64) -> Self {
        Self { folds, seed }
    }

    /// Create from the configuration section
    #[must_use]
    pub const fn from_config(config: &CvConfig) -> Self {
        Self::new(config.folds, config.seed)
    }

    /// Number of folds
    #[must_use]
    pub const fn folds(&self) -> usize {
        self.folds
    }

    /// Stratified partition of the trials.
    ///
    /// Indices of each class are shuffled with one seeded generator, the
    /// classes are concatenated and position `p` goes to fold `p % K`. Every
    /// fold therefore holds `floor` or `ceil` of each class's share.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InsufficientSamples`] when there are fewer
    /// trials than folds.
    pub fn split(&self, labels: &[Label]) -> PipelineResult<Vec<Fold>> {
        let n = labels.len();
        if self.folds < 2 || n < self.folds {
            return Err(PipelineError::InsufficientSamples { got: n, need: self.folds.max(2) });
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut order = Vec::with_capacity(n);
        for class in Label::ALL {
            let mut members: Vec<usize> =
                labels.iter().enumerate().filter(|&(_, &l)| l == class).map(|(i, _)| i).collect();
            if members.len() < self.folds {
                tracing::warn!(
                    "Class {} has {} trials for {} folds; some folds will miss it",
                    class,
                    members.len(),
                    self.folds
                );
            }
            members.shuffle(&mut rng);
            order.extend(members);
        }

        let mut test_sets = vec![Vec::new(); self.folds];
        for (p, trial) in order.into_iter().enumerate() {
            test_sets[p % self.folds].push(trial);
        }

        Ok(test_sets
            .into_iter()
            .enumerate()
            .map(|(index, mut test)| {
                test.sort_unstable();
                let train = (0..n).filter(|i| test.binary_search(i).is_err()).collect();
                Fold { index, train, test }
            })
            .collect())
    }

    /// Run every fold of `model` in parallel.
    ///
    /// Folds whose model cannot be fitted are logged and omitted.
    ///
    /// # Errors
    ///
    /// Returns a shape or contract error from any fold, or the first fold
    /// error when no fold succeeded.
    pub fn run<M: FoldModel>(&self, labels: &[Label], model: &M) -> PipelineResult<CvOutcome> {
        let folds = self.split(labels)?;
        let results: Vec<PipelineResult<Vec<FoldPrediction>>> =
            folds.par_iter().map(|fold| run_fold(fold, labels, model)).collect();

        let mut outcome = CvOutcome::default();
        for result in results {
            match result {
                Ok(predictions) => outcome.predictions.extend(predictions),
                Err(err @ PipelineError::FoldFitting { .. }) => {
                    tracing::warn!("{}", err);
                    outcome.failed_folds.push(err);
                }
                Err(err) => return Err(err),
            }
        }

        if outcome.predictions.is_empty() && !outcome.failed_folds.is_empty() {
            return Err(outcome.failed_folds.swap_remove(0));
        }
        Ok(outcome)
    }
}

fn run_fold<M: FoldModel>(fold: &Fold, labels: &[Label], model: &M) -> PipelineResult<Vec<FoldPrediction>> {
    for class in Label::ALL {
        if !fold.train.iter().any(|&i| labels[i] == class) {
            return Err(PipelineError::FoldFitting {
                fold: fold.index,
                reason: format!("training set has no trials of class {class}"),
            });
        }
    }

    let probs = model.fit_predict(&fold.train, &fold.test).map_err(|err| match err {
        PipelineError::ModelFit { .. } | PipelineError::InsufficientSamples { .. } => {
            PipelineError::FoldFitting { fold: fold.index, reason: err.to_string() }
        }
        other => other,
    })?;

    if probs.len() != fold.test.len() {
        return Err(PipelineError::contract(
            "classifier",
            format!("returned {} predictions for {} test trials", probs.len(), fold.test.len()),
        ));
    }

    let predictions = fold
        .test
        .iter()
        .zip(probs)
        .map(|(&trial, p)| {
            check_probabilities(p)?;
            Ok(FoldPrediction { fold: fold.index, trial, probs: p })
        })
        .collect::<PipelineResult<Vec<_>>>()?;

    tracing::debug!("Fold {} produced {} predictions", fold.index, predictions.len());
    Ok(predictions)
}

/// Check that a probability pair is valid.
///
/// # Errors
///
/// Returns a contract violation when a value lies outside `[0, 1]` or the
/// pair does not sum to 1.
pub fn check_probabilities(p: [f64; 2]) -> PipelineResult<()> {
    let in_range = p.iter().all(|v| (0.0..=1.0).contains(v));
    if !in_range || (p[0] + p[1] - 1.0).abs() > PROBABILITY_TOLERANCE {
        return Err(PipelineError::contract("classifier", format!("invalid probability pair {p:?}")));
    }
    Ok(())
}

/// Fold model over precomputed feature rows: column scaling plus a
/// classifier, both fitted on the training rows.
#[derive(Clone, Debug)]
pub struct FeatureRowModel<'a> {
    rows: &'a Array2<f64>,
    labels: &'a [Label],
    classifier: ClassifierKind,
}

impl<'a> FeatureRowModel<'a> {
    /// Create a model over `(trial, feature)` rows
    #[must_use]
    pub const fn new(rows: &'a Array2<f64>, labels: &'a [Label], classifier: ClassifierKind) -> Self {
        Self { rows, labels, classifier }
    }
}

impl FoldModel for FeatureRowModel<'_> {
    fn fit_predict(&self, train: &[usize], test: &[usize]) -> PipelineResult<Vec<[f64; 2]>> {
        let train_rows = self.rows.select(Axis(0), train);
        let test_rows = self.rows.select(Axis(0), test);
        let train_labels: Vec<Label> = train.iter().map(|&i| self.labels[i]).collect();
        fit_predict_rows(self.classifier, &train_rows, &train_labels, &test_rows)
    }
}

/// Scale on the training rows, fit the classifier and predict the test rows.
///
/// # Errors
///
/// Propagates scaler and classifier errors.
pub fn fit_predict_rows(
    classifier: ClassifierKind,
    train: &Array2<f64>,
    train_labels: &[Label],
    test: &Array2<f64>,
) -> PipelineResult<Vec<[f64; 2]>> {
    let mut scaler = StandardScaler::new();
    let train_z = scaler.fit_transform(train.view())?;
    let test_z = scaler.transform(test.view())?;

    let mut model = classifier.build();
    model.fit(train_z.view(), train_labels)?;
    let proba = model.predict_proba(test_z.view())?;
    Ok(proba.outer_iter().map(|r| [r[0], r[1]]).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn labels(n_left: usize, n_right: usize) -> Vec<Label> {
        let mut y = vec![Label::LeftHand; n_left];
        y.extend(vec![Label::RightHand; n_right]);
        y
    }

    #[test]
    fn test_folds_partition_trials() {
        for (n_left, n_right, k) in [(20, 20, 5), (13, 8, 4), (5, 5, 10), (7, 3, 3)] {
            let y = labels(n_left, n_right);
            let folds = CrossValidator::new(k, 42).split(&y).unwrap();
            assert_eq!(folds.len(), k);

            let mut seen = HashSet::new();
            for fold in &folds {
                assert!(!fold.test.is_empty());
                for &i in &fold.test {
                    assert!(seen.insert(i), "trial {i} held out twice");
                }
                assert_eq!(fold.train.len() + fold.test.len(), y.len());
                assert!(fold.train.iter().all(|i| fold.test.binary_search(i).is_err()));
            }
            assert_eq!(seen.len(), y.len());
        }
    }

    #[test]
    fn test_folds_are_stratified() {
        let y = labels(20, 20);
        for fold in CrossValidator::new(5, 7).split(&y).unwrap() {
            let left = fold.test.iter().filter(|&&i| y[i] == Label::LeftHand).count();
            assert_eq!(left, 4);
            assert_eq!(fold.test.len(), 8);
        }
    }

    #[test]
    fn test_split_is_seeded() {
        let y = labels(12, 9);
        let a = CrossValidator::new(3, 1).split(&y).unwrap();
        let b = CrossValidator::new(3, 1).split(&y).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_too_few_trials() {
        let y = labels(2, 1);
        assert!(matches!(
            CrossValidator::new(5, 0).split(&y),
            Err(PipelineError::InsufficientSamples { got: 3, need: 5 })
        ));
    }

    struct ConstantModel([f64; 2]);

    impl FoldModel for ConstantModel {
        fn fit_predict(&self, _train: &[usize], test: &[usize]) -> PipelineResult<Vec<[f64; 2]>> {
            Ok(vec![self.0; test.len()])
        }
    }

    #[test]
    fn test_invalid_probabilities_are_contract_violations() {
        let y = labels(5, 5);
        let err = CrossValidator::new(2, 0).run(&y, &ConstantModel([0.7, 0.7])).unwrap_err();
        assert!(matches!(err, PipelineError::ContractViolation { collaborator: "classifier", .. }));

        let outcome = CrossValidator::new(2, 0).run(&y, &ConstantModel([0.25, 0.75])).unwrap();
        assert_eq!(outcome.predictions.len(), 10);
    }

    #[test]
    fn test_fold_missing_class_is_omitted() {
        // One right-hand trial: the fold holding it out trains without that class
        let y = labels(9, 1);
        let outcome = CrossValidator::new(2, 3).run(&y, &ConstantModel([0.5, 0.5])).unwrap();
        assert_eq!(outcome.failed_folds.len(), 1);
        assert!(matches!(outcome.failed_folds[0], PipelineError::FoldFitting { .. }));
        assert_eq!(outcome.predictions.len(), 5);
    }

    struct UnfittableModel;

    impl FoldModel for UnfittableModel {
        fn fit_predict(&self, _train: &[usize], _test: &[usize]) -> PipelineResult<Vec<[f64; 2]>> {
            Err(PipelineError::ModelFit { model: "lda", reason: "singular scatter".into() })
        }
    }

    #[test]
    fn test_all_folds_failing_returns_first_fold_error() {
        let y = labels(6, 6);
        let err = CrossValidator::new(3, 42).run(&y, &UnfittableModel).unwrap_err();
        match err {
            PipelineError::FoldFitting { fold, reason } => {
                assert_eq!(fold, 0);
                assert!(reason.contains("singular scatter"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_feature_row_model() {
        let y = labels(10, 10);
        let rows = Array2::from_shape_fn((20, 2), |(i, j)| {
            let centre = if i < 10 { -1.0 } else { 1.0 };
            centre + 0.1 * ((i * 7 + j * 3) % 5) as f64
        });
        let model = FeatureRowModel::new(&rows, &y, ClassifierKind::Lda);
        let outcome = CrossValidator::new(5, 42).run(&y, &model).unwrap();
        assert_eq!(outcome.predictions.len(), 20);
        let correct = outcome
            .predictions
            .iter()
            .filter(|p| (p.probs[0] >= 0.5) == (y[p.trial] == Label::LeftHand))
            .count();
        assert_eq!(correct, 20);
    }
}
