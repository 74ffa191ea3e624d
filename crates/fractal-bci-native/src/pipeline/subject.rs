//! Per-subject pipeline
//!
//! Filter bank, shape normalization, then cross-validation in which every fold
//! fits its own CSP, scaler and LDA on its training trials.

use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::{Array4, Axis};

use fractal_bci_core::{math, Label, PipelineConfig, SubjectData, SubjectResult};

use crate::error::{PipelineError, PipelineResult, ShapeError};
use crate::ml::aggregate::{refine, ResultAggregator};
use crate::ml::classifier::ClassifierKind;
use crate::ml::cv::{fit_predict_rows, CrossValidator, FoldModel};
use crate::ml::features::FeatureAssembler;
use crate::ml::metrics::{cohen_kappa, FoldMetrics, SubjectSummary};
use crate::processing::filters::{FilterBank, IirFilterBank};
use crate::processing::fractal::HiguchiEstimator;
use crate::processing::spatial::{Csp, SpatialFilterAdapter};

/// Everything produced for one subject
#[derive(Clone, Debug)]
pub struct SubjectReport {
    /// Final table (refined when refinement is enabled)
    pub result: SubjectResult,
    /// Held-out table before refinement
    pub cv_result: SubjectResult,
    /// Metrics
    pub summary: SubjectSummary,
    /// Degenerate fractal signals of each trial, counted where the trial
    /// was held out
    pub degenerate_per_trial: Vec<usize>,
}

/// Fold model over filter-bank output: CSP, feature assembly, scaling and
/// LDA, all fitted on the fold's training trials.
struct SpatialFeatureModel<'a> {
    x: &'a Array4<f64>,
    labels: &'a [Label],
    n_components: usize,
    assembler: FeatureAssembler,
    degenerate: Vec<AtomicUsize>,
}

impl FoldModel for SpatialFeatureModel<'_> {
    fn fit_predict(&self, train: &[usize], test: &[usize]) -> PipelineResult<Vec<[f64; 2]>> {
        let x_train = self.x.select(Axis(0), train);
        let x_test = self.x.select(Axis(0), test);
        let y_train: Vec<Label> = train.iter().map(|&i| self.labels[i]).collect();

        let mut spatial = SpatialFilterAdapter::new(Csp::new(self.n_components));
        let s_train = spatial.fit_transform(x_train.view(), &y_train)?;
        let s_test = spatial.transform(x_test.view())?;

        let f_train = self.assembler.assemble(s_train.view())?;
        let f_test = self.assembler.assemble(s_test.view())?;
        if f_train.n_features() != f_test.n_features() {
            return Err(ShapeError::Mismatch {
                what: "test feature length",
                expected: f_train.n_features(),
                got: f_test.n_features(),
            }
            .into());
        }
        let probs = fit_predict_rows(ClassifierKind::Lda, &f_train.values, &y_train, &f_test.values)?;

        // Test folds partition the trials, so each trial is counted once
        for (&trial, count) in test.iter().zip(f_test.degenerate_per_trial()) {
            self.degenerate[trial].store(count, Ordering::Relaxed);
        }
        Ok(probs)
    }
}

/// Runs the complete decoding pipeline for one subject.
pub struct SubjectPipeline {
    config: PipelineConfig,
    filter_bank: Box<dyn FilterBank>,
}

impl SubjectPipeline {
    /// Create a pipeline with the configured IIR filter bank
    ///
    /// # Errors
    ///
    /// Returns a configuration error for out-of-range parameters.
    pub fn new(config: PipelineConfig) -> PipelineResult<Self> {
        config.validate()?;
        let filter_bank = Box::new(IirFilterBank::new(config.filter_bank.clone()));
        Ok(Self { config, filter_bank })
    }

    /// Replace the filter-bank collaborator
    #[must_use]
    pub fn with_filter_bank(mut self, filter_bank: Box<dyn FilterBank>) -> Self {
        self.filter_bank = filter_bank;
        self
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Result directory name of this pipeline variant
    #[must_use]
    pub fn variant_name(&self) -> &'static str {
        self.config.features.variant_name()
    }

    /// Process one subject.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InsufficientSamples`] for subjects below the
    /// trial minimum, collaborator contract violations, shape errors, or the
    /// fold error when every fold failed.
    pub fn run(&self, data: &SubjectData) -> PipelineResult<SubjectReport> {
        let subject_id = data.subject_id();
        let need = self.config.min_trials();
        if data.n_trials() < need {
            return Err(PipelineError::InsufficientSamples { got: data.n_trials(), need });
        }
        tracing::info!(
            "Subject {}: {} trials, {} channels, {} samples",
            subject_id,
            data.n_trials(),
            data.n_channels(),
            data.n_samples()
        );

        let filtered = self.filter_bank.apply(data.x(), data.sfreq())?;
        filtered.check_against(data.n_trials(), data.n_channels(), data.n_samples())?;
        let x = filtered.normalize();

        let model = SpatialFeatureModel {
            x: &x,
            labels: data.labels(),
            n_components: self.config.spatial.n_components,
            assembler: FeatureAssembler::new(
                self.config.features,
                HiguchiEstimator::new(self.config.fractal.k_max),
            ),
            degenerate: (0..data.n_trials()).map(|_| AtomicUsize::new(0)).collect(),
        };
        let outcome = CrossValidator::from_config(&self.config.cv).run(data.labels(), &model)?;

        let mut aggregator = ResultAggregator::new(subject_id, data.labels());
        aggregator.extend(outcome.predictions)?;
        if aggregator.missing() > 0 {
            tracing::warn!(
                "Subject {}: {} trials without prediction after {} failed folds",
                subject_id,
                aggregator.missing(),
                outcome.failed_folds.len()
            );
        }
        let cv_result = aggregator.finish();

        let degenerate_per_trial: Vec<usize> =
            model.degenerate.iter().map(|d| d.load(Ordering::Relaxed)).collect();
        let folds = FoldMetrics::per_fold(cv_result.rows());
        let fold_accuracies: Vec<f64> = folds.iter().map(|f| f.accuracy).collect();

        let (result, refined) = if self.config.refinement.enabled {
            match refine(&cv_result, self.config.refinement.reg_param) {
                Ok(refined) => (refined, true),
                Err(err) => {
                    tracing::warn!("Subject {}: refinement skipped: {}", subject_id, err);
                    (cv_result.clone(), false)
                }
            }
        } else {
            (cv_result.clone(), false)
        };

        let summary = SubjectSummary {
            subject_id,
            n_trials: result.len(),
            cv_accuracy: cv_result.accuracy(),
            cv_kappa: cohen_kappa(cv_result.rows()),
            fold_accuracy_mean: math::mean(&fold_accuracies),
            fold_accuracy_std: math::std_dev(&fold_accuracies),
            final_accuracy: result.accuracy(),
            refined,
            failed_folds: outcome.failed_folds.len(),
            degenerate_signals: degenerate_per_trial.iter().sum(),
            folds,
        };

        tracing::info!(
            "Subject {}: CV accuracy {:.3} ({:.3} +/- {:.3} over folds), final {:.3}{}",
            subject_id,
            summary.cv_accuracy,
            summary.fold_accuracy_mean,
            summary.fold_accuracy_std,
            summary.final_accuracy,
            if refined { " (in-sample refined)" } else { "" }
        );

        Ok(SubjectReport { result, cv_result, summary, degenerate_per_trial })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::source::{SubjectSource, SyntheticConfig, SyntheticSource};
    use crate::processing::shape::FilterBankOutput;
    use fractal_bci_core::FrequencyBand;
    use ndarray::{Array3, Array5};

    fn small_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.filter_bank.bands = vec![FrequencyBand::new(8.0, 13.0), FrequencyBand::new(18.0, 26.0)];
        config.spatial.n_components = 2;
        config.fractal.k_max = 20;
        config
    }

    fn small_source(trials_per_class: usize) -> SyntheticSource {
        SyntheticSource::new(SyntheticConfig { trials_per_class, samples: 250, ..Default::default() })
    }

    #[test]
    fn test_too_few_trials_is_skipped() {
        let pipeline = SubjectPipeline::new(small_config()).unwrap();
        let data = small_source(4).load(1).unwrap();
        let err = pipeline.run(&data).unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientSamples { got: 8, need: 10 }));
    }

    #[test]
    fn test_log_power_variant() {
        let mut config = small_config();
        config.features = fractal_bci_core::FeatureKind::LogPower;
        config.refinement.enabled = false;
        let pipeline = SubjectPipeline::new(config).unwrap();
        assert_eq!(pipeline.variant_name(), "FBCSP_LogPower");

        let data = small_source(10).load(2).unwrap();
        let report = pipeline.run(&data).unwrap();
        assert_eq!(report.result.len(), 20);
        assert!(!report.summary.refined);
        assert_eq!(report.result, report.cv_result);
        assert!(report.summary.cv_accuracy > 0.5);
    }

    struct RankThreeBank;

    impl FilterBank for RankThreeBank {
        fn apply(&self, x: &Array3<f64>, _sfreq: f64) -> PipelineResult<FilterBankOutput> {
            Ok(FilterBankOutput::from_dyn(x.clone().into_dyn())?)
        }
    }

    #[test]
    fn test_bad_filter_bank_rank_fails_subject() {
        let pipeline = SubjectPipeline::new(small_config()).unwrap().with_filter_bank(Box::new(RankThreeBank));
        let data = small_source(10).load(1).unwrap();
        let err = pipeline.run(&data).unwrap_err();
        assert!(matches!(err, PipelineError::Shape(ShapeError::Rank { rank: 3, .. })));
    }

    struct TrialDroppingBank;

    impl FilterBank for TrialDroppingBank {
        fn apply(&self, x: &Array3<f64>, _sfreq: f64) -> PipelineResult<FilterBankOutput> {
            let (t, c, s) = x.dim();
            Ok(FilterBankOutput::FiveAxis(Array5::zeros((t - 1, 1, c, 1, s))))
        }
    }

    #[test]
    fn test_filter_bank_contract_violation() {
        let pipeline =
            SubjectPipeline::new(small_config()).unwrap().with_filter_bank(Box::new(TrialDroppingBank));
        let data = small_source(10).load(1).unwrap();
        assert!(matches!(
            pipeline.run(&data),
            Err(PipelineError::ContractViolation { collaborator: "filter bank", .. })
        ));
    }

    /// Second band is constant on every channel
    struct FlatSecondBand;

    impl FilterBank for FlatSecondBand {
        fn apply(&self, x: &Array3<f64>, _sfreq: f64) -> PipelineResult<FilterBankOutput> {
            let (t, c, s) = x.dim();
            let mut out = Array4::<f64>::zeros((t, 2, c, s));
            out.index_axis_mut(Axis(1), 0).assign(x);
            for ch in 0..c {
                out.slice_mut(ndarray::s![.., 1, ch, ..]).fill(ch as f64 + 1.0);
            }
            Ok(FilterBankOutput::FourAxis(out))
        }
    }

    #[test]
    fn test_degenerate_signals_counted_once_per_trial() {
        let mut config = small_config();
        config.refinement.enabled = false;
        let pipeline = SubjectPipeline::new(config).unwrap().with_filter_bank(Box::new(FlatSecondBand));
        let data = small_source(20).load(1).unwrap();

        let report = pipeline.run(&data).unwrap();
        assert_eq!(report.result.len(), 40);
        // Band 1 yields two flat components per trial
        assert_eq!(report.degenerate_per_trial, vec![2; 40]);
        assert_eq!(report.summary.degenerate_signals, 80);
    }
}
