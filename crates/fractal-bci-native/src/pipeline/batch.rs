//! Batch processing over subjects
//!
//! Each subject is loaded, processed and dropped independently; a failure is
//! recorded against its subject id and the remaining subjects continue.

use rayon::prelude::*;

use fractal_bci_core::PredictionRow;

use crate::error::SubjectError;
use crate::ml::aggregate::combine;
use crate::ml::metrics::{accuracy, mean_correct_prob, BatchSummary, FailureRecord};
use crate::pipeline::source::SubjectSource;
use crate::pipeline::subject::{SubjectPipeline, SubjectReport};

/// Outcome of one subject
pub type SubjectOutcome = Result<SubjectReport, SubjectError>;

/// Per-subject outcomes of a batch, in subject order
#[derive(Debug)]
pub struct BatchReport {
    variant: &'static str,
    outcomes: Vec<(u32, SubjectOutcome)>,
}

impl BatchReport {
    /// Pipeline variant name
    #[must_use]
    pub const fn variant(&self) -> &'static str {
        self.variant
    }

    /// All outcomes in subject order
    #[must_use]
    pub fn outcomes(&self) -> &[(u32, SubjectOutcome)] {
        &self.outcomes
    }

    /// Reports of the subjects that completed
    pub fn successes(&self) -> impl Iterator<Item = &SubjectReport> {
        self.outcomes.iter().filter_map(|(_, o)| o.as_ref().ok())
    }

    /// Errors of the subjects that failed or were skipped
    pub fn failures(&self) -> impl Iterator<Item = &SubjectError> {
        self.outcomes.iter().filter_map(|(_, o)| o.as_ref().err())
    }

    /// Final tables of all completed subjects, concatenated in subject order
    #[must_use]
    pub fn combined_rows(&self) -> Vec<PredictionRow> {
        combine(self.successes().map(|r| &r.result))
    }

    /// Serializable summary
    #[must_use]
    pub fn summary(&self) -> BatchSummary {
        let rows = self.combined_rows();
        BatchSummary {
            variant: self.variant.to_string(),
            subjects: self.successes().map(|r| r.summary.clone()).collect(),
            failures: self
                .failures()
                .map(|e| FailureRecord {
                    subject_id: e.subject_id,
                    skipped: e.is_skipped(),
                    error: e.source.to_string(),
                })
                .collect(),
            combined_rows: rows.len(),
            combined_accuracy: accuracy(&rows),
            mean_correct_prob: mean_correct_prob(&rows),
        }
    }
}

/// Runs a [`SubjectPipeline`] over a list of subjects.
pub struct BatchRunner {
    pipeline: SubjectPipeline,
    parallel: bool,
}

impl BatchRunner {
    /// Create a runner; subjects run in parallel by default
    #[must_use]
    pub fn new(pipeline: SubjectPipeline) -> Self {
        Self { pipeline, parallel: true }
    }

    /// Process subjects one after another
    #[must_use]
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    /// Pipeline being run
    #[must_use]
    pub fn pipeline(&self) -> &SubjectPipeline {
        &self.pipeline
    }

    /// Process every subject from `source`.
    ///
    /// Never fails as a whole; per-subject errors are in the report.
    pub fn run<S: SubjectSource>(&self, source: &S, subjects: &[u32]) -> BatchReport {
        tracing::info!(
            "Running {} on {} subjects from {}",
            self.pipeline.variant_name(),
            subjects.len(),
            source.describe()
        );

        let outcomes: Vec<(u32, SubjectOutcome)> = if self.parallel {
            subjects.par_iter().map(|&id| (id, self.run_subject(source, id))).collect()
        } else {
            subjects.iter().map(|&id| (id, self.run_subject(source, id))).collect()
        };

        let failed = outcomes.iter().filter(|(_, o)| o.is_err()).count();
        tracing::info!("Batch finished: {} succeeded, {} failed or skipped", outcomes.len() - failed, failed);

        BatchReport { variant: self.pipeline.variant_name(), outcomes }
    }

    fn run_subject<S: SubjectSource>(&self, source: &S, subject_id: u32) -> SubjectOutcome {
        let outcome = source
            .load(subject_id)
            .and_then(|data| self.pipeline.run(&data))
            .map_err(|err| SubjectError::new(subject_id, err));

        if let Err(err) = &outcome {
            if err.is_skipped() {
                tracing::warn!("Skipping {}", err);
            } else {
                tracing::error!("{}", err);
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PipelineError, PipelineResult};
    use crate::pipeline::source::{SyntheticConfig, SyntheticSource};
    use fractal_bci_core::{FrequencyBand, PipelineConfig, SubjectData};

    /// Subject 2 is missing; subject 3 has too few trials
    struct PatchySource(SyntheticSource);

    impl SubjectSource for PatchySource {
        fn load(&self, subject_id: u32) -> PipelineResult<SubjectData> {
            match subject_id {
                2 => Err(PipelineError::DataNotFound { subject_id, reason: "no file".into() }),
                3 => SyntheticSource::new(SyntheticConfig { trials_per_class: 2, ..self.0.config().clone() })
                    .load(subject_id),
                _ => self.0.load(subject_id),
            }
        }

        fn describe(&self) -> String {
            "patchy".into()
        }
    }

    #[test]
    fn test_failures_do_not_abort_batch() {
        let mut config = PipelineConfig::default();
        config.filter_bank.bands = vec![FrequencyBand::new(8.0, 13.0), FrequencyBand::new(18.0, 26.0)];
        config.spatial.n_components = 2;
        config.fractal.k_max = 10;
        config.cv.folds = 3;

        let source = PatchySource(SyntheticSource::new(SyntheticConfig {
            trials_per_class: 6,
            samples: 200,
            ..Default::default()
        }));
        let runner = BatchRunner::new(SubjectPipeline::new(config).unwrap());
        let report = runner.run(&source, &[1, 2, 3, 4]);

        let ids: Vec<u32> = report.outcomes().iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(report.successes().count(), 2);

        let summary = report.summary();
        assert_eq!(summary.variant, "FBCSP_Fractal");
        assert_eq!(summary.combined_rows, 24);
        assert_eq!(summary.failures.len(), 2);
        assert!(!summary.failures[0].skipped);
        assert!(summary.failures[1].skipped);

        let rows = report.combined_rows();
        assert!(rows[..12].iter().all(|r| r.subject_id == 1));
        assert!(rows[12..].iter().all(|r| r.subject_id == 4));
    }
}
