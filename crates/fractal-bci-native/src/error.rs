//! Pipeline error types
//!
//! Error types for shape contracts, collaborators, data acquisition and
//! fold fitting using `thiserror`. Degenerate fractal estimates are not
//! errors; they are flagged on [`fractal_bci_core::FractalDescriptor`].

use fractal_bci_core::{ConfigError, LabelError};
use thiserror::Error;

/// Tensor and feature-vector shape violations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    /// Filter-bank output has an unsupported rank
    #[error("Unexpected filter-bank output rank {rank} (shape {shape:?}); expected 4 or 5")]
    Rank {
        /// Observed rank
        rank: usize,
        /// Observed shape
        shape: Vec<usize>,
    },

    /// A trial produced a feature vector of the wrong length
    #[error("Feature vector of trial {trial} has length {got}, expected {expected}")]
    FeatureLength {
        /// Trial position
        trial: usize,
        /// Observed length
        got: usize,
        /// Length of the first trial's vector
        expected: usize,
    },

    /// Two dimensions that must agree do not
    #[error("{what} mismatch: expected {expected}, got {got}")]
    Mismatch {
        /// What was compared
        what: &'static str,
        /// Expected size
        expected: usize,
        /// Observed size
        got: usize,
    },
}

/// Errors raised while processing one subject
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Tensor or feature shape violation
    #[error("Shape error: {0}")]
    Shape(#[from] ShapeError),

    /// A collaborator returned data violating its I/O contract
    #[error("Contract violation by {collaborator}: {reason}")]
    ContractViolation {
        /// Collaborator name
        collaborator: &'static str,
        /// What was violated
        reason: String,
    },

    /// Subject data is missing or unreadable
    #[error("Data not found for subject {subject_id}: {reason}")]
    DataNotFound {
        /// Subject identifier
        subject_id: u32,
        /// Missing path or parse failure
        reason: String,
    },

    /// Too few trials for a meaningful split
    #[error("Insufficient samples: got {got} trials, need {need}")]
    InsufficientSamples {
        /// Trials available
        got: usize,
        /// Trials required
        need: usize,
    },

    /// A model could not be fitted on the data it was given
    #[error("{model} fit failed: {reason}")]
    ModelFit {
        /// Model name
        model: &'static str,
        /// Reason
        reason: String,
    },

    /// A cross-validation fold could not be fitted
    #[error("Fold {fold} failed: {reason}")]
    FoldFitting {
        /// Fold index
        fold: usize,
        /// Offending condition
        reason: String,
    },

    /// Invalid labels
    #[error("Label error: {0}")]
    Label(#[from] LabelError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O failure while reading or writing results
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV serialization failure
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Build a model-fit error
    pub fn model_fit(model: &'static str, reason: impl Into<String>) -> Self {
        Self::ModelFit { model, reason: reason.into() }
    }

    /// Build a contract-violation error
    pub fn contract(collaborator: &'static str, reason: impl Into<String>) -> Self {
        Self::ContractViolation { collaborator, reason: reason.into() }
    }
}

/// A failure attributed to one subject
#[derive(Error, Debug)]
#[error("Subject {subject_id}: {source}")]
pub struct SubjectError {
    /// Subject identifier
    pub subject_id: u32,
    /// Underlying error
    #[source]
    pub source: PipelineError,
}

impl SubjectError {
    /// Attach a subject id to an error
    pub const fn new(subject_id: u32, source: PipelineError) -> Self {
        Self { subject_id, source }
    }

    /// Whether the subject was skipped rather than failed
    pub const fn is_skipped(&self) -> bool {
        matches!(self.source, PipelineError::InsufficientSamples { .. })
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_error_names_rank_and_shape() {
        let err = PipelineError::from(ShapeError::Rank { rank: 3, shape: vec![10, 8, 500] });
        let message = err.to_string();
        assert!(message.contains("rank 3"));
        assert!(message.contains("[10, 8, 500]"));
    }

    #[test]
    fn test_subject_error_skip() {
        let skipped = SubjectError::new(4, PipelineError::InsufficientSamples { got: 6, need: 10 });
        assert!(skipped.is_skipped());
        assert!(skipped.to_string().starts_with("Subject 4:"));

        let failed = SubjectError::new(
            5,
            PipelineError::DataNotFound { subject_id: 5, reason: "missing".into() },
        );
        assert!(!failed.is_skipped());
    }
}
