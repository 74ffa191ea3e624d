//! Subject-level orchestration
//!
//! - [`source`]: subject data sources (synthetic, JSON directory)
//! - [`subject`]: the per-subject decoding pipeline
//! - [`batch`]: continue-on-error processing over many subjects
//! - [`output`]: CSV and JSON result persistence

pub mod batch;
pub mod output;
pub mod source;
pub mod subject;

pub use batch::{BatchReport, BatchRunner, SubjectOutcome};
pub use output::ResultWriter;
pub use source::{JsonDirSource, SubjectFile, SubjectSource, SyntheticConfig, SyntheticSource};
pub use subject::{SubjectPipeline, SubjectReport};
