//! Fractal BCI Native - Motor-imagery decoding pipeline
//!
//! This crate provides host-side decoding of two-class motor-imagery EEG:
//! - Zero-phase Butterworth / Chebyshev II filter bank and shape normalization
//! - Per-band common spatial patterns
//! - Enhanced Higuchi fractal features (and a log-power baseline)
//! - Stratified cross-validation with fold-local fitting
//! - Per-subject aggregation, refinement and batch persistence
//!
//! # Modules
//!
//! - [`processing`]: Signal processing stages
//! - [`ml`]: Features, models and evaluation
//! - [`pipeline`]: Subject and batch orchestration

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod error;
pub mod ml;
pub mod pipeline;
pub mod processing;

// Re-export key types
pub use error::{PipelineError, PipelineResult, ShapeError, SubjectError};
pub use ml::{CrossValidator, FeatureAssembler, ResultAggregator};
pub use pipeline::{BatchReport, BatchRunner, ResultWriter, SubjectPipeline};
pub use processing::{FilterBankOutput, HiguchiEstimator, SpatialFilterAdapter};
