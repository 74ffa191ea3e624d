//! Fractal BCI Core - data types, configuration and math
//!
//! This crate provides the foundational types shared by the motor-imagery
//! decoding pipeline. It has no knowledge of filtering, spatial filters or
//! classifiers; those live in `fractal-bci-native`.
//!
//! # Modules
//!
//! - [`types`]: Labels, trials, subject data, descriptors and prediction rows
//! - [`config`]: Pipeline configuration (serde, TOML friendly)
//! - [`math`]: Statistical helpers (moments, regression, softmax)
//!
//! # Example
//!
//! ```rust
//! use fractal_bci_core::types::{Label, PredictionRow};
//!
//! let row = PredictionRow::new(1, 0, Label::RightHand, 0.2, 0.8);
//! assert_eq!(row.predicted(), Label::RightHand);
//! assert!((row.correct_prob() - 0.8).abs() < 1e-12);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod config;
pub mod math;
pub mod types;

// Re-export commonly used types at crate root
pub use config::{
    ConfigError, CvConfig, FeatureKind, FilterBankConfig, FilterDesign, FractalConfig,
    PipelineConfig, RefinementConfig, SpatialConfig,
};
pub use types::{
    Degeneracy, FractalDescriptor, FrequencyBand, Label, LabelError, PredictionRow,
    SubjectData, SubjectResult, Trial,
};
