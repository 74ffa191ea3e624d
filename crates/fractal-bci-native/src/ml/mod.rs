//! Feature assembly, models and evaluation
//!
//! - [`features`]: per-trial feature vectors
//! - [`scaler`]: train-only column standardization
//! - [`classifier`]: LDA and QDA behind one classifier contract
//! - [`projection`]: PCA for the refinement stage
//! - [`cv`]: stratified k-fold cross-validation
//! - [`aggregate`]: per-subject result tables and refinement
//! - [`metrics`]: accuracy, kappa and summaries

pub mod aggregate;
pub mod classifier;
pub mod cv;
pub mod features;
pub mod metrics;
pub mod projection;
pub mod scaler;

pub use aggregate::{combine, refine, ResultAggregator};
pub use classifier::{ClassifierKind, Lda, ProbabilisticClassifier, Qda};
pub use cv::{CrossValidator, CvOutcome, FeatureRowModel, Fold, FoldModel, FoldPrediction};
pub use features::{FeatureAssembler, FeatureMatrix};
pub use metrics::{BatchSummary, FailureRecord, FoldMetrics, SubjectSummary};
pub use projection::Pca;
pub use scaler::StandardScaler;
