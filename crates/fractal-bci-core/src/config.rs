//! Configuration types for the decoding pipeline.
//!
//! Every section derives serde so the whole configuration can be read from
//! a TOML file; missing keys fall back to [`Default`].

use core::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::FrequencyBand;

// ============================================================================
// Feature Kind
// ============================================================================

/// Feature-extraction strategy applied to spatially filtered signals.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    /// Enhanced Higuchi descriptors `(slope, mean_Lk, std_Lk)`
    #[default]
    Fractal,
    /// Log-variance per component
    LogPower,
}

impl FeatureKind {
    /// Values contributed per (band, component) pair
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            Self::Fractal => 3,
            Self::LogPower => 1,
        }
    }

    /// Name of the result directory for this variant
    #[must_use]
    pub const fn variant_name(self) -> &'static str {
        match self {
            Self::Fractal => "FBCSP_Fractal",
            Self::LogPower => "FBCSP_LogPower",
        }
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fractal => write!(f, "fractal"),
            Self::LogPower => write!(f, "log_power"),
        }
    }
}

/// IIR prototype used for every band edge.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterDesign {
    /// Maximally flat pass band
    #[default]
    Butterworth,
    /// Inverse Chebyshev: flat pass band, equiripple stop band
    ChebyshevII,
}

// ============================================================================
// Sections
// ============================================================================

/// Filter-bank settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterBankConfig {
    /// Edge filter design
    pub design: FilterDesign,
    /// Sub-filters per band; more than one yields a five-axis output
    pub subbands: usize,
    /// Cascaded second-order sections per band edge
    pub sections: usize,
    /// Minimum stop-band attenuation of the Chebyshev II design in dB
    pub attenuation_db: f64,
    /// Run each band forward and backward for zero phase
    pub zero_phase: bool,
    /// Pass bands
    pub bands: Vec<FrequencyBand>,
}

impl Default for FilterBankConfig {
    fn default() -> Self {
        Self {
            design: FilterDesign::Butterworth,
            subbands: 1,
            sections: 2,
            attenuation_db: 40.0,
            zero_phase: true,
            bands: FrequencyBand::default_bank(),
        }
    }
}

/// Spatial-filter settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    /// Components kept per band (split between both ends of the spectrum)
    pub n_components: usize,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self { n_components: 4 }
    }
}

/// Higuchi estimator settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FractalConfig {
    /// Maximum scale
    pub k_max: usize,
}

impl Default for FractalConfig {
    fn default() -> Self {
        Self { k_max: 100 }
    }
}

/// Cross-validation settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CvConfig {
    /// Number of folds
    pub folds: usize,
    /// Seed for the stratified shuffle
    pub seed: u64,
}

impl Default for CvConfig {
    fn default() -> Self {
        Self { folds: 5, seed: 42 }
    }
}

/// In-sample recalibration of the probability columns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementConfig {
    /// Apply the refinement stage after cross-validation
    pub enabled: bool,
    /// QDA covariance regularization
    pub reg_param: f64,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self { enabled: true, reg_param: 0.1 }
    }
}

// ============================================================================
// Pipeline Configuration
// ============================================================================

/// Complete per-subject pipeline configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Feature-extraction strategy
    pub features: FeatureKind,
    /// Subjects with fewer trials are skipped (0 means the default)
    pub min_trials: usize,
    /// Filter bank
    pub filter_bank: FilterBankConfig,
    /// Spatial filter
    pub spatial: SpatialConfig,
    /// Higuchi estimator
    pub fractal: FractalConfig,
    /// Cross-validation
    pub cv: CvConfig,
    /// Refinement stage
    pub refinement: RefinementConfig,
}

impl PipelineConfig {
    /// Minimum number of trials for a meaningful split
    pub const DEFAULT_MIN_TRIALS: usize = 10;

    /// Check parameter ranges.
    ///
    /// # Errors
    ///
    /// Returns the first invalid parameter found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.filter_bank.bands.is_empty() {
            return Err(ConfigError::invalid("filter_bank.bands", "at least one band is required"));
        }
        if let Some(band) =
            self.filter_bank.bands.iter().find(|b| !(b.low_hz > 0.0 && b.high_hz > b.low_hz))
        {
            return Err(ConfigError::Band { band: *band });
        }
        if self.filter_bank.subbands == 0 {
            return Err(ConfigError::invalid("filter_bank.subbands", "must be at least 1"));
        }
        if self.filter_bank.sections == 0 {
            return Err(ConfigError::invalid("filter_bank.sections", "must be at least 1"));
        }
        if !(self.filter_bank.attenuation_db > 0.0) {
            return Err(ConfigError::invalid("filter_bank.attenuation_db", "must be positive"));
        }
        if self.spatial.n_components == 0 {
            return Err(ConfigError::invalid("spatial.n_components", "must be at least 1"));
        }
        if self.fractal.k_max < 2 {
            return Err(ConfigError::invalid("fractal.k_max", "must be at least 2"));
        }
        if self.cv.folds < 2 {
            return Err(ConfigError::invalid("cv.folds", "must be at least 2"));
        }
        if !(0.0..=1.0).contains(&self.refinement.reg_param) {
            return Err(ConfigError::invalid("refinement.reg_param", "must lie in [0, 1]"));
        }
        Ok(())
    }

    /// Effective minimum trial count (0 means the default)
    #[must_use]
    pub const fn min_trials(&self) -> usize {
        if self.min_trials == 0 {
            Self::DEFAULT_MIN_TRIALS
        } else {
            self.min_trials
        }
    }
}

/// Configuration validation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A parameter is out of range
    #[error("Invalid {parameter}: {reason}")]
    Invalid {
        /// Dotted parameter path
        parameter: &'static str,
        /// Constraint that failed
        reason: &'static str,
    },
    /// A band has non-positive or inverted edges
    #[error("Invalid band {band}")]
    Band {
        /// Offending band
        band: FrequencyBand,
    },
}

impl ConfigError {
    const fn invalid(parameter: &'static str, reason: &'static str) -> Self {
        Self::Invalid { parameter, reason }
    }
}
