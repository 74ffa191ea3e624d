//! Core types for the motor-imagery decoding pipeline
//!
//! This module provides the data model shared by every stage:
//! - Class labels (left hand / right hand) and label normalization
//! - Subject data and per-trial views
//! - Frequency bands for the filter bank
//! - Fractal descriptors with their degeneracy marker
//! - Prediction rows and per-subject results

use core::fmt;

use ndarray::{Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Labels
// ============================================================================

/// Motor-imagery class.
///
/// The numeric codes (1 and 2) are the ones written to result tables.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum Label {
    /// Left-hand imagery (class 1)
    LeftHand = 1,
    /// Right-hand imagery (class 2)
    RightHand = 2,
}

impl Label {
    /// Both classes in code order
    pub const ALL: [Self; 2] = [Self::LeftHand, Self::RightHand];

    /// Numeric class code (1 or 2)
    #[inline]
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Zero-based column index in probability pairs
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize - 1
    }

    /// Get label from a class code
    #[inline]
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::LeftHand),
            2 => Some(Self::RightHand),
            _ => None,
        }
    }

    /// Human readable name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::LeftHand => "left-hand",
            Self::RightHand => "right-hand",
        }
    }
}

impl From<Label> for u8 {
    fn from(label: Label) -> Self {
        label.code()
    }
}

impl TryFrom<u8> for Label {
    type Error = LabelError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(i64::from(code)).ok_or(LabelError::OutOfRange { value: i64::from(code) })
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Errors raised while validating labels and subject data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LabelError {
    /// Labels do not take exactly two distinct values
    #[error("Expected exactly 2 distinct labels, found {distinct}")]
    NotBinary {
        /// Number of distinct values found
        distinct: usize,
    },
    /// A label is outside {1, 2} after offset normalization
    #[error("Label {value} is not a valid class code")]
    OutOfRange {
        /// Offending raw value
        value: i64,
    },
    /// Label count does not match trial count
    #[error("Got {labels} labels for {trials} trials")]
    LengthMismatch {
        /// Number of labels
        labels: usize,
        /// Number of trials
        trials: usize,
    },
}

/// Normalize raw integer labels into [`Label`]s.
///
/// Labels are shifted so that the smallest value becomes 1; a zero-based
/// encoding (0/1) therefore maps to 1/2. Exactly two distinct values must
/// remain.
///
/// # Errors
///
/// Returns [`LabelError::NotBinary`] or [`LabelError::OutOfRange`].
pub fn normalize_labels(raw: &[i64]) -> Result<Vec<Label>, LabelError> {
    let mut distinct: Vec<i64> = raw.to_vec();
    distinct.sort_unstable();
    distinct.dedup();

    if distinct.len() != 2 {
        return Err(LabelError::NotBinary { distinct: distinct.len() });
    }

    let offset = 1 - distinct[0];
    raw.iter()
        .map(|&v| Label::from_code(v + offset).ok_or(LabelError::OutOfRange { value: v }))
        .collect()
}

// ============================================================================
// Subject Data
// ============================================================================

/// One labeled EEG epoch, borrowed from its [`SubjectData`].
#[derive(Clone, Debug)]
pub struct Trial<'a> {
    /// Subject identifier
    pub subject_id: u32,
    /// Position of the trial within the subject's recording
    pub index: usize,
    /// Class label
    pub label: Label,
    /// Sampling rate in Hz
    pub sfreq: f64,
    /// Signal: \[channel\]\[sample\]
    pub data: ArrayView2<'a, f64>,
}

impl Trial<'_> {
    /// Check that every sample is finite
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }
}

/// All trials recorded for one subject.
///
/// Immutable once constructed; every processing stage produces new arrays.
#[derive(Clone, Debug)]
pub struct SubjectData {
    subject_id: u32,
    x: Array3<f64>,
    labels: Vec<Label>,
    sfreq: f64,
}

impl SubjectData {
    /// Create subject data from a `(trial, channel, sample)` tensor.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::LengthMismatch`] if label and trial counts differ.
    pub fn new(
        subject_id: u32,
        x: Array3<f64>,
        labels: Vec<Label>,
        sfreq: f64,
    ) -> Result<Self, LabelError> {
        let trials = x.len_of(Axis(0));
        if labels.len() != trials {
            return Err(LabelError::LengthMismatch { labels: labels.len(), trials });
        }
        Ok(Self { subject_id, x, labels, sfreq })
    }

    /// Subject identifier
    #[must_use]
    pub const fn subject_id(&self) -> u32 {
        self.subject_id
    }

    /// Signal tensor `(trial, channel, sample)`
    #[must_use]
    pub const fn x(&self) -> &Array3<f64> {
        &self.x
    }

    /// Class labels, one per trial
    #[must_use]
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Sampling rate in Hz
    #[must_use]
    pub const fn sfreq(&self) -> f64 {
        self.sfreq
    }

    /// Number of trials
    #[must_use]
    pub fn n_trials(&self) -> usize {
        self.labels.len()
    }

    /// Number of channels
    #[must_use]
    pub fn n_channels(&self) -> usize {
        self.x.len_of(Axis(1))
    }

    /// Number of samples per trial
    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.x.len_of(Axis(2))
    }

    /// Number of trials per class, indexed by [`Label::index`]
    #[must_use]
    pub fn class_counts(&self) -> [usize; 2] {
        let mut counts = [0; 2];
        for label in &self.labels {
            counts[label.index()] += 1;
        }
        counts
    }

    /// Iterate over trials in recording order
    pub fn trials(&self) -> impl Iterator<Item = Trial<'_>> {
        self.x
            .outer_iter()
            .zip(self.labels.iter())
            .enumerate()
            .map(move |(index, (data, &label))| Trial {
                subject_id: self.subject_id,
                index,
                label,
                sfreq: self.sfreq,
                data,
            })
    }
}

// ============================================================================
// Frequency Bands
// ============================================================================

/// A pass band of the filter bank.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrequencyBand {
    /// Lower edge in Hz
    pub low_hz: f64,
    /// Upper edge in Hz
    pub high_hz: f64,
}

impl FrequencyBand {
    /// Create a band
    #[must_use]
    pub const fn new(low_hz: f64, high_hz: f64) -> Self {
        Self { low_hz, high_hz }
    }

    /// Band width in Hz
    #[must_use]
    pub fn width(&self) -> f64 {
        self.high_hz - self.low_hz
    }

    /// Split into `n` contiguous sub-bands of equal width
    #[must_use]
    pub fn split(&self, n: usize) -> Vec<Self> {
        let n = n.max(1);
        let step = self.width() / n as f64;
        (0..n)
            .map(|i| Self::new(self.low_hz + step * i as f64, self.low_hz + step * (i + 1) as f64))
            .collect()
    }

    /// The default filter bank: 4-40 Hz in 4 Hz steps (9 bands)
    #[must_use]
    pub fn default_bank() -> Vec<Self> {
        (1..10).map(|i| Self::new(f64::from(4 * i), f64::from(4 * i + 4))).collect()
    }
}

impl fmt::Display for FrequencyBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{} Hz", self.low_hz, self.high_hz)
    }
}

// ============================================================================
// Fractal Descriptors
// ============================================================================

/// Why a curve-length sequence could not support a slope estimate.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Degeneracy {
    /// Too few usable scales (signal too short)
    TooShort {
        /// Scales with a usable curve length
        usable_scales: usize,
    },
    /// Every curve length is at or below epsilon (flat signal)
    FlatCurve,
}

/// Enhanced Higuchi descriptor of one (band, component) signal.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FractalDescriptor {
    /// Fractal dimension estimate (regression slope)
    pub slope: f64,
    /// Mean curve length across scales
    pub mean_lk: f64,
    /// Mean per-scale dispersion of offset curve lengths
    pub std_lk: f64,
    /// Set when the estimate fell back to zeros
    pub degeneracy: Option<Degeneracy>,
}

impl FractalDescriptor {
    /// Number of values contributed to a feature vector
    pub const WIDTH: usize = 3;

    /// Zero descriptor flagged with the given reason
    #[must_use]
    pub const fn degenerate(reason: Degeneracy) -> Self {
        Self { slope: 0.0, mean_lk: 0.0, std_lk: 0.0, degeneracy: Some(reason) }
    }

    /// Whether the estimator fell back to zeros
    #[must_use]
    pub const fn is_degenerate(&self) -> bool {
        self.degeneracy.is_some()
    }

    /// Values in feature order: `[slope, mean_lk, std_lk]`
    #[must_use]
    pub const fn values(&self) -> [f64; 3] {
        [self.slope, self.mean_lk, self.std_lk]
    }
}

// ============================================================================
// Predictions
// ============================================================================

/// Out-of-sample prediction for one trial.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictionRow {
    /// Subject identifier
    pub subject_id: u32,
    /// Fold in which the trial was held out
    pub fold: usize,
    /// True class
    pub true_label: Label,
    /// Probability of left-hand imagery
    pub left_prob: f64,
    /// Probability of right-hand imagery
    pub right_prob: f64,
}

impl PredictionRow {
    /// Create a row
    #[must_use]
    pub const fn new(
        subject_id: u32,
        fold: usize,
        true_label: Label,
        left_prob: f64,
        right_prob: f64,
    ) -> Self {
        Self { subject_id, fold, true_label, left_prob, right_prob }
    }

    /// Predicted class: right hand when `left_prob < 0.5`
    #[must_use]
    pub fn predicted(&self) -> Label {
        if self.left_prob < 0.5 {
            Label::RightHand
        } else {
            Label::LeftHand
        }
    }

    /// Whether the prediction matches the true label
    #[must_use]
    pub fn is_correct(&self) -> bool {
        self.predicted() == self.true_label
    }

    /// Probability assigned to the true class
    #[must_use]
    pub fn correct_prob(&self) -> f64 {
        match self.true_label {
            Label::LeftHand => self.left_prob,
            Label::RightHand => self.right_prob,
        }
    }

    /// Probabilities as a `[left, right]` pair
    #[must_use]
    pub const fn probs(&self) -> [f64; 2] {
        [self.left_prob, self.right_prob]
    }
}

/// All prediction rows of one subject, ordered by original trial index.
#[derive(Clone, Debug, PartialEq)]
pub struct SubjectResult {
    subject_id: u32,
    rows: Vec<PredictionRow>,
}

impl SubjectResult {
    /// Wrap completed rows
    #[must_use]
    pub const fn new(subject_id: u32, rows: Vec<PredictionRow>) -> Self {
        Self { subject_id, rows }
    }

    /// Subject identifier
    #[must_use]
    pub const fn subject_id(&self) -> u32 {
        self.subject_id
    }

    /// Prediction rows
    #[must_use]
    pub fn rows(&self) -> &[PredictionRow] {
        &self.rows
    }

    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether there are no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Fraction of correctly predicted trials
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        if self.rows.is_empty() {
            return 0.0;
        }
        self.rows.iter().filter(|r| r.is_correct()).count() as f64 / self.rows.len() as f64
    }
}
