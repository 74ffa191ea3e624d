//! Subject data sources
//!
//! A [`SubjectSource`] yields one subject's trials on demand. The data is
//! owned by the caller for the duration of that subject's processing and
//! dropped afterwards.

use std::f64::consts::PI;
use std::fs;
use std::path::PathBuf;

use ndarray::Array3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use fractal_bci_core::types::normalize_labels;
use fractal_bci_core::{Label, SubjectData};

use crate::error::{PipelineError, PipelineResult, ShapeError};

/// Loader contract for per-subject data
pub trait SubjectSource: Sync {
    /// Load all trials of one subject
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DataNotFound`] when the subject is missing or
    /// unreadable.
    fn load(&self, subject_id: u32) -> PipelineResult<SubjectData>;

    /// Short description for logs
    fn describe(&self) -> String;
}

// ============================================================================
// Synthetic source
// ============================================================================

/// Parameters of the synthetic motor-imagery generator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// Trials of each class
    pub trials_per_class: usize,
    /// Channels per trial
    pub channels: usize,
    /// Samples per trial
    pub samples: usize,
    /// Sampling rate in Hz
    pub sfreq: f64,
    /// Rhythm frequency of the left-hand and right-hand class
    pub class_freqs: [f64; 2],
    /// Rhythm amplitude
    pub amplitude: f64,
    /// Standard deviation of the additive noise
    pub noise_std: f64,
    /// Base seed; subject `s` uses `seed + s`
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            trials_per_class: 20,
            channels: 4,
            samples: 500,
            sfreq: 250.0,
            class_freqs: [10.0, 22.0],
            amplitude: 2.0,
            noise_std: 0.5,
            seed: 42,
        }
    }
}

/// Seeded, class-separable trials.
///
/// Left-hand trials carry a rhythm at `class_freqs[0]` that is strongest on
/// the first channel; right-hand trials carry a rhythm at `class_freqs[1]`
/// strongest on the last channel. Gaussian noise is added to every sample.
/// Trials alternate between the two classes.
#[derive(Clone, Debug, Default)]
pub struct SyntheticSource {
    config: SyntheticConfig,
}

impl SyntheticSource {
    /// Create a synthetic source
    #[must_use]
    pub fn new(config: SyntheticConfig) -> Self {
        Self { config }
    }

    /// Generator parameters
    #[must_use]
    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    fn channel_gain(&self, label: Label, channel: usize) -> f64 {
        let c = self.config.channels.max(1) as f64;
        let ch = channel as f64;
        match label {
            Label::LeftHand => (c - ch) / c,
            Label::RightHand => (ch + 1.0) / c,
        }
    }
}

impl SubjectSource for SyntheticSource {
    fn load(&self, subject_id: u32) -> PipelineResult<SubjectData> {
        let cfg = &self.config;
        let n = 2 * cfg.trials_per_class;
        let mut rng = StdRng::seed_from_u64(cfg.seed.wrapping_add(u64::from(subject_id)));

        let labels: Vec<Label> =
            (0..n).map(|t| if t % 2 == 0 { Label::LeftHand } else { Label::RightHand }).collect();
        let mut x = Array3::<f64>::zeros((n, cfg.channels, cfg.samples));

        for (t, &label) in labels.iter().enumerate() {
            let freq = cfg.class_freqs[label.index()];
            let phase = rng.gen_range(0.0..2.0 * PI);
            for c in 0..cfg.channels {
                let gain = cfg.amplitude * self.channel_gain(label, c);
                for s in 0..cfg.samples {
                    let time = s as f64 / cfg.sfreq;
                    let rhythm = gain * (2.0 * PI * freq * time + phase).sin();
                    x[[t, c, s]] = rhythm + cfg.noise_std * gaussian(&mut rng);
                }
            }
        }

        Ok(SubjectData::new(subject_id, x, labels, cfg.sfreq)?)
    }

    fn describe(&self) -> String {
        format!(
            "synthetic ({} trials x {} channels x {} samples @ {} Hz)",
            2 * self.config.trials_per_class,
            self.config.channels,
            self.config.samples,
            self.config.sfreq
        )
    }
}

/// Standard normal draw (Box-Muller)
fn gaussian(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

// ============================================================================
// JSON directory source
// ============================================================================

/// One subject file: `{ "x": [trial][channel][sample], "y": [..], "sfreq": .. }`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubjectFile {
    /// Trial tensor
    pub x: Vec<Vec<Vec<f64>>>,
    /// Raw integer labels (0/1 or 1/2)
    pub y: Vec<i64>,
    /// Sampling rate in Hz
    pub sfreq: f64,
}

impl SubjectFile {
    /// Validate and convert into subject data
    ///
    /// # Errors
    ///
    /// Returns a shape error for ragged trials or a label error for
    /// non-binary labels.
    pub fn into_subject(self, subject_id: u32) -> PipelineResult<SubjectData> {
        let trials = self.x.len();
        let channels = self.x.first().map_or(0, Vec::len);
        let samples = self.x.first().and_then(|t| t.first()).map_or(0, Vec::len);

        let mut flat = Vec::with_capacity(trials * channels * samples);
        for trial in self.x {
            if trial.len() != channels {
                return Err(ShapeError::Mismatch { what: "channel count", expected: channels, got: trial.len() }
                    .into());
            }
            for channel in trial {
                if channel.len() != samples {
                    return Err(ShapeError::Mismatch {
                        what: "sample count",
                        expected: samples,
                        got: channel.len(),
                    }
                    .into());
                }
                flat.extend(channel);
            }
        }

        let x = Array3::from_shape_vec((trials, channels, samples), flat).map_err(|_| ShapeError::Mismatch {
            what: "trial tensor size",
            expected: trials * channels * samples,
            got: 0,
        })?;
        let labels = normalize_labels(&self.y)?;
        Ok(SubjectData::new(subject_id, x, labels, self.sfreq)?)
    }
}

/// Reads `P{id:02}.json` files from a directory.
#[derive(Clone, Debug)]
pub struct JsonDirSource {
    dir: PathBuf,
}

impl JsonDirSource {
    /// Create a source rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of a subject's file
    #[must_use]
    pub fn subject_path(&self, subject_id: u32) -> PathBuf {
        self.dir.join(format!("P{subject_id:02}.json"))
    }
}

impl SubjectSource for JsonDirSource {
    fn load(&self, subject_id: u32) -> PipelineResult<SubjectData> {
        let path = self.subject_path(subject_id);
        let text = fs::read_to_string(&path).map_err(|e| PipelineError::DataNotFound {
            subject_id,
            reason: format!("{}: {e}", path.display()),
        })?;
        let file: SubjectFile = serde_json::from_str(&text).map_err(|e| PipelineError::DataNotFound {
            subject_id,
            reason: format!("{}: {e}", path.display()),
        })?;
        tracing::debug!("Loaded {} trials from {}", file.x.len(), path.display());
        file.into_subject(subject_id)
    }

    fn describe(&self) -> String {
        format!("JSON directory {}", self.dir.display())
    }
}
