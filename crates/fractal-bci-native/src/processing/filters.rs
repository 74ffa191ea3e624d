//! Digital filters and the filter bank
//!
//! Provides floating-point Butterworth and Chebyshev type II biquads and a
//! zero-phase filter bank that decomposes `(trial, channel, sample)` signals
//! into frequency bands.

use std::f64::consts::PI;

use ndarray::{Array3, Array4, Array5, Axis};

use fractal_bci_core::{FilterBankConfig, FilterDesign, FrequencyBand};

use super::shape::FilterBankOutput;
use crate::error::{PipelineError, PipelineResult};

/// Butterworth IIR filter coefficients (second-order section)
#[derive(Clone, Copy, Debug)]
pub struct BiquadCoeffs {
    /// Numerator coefficients [b0, b1, b2]
    pub b: [f64; 3],
    /// Denominator coefficients [a0=1, a1, a2]
    pub a: [f64; 3],
}

impl BiquadCoeffs {
    /// Second-order lowpass with quality factor `q`
    ///
    /// `q = 1/sqrt(2)` gives the classic second-order Butterworth response.
    #[must_use]
    pub fn lowpass(sample_rate: f64, cutoff: f64, q: f64) -> Self {
        let k = (PI * cutoff / sample_rate).tan();
        let k2 = k * k;
        let norm = 1.0 / (1.0 + k / q + k2);

        Self {
            b: [k2 * norm, 2.0 * k2 * norm, k2 * norm],
            a: [1.0, 2.0 * (k2 - 1.0) * norm, (1.0 - k / q + k2) * norm],
        }
    }

    /// Second-order highpass with quality factor `q`
    #[must_use]
    pub fn highpass(sample_rate: f64, cutoff: f64, q: f64) -> Self {
        let k = (PI * cutoff / sample_rate).tan();
        let k2 = k * k;
        let norm = 1.0 / (1.0 + k / q + k2);

        Self {
            b: [norm, -2.0 * norm, norm],
            a: [1.0, 2.0 * (k2 - 1.0) * norm, (1.0 - k / q + k2) * norm],
        }
    }

    /// Digital section from analog `[s^2, s, 1]` numerator and denominator
    /// coefficients, mapped with `s = (1 - z^-1) / (1 + z^-1)`.
    ///
    /// Analog frequencies must already be prewarped with `tan(pi * f / fs)`.
    #[must_use]
    pub fn bilinear(num: [f64; 3], den: [f64; 3]) -> Self {
        let map = |[c2, c1, c0]: [f64; 3]| [c2 + c1 + c0, 2.0 * (c0 - c2), c2 - c1 + c0];
        let b = map(num);
        let a = map(den);
        let a0 = a[0];
        Self { b: b.map(|v| v / a0), a: a.map(|v| v / a0) }
    }

    /// Chebyshev type II lowpass section whose stop band starts at `stop_hz`
    #[must_use]
    pub fn chebyshev2_lowpass(sample_rate: f64, stop_hz: f64, section: ChebyshevSection) -> Self {
        let w = prewarp(sample_rate, stop_hz);
        let ChebyshevSection { zero_sq, damping, pole_sq } = section;
        let g = pole_sq / zero_sq;
        Self::bilinear([g, 0.0, g * zero_sq * w * w], [1.0, damping * w, pole_sq * w * w])
    }

    /// Chebyshev type II highpass section whose stop band ends at `stop_hz`
    #[must_use]
    pub fn chebyshev2_highpass(sample_rate: f64, stop_hz: f64, section: ChebyshevSection) -> Self {
        let w = prewarp(sample_rate, stop_hz);
        let ChebyshevSection { zero_sq, damping, pole_sq } = section;
        let g = pole_sq / zero_sq;
        Self::bilinear([g * zero_sq, 0.0, g * w * w], [pole_sq, damping * w, w * w])
    }
}

fn prewarp(sample_rate: f64, hz: f64) -> f64 {
    (PI * hz / sample_rate).tan()
}

fn unwarp(sample_rate: f64, w: f64) -> f64 {
    w.atan() * sample_rate / PI
}

/// One conjugate pole/zero pair of a Chebyshev type II lowpass prototype
/// with its stop band starting at 1 rad/s:
/// `(s^2 + zero_sq) / (s^2 + damping * s + pole_sq)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChebyshevSection {
    /// Squared zero frequency
    pub zero_sq: f64,
    /// First-order denominator coefficient
    pub damping: f64,
    /// Squared pole magnitude
    pub pole_sq: f64,
}

/// Prototype sections of an order `2 * sections` Chebyshev type II lowpass
/// with `attenuation_db` of stop-band attenuation.
#[must_use]
pub fn chebyshev2_sections(sections: usize, attenuation_db: f64) -> Vec<ChebyshevSection> {
    let order = 2 * sections as u32;
    let mu = stop_band_ripple(attenuation_db).asinh() / f64::from(order);
    (0..sections as u32)
        .map(|i| {
            let theta = f64::from(2 * i + 1) * PI / f64::from(2 * order);
            let a = mu.sinh() * theta.sin();
            let b = mu.cosh() * theta.cos();
            let d = a * a + b * b;
            ChebyshevSection { zero_sq: 1.0 / theta.cos().powi(2), damping: 2.0 * a / d, pole_sq: 1.0 / d }
        })
        .collect()
}

/// Ratio of the stop-band edge to the half-power frequency of an order
/// `2 * sections` Chebyshev type II lowpass (prewarped frequencies).
#[must_use]
pub fn chebyshev2_stop_ratio(sections: usize, attenuation_db: f64) -> f64 {
    let order = 2 * sections as u32;
    (stop_band_ripple(attenuation_db).acosh() / f64::from(order)).cosh()
}

fn stop_band_ripple(attenuation_db: f64) -> f64 {
    (10f64.powf(attenuation_db / 10.0) - 1.0).sqrt()
}

/// Quality factors of the second-order sections of an order `2 * sections`
/// Butterworth filter.
#[must_use]
pub fn butterworth_q(sections: usize) -> Vec<f64> {
    let order = 2 * sections as u32;
    (0..sections as u32)
        .map(|i| {
            let theta = f64::from(2 * i + 1) * PI / f64::from(2 * order);
            1.0 / (2.0 * theta.cos())
        })
        .collect()
}

/// Second-order biquad section (transposed direct form II)
#[derive(Clone, Debug)]
pub struct Biquad {
    coeffs: BiquadCoeffs,
    /// State: [z1, z2]
    state: [f64; 2],
}

impl Biquad {
    /// Create a new biquad section with given coefficients
    #[must_use]
    pub fn new(coeffs: BiquadCoeffs) -> Self {
        Self { coeffs, state: [0.0, 0.0] }
    }

    /// Process a single sample
    pub fn filter(&mut self, input: f64) -> f64 {
        let BiquadCoeffs { b, a } = self.coeffs;
        let output = b[0] * input + self.state[0];
        self.state[0] = b[1] * input - a[1] * output + self.state[1];
        self.state[1] = b[2] * input - a[2] * output;
        output
    }

    /// Reset filter state
    pub fn reset(&mut self) {
        self.state = [0.0, 0.0];
    }
}

/// Bandpass filter built from cascaded highpass and lowpass sections
#[derive(Clone, Debug)]
pub struct BandpassFilter {
    sections: Vec<Biquad>,
}

impl BandpassFilter {
    /// Create a bandpass filter for a frequency range
    ///
    /// Each edge is a Butterworth filter of order `2 * sections`.
    #[must_use]
    pub fn new(sample_rate: f64, band: FrequencyBand, sections: usize) -> Self {
        let sections = butterworth_q(sections.max(1))
            .into_iter()
            .flat_map(|q| {
                [
                    Biquad::new(BiquadCoeffs::highpass(sample_rate, band.low_hz, q)),
                    Biquad::new(BiquadCoeffs::lowpass(sample_rate, band.high_hz, q)),
                ]
            })
            .collect();
        Self { sections }
    }

    /// Create a Chebyshev type II bandpass filter.
    ///
    /// Stop-band edges are placed so that each edge of `band` sits at the
    /// half-power point; beyond them the response stays `attenuation_db`
    /// down.
    #[must_use]
    pub fn chebyshev2(sample_rate: f64, band: FrequencyBand, sections: usize, attenuation_db: f64) -> Self {
        let sections = sections.max(1);
        let ratio = chebyshev2_stop_ratio(sections, attenuation_db);
        let low_stop = unwarp(sample_rate, prewarp(sample_rate, band.low_hz) / ratio);
        let high_stop = unwarp(sample_rate, prewarp(sample_rate, band.high_hz) * ratio);

        let sections = chebyshev2_sections(sections, attenuation_db)
            .into_iter()
            .flat_map(|section| {
                [
                    Biquad::new(BiquadCoeffs::chebyshev2_highpass(sample_rate, low_stop, section)),
                    Biquad::new(BiquadCoeffs::chebyshev2_lowpass(sample_rate, high_stop, section)),
                ]
            })
            .collect();
        Self { sections }
    }

    /// Create the bandpass filter described by a filter-bank configuration
    #[must_use]
    pub fn from_config(sample_rate: f64, band: FrequencyBand, config: &FilterBankConfig) -> Self {
        match config.design {
            FilterDesign::Butterworth => Self::new(sample_rate, band, config.sections),
            FilterDesign::ChebyshevII => {
                Self::chebyshev2(sample_rate, band, config.sections, config.attenuation_db)
            }
        }
    }

    /// Process a single sample
    pub fn filter(&mut self, input: f64) -> f64 {
        self.sections.iter_mut().fold(input, |x, section| section.filter(x))
    }

    /// Reset filter state
    pub fn reset(&mut self) {
        for section in &mut self.sections {
            section.reset();
        }
    }

    /// Samples of odd extension used at each edge by [`Self::filtfilt`]
    #[must_use]
    pub fn pad_len(&self) -> usize {
        3 * (2 * self.sections.len() + 1)
    }

    /// Filter a whole signal in one direction
    pub fn filter_signal(&mut self, signal: &[f64]) -> Vec<f64> {
        self.reset();
        signal.iter().map(|&x| self.filter(x)).collect()
    }

    /// Zero-phase filtering: forward and backward passes over an
    /// odd-extended copy of the signal.
    pub fn filtfilt(&mut self, signal: &[f64]) -> Vec<f64> {
        let n = signal.len();
        if n < 2 {
            return signal.to_vec();
        }
        let pad = self.pad_len().min(n - 1);

        let first = signal[0];
        let last = signal[n - 1];
        let mut extended = Vec::with_capacity(n + 2 * pad);
        extended.extend((1..=pad).rev().map(|i| 2.0 * first - signal[i]));
        extended.extend_from_slice(signal);
        extended.extend((1..=pad).map(|i| 2.0 * last - signal[n - 1 - i]));

        let mut forward = self.filter_signal(&extended);
        forward.reverse();
        let mut backward = self.filter_signal(&forward);
        backward.reverse();

        backward[pad..pad + n].to_vec()
    }
}

/// Filter-bank collaborator contract.
///
/// Consumes a `(trial, channel, sample)` tensor and its sampling rate and
/// returns either a four- or five-axis decomposition.
pub trait FilterBank: Send + Sync {
    /// Decompose signals into bands
    ///
    /// # Errors
    ///
    /// Returns a contract violation when the bank cannot be applied at this
    /// sampling rate.
    fn apply(&self, x: &Array3<f64>, sfreq: f64) -> PipelineResult<FilterBankOutput>;
}

/// Zero-phase IIR filter bank with Butterworth or Chebyshev type II edges
#[derive(Clone, Debug)]
pub struct IirFilterBank {
    config: FilterBankConfig,
}

impl IirFilterBank {
    /// Create a filter bank from configuration
    #[must_use]
    pub fn new(config: FilterBankConfig) -> Self {
        Self { config }
    }

    /// Configured pass bands
    #[must_use]
    pub fn bands(&self) -> &[FrequencyBand] {
        &self.config.bands
    }

    /// Sub-bands used for every pass band, in band-major order
    fn sub_bands(&self) -> Vec<Vec<FrequencyBand>> {
        self.config.bands.iter().map(|b| b.split(self.config.subbands)).collect()
    }

    fn run(&self, filter: &mut BandpassFilter, signal: &[f64]) -> Vec<f64> {
        if self.config.zero_phase {
            filter.filtfilt(signal)
        } else {
            filter.filter_signal(signal)
        }
    }
}

impl FilterBank for IirFilterBank {
    fn apply(&self, x: &Array3<f64>, sfreq: f64) -> PipelineResult<FilterBankOutput> {
        let nyquist = 0.5 * sfreq;
        if let Some(band) = self.config.bands.iter().find(|b| b.high_hz >= nyquist) {
            return Err(PipelineError::contract(
                "filter bank",
                format!("band {band} reaches the Nyquist frequency ({nyquist} Hz)"),
            ));
        }

        let (n_trials, n_channels, n_samples) = x.dim();
        let bands = self.sub_bands();
        let n_bands = bands.len();
        let n_sub = self.config.subbands;

        let mut filters: Vec<Vec<BandpassFilter>> = bands
            .iter()
            .map(|subs| {
                subs.iter()
                    .map(|&b| BandpassFilter::from_config(sfreq, b, &self.config))
                    .collect()
            })
            .collect();

        let mut out = Array5::<f64>::zeros((n_trials, n_bands, n_channels, n_sub, n_samples));
        for (t, trial) in x.axis_iter(Axis(0)).enumerate() {
            for (c, channel) in trial.axis_iter(Axis(0)).enumerate() {
                let signal = channel.to_vec();
                for (b, subs) in filters.iter_mut().enumerate() {
                    for (s, filter) in subs.iter_mut().enumerate() {
                        let filtered = self.run(filter, &signal);
                        for (i, v) in filtered.into_iter().enumerate() {
                            out[[t, b, c, s, i]] = v;
                        }
                    }
                }
            }
        }

        tracing::debug!(
            "Filter bank ({:?}): {} trials x {} bands x {} sub-bands at {} Hz",
            self.config.design,
            n_trials,
            n_bands,
            n_sub,
            sfreq
        );

        if n_sub == 1 {
            let four: Array4<f64> = out.index_axis_move(Axis(3), 0);
            Ok(FilterBankOutput::FourAxis(four))
        } else {
            Ok(FilterBankOutput::FiveAxis(out))
        }
    }
}
