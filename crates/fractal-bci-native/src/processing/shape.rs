//! Filter-bank output layouts and their normalization
//!
//! The filter bank declares its layout through [`FilterBankOutput`]; the
//! spatial filter always consumes the canonical `(trial, band, channel,
//! sample)` layout produced by [`FilterBankOutput::normalize`].

use ndarray::{Array4, Array5, ArrayD, Axis, Ix4, Ix5};

use crate::error::{PipelineError, PipelineResult, ShapeError};

/// Tagged filter-bank output.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterBankOutput {
    /// `(trial, band, channel, sample)`
    FourAxis(Array4<f64>),
    /// `(trial, band, channel, subfilter, sample)`
    FiveAxis(Array5<f64>),
}

impl FilterBankOutput {
    /// Tag a dynamically shaped tensor by its rank.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::Rank`] for anything other than rank 4 or 5.
    pub fn from_dyn(x: ArrayD<f64>) -> Result<Self, ShapeError> {
        let shape = x.shape().to_vec();
        match shape.len() {
            4 => x
                .into_dimensionality::<Ix4>()
                .map(Self::FourAxis)
                .map_err(|_| ShapeError::Rank { rank: 4, shape }),
            5 => x
                .into_dimensionality::<Ix5>()
                .map(Self::FiveAxis)
                .map_err(|_| ShapeError::Rank { rank: 5, shape }),
            rank => Err(ShapeError::Rank { rank, shape }),
        }
    }

    /// Raw shape of the tensor
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::FourAxis(x) => x.shape(),
            Self::FiveAxis(x) => x.shape(),
        }
    }

    /// Number of trials
    #[must_use]
    pub fn n_trials(&self) -> usize {
        self.shape()[0]
    }

    /// Number of samples per signal
    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.shape().last().copied().unwrap_or(0)
    }

    /// Number of effective bands after normalization
    #[must_use]
    pub fn n_effective_bands(&self) -> usize {
        match self {
            Self::FourAxis(x) => x.len_of(Axis(1)),
            Self::FiveAxis(x) => x.len_of(Axis(1)) * x.len_of(Axis(3)),
        }
    }

    /// Check the output against the tensor that was filtered.
    ///
    /// # Errors
    ///
    /// Returns a contract violation when trials, channels or samples were
    /// dropped or added.
    pub fn check_against(&self, trials: usize, channels: usize, samples: usize) -> PipelineResult<()> {
        let shape = self.shape();
        let got = (shape[0], shape[2], self.n_samples());
        if got != (trials, channels, samples) {
            return Err(PipelineError::contract(
                "filter bank",
                format!(
                    "output shape {shape:?} does not preserve \
                     {trials} trials, {channels} channels, {samples} samples"
                ),
            ));
        }
        Ok(())
    }

    /// Convert to the canonical `(trial, band, channel, sample)` layout.
    #[must_use]
    pub fn normalize(self) -> Array4<f64> {
        match self {
            Self::FourAxis(x) => x,
            Self::FiveAxis(x) => merge_subfilters(&x),
        }
    }
}

/// Fold the sub-filter axis into the band axis.
///
/// Effective band `i` is `(band = i / subfilters, subfilter = i % subfilters)`.
#[must_use]
pub fn merge_subfilters(x: &Array5<f64>) -> Array4<f64> {
    let (trials, bands, channels, subfilters, samples) = x.dim();
    Array4::from_shape_fn((trials, bands * subfilters, channels, samples), |(t, e, c, s)| {
        x[[t, e / subfilters, c, e % subfilters, s]]
    })
}
