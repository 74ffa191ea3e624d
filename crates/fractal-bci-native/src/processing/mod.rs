//! Signal processing stages
//!
//! This module provides the per-trial signal stages of the decoder:
//! - [`filters`]: Butterworth and Chebyshev II band-pass filter bank
//! - [`shape`]: Filter-bank output layouts and normalization
//! - [`spatial`]: Spatial-filter contract and CSP
//! - [`fractal`]: Enhanced Higuchi fractal-dimension estimator

pub mod filters;
pub mod fractal;
pub mod shape;
pub mod spatial;

pub use filters::{FilterBank, IirFilterBank};
pub use fractal::{higuchi, HiguchiEstimator, ScaleLength};
pub use shape::{merge_subfilters, FilterBankOutput};
pub use spatial::{Csp, SpatialFilter, SpatialFilterAdapter};
