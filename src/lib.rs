//! Point-source detection for astronomical images.
//!
//! Given a single 2D intensity frame, [`detect`] estimates and subtracts a
//! blockwise-median background, measures the noise floor with a MAD
//! estimator, optionally matched-filters with a Gaussian PSF kernel,
//! thresholds, extracts 8-connected regions, and reports each surviving
//! region as a sub-pixel position, integrated flux, and peak value. With the
//! `gauss-fit` feature (default) every detection can also carry a
//! Levenberg-Marquardt fit of a rotated anisotropic Gaussian profile.

pub mod background;
pub mod catalog;
pub mod convolve;
pub mod detect;
mod error;
pub mod fits;
#[cfg(feature = "gauss-fit")]
pub mod fitting;
pub mod measure;
pub mod render;
pub mod segmentation;
pub mod stats;

pub use detect::{detect, DetectConfig, Detection, Diagnostics, GaussianFit};
pub use error::DetectError;

/// Whether profile fitting is compiled in.
///
/// Callers branch on this instead of requesting fits and inspecting absent
/// results.
pub fn fitting_available() -> bool {
    cfg!(feature = "gauss-fit")
}
