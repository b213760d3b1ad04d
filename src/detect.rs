//! End-to-end detection pipeline: background, noise, matched filter,
//! threshold, labeling, photometry, optional profile fits.

use log::debug;
use ndarray::Array2;
use rayon::prelude::*;

use crate::background::estimate_background;
use crate::convolve::{fft_convolve, gaussian_kernel};
use crate::error::DetectError;
use crate::measure::measure;
use crate::segmentation::label_components;
use crate::stats::{median, robust_sigma};

/// Cutout half-width for per-detection profile fits.
const FIT_CUTOUT_RADIUS: usize = 6;

/// Parameters for one detection run.
#[derive(Debug, Clone)]
pub struct DetectConfig {
    /// Detection threshold in robust-sigma units above the median.
    pub k: f32,
    /// Expected PSF width in pixels; sizes the matched-filter kernel.
    pub psf_sigma: f32,
    /// Block size for the background surface estimate.
    pub bg_block_size: usize,
    /// Convolve with a PSF-shaped kernel before thresholding.
    pub use_matched_filter: bool,
    /// Discard components with fewer pixels (filters hot pixels).
    pub min_area: usize,
    /// Attach a Gaussian profile fit to each detection when the fitter is
    /// compiled in.
    pub fit_profiles: bool,
    /// Negate the image first, for dark sources on a bright background.
    pub invert: bool,
}

impl Default for DetectConfig {
    fn default() -> Self {
        DetectConfig {
            k: 3.0,
            psf_sigma: 1.2,
            bg_block_size: 64,
            use_matched_filter: true,
            min_area: 3,
            fit_profiles: true,
            invert: false,
        }
    }
}

impl DetectConfig {
    pub fn with_k(mut self, k: f32) -> Self {
        self.k = k;
        self
    }

    pub fn with_psf_sigma(mut self, sigma: f32) -> Self {
        self.psf_sigma = sigma;
        self
    }

    pub fn with_bg_block_size(mut self, block_size: usize) -> Self {
        self.bg_block_size = block_size.max(1);
        self
    }

    pub fn with_min_area(mut self, area: usize) -> Self {
        self.min_area = area;
        self
    }

    pub fn without_matched_filter(mut self) -> Self {
        self.use_matched_filter = false;
        self
    }

    pub fn without_profile_fits(mut self) -> Self {
        self.fit_profiles = false;
        self
    }

    pub fn with_invert(mut self, invert: bool) -> Self {
        self.invert = invert;
        self
    }
}

/// One detected point source.
#[derive(Debug, Clone)]
pub struct Detection {
    /// Sub-pixel centroid X (column).
    pub x: f32,
    /// Sub-pixel centroid Y (row).
    pub y: f32,
    /// Local-background-corrected integrated flux. Non-positive for
    /// noise-dominated regions.
    pub flux: f32,
    /// Maximum corrected value in the region.
    pub peak: f32,
    /// Pixel count of the thresholded component.
    pub area: usize,
    /// Present when fitting was requested, compiled in, and converged.
    pub fit: Option<GaussianFit>,
}

/// Converged parameters of a rotated anisotropic 2D Gaussian profile.
#[derive(Debug, Clone, Copy)]
pub struct GaussianFit {
    pub amp: f64,
    /// Center X in full-image coordinates.
    pub x: f64,
    /// Center Y in full-image coordinates.
    pub y: f64,
    pub sigma_x: f64,
    pub sigma_y: f64,
    /// Rotation angle in radians.
    pub theta: f64,
    pub offset: f64,
}

/// Intermediate images and the threshold of one pipeline run, for
/// downstream inspection and rendering only.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    pub background: Array2<f32>,
    pub subtracted: Array2<f32>,
    pub filtered: Array2<f32>,
    pub threshold: f32,
}

/// Run the full detection pipeline on one image.
///
/// Returns the catalog sorted by peak value descending (ties broken by row
/// then column, so identical inputs give identical output) together with the
/// diagnostic intermediates. Structural precondition violations abort the
/// whole run; per-region numerical degeneracies resolve to fallback values
/// and never discard the rest of the catalog.
pub fn detect(
    image: &Array2<f32>,
    config: &DetectConfig,
) -> Result<(Vec<Detection>, Diagnostics), DetectError> {
    let (h, w) = image.dim();
    if h == 0 || w == 0 {
        return Err(DetectError::EmptyImage { rows: h, cols: w });
    }

    let img = if config.invert {
        image.mapv(|v| -v)
    } else {
        image.clone()
    };

    let background = estimate_background(&img, config.bg_block_size)?;
    let subtracted = &img - &background;

    let mut flat: Vec<f32> = subtracted.iter().copied().collect();
    let sigma = robust_sigma(&flat);
    let med = median(&mut flat);

    let filtered = if config.use_matched_filter {
        let size = matched_kernel_size(config.psf_sigma);
        let kernel = gaussian_kernel(size, config.psf_sigma)?;
        fft_convolve(&subtracted, &kernel)
    } else {
        subtracted.clone()
    };

    let threshold = med + config.k * sigma;
    let mask = filtered.mapv(|v| v > threshold);

    let regions: Vec<_> = label_components(&mask)
        .into_iter()
        .filter(|r| r.len() >= config.min_area)
        .collect();
    debug!(
        "threshold {:.4} (median {:.4}, sigma {:.4}): {} regions kept",
        threshold,
        med,
        sigma,
        regions.len()
    );

    let mut detections: Vec<Detection> = regions
        .par_iter()
        .map(|region| {
            let m = measure(&subtracted, region, true);
            let fit = if config.fit_profiles {
                try_fit(&img, m.y, m.x)
            } else {
                None
            };
            Detection {
                x: m.x,
                y: m.y,
                flux: m.flux,
                peak: m.peak,
                area: region.len(),
                fit,
            }
        })
        .collect();

    detections.sort_by(|a, b| {
        b.peak
            .total_cmp(&a.peak)
            .then_with(|| a.y.total_cmp(&b.y))
            .then_with(|| a.x.total_cmp(&b.x))
    });

    Ok((
        detections,
        Diagnostics {
            background,
            subtracted,
            filtered,
            threshold,
        },
    ))
}

/// Odd kernel size covering roughly +/-4 sigma, never below 3.
fn matched_kernel_size(psf_sigma: f32) -> usize {
    let truncated = (8.0 * psf_sigma).max(0.0) as usize;
    ((truncated / 2) * 2 + 1).max(3)
}

#[cfg(feature = "gauss-fit")]
fn try_fit(image: &Array2<f32>, y: f32, x: f32) -> Option<GaussianFit> {
    crate::fitting::fit_profile(image, y, x, FIT_CUTOUT_RADIUS)
}

#[cfg(not(feature = "gauss-fit"))]
fn try_fit(_image: &Array2<f32>, _y: f32, _x: f32) -> Option<GaussianFit> {
    None
}
