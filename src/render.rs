//! Detection overlay rendering: grayscale stretch plus marker circles.

use std::path::Path;

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use ndarray::Array2;

use crate::detect::Detection;

/// Display stretch percentiles for the grayscale base layer.
const STRETCH_LO: f32 = 0.005;
const STRETCH_HI: f32 = 0.995;

const MARKER_COLOR: Rgb<u8> = Rgb([255, 40, 40]);

/// How the marker radius is chosen per detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadiusMode {
    /// Use `circle_radius` for every detection.
    Fixed,
    /// Use the fitted widths (2x mean sigma) when a fit is present,
    /// falling back to `circle_radius`.
    Fit,
}

#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub radius_mode: RadiusMode,
    pub circle_radius: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            radius_mode: RadiusMode::Fixed,
            circle_radius: 6.0,
        }
    }
}

/// Render the image with a circle around each detection.
pub fn render_detections(
    image: &Array2<f32>,
    detections: &[Detection],
    config: &RenderConfig,
) -> RgbImage {
    let (h, w) = image.dim();
    let (lo, hi) = stretch_limits(image);
    let scale = if hi > lo { 255.0 / (hi - lo) } else { 0.0 };

    let mut out = RgbImage::new(w as u32, h as u32);
    for y in 0..h {
        for x in 0..w {
            let v = ((image[[y, x]] - lo) * scale).clamp(0.0, 255.0) as u8;
            out.put_pixel(x as u32, y as u32, Rgb([v, v, v]));
        }
    }

    for d in detections {
        let radius = match (config.radius_mode, &d.fit) {
            (RadiusMode::Fit, Some(fit)) => (fit.sigma_x + fit.sigma_y) as f32,
            _ => config.circle_radius,
        };
        draw_circle(&mut out, d.x, d.y, radius.max(1.0));
    }
    out
}

/// Render and save as PNG (format chosen by extension).
pub fn save_annotated_image<P: AsRef<Path>>(
    path: P,
    image: &Array2<f32>,
    detections: &[Detection],
    config: &RenderConfig,
) -> Result<()> {
    let path = path.as_ref();
    render_detections(image, detections, config)
        .save(path)
        .with_context(|| format!("Failed to save annotated image {}", path.display()))
}

/// Save a marker-free grayscale rendering, for diagnostic images such as
/// the background surface or the matched-filtered frame.
pub fn save_grayscale_image<P: AsRef<Path>>(path: P, image: &Array2<f32>) -> Result<()> {
    let path = path.as_ref();
    render_detections(image, &[], &RenderConfig::default())
        .save(path)
        .with_context(|| format!("Failed to save image {}", path.display()))
}

fn stretch_limits(image: &Array2<f32>) -> (f32, f32) {
    let mut vals: Vec<f32> = image.iter().copied().filter(|v| v.is_finite()).collect();
    if vals.is_empty() {
        return (0.0, 1.0);
    }
    let n = vals.len();
    let lo_idx = ((n - 1) as f32 * STRETCH_LO) as usize;
    let hi_idx = ((n - 1) as f32 * STRETCH_HI) as usize;
    let (_, lo, _) = vals.select_nth_unstable_by(lo_idx, f32::total_cmp);
    let lo = *lo;
    let (_, hi, _) = vals.select_nth_unstable_by(hi_idx, f32::total_cmp);
    (lo, *hi)
}

/// Mark pixels within half a pixel of the circle's ring, clipped to the
/// image bounds.
fn draw_circle(img: &mut RgbImage, cx: f32, cy: f32, radius: f32) {
    let (w, h) = (img.width() as i64, img.height() as i64);
    let r_out = radius + 0.6;
    let r_in = (radius - 0.6).max(0.0);
    let y_min = (cy - r_out).floor() as i64;
    let y_max = (cy + r_out).ceil() as i64;
    let x_min = (cx - r_out).floor() as i64;
    let x_max = (cx + r_out).ceil() as i64;

    for y in y_min..=y_max {
        for x in x_min..=x_max {
            if y < 0 || y >= h || x < 0 || x >= w {
                continue;
            }
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            let dist = (dx * dx + dy * dy).sqrt();
            if dist <= r_out && dist >= r_in {
                img.put_pixel(x as u32, y as u32, MARKER_COLOR);
            }
        }
    }
}
