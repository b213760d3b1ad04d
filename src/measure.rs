//! Flux, centroid, and peak measurement for one labeled region.

use ndarray::Array2;

use crate::segmentation::Region;
use crate::stats::median;

/// Pixels of surrounding context taken on each side of the region's
/// bounding box for the local background sample.
const LOCAL_BG_MARGIN: usize = 3;

/// Photometry for a single region.
#[derive(Debug, Clone, Copy)]
pub struct RegionMeasure {
    /// Flux-weighted centroid X (column), or the peak pixel column for
    /// noise-dominated regions.
    pub x: f32,
    /// Flux-weighted centroid Y (row), or the peak pixel row.
    pub y: f32,
    /// Sum of (optionally background-corrected) region values. May be
    /// non-positive; callers must not assume otherwise.
    pub flux: f32,
    /// Maximum corrected value in the region.
    pub peak: f32,
}

/// Measure a region against `image`.
///
/// With `subtract_local_bg`, the median of the pixels surrounding the region
/// (bounding box grown by [`LOCAL_BG_MARGIN`], region pixels excluded) is
/// subtracted from every sampled value first. If the exclusion leaves no
/// sample, the median of the whole box is used instead.
///
/// A non-positive corrected total is a defined fallback, not a failure: the
/// position degrades to the location of the maximum corrected value (first
/// in row-major order on ties) and the non-positive total is still reported
/// as the flux.
pub fn measure(image: &Array2<f32>, region: &Region, subtract_local_bg: bool) -> RegionMeasure {
    debug_assert!(!region.is_empty());
    let mut vals: Vec<f32> = region.pixels.iter().map(|&(y, x)| image[[y, x]]).collect();

    if subtract_local_bg {
        let bg = local_background(image, region);
        for v in vals.iter_mut() {
            *v -= bg;
        }
    }

    let total: f64 = vals.iter().map(|&v| v as f64).sum();

    let mut peak = f32::NEG_INFINITY;
    let mut peak_pos = region.pixels[0];
    for (&(y, x), &v) in region.pixels.iter().zip(&vals) {
        if v > peak {
            peak = v;
            peak_pos = (y, x);
        }
    }

    if total <= 0.0 {
        return RegionMeasure {
            x: peak_pos.1 as f32,
            y: peak_pos.0 as f32,
            flux: total as f32,
            peak,
        };
    }

    let mut sum_x = 0.0_f64;
    let mut sum_y = 0.0_f64;
    for (&(y, x), &v) in region.pixels.iter().zip(&vals) {
        sum_x += x as f64 * v as f64;
        sum_y += y as f64 * v as f64;
    }

    RegionMeasure {
        x: (sum_x / total) as f32,
        y: (sum_y / total) as f32,
        flux: total as f32,
        peak,
    }
}

fn local_background(image: &Array2<f32>, region: &Region) -> f32 {
    let (h, w) = image.dim();
    let (min_r, max_r, min_c, max_c) = region.bounding_box();
    let y0 = min_r.saturating_sub(LOCAL_BG_MARGIN);
    let y1 = (max_r + LOCAL_BG_MARGIN + 1).min(h);
    let x0 = min_c.saturating_sub(LOCAL_BG_MARGIN);
    let x1 = (max_c + LOCAL_BG_MARGIN + 1).min(w);
    let box_w = x1 - x0;

    let mut in_region = vec![false; (y1 - y0) * box_w];
    for &(y, x) in &region.pixels {
        in_region[(y - y0) * box_w + (x - x0)] = true;
    }

    let mut outside = Vec::with_capacity((y1 - y0) * box_w - region.len());
    for y in y0..y1 {
        for x in x0..x1 {
            if !in_region[(y - y0) * box_w + (x - x0)] {
                outside.push(image[[y, x]]);
            }
        }
    }

    if outside.is_empty() {
        // Region fills its padded box; fall back to the whole box.
        let mut all = Vec::with_capacity((y1 - y0) * box_w);
        for y in y0..y1 {
            for x in x0..x1 {
                all.push(image[[y, x]]);
            }
        }
        median(&mut all)
    } else {
        median(&mut outside)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region_of(coords: &[(usize, usize)]) -> Region {
        let mut pixels = coords.to_vec();
        pixels.sort_unstable();
        Region { pixels }
    }

    #[test]
    fn symmetric_peak_centroids_on_center() {
        // Cross-shaped source, symmetric around (10, 10), zero background.
        let mut img = Array2::zeros((21, 21));
        img[[10, 10]] = 100.0;
        img[[9, 10]] = 40.0;
        img[[11, 10]] = 40.0;
        img[[10, 9]] = 40.0;
        img[[10, 11]] = 40.0;
        let region = region_of(&[(10, 10), (9, 10), (11, 10), (10, 9), (10, 11)]);

        let m = measure(&img, &region, false);
        assert!((m.x - 10.0).abs() < 0.5);
        assert!((m.y - 10.0).abs() < 0.5);
        assert!((m.flux - 260.0).abs() < 1e-3);
        assert_eq!(m.peak, 100.0);
    }

    #[test]
    fn local_background_removes_pedestal() {
        let mut img = Array2::from_elem((20, 20), 50.0_f32);
        img[[8, 8]] = 150.0;
        img[[8, 9]] = 150.0;
        let region = region_of(&[(8, 8), (8, 9)]);

        let m = measure(&img, &region, true);
        assert!((m.flux - 200.0).abs() < 1e-3, "flux {}", m.flux);
        assert!((m.peak - 100.0).abs() < 1e-3);
        assert!((m.y - 8.0).abs() < 1e-4);
        assert!((m.x - 8.5).abs() < 1e-4);
    }

    #[test]
    fn non_positive_total_falls_back_to_peak_pixel() {
        let mut img = Array2::zeros((10, 10));
        img[[4, 4]] = -5.0;
        img[[4, 5]] = -1.0;
        img[[5, 4]] = -3.0;
        let region = region_of(&[(4, 4), (4, 5), (5, 4)]);

        let m = measure(&img, &region, false);
        assert_eq!(m.x, 5.0);
        assert_eq!(m.y, 4.0);
        assert!((m.flux - -9.0).abs() < 1e-6);
        assert_eq!(m.peak, -1.0);
    }

    #[test]
    fn fallback_tie_breaks_row_major() {
        let img = Array2::zeros((6, 6));
        let region = region_of(&[(3, 2), (2, 3), (2, 2)]);
        // All values equal (0), total is 0: first row-major pixel wins.
        let m = measure(&img, &region, false);
        assert_eq!((m.y, m.x), (2.0, 2.0));
    }

    #[test]
    fn weighted_centroid_leans_toward_bright_pixel() {
        let mut img = Array2::zeros((10, 10));
        img[[5, 5]] = 30.0;
        img[[5, 6]] = 10.0;
        let region = region_of(&[(5, 5), (5, 6)]);
        let m = measure(&img, &region, false);
        assert!((m.x - 5.25).abs() < 1e-4, "x {}", m.x);
        assert_eq!(m.y, 5.0);
    }
}
