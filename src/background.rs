//! Blockwise-median background surface estimation.

use ndarray::{s, Array2};
use rayon::prelude::*;

use crate::convolve::{fft_convolve, gaussian_kernel};
use crate::error::DetectError;
use crate::stats::median;

const SMOOTH_KERNEL_SIZE: usize = 9;
const SMOOTH_SIGMA: f32 = 1.5;

/// Estimate a smooth background surface with the same shape as `image`.
///
/// The image is reflect-padded so `block_size` evenly divides both
/// dimensions, each non-overlapping block is reduced to its median, the
/// low-resolution grid is upsampled by block replication, and a small
/// Gaussian smoothing pass removes the block-boundary steps. Sources smaller
/// than a block do not pull the estimate up, so the surface tracks sky and
/// instrument signatures rather than stars.
pub fn estimate_background(
    image: &Array2<f32>,
    block_size: usize,
) -> Result<Array2<f32>, DetectError> {
    let (h, w) = image.dim();
    if h == 0 || w == 0 {
        return Err(DetectError::EmptyImage { rows: h, cols: w });
    }
    if block_size == 0 {
        return Err(DetectError::BlockSize);
    }

    let by = h.div_ceil(block_size);
    let bx = w.div_ceil(block_size);
    let ph = by * block_size;
    let pw = bx * block_size;
    let padded = reflect_pad(image, ph, pw);

    // Blocks are independent; the collect keeps them in block-index order so
    // the result does not depend on the parallel schedule.
    let medians: Vec<f32> = (0..by * bx)
        .into_par_iter()
        .map(|bi| {
            let i = bi / bx;
            let j = bi % bx;
            let mut block = Vec::with_capacity(block_size * block_size);
            for y in i * block_size..(i + 1) * block_size {
                for x in j * block_size..(j + 1) * block_size {
                    block.push(padded[[y, x]]);
                }
            }
            median(&mut block)
        })
        .collect();

    let mut upsampled = Array2::zeros((ph, pw));
    for y in 0..ph {
        let row = (y / block_size) * bx;
        for x in 0..pw {
            upsampled[[y, x]] = medians[row + x / block_size];
        }
    }

    let smooth = gaussian_kernel(SMOOTH_KERNEL_SIZE, SMOOTH_SIGMA)?;
    let smoothed = fft_convolve(&upsampled, &smooth);
    Ok(smoothed.slice(s![..h, ..w]).to_owned())
}

/// Pad on the bottom/right edges by mirror reflection (edge sample not
/// repeated).
fn reflect_pad(image: &Array2<f32>, ph: usize, pw: usize) -> Array2<f32> {
    let (h, w) = image.dim();
    let mut out = Array2::zeros((ph, pw));
    for y in 0..ph {
        let sy = reflect_index(y, h);
        for x in 0..pw {
            out[[y, x]] = image[[sy, reflect_index(x, w)]];
        }
    }
    out
}

fn reflect_index(i: usize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let period = 2 * (n - 1);
    let m = i % period;
    if m < n {
        m
    } else {
        period - m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reflect_index_bounces() {
        // For n=4 the padded sequence continues c, b, a, b, c, ...
        assert_eq!(reflect_index(3, 4), 3);
        assert_eq!(reflect_index(4, 4), 2);
        assert_eq!(reflect_index(5, 4), 1);
        assert_eq!(reflect_index(6, 4), 0);
        assert_eq!(reflect_index(0, 1), 0);
        assert_eq!(reflect_index(9, 1), 0);
    }

    #[test]
    fn flat_image_recovers_level() {
        let img = Array2::from_elem((40, 56), 120.5_f32);
        let bg = estimate_background(&img, 16).unwrap();
        assert_eq!(bg.dim(), (40, 56));
        for &v in bg.iter() {
            assert!((v - 120.5).abs() < 0.01, "bg {}", v);
        }
    }

    #[test]
    fn gradient_direction_is_tracked() {
        // Left-to-right ramp: the estimate must rise with the ramp.
        let mut img = Array2::zeros((64, 128));
        for y in 0..64 {
            for x in 0..128 {
                img[[y, x]] = 500.0 + 4.0 * x as f32;
            }
        }
        let bg = estimate_background(&img, 16).unwrap();
        let left = bg[[32, 16]];
        let right = bg[[32, 112]];
        assert!(left < right, "left {} right {}", left, right);
        assert!((left - img[[32, 16]]).abs() < 80.0);
        assert!((right - img[[32, 112]]).abs() < 80.0);
    }

    #[test]
    fn compact_source_not_absorbed() {
        // A star much smaller than the block leaves the block median alone.
        let mut img = Array2::from_elem((64, 64), 10.0_f32);
        for dy in -3i64..=3 {
            for dx in -3i64..=3 {
                let r2 = (dx * dx + dy * dy) as f32;
                img[[(32 + dy) as usize, (32 + dx) as usize]] +=
                    200.0 * (-r2 / (2.0 * 1.5 * 1.5)).exp();
            }
        }
        let bg = estimate_background(&img, 16).unwrap();
        assert!(
            (bg[[32, 32]] - 10.0).abs() < 1.0,
            "background under star {}",
            bg[[32, 32]]
        );
    }

    #[test]
    fn rejects_degenerate_inputs() {
        let img = Array2::from_elem((8, 8), 1.0_f32);
        assert!(estimate_background(&img, 0).is_err());
        let empty: Array2<f32> = Array2::zeros((0, 5));
        assert!(estimate_background(&empty, 8).is_err());
    }
}
