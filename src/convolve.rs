//! Gaussian kernels and frequency-domain convolution.

use ndarray::Array2;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::error::DetectError;

/// Square Gaussian kernel with odd side length, normalized to sum 1.
pub fn gaussian_kernel(size: usize, sigma: f32) -> Result<Array2<f32>, DetectError> {
    if size == 0 || size % 2 == 0 {
        return Err(DetectError::KernelSize(size));
    }
    let r = (size / 2) as i64;
    let inv_2s2 = 1.0 / (2.0 * sigma * sigma);
    let mut kernel = Array2::zeros((size, size));
    let mut sum = 0.0_f32;
    for ky in 0..size {
        for kx in 0..size {
            let dy = (ky as i64 - r) as f32;
            let dx = (kx as i64 - r) as f32;
            let g = (-(dx * dx + dy * dy) * inv_2s2).exp();
            kernel[[ky, kx]] = g;
            sum += g;
        }
    }
    kernel.mapv_inplace(|v| v / sum);
    Ok(kernel)
}

/// "Same"-size linear convolution via the frequency domain.
///
/// Both operands are zero-padded to `shape(image) + shape(kernel) - 1` so the
/// cyclic product is a true linear convolution, then the result is cropped
/// back to the image shape with the kernel center aligned to each output
/// pixel. Matches direct spatial convolution to floating tolerance.
pub fn fft_convolve(image: &Array2<f32>, kernel: &Array2<f32>) -> Array2<f32> {
    let (h, w) = image.dim();
    let (kh, kw) = kernel.dim();
    let ph = h + kh - 1;
    let pw = w + kw - 1;

    let mut img_freq = pack_padded(image, ph, pw);
    let mut ker_freq = pack_padded(kernel, ph, pw);
    fft_2d(&mut img_freq, ph, pw, false);
    fft_2d(&mut ker_freq, ph, pw, false);

    for (a, b) in img_freq.iter_mut().zip(&ker_freq) {
        *a *= *b;
    }
    fft_2d(&mut img_freq, ph, pw, true);

    // Inverse transform is unnormalized; fold the 1/N into the crop.
    let norm = 1.0 / (ph * pw) as f32;
    let sy = (kh - 1) / 2;
    let sx = (kw - 1) / 2;
    let mut out = Array2::zeros((h, w));
    for y in 0..h {
        for x in 0..w {
            out[[y, x]] = img_freq[(y + sy) * pw + (x + sx)].re * norm;
        }
    }
    out
}

fn pack_padded(src: &Array2<f32>, rows: usize, cols: usize) -> Vec<Complex<f32>> {
    let (h, w) = src.dim();
    let mut buf = vec![Complex::new(0.0, 0.0); rows * cols];
    for y in 0..h {
        for x in 0..w {
            buf[y * cols + x].re = src[[y, x]];
        }
    }
    buf
}

/// In-place 2D FFT: rows first, then columns through a scratch buffer.
fn fft_2d(buf: &mut [Complex<f32>], rows: usize, cols: usize, inverse: bool) {
    let mut planner = FftPlanner::new();
    let (row_fft, col_fft) = if inverse {
        (planner.plan_fft_inverse(cols), planner.plan_fft_inverse(rows))
    } else {
        (planner.plan_fft_forward(cols), planner.plan_fft_forward(rows))
    };

    for row in buf.chunks_exact_mut(cols) {
        row_fft.process(row);
    }

    let mut column = vec![Complex::new(0.0, 0.0); rows];
    for x in 0..cols {
        for y in 0..rows {
            column[y] = buf[y * cols + x];
        }
        col_fft.process(&mut column);
        for y in 0..rows {
            buf[y * cols + x] = column[y];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Direct spatial "same" convolution, the reference for the FFT path.
    fn direct_convolve(image: &Array2<f32>, kernel: &Array2<f32>) -> Array2<f32> {
        let (h, w) = image.dim();
        let (kh, kw) = kernel.dim();
        let sy = ((kh - 1) / 2) as i64;
        let sx = ((kw - 1) / 2) as i64;
        let mut out = Array2::zeros((h, w));
        for y in 0..h {
            for x in 0..w {
                let mut sum = 0.0_f32;
                for ky in 0..kh {
                    for kx in 0..kw {
                        let iy = y as i64 + sy - ky as i64;
                        let ix = x as i64 + sx - kx as i64;
                        if iy >= 0 && iy < h as i64 && ix >= 0 && ix < w as i64 {
                            sum += image[[iy as usize, ix as usize]] * kernel[[ky, kx]];
                        }
                    }
                }
                out[[y, x]] = sum;
            }
        }
        out
    }

    fn lcg_image(h: usize, w: usize, seed: u64) -> Array2<f32> {
        let mut rng = seed;
        let mut img = Array2::zeros((h, w));
        for v in img.iter_mut() {
            rng = rng.wrapping_mul(6364136223846793005).wrapping_add(1);
            *v = (rng >> 33) as f32 / (1u64 << 31) as f32;
        }
        img
    }

    #[test]
    fn kernel_normalized_and_symmetric() {
        for &size in &[3usize, 5, 9] {
            let k = gaussian_kernel(size, 1.5).unwrap();
            let sum: f32 = k.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5, "size {} sum {}", size, sum);
            for y in 0..size {
                for x in 0..size {
                    let rot = k[[size - 1 - y, size - 1 - x]];
                    assert!((k[[y, x]] - rot).abs() < 1e-7);
                }
            }
        }
    }

    #[test]
    fn kernel_rejects_even_or_zero_size() {
        assert!(gaussian_kernel(4, 1.0).is_err());
        assert!(gaussian_kernel(0, 1.0).is_err());
    }

    #[test]
    fn convolve_preserves_shape() {
        let img = lcg_image(17, 23, 3);
        let k = gaussian_kernel(5, 1.0).unwrap();
        assert_eq!(fft_convolve(&img, &k).dim(), (17, 23));
    }

    #[test]
    fn delta_kernel_is_identity() {
        let img = lcg_image(12, 16, 11);
        let mut delta = Array2::zeros((3, 3));
        delta[[1, 1]] = 1.0;
        let out = fft_convolve(&img, &delta);
        for (a, b) in out.iter().zip(img.iter()) {
            assert!((a - b).abs() < 1e-4, "{} vs {}", a, b);
        }
    }

    #[test]
    fn fft_matches_direct_convolution() {
        let img = lcg_image(16, 12, 99);
        let k = gaussian_kernel(5, 1.2).unwrap();
        let fft = fft_convolve(&img, &k);
        let direct = direct_convolve(&img, &k);
        for (a, b) in fft.iter().zip(direct.iter()) {
            assert!((a - b).abs() < 1e-4, "{} vs {}", a, b);
        }
    }

    #[test]
    fn fft_matches_direct_for_asymmetric_kernel() {
        // Pins down orientation: a lopsided kernel exposes any accidental
        // correlation-instead-of-convolution mixup.
        let img = lcg_image(10, 10, 5);
        let mut k = Array2::zeros((3, 3));
        k[[0, 0]] = 0.7;
        k[[2, 1]] = 0.3;
        let fft = fft_convolve(&img, &k);
        let direct = direct_convolve(&img, &k);
        for (a, b) in fft.iter().zip(direct.iter()) {
            assert!((a - b).abs() < 1e-4, "{} vs {}", a, b);
        }
    }
}
