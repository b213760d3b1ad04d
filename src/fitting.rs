//! Levenberg-Marquardt fit of a rotated anisotropic 2D Gaussian.
//!
//! All internal computation is f64 for numerical stability. Compiled only
//! with the `gauss-fit` feature; [`crate::fitting_available`] reports the
//! capability so callers can branch without feature-sniffing.

use ndarray::Array2;

use crate::detect::GaussianFit;
use crate::stats::median;

const NP: usize = 7;
const MAX_ITER: usize = 100;
const CONV_TOL: f64 = 1e-7;

/// Parameter vector layout: [amp, x0, y0, sigma_x, sigma_y, theta, offset].
/// Model: offset + amp * exp(-(a*u^2 + 2b*u*v + c*v^2)), u = x-x0, v = y-y0,
/// with a, b, c the standard rotated-Gaussian coefficients.
struct Sample {
    x: f64,
    y: f64,
    value: f64,
}

/// Fit a Gaussian profile to a square cutout around `(x_center, y_center)`.
///
/// The cutout has side `2*radius + 1`, clipped at image edges. Returns `None`
/// on degenerate cutouts (non-positive total intensity, too few pixels) or
/// solver non-convergence; a missing fit is informational, never an error.
/// On success the center is reported in full-image coordinates.
pub fn fit_profile(
    image: &Array2<f32>,
    y_center: f32,
    x_center: f32,
    radius: usize,
) -> Option<GaussianFit> {
    let (h, w) = image.dim();
    if h == 0 || w == 0 {
        return None;
    }
    let r = radius as i64;
    let yc = y_center.round() as i64;
    let xc = x_center.round() as i64;
    let y0 = (yc - r).clamp(0, h as i64 - 1) as usize;
    let y1 = (yc + r + 1).clamp(0, h as i64) as usize;
    let x0 = (xc - r).clamp(0, w as i64 - 1) as usize;
    let x1 = (xc + r + 1).clamp(0, w as i64) as usize;
    if y1 <= y0 || x1 <= x0 {
        return None;
    }

    let mut samples = Vec::with_capacity((y1 - y0) * (x1 - x0));
    let mut cutout = Vec::with_capacity((y1 - y0) * (x1 - x0));
    for y in y0..y1 {
        for x in x0..x1 {
            let v = image[[y, x]];
            cutout.push(v);
            samples.push(Sample {
                x: (x - x0) as f64,
                y: (y - y0) as f64,
                value: v as f64,
            });
        }
    }
    if samples.len() < 10 {
        return None;
    }

    let max = cutout.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let med = median(&mut cutout);

    // Intensity-weighted first moments seed the center.
    let total: f64 = samples.iter().map(|s| s.value).sum();
    if !(total > 0.0) {
        return None;
    }
    let cx0 = samples.iter().map(|s| s.x * s.value).sum::<f64>() / total;
    let cy0 = samples.iter().map(|s| s.y * s.value).sum::<f64>() / total;

    let mut params = [
        (max - med) as f64,
        cx0,
        cy0,
        1.5,
        1.5,
        0.0,
        med as f64,
    ];
    if !lm_solve(&samples, &mut params) {
        return None;
    }
    if params.iter().any(|p| !p.is_finite()) {
        return None;
    }

    Some(GaussianFit {
        amp: params[0],
        x: x0 as f64 + params[1],
        y: y0 as f64 + params[2],
        sigma_x: params[3].abs(),
        sigma_y: params[4].abs(),
        theta: params[5],
        offset: params[6],
    })
}

/// Quadratic-form coefficients (a, b, c) for (sigma_x, sigma_y, theta).
fn model_coeffs(sx: f64, sy: f64, theta: f64) -> (f64, f64, f64) {
    let (sin_t, cos_t) = theta.sin_cos();
    let sin2t = (2.0 * theta).sin();
    let inv_sx2 = 1.0 / (2.0 * sx * sx);
    let inv_sy2 = 1.0 / (2.0 * sy * sy);
    let a = cos_t * cos_t * inv_sx2 + sin_t * sin_t * inv_sy2;
    let b = -sin2t / (4.0 * sx * sx) + sin2t / (4.0 * sy * sy);
    let c = sin_t * sin_t * inv_sx2 + cos_t * cos_t * inv_sy2;
    (a, b, c)
}

fn lm_solve(samples: &[Sample], params: &mut [f64; NP]) -> bool {
    let mut lambda = 1e-3_f64;
    let mut nu = 2.0_f64;
    let mut best_cost = residual_cost(samples, params);
    let mut converged = false;

    let mut jtj = [0.0_f64; NP * NP];
    let mut jtr = [0.0_f64; NP];
    let mut j = [0.0_f64; NP];
    let mut mat = [0.0_f64; NP * NP];

    for _ in 0..MAX_ITER {
        jtj.fill(0.0);
        jtr.fill(0.0);

        let amp = params[0];
        let sx = params[3];
        let sy = params[4];
        let theta = params[5];
        let (a, b, c) = model_coeffs(sx, sy, theta);

        let (sin_t, cos_t) = theta.sin_cos();
        let sin2t = (2.0 * theta).sin();
        let cos2t = (2.0 * theta).cos();
        let inv_sx2 = 1.0 / (sx * sx);
        let inv_sy2 = 1.0 / (sy * sy);
        let diff2 = inv_sy2 - inv_sx2;

        // d(a,b,c)/d(sigma_x, sigma_y, theta)
        let da_dsx = -cos_t * cos_t / (sx * sx * sx);
        let db_dsx = sin2t / (2.0 * sx * sx * sx);
        let dc_dsx = -sin_t * sin_t / (sx * sx * sx);
        let da_dsy = -sin_t * sin_t / (sy * sy * sy);
        let db_dsy = -sin2t / (2.0 * sy * sy * sy);
        let dc_dsy = -cos_t * cos_t / (sy * sy * sy);
        let da_dt = 0.5 * sin2t * diff2;
        let db_dt = 0.5 * cos2t * diff2;
        let dc_dt = -da_dt;

        for s in samples {
            let u = s.x - params[1];
            let v = s.y - params[2];
            let e = (-(a * u * u + 2.0 * b * u * v + c * v * v)).exp();
            let model = params[6] + amp * e;
            let r = s.value - model;

            j[0] = e;
            j[1] = amp * e * (2.0 * a * u + 2.0 * b * v);
            j[2] = amp * e * (2.0 * b * u + 2.0 * c * v);
            j[3] = -amp * e * (da_dsx * u * u + 2.0 * db_dsx * u * v + dc_dsx * v * v);
            j[4] = -amp * e * (da_dsy * u * u + 2.0 * db_dsy * u * v + dc_dsy * v * v);
            j[5] = -amp * e * (da_dt * u * u + 2.0 * db_dt * u * v + dc_dt * v * v);
            j[6] = 1.0;

            for p in 0..NP {
                jtr[p] += j[p] * r;
                for q in p..NP {
                    jtj[p * NP + q] += j[p] * j[q];
                }
            }
        }

        for p in 0..NP {
            for q in 0..p {
                jtj[p * NP + q] = jtj[q * NP + p];
            }
        }

        mat.copy_from_slice(&jtj);
        for p in 0..NP {
            mat[p * NP + p] += lambda * jtj[p * NP + p].max(1e-12);
        }

        let delta = match cholesky_solve(&mat, &jtr) {
            Some(d) => d,
            None => break,
        };

        let mut new_params = *params;
        for p in 0..NP {
            new_params[p] += delta[p];
        }
        // Keep sigmas positive so the model stays evaluable.
        if new_params[3] <= 0.0 {
            new_params[3] = params[3] * 0.5;
        }
        if new_params[4] <= 0.0 {
            new_params[4] = params[4] * 0.5;
        }

        let new_cost = residual_cost(samples, &new_params);

        // Nielsen gain ratio controls the damping schedule.
        let predicted: f64 = delta
            .iter()
            .enumerate()
            .map(|(i, d)| d * (lambda * jtj[i * NP + i].max(1e-12) * d + jtr[i]))
            .sum();

        if predicted > 0.0 {
            let rho = (best_cost - new_cost) / predicted;
            if rho > 0.0 {
                *params = new_params;
                best_cost = new_cost;
                lambda *= (1.0_f64 / 3.0).max(1.0 - (2.0 * rho - 1.0).powi(3));
                nu = 2.0;
            } else {
                lambda *= nu;
                nu *= 2.0;
            }
        } else {
            lambda *= nu;
            nu *= 2.0;
        }

        let param_norm = params.iter().map(|p| p * p).sum::<f64>().sqrt();
        let delta_norm = delta.iter().map(|d| d * d).sum::<f64>().sqrt();
        if delta_norm / param_norm.max(1e-12) < CONV_TOL {
            converged = true;
            break;
        }
    }

    converged
}

fn residual_cost(samples: &[Sample], params: &[f64; NP]) -> f64 {
    let (a, b, c) = model_coeffs(params[3], params[4], params[5]);
    samples
        .iter()
        .map(|s| {
            let u = s.x - params[1];
            let v = s.y - params[2];
            let model =
                params[6] + params[0] * (-(a * u * u + 2.0 * b * u * v + c * v * v)).exp();
            let r = s.value - model;
            r * r
        })
        .sum()
}

/// Cholesky solve of the symmetric positive-definite damped normal system.
fn cholesky_solve(mat: &[f64; NP * NP], rhs: &[f64; NP]) -> Option<[f64; NP]> {
    let mut l = [0.0_f64; NP * NP];

    for i in 0..NP {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[i * NP + k] * l[j * NP + k];
            }
            if i == j {
                let diag = mat[i * NP + i] - sum;
                if diag <= 0.0 {
                    return None;
                }
                l[i * NP + j] = diag.sqrt();
            } else {
                l[i * NP + j] = (mat[i * NP + j] - sum) / l[j * NP + j];
            }
        }
    }

    let mut y = [0.0_f64; NP];
    for i in 0..NP {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[i * NP + j] * y[j];
        }
        y[i] = (rhs[i] - sum) / l[i * NP + i];
    }

    let mut x = [0.0_f64; NP];
    for i in (0..NP).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..NP {
            sum += l[j * NP + i] * x[j];
        }
        x[i] = (y[i] - sum) / l[i * NP + i];
    }

    Some(x)
}
