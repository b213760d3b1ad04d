//! Robust scale and location estimators used throughout the pipeline.

/// Median of a slice, reordering it in place.
///
/// Even-length inputs average the two middle order statistics. Returns 0.0
/// for an empty slice.
pub fn median(data: &mut [f32]) -> f32 {
    let n = data.len();
    if n == 0 {
        return 0.0;
    }
    let k = n / 2;
    let (below, upper, _) = data.select_nth_unstable_by(k, f32::total_cmp);
    let upper = *upper;
    if n % 2 == 1 {
        upper
    } else {
        let lower = below.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        0.5 * (lower + upper)
    }
}

/// MAD-based noise estimate: `1.4826 * median(|x - median(x)|)`.
///
/// Insensitive to bright outliers, so sources do not inflate the estimate.
/// A constant slice yields 0, which is a degenerate value rather than an
/// error.
pub fn robust_sigma(data: &[f32]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    let mut buf = data.to_vec();
    let med = median(&mut buf);
    for v in buf.iter_mut() {
        *v = (*v - med).abs();
    }
    1.4826 * median(&mut buf)
}
