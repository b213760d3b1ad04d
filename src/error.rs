use thiserror::Error;

/// Structural precondition violations that abort a detection run.
///
/// Numerical degeneracies (non-positive flux, non-converging fits, empty
/// local-background samples) are resolved with documented fallback values
/// and never surface here.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("kernel size must be a positive odd integer, got {0}")]
    KernelSize(usize),

    #[error("image must have at least one pixel, got {rows}x{cols}")]
    EmptyImage { rows: usize, cols: usize },

    #[error("background block size must be positive")]
    BlockSize,
}
