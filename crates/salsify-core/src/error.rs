//! Error types shared across the salsify workspace.

use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the raster model and the raster pool.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Dimensions that cannot describe a 4:2:0 raster.
    #[error("invalid raster dimensions: {width}x{height}")]
    InvalidDimensions { width: u16, height: u16 },

    /// Plane data of the wrong length for the declared dimensions.
    #[error("plane size mismatch: expected {expected} bytes, got {actual}")]
    PlaneSizeMismatch { expected: usize, actual: usize },

    /// The pool was asked for a raster of a size it was not built for.
    #[error("raster pool holds {pool_width}x{pool_height} rasters, requested {width}x{height}")]
    PoolSizeMismatch {
        pool_width: u16,
        pool_height: u16,
        width: u16,
        height: u16,
    },
}
