//! salsify-metrics: video quality metrics.
//!
//! Standard metrics for comparing frames:
//! - PSNR (Peak Signal-to-Noise Ratio)
//! - SSIM (Structural Similarity Index)
//!
//! The encoder's quantizer and loop-filter searches use the SSIM scalar as
//! their similarity contract; tests use both.
//!
//! # Example
//!
//! ```no_run
//! use salsify_metrics::{psnr, ssim};
//!
//! let reference = vec![128u8; 640 * 480];
//! let distorted = vec![130u8; 640 * 480];
//!
//! let psnr_value = psnr(&reference, &distorted, 640, 480).unwrap();
//! let ssim_value = ssim(&reference, &distorted, 640, 480).unwrap();
//! ```

use salsify_core::Raster;
use thiserror::Error;

/// Result type for metric computation.
pub type Result<T> = std::result::Result<T, MetricsError>;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("image size mismatch: expected {expected}, got {reference} and {distorted}")]
    SizeMismatch {
        expected: usize,
        reference: usize,
        distorted: usize,
    },

    #[error("dimensions exceed maximum: {width}x{height}")]
    DimensionsTooLarge { width: usize, height: usize },
}

const MAX_DIMENSION: usize = 15360;

fn validate(reference: &[u8], distorted: &[u8], width: usize, height: usize) -> Result<()> {
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(MetricsError::DimensionsTooLarge { width, height });
    }
    let size = width * height;
    if reference.len() != size || distorted.len() != size {
        return Err(MetricsError::SizeMismatch {
            expected: size,
            reference: reference.len(),
            distorted: distorted.len(),
        });
    }
    Ok(())
}

/// Peak Signal-to-Noise Ratio between two grayscale 8-bit images, in dB.
///
/// Returns `f64::INFINITY` for identical images.
pub fn psnr(reference: &[u8], distorted: &[u8], width: usize, height: usize) -> Result<f64> {
    validate(reference, distorted, width, height)?;

    let mut sse: u64 = 0;
    for (&r, &d) in reference.iter().zip(distorted) {
        let diff = r as i64 - d as i64;
        sse += (diff * diff) as u64;
    }

    if sse == 0 {
        return Ok(f64::INFINITY);
    }

    let mse = sse as f64 / (width * height) as f64;
    Ok(10.0 * (255.0 * 255.0 / mse).log10())
}

/// Structural Similarity Index between two grayscale 8-bit images.
///
/// Sliding 8x8 windows; values range from -1 to 1, where 1 is a perfect
/// match. Correlates better with perceived quality than PSNR.
pub fn ssim(reference: &[u8], distorted: &[u8], width: usize, height: usize) -> Result<f64> {
    validate(reference, distorted, width, height)?;

    // SSIM stabilization constants for 8-bit dynamic range
    let k1 = 0.01;
    let k2 = 0.03;
    let l = 255.0;
    let c1 = (k1 * l) * (k1 * l);
    let c2 = (k2 * l) * (k2 * l);

    let window_size = 8;
    let mut ssim_sum = 0.0;
    let mut count = 0u64;

    for y in (0..height).step_by(window_size) {
        for x in (0..width).step_by(window_size) {
            let win_width = window_size.min(width - x);
            let win_height = window_size.min(height - y);
            let win_size = (win_width * win_height) as f64;

            let mut sum_r = 0.0;
            let mut sum_d = 0.0;
            let mut sum_rr = 0.0;
            let mut sum_dd = 0.0;
            let mut sum_rd = 0.0;

            for wy in 0..win_height {
                let offset = (y + wy) * width + x;
                for wx in 0..win_width {
                    let r = reference[offset + wx] as f64;
                    let d = distorted[offset + wx] as f64;
                    sum_r += r;
                    sum_d += d;
                    sum_rr += r * r;
                    sum_dd += d * d;
                    sum_rd += r * d;
                }
            }

            let mu_r = sum_r / win_size;
            let mu_d = sum_d / win_size;
            let var_r = sum_rr / win_size - mu_r * mu_r;
            let var_d = sum_dd / win_size - mu_d * mu_d;
            let cov = sum_rd / win_size - mu_r * mu_d;

            let numerator = (2.0 * mu_r * mu_d + c1) * (2.0 * cov + c2);
            let denominator = (mu_r * mu_r + mu_d * mu_d + c1) * (var_r + var_d + c2);

            ssim_sum += numerator / denominator;
            count += 1;
        }
    }

    Ok(ssim_sum / count as f64)
}

/// SSIM over the luma plane of two rasters (display rectangles only).
pub fn raster_ssim(reference: &Raster, distorted: &Raster) -> Result<f64> {
    ssim(
        &reference.y.to_packed(),
        &distorted.y.to_packed(),
        reference.display_width(),
        reference.display_height(),
    )
}

/// PSNR over the luma plane of two rasters (display rectangles only).
pub fn raster_psnr(reference: &Raster, distorted: &Raster) -> Result<f64> {
    psnr(
        &reference.y.to_packed(),
        &distorted.y.to_packed(),
        reference.display_width(),
        reference.display_height(),
    )
}
