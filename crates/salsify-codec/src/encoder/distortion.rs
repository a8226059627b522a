//! Block distortion measures over a plane region and a prediction buffer.

use salsify_core::Plane;

/// Sum of absolute differences.
pub fn sad(original: &Plane, x0: usize, y0: usize, width: usize, height: usize, prediction: &[u8]) -> u32 {
    let mut total = 0u32;
    for row in 0..height {
        let original_row = &original.row(y0 + row)[x0..x0 + width];
        let prediction_row = &prediction[row * width..(row + 1) * width];
        for (&a, &b) in original_row.iter().zip(prediction_row) {
            total += (a as i32 - b as i32).unsigned_abs();
        }
    }
    total
}

/// Sum of squared errors.
pub fn sse(original: &Plane, x0: usize, y0: usize, width: usize, height: usize, prediction: &[u8]) -> u32 {
    let mut total = 0u32;
    for row in 0..height {
        let original_row = &original.row(y0 + row)[x0..x0 + width];
        let prediction_row = &prediction[row * width..(row + 1) * width];
        for (&a, &b) in original_row.iter().zip(prediction_row) {
            let diff = a as i32 - b as i32;
            total += (diff * diff) as u32;
        }
    }
    total
}

/// SSE with the mean error removed; the measure for predictors whose DC
/// will be carried by the Y2 block.
pub fn variance(
    original: &Plane,
    x0: usize,
    y0: usize,
    width: usize,
    height: usize,
    prediction: &[u8],
) -> u32 {
    let mut total_sse = 0i64;
    let mut total_diff = 0i64;
    for row in 0..height {
        let original_row = &original.row(y0 + row)[x0..x0 + width];
        let prediction_row = &prediction[row * width..(row + 1) * width];
        for (&a, &b) in original_row.iter().zip(prediction_row) {
            let diff = a as i64 - b as i64;
            total_sse += diff * diff;
            total_diff += diff;
        }
    }
    let count = (width * height) as i64;
    (total_sse - (total_diff * total_diff) / count).max(0) as u32
}

/// Copy a plane region into a flat buffer (the predictor-comparison shape).
pub fn copy_region(plane: &Plane, x0: usize, y0: usize, width: usize, height: usize, out: &mut [u8]) {
    for row in 0..height {
        out[row * width..(row + 1) * width]
            .copy_from_slice(&plane.row(y0 + row)[x0..x0 + width]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane_with(value: u8) -> Plane {
        Plane::new(16, 16, 16, value)
    }

    #[test]
    fn identical_blocks_have_zero_distortion() {
        let plane = plane_with(90);
        let prediction = [90u8; 16];
        assert_eq!(sad(&plane, 0, 0, 4, 4, &prediction), 0);
        assert_eq!(sse(&plane, 0, 0, 4, 4, &prediction), 0);
        assert_eq!(variance(&plane, 0, 0, 4, 4, &prediction), 0);
    }

    #[test]
    fn variance_ignores_uniform_offset() {
        let plane = plane_with(100);
        let prediction = [110u8; 16]; // constant offset of 10
        assert_eq!(sse(&plane, 0, 0, 4, 4, &prediction), 1600);
        assert_eq!(variance(&plane, 0, 0, 4, 4, &prediction), 0);
    }

    #[test]
    fn sad_accumulates_absolute_error() {
        let plane = plane_with(10);
        let mut prediction = [10u8; 16];
        prediction[3] = 14;
        prediction[9] = 6;
        assert_eq!(sad(&plane, 0, 0, 4, 4, &prediction), 8);
    }
}
