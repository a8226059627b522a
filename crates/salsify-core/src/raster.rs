//! Planes, rasters and the block geometry over them.
//!
//! A `Plane` stores its samples padded out to a whole number of macroblocks;
//! the displayable sub-rectangle is usually smaller. `Raster` is the Y/U/V
//! triple in 4:2:0. Blocks and macroblocks are not separate storage: they are
//! coordinate windows over a plane, addressed by (column, row).

use crate::error::{CoreError, Result};
use crate::hash::StableHasher;

/// Luma macroblocks are 16x16 samples; chroma blocks are 8x8.
pub const MACROBLOCK_SIZE: usize = 16;

fn round_up(value: usize, multiple: usize) -> usize {
    value.div_ceil(multiple) * multiple
}

/// A single 8-bit sample plane with padded storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plane {
    samples: Vec<u8>,
    /// Stored width, a multiple of the alignment.
    width: usize,
    /// Stored height, a multiple of the alignment.
    height: usize,
    display_width: usize,
    display_height: usize,
}

impl Plane {
    /// Allocate a plane for `display_width` x `display_height` samples,
    /// padded to `alignment` in both dimensions and filled with `fill`.
    pub fn new(display_width: usize, display_height: usize, alignment: usize, fill: u8) -> Self {
        let width = round_up(display_width, alignment);
        let height = round_up(display_height, alignment);
        Self {
            samples: vec![fill; width * height],
            width,
            height,
            display_width,
            display_height,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn display_width(&self) -> usize {
        self.display_width
    }

    pub fn display_height(&self) -> usize {
        self.display_height
    }

    #[inline]
    pub fn at(&self, column: usize, row: usize) -> u8 {
        self.samples[row * self.width + column]
    }

    /// Read with coordinates clamped into the stored rectangle. Used by
    /// motion compensation, where the filter footprint may poke past the
    /// plane edges.
    #[inline]
    pub fn at_clamped(&self, column: isize, row: isize) -> u8 {
        let c = column.clamp(0, self.width as isize - 1) as usize;
        let r = row.clamp(0, self.height as isize - 1) as usize;
        self.samples[r * self.width + c]
    }

    #[inline]
    pub fn set(&mut self, column: usize, row: usize, value: u8) {
        self.samples[row * self.width + column] = value;
    }

    #[inline]
    pub fn row(&self, row: usize) -> &[u8] {
        &self.samples[row * self.width..(row + 1) * self.width]
    }

    #[inline]
    pub fn row_mut(&mut self, row: usize) -> &mut [u8] {
        &mut self.samples[row * self.width..(row + 1) * self.width]
    }

    pub fn fill(&mut self, value: u8) {
        self.samples.fill(value);
    }

    pub fn copy_from(&mut self, other: &Plane) -> Result<()> {
        if self.width != other.width || self.height != other.height {
            return Err(CoreError::PlaneSizeMismatch {
                expected: self.samples.len(),
                actual: other.samples.len(),
            });
        }
        self.samples.copy_from_slice(&other.samples);
        Ok(())
    }

    /// Load the display rectangle from packed row-major `data` and extend the
    /// last displayed sample into the padding on the right and below. The
    /// lower-right quadrant ends up holding the bottom-right corner sample.
    pub fn load_and_extend(&mut self, data: &[u8]) -> Result<()> {
        let expected = self.display_width * self.display_height;
        if data.len() != expected {
            return Err(CoreError::PlaneSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        for row in 0..self.display_height {
            let src = &data[row * self.display_width..(row + 1) * self.display_width];
            let stride = self.width;
            let dst = &mut self.samples[row * stride..row * stride + self.display_width];
            dst.copy_from_slice(src);
        }
        self.edge_extend();
        Ok(())
    }

    /// Extend the display rectangle into the padding.
    pub fn edge_extend(&mut self) {
        for row in 0..self.display_height {
            let last = self.at(self.display_width - 1, row);
            for column in self.display_width..self.width {
                self.set(column, row, last);
            }
        }
        for row in self.display_height..self.height {
            let (upper, lower) = self
                .samples
                .split_at_mut(row * self.width);
            let src_row = &upper[(self.display_height - 1) * self.width..self.display_height * self.width];
            lower[..self.width].copy_from_slice(src_row);
        }
    }

    /// Copy the display rectangle out as packed row-major bytes.
    pub fn to_packed(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.display_width * self.display_height);
        for row in 0..self.display_height {
            out.extend_from_slice(&self.row(row)[..self.display_width]);
        }
        out
    }

    pub fn hash64(&self) -> u64 {
        let mut hasher = StableHasher::new();
        hasher.write_usize(self.display_width);
        hasher.write_usize(self.display_height);
        hasher.write_bytes(&self.samples);
        hasher.finish()
    }
}

/// A decoded Y/U/V frame in 4:2:0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    pub y: Plane,
    pub u: Plane,
    pub v: Plane,
    display_width: usize,
    display_height: usize,
}

impl Raster {
    pub fn new(display_width: u16, display_height: u16) -> Result<Self> {
        if display_width == 0 || display_height == 0 {
            return Err(CoreError::InvalidDimensions {
                width: display_width,
                height: display_height,
            });
        }
        let w = display_width as usize;
        let h = display_height as usize;
        let chroma_w = w.div_ceil(2);
        let chroma_h = h.div_ceil(2);
        Ok(Self {
            y: Plane::new(w, h, MACROBLOCK_SIZE, 128),
            u: Plane::new(chroma_w, chroma_h, MACROBLOCK_SIZE / 2, 128),
            v: Plane::new(chroma_w, chroma_h, MACROBLOCK_SIZE / 2, 128),
            display_width: w,
            display_height: h,
        })
    }

    pub fn display_width(&self) -> usize {
        self.display_width
    }

    pub fn display_height(&self) -> usize {
        self.display_height
    }

    /// Macroblock columns covering the display rectangle.
    pub fn macroblock_columns(&self) -> usize {
        self.display_width.div_ceil(MACROBLOCK_SIZE)
    }

    /// Macroblock rows covering the display rectangle.
    pub fn macroblock_rows(&self) -> usize {
        self.display_height.div_ceil(MACROBLOCK_SIZE)
    }

    /// Content hash over all three planes; equal hashes mean rasters that
    /// are sample-for-sample identical, padding included.
    pub fn hash64(&self) -> u64 {
        let mut hasher = StableHasher::new();
        hasher.write_u64(self.y.hash64());
        hasher.write_u64(self.u.hash64());
        hasher.write_u64(self.v.hash64());
        hasher.finish()
    }

    /// Load Y, U and V planes from packed I420 data, with edge extension.
    pub fn load_i420(&mut self, y: &[u8], u: &[u8], v: &[u8]) -> Result<()> {
        self.y.load_and_extend(y)?;
        self.u.load_and_extend(u)?;
        self.v.load_and_extend(v)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plane_padding_rounds_to_alignment() {
        let plane = Plane::new(1, 1, 16, 0);
        assert_eq!(plane.width(), 16);
        assert_eq!(plane.height(), 16);
        assert_eq!(plane.display_width(), 1);
    }

    #[test]
    fn edge_extension_copies_last_sample() {
        let mut plane = Plane::new(2, 2, 16, 0);
        plane.load_and_extend(&[1, 2, 3, 4]).unwrap();

        // right of the display rectangle: last sample of each row
        assert_eq!(plane.at(2, 0), 2);
        assert_eq!(plane.at(15, 0), 2);
        assert_eq!(plane.at(2, 1), 4);

        // below: the last displayed row, itself already extended
        assert_eq!(plane.at(0, 2), 3);
        assert_eq!(plane.at(1, 9), 4);

        // lower-right quadrant: bottom-right corner sample
        assert_eq!(plane.at(15, 15), 4);
    }

    #[test]
    fn tiny_raster_is_padded_to_one_macroblock() {
        let raster = Raster::new(1, 1).unwrap();
        assert_eq!(raster.y.width(), 16);
        assert_eq!(raster.y.height(), 16);
        assert_eq!(raster.display_width(), 1);
        assert_eq!(raster.display_height(), 1);
        assert_eq!(raster.macroblock_columns(), 1);
        assert_eq!(raster.macroblock_rows(), 1);
    }

    #[test]
    fn chroma_planes_are_half_dimension() {
        let raster = Raster::new(640, 480).unwrap();
        assert_eq!(raster.u.display_width(), 320);
        assert_eq!(raster.u.display_height(), 240);
        assert_eq!(raster.v.display_width(), 320);
    }

    #[test]
    fn hash_tracks_content() {
        let a = Raster::new(64, 48).unwrap();
        let mut b = Raster::new(64, 48).unwrap();
        assert_eq!(a.hash64(), b.hash64());
        b.y.set(0, 0, 17);
        assert_ne!(a.hash64(), b.hash64());
    }
}
