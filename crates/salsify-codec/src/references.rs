//! The LAST / GOLDEN / ALT reference triple.
//!
//! Rasters are shared, never mutated in place: each entry is replaced by a
//! new shared handle per the frame header's refresh/copy rules. When the
//! last holder drops, the raster deposits back into its pool.

use std::sync::Arc;

use salsify_core::{Raster, RasterHandle, RasterPool};

use crate::error::Result;
use crate::frame::Frame;
use crate::macroblock::Reference;

/// A decoded raster shared between the reference set, caches and display.
pub type SharedRaster = Arc<RasterHandle>;

#[derive(Clone)]
pub struct ReferenceSet {
    pub last: SharedRaster,
    pub golden: SharedRaster,
    pub alternate: SharedRaster,
}

impl ReferenceSet {
    /// Fresh references: all three name one default (mid-gray) raster.
    pub fn new(width: u16, height: u16, pool: &RasterPool) -> Result<Self> {
        let initial: SharedRaster = Arc::new(pool.take_sized(width, height)?);
        Ok(Self {
            last: initial.clone(),
            golden: initial.clone(),
            alternate: initial,
        })
    }

    pub fn get(&self, reference: Reference) -> &Raster {
        match reference {
            Reference::Last => &self.last,
            Reference::Golden => &self.golden,
            Reference::Alternate => &self.alternate,
        }
    }

    pub fn hashes(&self) -> (u64, u64, u64) {
        (
            self.last.hash64(),
            self.golden.hash64(),
            self.alternate.hash64(),
        )
    }

    /// Post-decode transitions. Key frames replace all three; inter frames
    /// follow the refresh/copy flags, with copies reading the pre-update
    /// set.
    pub fn apply_updates(&mut self, frame: &Frame, output: &SharedRaster) {
        let Some(inter) = &frame.header.inter else {
            self.last = output.clone();
            self.golden = output.clone();
            self.alternate = output.clone();
            return;
        };

        let old = self.clone();

        self.golden = if inter.refresh_golden {
            output.clone()
        } else {
            match inter.copy_to_golden {
                1 => old.last.clone(),
                2 => old.alternate.clone(),
                _ => old.golden.clone(),
            }
        };

        self.alternate = if inter.refresh_alternate {
            output.clone()
        } else {
            match inter.copy_to_alternate {
                1 => old.last.clone(),
                2 => old.golden.clone(),
                _ => old.alternate.clone(),
            }
        };

        self.last = if inter.refresh_last {
            output.clone()
        } else {
            old.last
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_header::{FrameHeader, InterHeaderFields};

    fn shared(pool: &RasterPool, luma: u8) -> SharedRaster {
        let mut handle = pool.take().unwrap();
        handle.y.fill(luma);
        Arc::new(handle)
    }

    fn inter_frame(fields: InterHeaderFields) -> Frame {
        Frame::new(
            FrameHeader {
                inter: Some(fields),
                ..FrameHeader::default()
            },
            64,
            48,
        )
    }

    #[test]
    fn key_frame_replaces_all_three() {
        let pool = RasterPool::new(64, 48);
        let mut refs = ReferenceSet::new(64, 48, &pool).unwrap();
        let output = shared(&pool, 10);

        let frame = Frame::new(FrameHeader::default(), 64, 48);
        refs.apply_updates(&frame, &output);

        assert_eq!(refs.last.y.at(0, 0), 10);
        assert_eq!(refs.golden.y.at(0, 0), 10);
        assert_eq!(refs.alternate.y.at(0, 0), 10);
    }

    #[test]
    fn refresh_last_only() {
        let pool = RasterPool::new(64, 48);
        let mut refs = ReferenceSet::new(64, 48, &pool).unwrap();
        refs.last = shared(&pool, 0);
        refs.golden = shared(&pool, 255);
        refs.alternate = shared(&pool, 128);

        let frame = inter_frame(InterHeaderFields {
            refresh_last: true,
            refresh_golden: false,
            refresh_alternate: false,
            ..InterHeaderFields::default()
        });
        let output = shared(&pool, 77);
        refs.apply_updates(&frame, &output);

        assert_eq!(refs.last.y.at(0, 0), 77);
        assert_eq!(refs.golden.y.at(0, 0), 255);
        assert_eq!(refs.alternate.y.at(0, 0), 128);
    }

    #[test]
    fn copy_flags_read_pre_update_set() {
        let pool = RasterPool::new(64, 48);
        let mut refs = ReferenceSet::new(64, 48, &pool).unwrap();
        refs.last = shared(&pool, 1);
        refs.golden = shared(&pool, 2);
        refs.alternate = shared(&pool, 3);

        // golden <- old last, alternate <- old golden, last <- output
        let frame = inter_frame(InterHeaderFields {
            refresh_last: true,
            refresh_golden: false,
            refresh_alternate: false,
            copy_to_golden: 1,
            copy_to_alternate: 2,
            ..InterHeaderFields::default()
        });
        let output = shared(&pool, 9);
        refs.apply_updates(&frame, &output);

        assert_eq!(refs.last.y.at(0, 0), 9);
        assert_eq!(refs.golden.y.at(0, 0), 1);
        assert_eq!(refs.alternate.y.at(0, 0), 2);
    }
}
