//! Fast frame-size estimation.
//!
//! Encodes a quarter-width, quarter-height proxy built by sampling every
//! fourth macroblock, and scales the serialized length back up. The proxy
//! lives in a dedicated pool so the main raster pool never sees an
//! off-size request.

use std::sync::Arc;

use salsify_core::{Raster, RasterHandle};

use crate::encoder::{Encoder, EncoderQuality, PassOptions};
use crate::error::Result;
use crate::frame_header::QuantIndices;
use crate::references::ReferenceSet;

pub(crate) const WIDTH_SAMPLE_FACTOR: u16 = 4;
pub(crate) const HEIGHT_SAMPLE_FACTOR: u16 = 4;

impl Encoder {
    /// Estimated serialized size, in bytes, of encoding `raster` at
    /// `y_ac_qi`.
    pub fn estimate_frame_size(&mut self, raster: &Raster, y_ac_qi: u8) -> Result<usize> {
        self.check_dimensions(raster)?;

        let proxy_width = self.proxy_pool.width();
        let proxy_height = self.proxy_pool.height();

        let mut proxy_encoder = Encoder::new(
            proxy_width,
            proxy_height,
            false,
            EncoderQuality::Realtime,
            &self.proxy_pool,
        )?;

        let proxy = self.sample_macroblocks(raster)?;

        if self.has_state {
            // inter estimate: references sampled the same way the source is
            proxy_encoder.references = ReferenceSet {
                last: Arc::new(self.sample_macroblocks(self.references.last.get())?),
                golden: Arc::new(self.sample_macroblocks(self.references.golden.get())?),
                alternate: Arc::new(self.sample_macroblocks(self.references.alternate.get())?),
            };
            proxy_encoder.has_state = true;
        }

        let quant_indices = QuantIndices {
            y_ac_qi,
            ..QuantIndices::default()
        };
        let (frame, _) = proxy_encoder.encode_raster(
            &proxy,
            &quant_indices,
            !self.has_state,
            PassOptions::estimate(),
        )?;
        let bytes = frame.serialize(&proxy_encoder.state.probability_tables)?;

        Ok(bytes.len() * (WIDTH_SAMPLE_FACTOR as usize) * (HEIGHT_SAMPLE_FACTOR as usize))
    }

    /// Build the proxy raster: proxy macroblock (c, r) holds the source
    /// macroblock (4c, 4r), clamped at the frame edges.
    fn sample_macroblocks(&self, source: &Raster) -> Result<RasterHandle> {
        let mut proxy = self.proxy_pool.take()?;

        let source_columns = source.macroblock_columns();
        let source_rows = source.macroblock_rows();

        for mb_row in 0..proxy.macroblock_rows() {
            for mb_column in 0..proxy.macroblock_columns() {
                let src_column =
                    (mb_column * WIDTH_SAMPLE_FACTOR as usize).min(source_columns - 1);
                let src_row = (mb_row * HEIGHT_SAMPLE_FACTOR as usize).min(source_rows - 1);

                for y in 0..16 {
                    for x in 0..16 {
                        let sample = source.y.at(src_column * 16 + x, src_row * 16 + y);
                        proxy.y.set(mb_column * 16 + x, mb_row * 16 + y, sample);
                    }
                }
                for y in 0..8 {
                    for x in 0..8 {
                        let u = source.u.at(src_column * 8 + x, src_row * 8 + y);
                        proxy.u.set(mb_column * 8 + x, mb_row * 8 + y, u);
                        let v = source.v.at(src_column * 8 + x, src_row * 8 + y);
                        proxy.v.set(mb_column * 8 + x, mb_row * 8 + y, v);
                    }
                }
            }
        }

        Ok(proxy)
    }
}
