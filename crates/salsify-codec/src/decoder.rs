//! The decoder: applies serialized frames to the persistent state and the
//! reference set, producing output rasters.

use std::sync::Arc;

use salsify_core::{minihash, RasterPool};
use tracing::{debug, trace};

use crate::chunk::UncompressedChunk;
use crate::error::Result;
use crate::frame::Frame;
use crate::loopfilter::filter_frame;
use crate::probability::ProbabilityTables;
use crate::reconstruct::reconstruct_frame;
use crate::references::{ReferenceSet, SharedRaster};
use crate::state::DecoderState;

/// A VP8 decoder with frozen dimensions.
#[derive(Clone)]
pub struct Decoder {
    state: DecoderState,
    references: ReferenceSet,
}

impl Decoder {
    pub fn new(width: u16, height: u16, pool: &RasterPool) -> Result<Self> {
        Ok(Self {
            state: DecoderState::new(width, height),
            references: ReferenceSet::new(width, height, pool)?,
        })
    }

    /// Rebuild a decoder around an existing state and reference set (the
    /// encoder exports itself this way).
    pub fn from_parts(state: DecoderState, references: ReferenceSet) -> Self {
        Self { state, references }
    }

    pub fn state(&self) -> &DecoderState {
        &self.state
    }

    pub fn references(&self) -> &ReferenceSet {
        &self.references
    }

    pub fn width(&self) -> u16 {
        self.state.width()
    }

    pub fn height(&self) -> u16 {
        self.state.height()
    }

    /// The 32-bit identifier of everything needed to decode the next frame.
    pub fn minihash(&self) -> u32 {
        let (last, golden, alternate) = self.references.hashes();
        minihash(self.state.hash(), last, golden, alternate)
    }

    /// Decode one serialized frame. On `Invalid` errors the state is
    /// unchanged and the next frame may be attempted.
    pub fn decode_frame(&mut self, bytes: &[u8], pool: &RasterPool) -> Result<SharedRaster> {
        let width = self.width();
        let height = self.height();

        // 1-2: uncompressed chunk, then headers and macroblock data
        let chunk = UncompressedChunk::parse(bytes, width, height)?;

        let baseline_probs = if chunk.key_frame {
            ProbabilityTables::default()
        } else {
            self.state.probability_tables.clone()
        };
        let segment_map = if chunk.key_frame {
            None
        } else {
            self.state.segmentation.as_ref().map(|s| s.map.as_slice())
        };

        let frame = Frame::parse(&chunk, width, height, &baseline_probs, segment_map)?;

        trace!(
            key = chunk.key_frame,
            partitions = frame.header.dct_partition_count(),
            quantizer = frame.header.quant_indices.y_ac_qi,
            "parsed frame"
        );

        // 3-4: fold header updates into a scratch state, committed only on
        // success so Invalid frames leave the decoder untouched. Probability
        // rewind on !refresh_entropy_probs falls out here: the persistent
        // tables are only touched when the header asks for it.
        let mut new_state = self.state.clone();
        new_state.apply_frame(&frame)?;

        // 5-9: reconstruct and filter
        let mut raster = pool.take_sized(width, height)?;
        reconstruct_frame(
            &frame,
            &new_state,
            &self.references,
            chunk.reconstruction_filter,
            &mut raster,
        )?;
        filter_frame(&frame, &new_state, &mut raster);

        // 10: commit state and reference updates
        self.state = new_state;
        let output: SharedRaster = Arc::new(raster);
        self.references.apply_updates(&frame, &output);

        debug!(minihash = format_args!("{:08x}", self.minihash()), "frame decoded");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_decoders_share_a_minihash() {
        let pool = RasterPool::new(64, 48);
        let a = Decoder::new(64, 48, &pool).unwrap();
        let b = Decoder::new(64, 48, &pool).unwrap();
        assert_eq!(a.minihash(), b.minihash());
    }

    #[test]
    fn dimension_changes_minihash() {
        let pool = RasterPool::with_options(64, 48, true);
        let a = Decoder::new(64, 48, &pool).unwrap();
        let b = Decoder::new(32, 32, &pool).unwrap();
        assert_ne!(a.minihash(), b.minihash());
    }

    #[test]
    fn garbage_is_rejected_without_state_change() {
        let pool = RasterPool::new(64, 48);
        let mut decoder = Decoder::new(64, 48, &pool).unwrap();
        let before = decoder.minihash();

        assert!(decoder.decode_frame(&[0xff, 0xff], &pool).is_err());
        assert_eq!(decoder.minihash(), before);
    }
}
