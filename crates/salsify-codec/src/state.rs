//! The persistent decoder state: probability tables, segmentation and
//! filter adjustments, with frozen frame dimensions.
//!
//! Its stable hash feeds the minihash; any two decoders with equal hashes
//! behave identically on all future input.

use salsify_core::StableHasher;

use crate::consts::NUM_SEGMENTS;
use crate::error::{CodecError, Result};
use crate::frame::Frame;
use crate::frame_header::{ModeRefLfDeltaUpdate, QuantIndices, UpdateSegmentation};
use crate::probability::ProbabilityTables;
use crate::quantizer::Quantizer;

/// Persistent segmentation: per-segment quantizer and filter adjustments
/// plus the per-macroblock segment map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationState {
    /// Adjustments are absolute values rather than deltas.
    pub absolute: bool,
    pub quantizer_adjustments: [i8; NUM_SEGMENTS],
    pub filter_adjustments: [i8; NUM_SEGMENTS],
    pub map: Vec<u8>,
}

impl SegmentationState {
    pub fn new(macroblock_count: usize) -> Self {
        Self {
            absolute: false,
            quantizer_adjustments: [0; NUM_SEGMENTS],
            filter_adjustments: [0; NUM_SEGMENTS],
            map: vec![0; macroblock_count],
        }
    }

    pub fn apply(&mut self, update: &UpdateSegmentation) -> Result<()> {
        if let Some(data) = &update.feature_data {
            self.absolute = data.absolute;
            for (slot, value) in self
                .quantizer_adjustments
                .iter_mut()
                .zip(data.quantizer_update)
            {
                if let Some(value) = value {
                    if data.absolute && value < 0 {
                        return Err(CodecError::invalid(
                            "absolute quantizer update with negative value",
                        ));
                    }
                    *slot = value;
                }
            }
            for (slot, value) in self
                .filter_adjustments
                .iter_mut()
                .zip(data.loop_filter_update)
            {
                if let Some(value) = value {
                    if data.absolute && !(0..=63).contains(&value) {
                        return Err(CodecError::invalid(
                            "absolute loop-filter update out of bounds",
                        ));
                    }
                    *slot = value;
                }
            }
        }
        Ok(())
    }

    pub fn quantizer_for(&self, segment: u8, indices: &QuantIndices) -> Quantizer {
        let adjustment = self.quantizer_adjustments[segment as usize] as i16;
        let mut indices = *indices;
        indices.y_ac_qi = if self.absolute {
            adjustment.clamp(0, 127) as u8
        } else {
            (indices.y_ac_qi as i16 + adjustment).clamp(0, 127) as u8
        };
        Quantizer::new(&indices)
    }

    /// Segment-adjusted base loop-filter level, before mode/ref deltas.
    pub fn filter_level_for(&self, segment: u8, base_level: u8) -> i32 {
        let adjustment = self.filter_adjustments[segment as usize] as i32;
        if self.absolute {
            adjustment
        } else {
            base_level as i32 + adjustment
        }
    }

    fn hash(&self, hasher: &mut StableHasher) {
        hasher.write_bool(self.absolute);
        for &value in &self.quantizer_adjustments {
            hasher.write_i8(value);
        }
        for &value in &self.filter_adjustments {
            hasher.write_i8(value);
        }
        hasher.write_bytes(&self.map);
    }
}

/// Per-reference-frame and per-mode loop-filter level offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilterAdjustments {
    /// Indexed by: current (intra), LAST, GOLDEN, ALT.
    pub ref_adjustments: [i8; 4],
    pub mode_adjustments: [i8; 4],
}

impl FilterAdjustments {
    pub fn apply(&mut self, update: &ModeRefLfDeltaUpdate) {
        for (slot, value) in self.ref_adjustments.iter_mut().zip(update.ref_update) {
            if let Some(value) = value {
                *slot = value;
            }
        }
        for (slot, value) in self.mode_adjustments.iter_mut().zip(update.mode_update) {
            if let Some(value) = value {
                *slot = value;
            }
        }
    }

    fn hash(&self, hasher: &mut StableHasher) {
        for &value in self.ref_adjustments.iter().chain(&self.mode_adjustments) {
            hasher.write_i8(value);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecoderState {
    width: u16,
    height: u16,
    pub probability_tables: ProbabilityTables,
    pub segmentation: Option<SegmentationState>,
    pub filter_adjustments: Option<FilterAdjustments>,
}

impl DecoderState {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            probability_tables: ProbabilityTables::default(),
            segmentation: None,
            filter_adjustments: None,
        }
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    fn macroblock_count(&self) -> usize {
        (self.width as usize).div_ceil(16) * (self.height as usize).div_ceil(16)
    }

    /// Fold a decoded frame's header into the persistent state. Key frames
    /// reset everything first. Probability-table updates persist only when
    /// the header refreshes entropy probs; transient use within the frame
    /// is the parser's business.
    pub fn apply_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.is_key_frame() {
            self.probability_tables = ProbabilityTables::default();
            self.segmentation = None;
            self.filter_adjustments = None;
        }

        if frame.header.refresh_entropy_probs {
            self.probability_tables.update(&frame.header);
        }

        match &frame.header.update_segmentation {
            Some(update) => {
                let count = self.macroblock_count();
                let segmentation = self
                    .segmentation
                    .get_or_insert_with(|| SegmentationState::new(count));
                segmentation.apply(update)?;
                segmentation.map = frame.updated_segment_map(Some(&segmentation.map));
            }
            None => self.segmentation = None,
        }

        match &frame.header.mode_lf_adjustments {
            Some(update) => {
                let adjustments = self.filter_adjustments.get_or_insert_with(Default::default);
                if let Some(deltas) = update {
                    adjustments.apply(deltas);
                }
            }
            None => self.filter_adjustments = None,
        }

        Ok(())
    }

    pub fn hash(&self) -> u64 {
        let mut hasher = StableHasher::new();
        hasher.write_u16(self.width);
        hasher.write_u16(self.height);
        self.probability_tables.hash(&mut hasher);
        match &self.segmentation {
            Some(segmentation) => {
                hasher.write_bool(true);
                segmentation.hash(&mut hasher);
            }
            None => hasher.write_bool(false),
        }
        match &self.filter_adjustments {
            Some(adjustments) => {
                hasher.write_bool(true);
                adjustments.hash(&mut hasher);
            }
            None => hasher.write_bool(false),
        }
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_header::FrameHeader;

    #[test]
    fn fresh_states_hash_equal() {
        assert_eq!(
            DecoderState::new(640, 480).hash(),
            DecoderState::new(640, 480).hash()
        );
        assert_ne!(
            DecoderState::new(640, 480).hash(),
            DecoderState::new(320, 240).hash()
        );
    }

    #[test]
    fn key_frame_resets_state() {
        let mut state = DecoderState::new(64, 48);
        state.probability_tables.y_mode_probs = [1, 2, 3, 4];
        state.filter_adjustments = Some(FilterAdjustments::default());

        let frame = Frame::new(FrameHeader::default(), 64, 48);
        state.apply_frame(&frame).unwrap();

        assert_eq!(state.probability_tables, ProbabilityTables::default());
        assert!(state.filter_adjustments.is_none());
    }

    #[test]
    fn entropy_updates_persist_only_on_refresh() {
        let mut header = FrameHeader::default();
        header.token_prob_update.0[0][1][0][0] = Some(99);

        let mut refresh_state = DecoderState::new(64, 48);
        let mut frame = Frame::new(header.clone(), 64, 48);
        frame.header.refresh_entropy_probs = true;
        refresh_state.apply_frame(&frame).unwrap();
        assert_eq!(refresh_state.probability_tables.coeff_probs[0][1][0][0], 99);

        let mut keep_state = DecoderState::new(64, 48);
        frame.header.refresh_entropy_probs = false;
        keep_state.apply_frame(&frame).unwrap();
        assert_ne!(keep_state.probability_tables.coeff_probs[0][1][0][0], 99);
    }
}
