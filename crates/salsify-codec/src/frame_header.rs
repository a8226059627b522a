//! Strongly-typed frame headers with paired bool-coded parse and write.
//!
//! Every field is read and written in bitstream order, so a header survives
//! a parse/serialize round trip bit-exactly. The model also serializes
//! through serde for inspection and test fixtures.

use serde::{Deserialize, Serialize};

use crate::bool_coder::{BoolDecoder, BoolEncoder};
use crate::consts::{
    BLOCK_TYPES, COEFF_UPDATE_PROBS, COEF_BANDS, ENTROPY_NODES, MV_PROB_CNT, MV_UPDATE_PROBS,
    NUM_SEGMENTS, PREV_COEF_CONTEXTS,
};
use crate::error::{CodecError, Result};

/// Quantizer indices: the 7-bit y_ac index plus optional signed deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QuantIndices {
    pub y_ac_qi: u8,
    pub y_dc: Option<i8>,
    pub y2_dc: Option<i8>,
    pub y2_ac: Option<i8>,
    pub uv_dc: Option<i8>,
    pub uv_ac: Option<i8>,
}

fn parse_delta(decoder: &mut BoolDecoder, bits: u32) -> Option<i8> {
    if decoder.bit() {
        Some(decoder.sint(bits) as i8)
    } else {
        None
    }
}

fn write_delta(encoder: &mut BoolEncoder, delta: Option<i8>, bits: u32) {
    match delta {
        Some(value) => {
            encoder.put_bit(true);
            encoder.put_sint(value as i32, bits);
        }
        None => encoder.put_bit(false),
    }
}

impl QuantIndices {
    pub fn parse(decoder: &mut BoolDecoder) -> Self {
        Self {
            y_ac_qi: decoder.uint(7) as u8,
            y_dc: parse_delta(decoder, 4),
            y2_dc: parse_delta(decoder, 4),
            y2_ac: parse_delta(decoder, 4),
            uv_dc: parse_delta(decoder, 4),
            uv_ac: parse_delta(decoder, 4),
        }
    }

    pub fn write(&self, encoder: &mut BoolEncoder) {
        encoder.put_uint(self.y_ac_qi as u32, 7);
        write_delta(encoder, self.y_dc, 4);
        write_delta(encoder, self.y2_dc, 4);
        write_delta(encoder, self.y2_ac, 4);
        write_delta(encoder, self.uv_dc, 4);
        write_delta(encoder, self.uv_ac, 4);
    }
}

/// Per-segment quantizer and loop-filter updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SegmentFeatureData {
    /// Absolute values rather than deltas.
    pub absolute: bool,
    pub quantizer_update: [Option<i8>; NUM_SEGMENTS],
    pub loop_filter_update: [Option<i8>; NUM_SEGMENTS],
}

impl SegmentFeatureData {
    pub fn parse(decoder: &mut BoolDecoder) -> Self {
        let absolute = decoder.bit();
        let mut quantizer_update = [None; NUM_SEGMENTS];
        for slot in quantizer_update.iter_mut() {
            *slot = parse_delta(decoder, 7);
        }
        let mut loop_filter_update = [None; NUM_SEGMENTS];
        for slot in loop_filter_update.iter_mut() {
            *slot = parse_delta(decoder, 6);
        }
        Self {
            absolute,
            quantizer_update,
            loop_filter_update,
        }
    }

    pub fn write(&self, encoder: &mut BoolEncoder) {
        encoder.put_bit(self.absolute);
        for &delta in &self.quantizer_update {
            write_delta(encoder, delta, 7);
        }
        for &delta in &self.loop_filter_update {
            write_delta(encoder, delta, 6);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateSegmentation {
    pub update_map: bool,
    pub feature_data: Option<SegmentFeatureData>,
    /// Tree probabilities for the per-macroblock segment ids; absent
    /// entries default to 255.
    pub map_tree_probs: Option<[Option<u8>; 3]>,
}

impl UpdateSegmentation {
    pub fn parse(decoder: &mut BoolDecoder) -> Self {
        let update_map = decoder.bit();
        let feature_data = decoder.bit().then(|| SegmentFeatureData::parse(decoder));
        let map_tree_probs = update_map.then(|| {
            let mut probs = [None; 3];
            for slot in probs.iter_mut() {
                if decoder.bit() {
                    *slot = Some(decoder.uint(8) as u8);
                }
            }
            probs
        });
        Self {
            update_map,
            feature_data,
            map_tree_probs,
        }
    }

    pub fn write(&self, encoder: &mut BoolEncoder) {
        encoder.put_bit(self.update_map);
        match &self.feature_data {
            Some(data) => {
                encoder.put_bit(true);
                data.write(encoder);
            }
            None => encoder.put_bit(false),
        }
        if self.update_map {
            let probs = self.map_tree_probs.unwrap_or([None; 3]);
            for prob in probs {
                match prob {
                    Some(value) => {
                        encoder.put_bit(true);
                        encoder.put_uint(value as u32, 8);
                    }
                    None => encoder.put_bit(false),
                }
            }
        }
    }

    pub fn tree_probs(&self) -> [u8; 3] {
        let mut out = [255; 3];
        if let Some(probs) = self.map_tree_probs {
            for (slot, prob) in out.iter_mut().zip(probs) {
                if let Some(value) = prob {
                    *slot = value;
                }
            }
        }
        out
    }
}

/// Per-reference and per-mode loop-filter level offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModeRefLfDeltaUpdate {
    pub ref_update: [Option<i8>; 4],
    pub mode_update: [Option<i8>; 4],
}

impl ModeRefLfDeltaUpdate {
    pub fn parse(decoder: &mut BoolDecoder) -> Self {
        let mut ref_update = [None; 4];
        for slot in ref_update.iter_mut() {
            *slot = parse_delta(decoder, 6);
        }
        let mut mode_update = [None; 4];
        for slot in mode_update.iter_mut() {
            *slot = parse_delta(decoder, 6);
        }
        Self {
            ref_update,
            mode_update,
        }
    }

    pub fn write(&self, encoder: &mut BoolEncoder) {
        for &delta in &self.ref_update {
            write_delta(encoder, delta, 6);
        }
        for &delta in &self.mode_update {
            write_delta(encoder, delta, 6);
        }
    }
}

/// Sparse per-branch coefficient probability updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenProbUpdates(
    pub Box<[[[[Option<u8>; ENTROPY_NODES]; PREV_COEF_CONTEXTS]; COEF_BANDS]; BLOCK_TYPES]>,
);

impl Default for TokenProbUpdates {
    fn default() -> Self {
        Self(Box::new(
            [[[[None; ENTROPY_NODES]; PREV_COEF_CONTEXTS]; COEF_BANDS]; BLOCK_TYPES],
        ))
    }
}

impl TokenProbUpdates {
    pub fn parse(decoder: &mut BoolDecoder) -> Self {
        let mut updates = Self::default();
        for i in 0..BLOCK_TYPES {
            for j in 0..COEF_BANDS {
                for k in 0..PREV_COEF_CONTEXTS {
                    for l in 0..ENTROPY_NODES {
                        if decoder.get(COEFF_UPDATE_PROBS[i][j][k][l]) {
                            updates.0[i][j][k][l] = Some(decoder.uint(8) as u8);
                        }
                    }
                }
            }
        }
        updates
    }

    pub fn write(&self, encoder: &mut BoolEncoder) {
        for i in 0..BLOCK_TYPES {
            for j in 0..COEF_BANDS {
                for k in 0..PREV_COEF_CONTEXTS {
                    for l in 0..ENTROPY_NODES {
                        match self.0[i][j][k][l] {
                            Some(prob) => {
                                encoder.put(true, COEFF_UPDATE_PROBS[i][j][k][l]);
                                encoder.put_uint(prob as u32, 8);
                            }
                            None => encoder.put(false, COEFF_UPDATE_PROBS[i][j][k][l]),
                        }
                    }
                }
            }
        }
    }
}

/// Fields present only in inter-frame headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterHeaderFields {
    pub refresh_golden: bool,
    pub refresh_alternate: bool,
    /// 0 = none, 1 = LAST, 2 = ALT. Present only when refresh_golden is
    /// false.
    pub copy_to_golden: u8,
    /// 0 = none, 1 = LAST, 2 = GOLDEN.
    pub copy_to_alternate: u8,
    pub sign_bias_golden: bool,
    pub sign_bias_alternate: bool,
    pub refresh_last: bool,
    pub prob_inter: u8,
    pub prob_references_last: u8,
    pub prob_references_golden: u8,
    pub intra_16x16_prob: Option<[u8; 4]>,
    pub intra_chroma_prob: Option<[u8; 3]>,
    pub mv_prob_update: [[Option<u8>; MV_PROB_CNT]; 2],
}

impl Default for InterHeaderFields {
    fn default() -> Self {
        Self {
            refresh_golden: false,
            refresh_alternate: false,
            copy_to_golden: 0,
            copy_to_alternate: 0,
            sign_bias_golden: false,
            sign_bias_alternate: false,
            refresh_last: true,
            prob_inter: 128,
            prob_references_last: 128,
            prob_references_golden: 128,
            intra_16x16_prob: None,
            intra_chroma_prob: None,
            mv_prob_update: [[None; MV_PROB_CNT]; 2],
        }
    }
}

/// A parsed key- or inter-frame header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub update_segmentation: Option<UpdateSegmentation>,
    /// True selects the simple loop filter.
    pub filter_type: bool,
    pub loop_filter_level: u8,
    pub sharpness_level: u8,
    /// Outer option: adjustments enabled. Inner: deltas updated this frame.
    pub mode_lf_adjustments: Option<Option<ModeRefLfDeltaUpdate>>,
    pub log2_dct_partitions: u8,
    pub quant_indices: QuantIndices,
    pub refresh_entropy_probs: bool,
    pub token_prob_update: TokenProbUpdates,
    /// Present when macroblock-level skipping is enabled.
    pub prob_skip_false: Option<u8>,
    /// `None` for key frames.
    pub inter: Option<InterHeaderFields>,
}

impl Default for FrameHeader {
    fn default() -> Self {
        Self {
            update_segmentation: None,
            filter_type: false,
            loop_filter_level: 0,
            sharpness_level: 0,
            mode_lf_adjustments: None,
            log2_dct_partitions: 0,
            quant_indices: QuantIndices::default(),
            refresh_entropy_probs: true,
            token_prob_update: TokenProbUpdates::default(),
            prob_skip_false: None,
            inter: None,
        }
    }
}

impl FrameHeader {
    pub fn is_key_frame(&self) -> bool {
        self.inter.is_none()
    }

    /// Number of DCT partitions.
    pub fn dct_partition_count(&self) -> usize {
        1 << self.log2_dct_partitions
    }

    pub fn parse_key_frame(decoder: &mut BoolDecoder) -> Result<Self> {
        let color_space = decoder.bit();
        let clamping_type = decoder.bit();
        if color_space || clamping_type {
            return Err(CodecError::unsupported(
                "VP8 color_space and clamping_type bits",
            ));
        }

        let update_segmentation = decoder.bit().then(|| UpdateSegmentation::parse(decoder));
        let filter_type = decoder.bit();
        let loop_filter_level = decoder.uint(6) as u8;
        let sharpness_level = decoder.uint(3) as u8;
        let mode_lf_adjustments = decoder
            .bit()
            .then(|| decoder.bit().then(|| ModeRefLfDeltaUpdate::parse(decoder)));
        let log2_dct_partitions = decoder.uint(2) as u8;
        let quant_indices = QuantIndices::parse(decoder);
        let refresh_entropy_probs = decoder.bit();
        let token_prob_update = TokenProbUpdates::parse(decoder);
        let prob_skip_false = decoder.bit().then(|| decoder.uint(8) as u8);

        Ok(Self {
            update_segmentation,
            filter_type,
            loop_filter_level,
            sharpness_level,
            mode_lf_adjustments,
            log2_dct_partitions,
            quant_indices,
            refresh_entropy_probs,
            token_prob_update,
            prob_skip_false,
            inter: None,
        })
    }

    pub fn parse_inter_frame(decoder: &mut BoolDecoder) -> Result<Self> {
        let update_segmentation = decoder.bit().then(|| UpdateSegmentation::parse(decoder));
        let filter_type = decoder.bit();
        let loop_filter_level = decoder.uint(6) as u8;
        let sharpness_level = decoder.uint(3) as u8;
        let mode_lf_adjustments = decoder
            .bit()
            .then(|| decoder.bit().then(|| ModeRefLfDeltaUpdate::parse(decoder)));
        let log2_dct_partitions = decoder.uint(2) as u8;
        let quant_indices = QuantIndices::parse(decoder);

        let refresh_golden = decoder.bit();
        let refresh_alternate = decoder.bit();
        let copy_to_golden = if refresh_golden { 0 } else { decoder.uint(2) as u8 };
        let copy_to_alternate = if refresh_alternate {
            0
        } else {
            decoder.uint(2) as u8
        };
        let sign_bias_golden = decoder.bit();
        let sign_bias_alternate = decoder.bit();
        let refresh_entropy_probs = decoder.bit();
        let refresh_last = decoder.bit();

        let token_prob_update = TokenProbUpdates::parse(decoder);
        let prob_skip_false = decoder.bit().then(|| decoder.uint(8) as u8);

        let prob_inter = decoder.uint(8) as u8;
        let prob_references_last = decoder.uint(8) as u8;
        let prob_references_golden = decoder.uint(8) as u8;

        let intra_16x16_prob = decoder.bit().then(|| {
            let mut probs = [0u8; 4];
            for prob in probs.iter_mut() {
                *prob = decoder.uint(8) as u8;
            }
            probs
        });
        let intra_chroma_prob = decoder.bit().then(|| {
            let mut probs = [0u8; 3];
            for prob in probs.iter_mut() {
                *prob = decoder.uint(8) as u8;
            }
            probs
        });

        let mut mv_prob_update = [[None; MV_PROB_CNT]; 2];
        for (component, row) in mv_prob_update.iter_mut().enumerate() {
            for (node, slot) in row.iter_mut().enumerate() {
                if decoder.get(MV_UPDATE_PROBS[component][node]) {
                    *slot = Some(decoder.uint(7) as u8);
                }
            }
        }

        Ok(Self {
            update_segmentation,
            filter_type,
            loop_filter_level,
            sharpness_level,
            mode_lf_adjustments,
            log2_dct_partitions,
            quant_indices,
            refresh_entropy_probs,
            token_prob_update,
            prob_skip_false,
            inter: Some(InterHeaderFields {
                refresh_golden,
                refresh_alternate,
                copy_to_golden,
                copy_to_alternate,
                sign_bias_golden,
                sign_bias_alternate,
                refresh_last,
                prob_inter,
                prob_references_last,
                prob_references_golden,
                intra_16x16_prob,
                intra_chroma_prob,
                mv_prob_update,
            }),
        })
    }

    pub fn write(&self, encoder: &mut BoolEncoder) {
        if self.is_key_frame() {
            encoder.put_bit(false); // color space
            encoder.put_bit(false); // clamping type
        }

        match &self.update_segmentation {
            Some(seg) => {
                encoder.put_bit(true);
                seg.write(encoder);
            }
            None => encoder.put_bit(false),
        }
        encoder.put_bit(self.filter_type);
        encoder.put_uint(self.loop_filter_level as u32, 6);
        encoder.put_uint(self.sharpness_level as u32, 3);
        match &self.mode_lf_adjustments {
            Some(update) => {
                encoder.put_bit(true);
                match update {
                    Some(deltas) => {
                        encoder.put_bit(true);
                        deltas.write(encoder);
                    }
                    None => encoder.put_bit(false),
                }
            }
            None => encoder.put_bit(false),
        }
        encoder.put_uint(self.log2_dct_partitions as u32, 2);
        self.quant_indices.write(encoder);

        if let Some(inter) = &self.inter {
            encoder.put_bit(inter.refresh_golden);
            encoder.put_bit(inter.refresh_alternate);
            if !inter.refresh_golden {
                encoder.put_uint(inter.copy_to_golden as u32, 2);
            }
            if !inter.refresh_alternate {
                encoder.put_uint(inter.copy_to_alternate as u32, 2);
            }
            encoder.put_bit(inter.sign_bias_golden);
            encoder.put_bit(inter.sign_bias_alternate);
            encoder.put_bit(self.refresh_entropy_probs);
            encoder.put_bit(inter.refresh_last);
        } else {
            encoder.put_bit(self.refresh_entropy_probs);
        }

        self.token_prob_update.write(encoder);
        match self.prob_skip_false {
            Some(prob) => {
                encoder.put_bit(true);
                encoder.put_uint(prob as u32, 8);
            }
            None => encoder.put_bit(false),
        }

        if let Some(inter) = &self.inter {
            encoder.put_uint(inter.prob_inter as u32, 8);
            encoder.put_uint(inter.prob_references_last as u32, 8);
            encoder.put_uint(inter.prob_references_golden as u32, 8);

            match inter.intra_16x16_prob {
                Some(probs) => {
                    encoder.put_bit(true);
                    for prob in probs {
                        encoder.put_uint(prob as u32, 8);
                    }
                }
                None => encoder.put_bit(false),
            }
            match inter.intra_chroma_prob {
                Some(probs) => {
                    encoder.put_bit(true);
                    for prob in probs {
                        encoder.put_uint(prob as u32, 8);
                    }
                }
                None => encoder.put_bit(false),
            }

            for (component, row) in inter.mv_prob_update.iter().enumerate() {
                for (node, slot) in row.iter().enumerate() {
                    match slot {
                        Some(prob) => {
                            encoder.put(true, MV_UPDATE_PROBS[component][node]);
                            encoder.put_uint(*prob as u32, 7);
                        }
                        None => encoder.put(false, MV_UPDATE_PROBS[component][node]),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_header_round_trip() {
        let header = FrameHeader {
            loop_filter_level: 22,
            sharpness_level: 3,
            log2_dct_partitions: 2,
            quant_indices: QuantIndices {
                y_ac_qi: 47,
                y_dc: Some(-3),
                uv_ac: Some(6),
                ..QuantIndices::default()
            },
            refresh_entropy_probs: false,
            prob_skip_false: Some(180),
            ..FrameHeader::default()
        };

        let mut encoder = BoolEncoder::new();
        header.write(&mut encoder);
        let bytes = encoder.finish();

        let mut decoder = BoolDecoder::new(&bytes);
        let parsed = FrameHeader::parse_key_frame(&mut decoder).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn inter_header_round_trip() {
        let mut inter = InterHeaderFields {
            refresh_golden: false,
            refresh_alternate: true,
            copy_to_golden: 2,
            sign_bias_golden: true,
            prob_inter: 201,
            prob_references_last: 99,
            intra_16x16_prob: Some([10, 20, 30, 40]),
            ..InterHeaderFields::default()
        };
        inter.mv_prob_update[1][4] = Some(77);

        let mut seg = UpdateSegmentation {
            update_map: true,
            feature_data: Some(SegmentFeatureData {
                absolute: true,
                quantizer_update: [Some(40), None, Some(100), None],
                loop_filter_update: [None, Some(-12), None, None],
            }),
            map_tree_probs: Some([Some(200), None, Some(30)]),
        };
        seg.feature_data.as_mut().unwrap().loop_filter_update[3] = Some(5);

        let header = FrameHeader {
            update_segmentation: Some(seg),
            mode_lf_adjustments: Some(Some(ModeRefLfDeltaUpdate {
                ref_update: [Some(2), None, None, Some(-6)],
                mode_update: [None, None, Some(1), None],
            })),
            loop_filter_level: 40,
            prob_skip_false: Some(128),
            inter: Some(inter),
            ..FrameHeader::default()
        };

        let mut encoder = BoolEncoder::new();
        header.write(&mut encoder);
        let bytes = encoder.finish();

        let mut decoder = BoolDecoder::new(&bytes);
        let parsed = FrameHeader::parse_inter_frame(&mut decoder).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn key_frame_rejects_color_space_bit() {
        let mut encoder = BoolEncoder::new();
        encoder.put_bit(true); // nonzero color space
        encoder.put_bit(false);
        let bytes = encoder.finish();

        let mut decoder = BoolDecoder::new(&bytes);
        assert!(matches!(
            FrameHeader::parse_key_frame(&mut decoder),
            Err(CodecError::Unsupported(_))
        ));
    }

    #[test]
    fn segment_tree_probs_default_to_255() {
        let seg = UpdateSegmentation {
            update_map: true,
            feature_data: None,
            map_tree_probs: Some([Some(9), None, None]),
        };
        assert_eq!(seg.tree_probs(), [9, 255, 255]);
    }

    #[test]
    fn header_survives_json_round_trip() {
        let mut header = FrameHeader {
            loop_filter_level: 33,
            quant_indices: QuantIndices {
                y_ac_qi: 72,
                y2_dc: Some(-2),
                ..QuantIndices::default()
            },
            prob_skip_false: Some(200),
            inter: Some(InterHeaderFields {
                refresh_golden: true,
                sign_bias_alternate: true,
                ..InterHeaderFields::default()
            }),
            ..FrameHeader::default()
        };
        header.token_prob_update.0[2][1][0][4] = Some(19);

        let json = serde_json::to_string(&header).unwrap();
        let parsed: FrameHeader = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, header);
    }
}
