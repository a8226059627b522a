//! Effective dequantizers derived from the frame header.

use crate::consts::{AC_QLOOKUP, DC_QLOOKUP, NUM_SEGMENTS};
use crate::error::{CodecError, Result};
use crate::frame_header::{QuantIndices, UpdateSegmentation};

fn clamp_qi(qi: i16) -> usize {
    qi.clamp(0, 127) as usize
}

/// The six dequantization factors in effect for one macroblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quantizer {
    pub y_ac: i16,
    pub y_dc: i16,
    pub y2_ac: i16,
    pub y2_dc: i16,
    pub uv_ac: i16,
    pub uv_dc: i16,
}

impl Quantizer {
    pub fn new(indices: &QuantIndices) -> Self {
        let base = indices.y_ac_qi as i16;
        let mut quantizer = Self {
            y_ac: AC_QLOOKUP[clamp_qi(base)],
            y_dc: DC_QLOOKUP[clamp_qi(base + indices.y_dc.unwrap_or(0) as i16)],
            y2_ac: AC_QLOOKUP[clamp_qi(base + indices.y2_ac.unwrap_or(0) as i16)] * 155 / 100,
            y2_dc: DC_QLOOKUP[clamp_qi(base + indices.y2_dc.unwrap_or(0) as i16)] * 2,
            uv_ac: AC_QLOOKUP[clamp_qi(base + indices.uv_ac.unwrap_or(0) as i16)],
            uv_dc: DC_QLOOKUP[clamp_qi(base + indices.uv_dc.unwrap_or(0) as i16)],
        };
        if quantizer.y2_ac < 8 {
            quantizer.y2_ac = 8;
        }
        if quantizer.uv_dc > 132 {
            quantizer.uv_dc = 132;
        }
        quantizer
    }

    /// Quantizer for one segment under the current segmentation update.
    pub fn for_segment(
        segment_id: u8,
        indices: &QuantIndices,
        update: Option<&UpdateSegmentation>,
    ) -> Result<Self> {
        let mut indices = *indices;
        if let Some(feature_data) = update.and_then(|u| u.feature_data.as_ref()) {
            if let Some(value) = feature_data.quantizer_update[segment_id as usize] {
                if feature_data.absolute {
                    if value < 0 {
                        return Err(CodecError::invalid(
                            "absolute quantizer update with negative value",
                        ));
                    }
                    indices.y_ac_qi = value as u8;
                } else {
                    indices.y_ac_qi = (indices.y_ac_qi as i16 + value as i16).clamp(0, 127) as u8;
                }
            }
        }
        Ok(Self::new(&indices))
    }

    /// All four segment quantizers at once.
    pub fn segment_set(
        indices: &QuantIndices,
        update: Option<&UpdateSegmentation>,
    ) -> Result<[Self; NUM_SEGMENTS]> {
        let mut out = [Self::new(indices); NUM_SEGMENTS];
        for (segment_id, quantizer) in out.iter_mut().enumerate() {
            *quantizer = Self::for_segment(segment_id as u8, indices, update)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_header::SegmentFeatureData;

    #[test]
    fn baseline_lookup() {
        let quantizer = Quantizer::new(&QuantIndices {
            y_ac_qi: 0,
            ..QuantIndices::default()
        });
        assert_eq!(quantizer.y_ac, 4);
        assert_eq!(quantizer.y_dc, 4);
        // y2 floor applies at tiny quantizers
        assert_eq!(quantizer.y2_ac, 8);
        assert_eq!(quantizer.y2_dc, 8);
    }

    #[test]
    fn uv_dc_is_capped() {
        let quantizer = Quantizer::new(&QuantIndices {
            y_ac_qi: 127,
            ..QuantIndices::default()
        });
        assert_eq!(quantizer.uv_dc, 132);
        assert_eq!(quantizer.y_ac, AC_QLOOKUP[127]);
    }

    #[test]
    fn deltas_clamp_into_range() {
        let quantizer = Quantizer::new(&QuantIndices {
            y_ac_qi: 2,
            y_dc: Some(-10),
            ..QuantIndices::default()
        });
        assert_eq!(quantizer.y_dc, DC_QLOOKUP[0]);
    }

    #[test]
    fn negative_absolute_segment_update_rejected() {
        let update = UpdateSegmentation {
            update_map: false,
            feature_data: Some(SegmentFeatureData {
                absolute: true,
                quantizer_update: [Some(-4), None, None, None],
                loop_filter_update: [None; 4],
            }),
            map_tree_probs: None,
        };
        let indices = QuantIndices::default();
        assert!(Quantizer::for_segment(0, &indices, Some(&update)).is_err());
    }

    #[test]
    fn relative_segment_update_offsets_base() {
        let update = UpdateSegmentation {
            update_map: false,
            feature_data: Some(SegmentFeatureData {
                absolute: false,
                quantizer_update: [Some(10), None, None, None],
                loop_filter_update: [None; 4],
            }),
            map_tree_probs: None,
        };
        let indices = QuantIndices {
            y_ac_qi: 20,
            ..QuantIndices::default()
        };
        let quantizer = Quantizer::for_segment(0, &indices, Some(&update)).unwrap();
        assert_eq!(quantizer.y_ac, AC_QLOOKUP[30]);
    }
}
