//! Persistent entropy-coding probabilities.
//!
//! Key frames reset these to fixed defaults. Inter frames apply sparse
//! updates; when `refresh_entropy_probs` is false, the decoder snapshots the
//! tables before the frame and restores them afterwards.

use salsify_core::StableHasher;

use crate::consts::{
    BLOCK_TYPES, COEF_BANDS, DEFAULT_COEFF_PROBS, DEFAULT_MV_PROBS, DEFAULT_UV_MODE_PROBS,
    DEFAULT_Y_MODE_PROBS, ENTROPY_NODES, MV_PROB_CNT, PREV_COEF_CONTEXTS,
};
use crate::frame_header::{FrameHeader, TokenProbUpdates};

pub type CoeffProbs =
    [[[[u8; ENTROPY_NODES]; PREV_COEF_CONTEXTS]; COEF_BANDS]; BLOCK_TYPES];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbabilityTables {
    pub coeff_probs: Box<CoeffProbs>,
    pub y_mode_probs: [u8; 4],
    pub uv_mode_probs: [u8; 3],
    pub motion_vector_probs: [[u8; MV_PROB_CNT]; 2],
}

impl Default for ProbabilityTables {
    fn default() -> Self {
        Self {
            coeff_probs: Box::new(DEFAULT_COEFF_PROBS),
            y_mode_probs: DEFAULT_Y_MODE_PROBS,
            uv_mode_probs: DEFAULT_UV_MODE_PROBS,
            motion_vector_probs: DEFAULT_MV_PROBS,
        }
    }
}

impl ProbabilityTables {
    /// Apply the coefficient-probability updates every header carries.
    pub fn coeff_prob_update(&mut self, updates: &TokenProbUpdates) {
        for i in 0..BLOCK_TYPES {
            for j in 0..COEF_BANDS {
                for k in 0..PREV_COEF_CONTEXTS {
                    for l in 0..ENTROPY_NODES {
                        if let Some(prob) = updates.0[i][j][k][l] {
                            self.coeff_probs[i][j][k][l] = prob;
                        }
                    }
                }
            }
        }
    }

    /// Apply every probability update an inter-frame header carries.
    pub fn update(&mut self, header: &FrameHeader) {
        self.coeff_prob_update(&header.token_prob_update);

        let Some(inter) = &header.inter else {
            return;
        };

        if let Some(probs) = inter.intra_16x16_prob {
            self.y_mode_probs = probs;
        }
        if let Some(probs) = inter.intra_chroma_prob {
            self.uv_mode_probs = probs;
        }
        for (component, row) in inter.mv_prob_update.iter().enumerate() {
            for (node, slot) in row.iter().enumerate() {
                if let Some(update) = slot {
                    // 7-bit updates are stored doubled; zero maps to one
                    self.motion_vector_probs[component][node] =
                        if *update != 0 { update << 1 } else { 1 };
                }
            }
        }
    }

    pub fn hash(&self, hasher: &mut StableHasher) {
        for block_type in self.coeff_probs.iter() {
            for band in block_type {
                for context in band {
                    hasher.write_bytes(context);
                }
            }
        }
        hasher.write_bytes(&self.y_mode_probs);
        hasher.write_bytes(&self.uv_mode_probs);
        for row in &self.motion_vector_probs {
            hasher.write_bytes(row);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_header::InterHeaderFields;

    #[test]
    fn defaults_match_fixed_tables() {
        let tables = ProbabilityTables::default();
        assert_eq!(tables.coeff_probs[0][0][0], DEFAULT_COEFF_PROBS[0][0][0]);
        assert_eq!(tables.y_mode_probs, DEFAULT_Y_MODE_PROBS);
    }

    #[test]
    fn sparse_coeff_update_applies() {
        let mut tables = ProbabilityTables::default();
        let mut updates = TokenProbUpdates::default();
        updates.0[1][2][0][3] = Some(44);
        tables.coeff_prob_update(&updates);
        assert_eq!(tables.coeff_probs[1][2][0][3], 44);
        // untouched neighbors keep their defaults
        assert_eq!(tables.coeff_probs[1][2][0][4], DEFAULT_COEFF_PROBS[1][2][0][4]);
    }

    #[test]
    fn mv_prob_update_doubles_and_avoids_zero() {
        let mut tables = ProbabilityTables::default();
        let mut header = FrameHeader {
            inter: Some(InterHeaderFields::default()),
            ..FrameHeader::default()
        };
        let inter = header.inter.as_mut().unwrap();
        inter.mv_prob_update[0][2] = Some(60);
        inter.mv_prob_update[1][5] = Some(0);

        tables.update(&header);
        assert_eq!(tables.motion_vector_probs[0][2], 120);
        assert_eq!(tables.motion_vector_probs[1][5], 1);
    }
}
