//! Intra mode search.
//!
//! 16x16 candidates are scored with variance (their DC rides in the Y2
//! block); B_PRED subblocks use SSE and reconstruct as they go, since each
//! subblock predicts from its reconstructed neighbors.

use salsify_core::Raster;

use crate::consts::{B_MODE_TREE, DEFAULT_B_MODE_PROBS, KF_B_MODE_PROBS};
use crate::encoder::costs::tree_cost_table;
use crate::encoder::distortion::{copy_region, sse, variance};
use crate::encoder::{quantize_coefficients, residual_4x4, Encoder};
use crate::macroblock::{MacroblockGrid, MacroblockInfo};
use crate::predict::intra::{
    predict_chroma_8x8, predict_luma_16x16, predict_luma_4x4, BMode, UvMode, YMode,
};
use crate::quantizer::Quantizer;
use crate::transform::{forward_dct, idct_add};

/// Per-frame intra mode cost tables.
pub(crate) struct IntraModeCosts {
    pub y_modes: [u32; 5],
    pub uv_modes: [u32; 4],
    pub key_frame: bool,
}

impl IntraModeCosts {
    fn b_mode_costs(&self, above: BMode, left: BMode) -> [u32; 10] {
        if self.key_frame {
            tree_cost_table::<10>(&B_MODE_TREE, &KF_B_MODE_PROBS[above as usize][left as usize])
        } else {
            tree_cost_table::<10>(&B_MODE_TREE, &DEFAULT_B_MODE_PROBS)
        }
    }
}

pub(crate) struct LumaDecision {
    pub y_mode: YMode,
    pub b_modes: [BMode; 16],
    pub cost: u32,
}

/// The bottom row / right column of 4x4 modes from the above and left
/// macroblocks, for key-frame contextual coding.
pub(crate) fn neighbor_b_modes(
    grid: &MacroblockGrid,
    mb_column: usize,
    mb_row: usize,
) -> ([BMode; 4], [BMode; 4]) {
    let mut above = [BMode::Dc; 4];
    if let Some(mb) = grid.get(mb_column as isize, mb_row as isize - 1) {
        for (i, slot) in above.iter_mut().enumerate() {
            *slot = mb.b_mode_at(12 + i);
        }
    }
    let mut left = [BMode::Dc; 4];
    if let Some(mb) = grid.get(mb_column as isize - 1, mb_row as isize) {
        for (i, slot) in left.iter_mut().enumerate() {
            *slot = mb.b_mode_at(i * 4 + 3);
        }
    }
    (above, left)
}

const Y_16X16_MODES: [YMode; 4] = [YMode::Dc, YMode::V, YMode::H, YMode::Tm];
const B_MODES: [BMode; 10] = [
    BMode::Dc,
    BMode::Tm,
    BMode::Ve,
    BMode::He,
    BMode::Ld,
    BMode::Rd,
    BMode::Vr,
    BMode::Vl,
    BMode::Hd,
    BMode::Hu,
];
const UV_MODES: [UvMode; 4] = [UvMode::Dc, UvMode::V, UvMode::H, UvMode::Tm];

/// Choose the luma mode for one macroblock. For a B_PRED winner the
/// subblock coefficients are left filled in `mb` and the reconstruction
/// region holds the B_PRED result; for a 16x16 winner the caller
/// re-predicts and computes residuals.
#[allow(clippy::too_many_arguments)]
pub(crate) fn pick_luma_intra(
    encoder: &Encoder,
    original: &Raster,
    recon: &mut Raster,
    mb: &mut MacroblockInfo,
    mb_column: usize,
    mb_row: usize,
    quantizer: &Quantizer,
    mode_costs: &IntraModeCosts,
    above_b: [BMode; 4],
    left_b: [BMode; 4],
    allow_b_pred: bool,
) -> LumaDecision {
    let x0 = mb_column * 16;
    let y0 = mb_row * 16;

    // 16x16 candidates: predictor only, variance distortion
    let mut best_16 = YMode::Dc;
    let mut best_16_cost = u32::MAX;
    let mut prediction = [0u8; 16 * 16];
    for mode in Y_16X16_MODES {
        predict_luma_16x16(&mut recon.y, x0, y0, mode);
        copy_region(&recon.y, x0, y0, 16, 16, &mut prediction);
        let distortion = variance(&original.y, x0, y0, 16, 16, &prediction);
        let cost = encoder.rdcost(mode_costs.y_modes[mode as usize], distortion);
        if cost < best_16_cost {
            best_16_cost = cost;
            best_16 = mode;
        }
    }

    if !allow_b_pred {
        return LumaDecision {
            y_mode: best_16,
            b_modes: [crate::macroblock::implied_b_mode(best_16); 16],
            cost: best_16_cost,
        };
    }

    // B_PRED: per-subblock search with interleaved reconstruction
    let mut b_modes = [BMode::Dc; 16];
    let mut b_cost = encoder.rdcost(mode_costs.y_modes[YMode::B as usize], 0);
    let mut sb_prediction = [0u8; 16];

    for index in 0..16 {
        let sb_x = x0 + (index % 4) * 4;
        let sb_y = y0 + (index / 4) * 4;
        let right_column = index % 4 == 3;

        let above_mode = if index >= 4 {
            b_modes[index - 4]
        } else {
            above_b[index]
        };
        let left_mode = if index % 4 != 0 {
            b_modes[index - 1]
        } else {
            left_b[index / 4]
        };
        let sb_costs = mode_costs.b_mode_costs(above_mode, left_mode);

        let mut best_mode = BMode::Dc;
        let mut best_cost = u32::MAX;
        for mode in B_MODES {
            predict_luma_4x4(&mut recon.y, sb_x, sb_y, y0, right_column, mode);
            copy_region(&recon.y, sb_x, sb_y, 4, 4, &mut sb_prediction);
            let distortion = sse(&original.y, sb_x, sb_y, 4, 4, &sb_prediction);
            let cost = encoder.rdcost(sb_costs[mode as usize], distortion);
            if cost < best_cost {
                best_cost = cost;
                best_mode = mode;
            }
        }

        b_modes[index] = best_mode;
        b_cost = b_cost.saturating_add(best_cost);

        // reconstruct this subblock so its neighbors predict from it
        predict_luma_4x4(&mut recon.y, sb_x, sb_y, y0, right_column, best_mode);
        let residual = residual_4x4(&original.y, &recon.y, sb_x, sb_y);
        let coefficients =
            quantize_coefficients(&forward_dct(&residual), quantizer.y_dc, quantizer.y_ac);
        mb.y[index].coefficients = coefficients;

        let mut dequantized = coefficients;
        dequantized[0] = dequantized[0].saturating_mul(quantizer.y_dc);
        for coefficient in dequantized.iter_mut().skip(1) {
            *coefficient = coefficient.saturating_mul(quantizer.y_ac);
        }
        idct_add(&dequantized, &mut recon.y, sb_x, sb_y);
    }

    if b_cost < best_16_cost {
        LumaDecision {
            y_mode: YMode::B,
            b_modes,
            cost: b_cost,
        }
    } else {
        LumaDecision {
            y_mode: best_16,
            b_modes: [crate::macroblock::implied_b_mode(best_16); 16],
            cost: best_16_cost,
        }
    }
}

/// Choose the chroma mode by summed SSE over both planes.
pub(crate) fn pick_chroma_intra(
    encoder: &Encoder,
    original: &Raster,
    recon: &mut Raster,
    cx0: usize,
    cy0: usize,
    mode_costs: &IntraModeCosts,
) -> UvMode {
    let mut best = UvMode::Dc;
    let mut best_cost = u32::MAX;
    let mut prediction = [0u8; 8 * 8];

    for mode in UV_MODES {
        predict_chroma_8x8(&mut recon.u, cx0, cy0, mode);
        copy_region(&recon.u, cx0, cy0, 8, 8, &mut prediction);
        let mut distortion = sse(&original.u, cx0, cy0, 8, 8, &prediction);

        predict_chroma_8x8(&mut recon.v, cx0, cy0, mode);
        copy_region(&recon.v, cx0, cy0, 8, 8, &mut prediction);
        distortion += sse(&original.v, cx0, cy0, 8, 8, &prediction);

        let cost = encoder.rdcost(mode_costs.uv_modes[mode as usize], distortion);
        if cost < best_cost {
            best_cost = cost;
            best = mode;
        }
    }
    best
}
