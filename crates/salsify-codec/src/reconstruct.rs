//! Frame reconstruction: prediction plus inverse transforms.
//!
//! Shared between the decoder and the encoder's decode simulation, so the
//! encoder's internal reconstruction is byte-identical to what a receiver
//! produces from the same bits.

use salsify_core::Raster;

use crate::chunk::ReconstructionFilter;
use crate::error::Result;
use crate::frame::Frame;
use crate::macroblock::{CoeffBlock, MacroblockInfo, MbKind};
use crate::mv::MotionVector;
use crate::predict::inter::{chroma_mv, predict_block, store_block};
use crate::predict::intra::{predict_chroma_8x8, predict_luma_16x16, predict_luma_4x4, YMode};
use crate::quantizer::Quantizer;
use crate::references::ReferenceSet;
use crate::state::DecoderState;
use crate::transform::{idct_add, inverse_walsh};

fn dequantized(block: &CoeffBlock, dc: i16, ac: i16) -> [i16; 16] {
    let mut out = block.coefficients;
    out[0] = out[0].saturating_mul(dc);
    for coefficient in out.iter_mut().skip(1) {
        *coefficient = coefficient.saturating_mul(ac);
    }
    out
}

/// The quantizer in effect for one macroblock under the current state.
pub fn macroblock_quantizer(state: &DecoderState, frame: &Frame, mb: &MacroblockInfo) -> Result<Quantizer> {
    match &state.segmentation {
        Some(segmentation) => {
            Ok(segmentation.quantizer_for(mb.segment, &frame.header.quant_indices))
        }
        None => Ok(Quantizer::new(&frame.header.quant_indices)),
    }
}

/// Reconstruct every macroblock of `frame` into `raster`. The state must
/// already carry this frame's segmentation and filter-adjustment updates.
/// The loop filter is a separate pass.
pub fn reconstruct_frame(
    frame: &Frame,
    state: &DecoderState,
    references: &ReferenceSet,
    filter: ReconstructionFilter,
    raster: &mut Raster,
) -> Result<()> {
    for mb_row in 0..frame.macroblocks.rows() {
        for mb_column in 0..frame.macroblocks.columns() {
            reconstruct_macroblock(frame, state, references, filter, raster, mb_column, mb_row)?;
        }
    }
    Ok(())
}

/// Reconstruct a single macroblock; the encoder calls this per macroblock
/// while searching so its neighbors are decode-exact.
pub fn reconstruct_macroblock(
    frame: &Frame,
    state: &DecoderState,
    references: &ReferenceSet,
    filter: ReconstructionFilter,
    raster: &mut Raster,
    mb_column: usize,
    mb_row: usize,
) -> Result<()> {
    let mb = frame.macroblocks.at(mb_column, mb_row);
    let quantizer = macroblock_quantizer(state, frame, mb)?;

    let y0 = mb_row * 16;
    let x0 = mb_column * 16;
    let cx0 = mb_column * 8;
    let cy0 = mb_row * 8;

    match &mb.kind {
        MbKind::Intra {
            y_mode,
            b_modes,
            uv_mode,
        } => {
            predict_chroma_8x8(&mut raster.u, cx0, cy0, *uv_mode);
            predict_chroma_8x8(&mut raster.v, cx0, cy0, *uv_mode);

            if *y_mode == YMode::B {
                // prediction and residual interleave per subblock
                for index in 0..16 {
                    let sb_x = x0 + (index % 4) * 4;
                    let sb_y = y0 + (index / 4) * 4;
                    predict_luma_4x4(
                        &mut raster.y,
                        sb_x,
                        sb_y,
                        y0,
                        index % 4 == 3,
                        b_modes[index],
                    );
                    let coefficients =
                        dequantized(&mb.y[index], quantizer.y_dc, quantizer.y_ac);
                    idct_add(&coefficients, &mut raster.y, sb_x, sb_y);
                }
            } else {
                predict_luma_16x16(&mut raster.y, x0, y0, *y_mode);
                add_luma_residuals(mb, &quantizer, raster, x0, y0);
            }
        }
        MbKind::Inter {
            mode: _,
            reference,
            mv: _,
            partition,
            sub_modes: _,
            sub_mvs,
        } => {
            let reference_raster = references.get(*reference);

            if partition.is_none() {
                let mv = sub_mvs[0];
                let mut prediction = [0u8; 16 * 16];
                predict_block(
                    &reference_raster.y,
                    x0,
                    y0,
                    16,
                    16,
                    mv,
                    filter,
                    &mut prediction,
                );
                store_block(&mut raster.y, x0, y0, 16, 16, &prediction);

                let uv_mv = chroma_mv([mv; 4]);
                let mut chroma = [0u8; 8 * 8];
                predict_block(
                    &reference_raster.u,
                    cx0,
                    cy0,
                    8,
                    8,
                    uv_mv,
                    filter,
                    &mut chroma,
                );
                store_block(&mut raster.u, cx0, cy0, 8, 8, &chroma);
                predict_block(
                    &reference_raster.v,
                    cx0,
                    cy0,
                    8,
                    8,
                    uv_mv,
                    filter,
                    &mut chroma,
                );
                store_block(&mut raster.v, cx0, cy0, 8, 8, &chroma);
            } else {
                // SPLITMV: per-subblock luma, averaged chroma
                let mut prediction = [0u8; 4 * 4];
                for index in 0..16 {
                    let sb_x = x0 + (index % 4) * 4;
                    let sb_y = y0 + (index / 4) * 4;
                    predict_block(
                        &reference_raster.y,
                        sb_x,
                        sb_y,
                        4,
                        4,
                        sub_mvs[index],
                        filter,
                        &mut prediction,
                    );
                    store_block(&mut raster.y, sb_x, sb_y, 4, 4, &prediction);
                }

                for chroma_index in 0..4 {
                    let ci = chroma_index % 2;
                    let cj = chroma_index / 2;
                    let group = [
                        sub_mvs[(2 * cj) * 4 + 2 * ci],
                        sub_mvs[(2 * cj) * 4 + 2 * ci + 1],
                        sub_mvs[(2 * cj + 1) * 4 + 2 * ci],
                        sub_mvs[(2 * cj + 1) * 4 + 2 * ci + 1],
                    ];
                    let uv_mv: MotionVector = chroma_mv(group);
                    let sb_x = cx0 + ci * 4;
                    let sb_y = cy0 + cj * 4;
                    predict_block(
                        &reference_raster.u,
                        sb_x,
                        sb_y,
                        4,
                        4,
                        uv_mv,
                        filter,
                        &mut prediction,
                    );
                    store_block(&mut raster.u, sb_x, sb_y, 4, 4, &prediction);
                    predict_block(
                        &reference_raster.v,
                        sb_x,
                        sb_y,
                        4,
                        4,
                        uv_mv,
                        filter,
                        &mut prediction,
                    );
                    store_block(&mut raster.v, sb_x, sb_y, 4, 4, &prediction);
                }
            }

            add_luma_residuals(mb, &quantizer, raster, x0, y0);
        }
    }

    // chroma residuals are shared by every path
    for index in 0..4 {
        let sb_x = cx0 + (index % 2) * 4;
        let sb_y = cy0 + (index / 2) * 4;
        let u = dequantized(&mb.u[index], quantizer.uv_dc, quantizer.uv_ac);
        idct_add(&u, &mut raster.u, sb_x, sb_y);
        let v = dequantized(&mb.v[index], quantizer.uv_dc, quantizer.uv_ac);
        idct_add(&v, &mut raster.v, sb_x, sb_y);
    }

    Ok(())
}

/// Dequantize, run the Y2 inverse Walsh-Hadamard when present, and add the
/// sixteen luma residuals. Not used for B_PRED, which interleaves.
fn add_luma_residuals(
    mb: &MacroblockInfo,
    quantizer: &Quantizer,
    raster: &mut Raster,
    x0: usize,
    y0: usize,
) {
    let has_y2 = mb.has_y2();
    let dc_values = has_y2.then(|| {
        let y2 = dequantized(&mb.y2, quantizer.y2_dc, quantizer.y2_ac);
        inverse_walsh(&y2)
    });

    for index in 0..16 {
        let mut coefficients = dequantized(&mb.y[index], quantizer.y_dc, quantizer.y_ac);
        if let Some(dc) = &dc_values {
            coefficients[0] = dc[index];
        }
        let sb_x = x0 + (index % 4) * 4;
        let sb_y = y0 + (index / 4) * 4;
        idct_add(&coefficients, &mut raster.y, sb_x, sb_y);
    }
}
