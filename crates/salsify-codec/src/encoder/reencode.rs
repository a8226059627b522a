//! Reencoding: reproduce an externally-supplied decoded raster, either
//! with a fresh inter-frame search or by keeping an existing frame's mode
//! decisions and requantizing its residuals.

use salsify_core::Raster;

use crate::encoder::trellis::Requantizer;
use crate::encoder::{
    compute_chroma_residuals_with, compute_luma_residuals_with, inter, Encoder,
};
use crate::error::{CodecError, Result};
use crate::frame::Frame;
use crate::frame_header::QuantIndices;
use crate::macroblock::MbKind;
use crate::predict::intra::{predict_chroma_8x8, predict_luma_16x16, predict_luma_4x4, YMode};
use crate::quantizer::Quantizer;
use crate::reconstruct::reconstruct_macroblock;
use crate::transform::forward_dct;

impl Encoder {
    /// Produce an inter frame that starts from the current reference set
    /// and reproduces `target`.
    pub fn reencode_as_interframe(&mut self, target: &Raster, y_ac_qi: u8) -> Result<Vec<u8>> {
        if !self.has_state {
            return Err(CodecError::unsupported(
                "reencode requires an established state",
            ));
        }
        self.encode_with_quantizer(target, y_ac_qi)
    }

    /// Produce an inter frame with the same mode decisions as `original`
    /// but residuals requantized at the new quantizer against `target`.
    pub fn update_residues(
        &mut self,
        target: &Raster,
        original: &Frame,
        quant_indices: &QuantIndices,
    ) -> Result<Vec<u8>> {
        self.check_dimensions(target)?;
        if original.header.update_segmentation.is_some() {
            return Err(CodecError::unsupported("segmentation in a reencode"));
        }
        if original.is_key_frame() {
            return Err(CodecError::unsupported("residue update of a key frame"));
        }

        let quantizer = Quantizer::new(quant_indices);
        self.update_rd_multipliers(&quantizer);

        let mut frame = original.clone();
        frame.header.quant_indices = *quant_indices;
        frame.header.token_prob_update = Default::default();

        replay_residuals(self, &mut frame, target, &quantizer, Requantizer::Plain)?;

        self.optimize_probability_tables(&mut frame)?;
        self.optimize_prob_skip(&mut frame);

        self.write_frame(&frame)
    }
}

/// Replay a frame's mode decisions against `target`, recomputing raw
/// residuals and requantizing them. Reconstruction is progressive, so
/// intra predictors see the requantized neighbors.
pub(crate) fn replay_residuals(
    encoder: &Encoder,
    frame: &mut Frame,
    target: &Raster,
    quantizer: &Quantizer,
    requantizer: Requantizer,
) -> Result<()> {
    let mut recon = encoder
        .pool
        .take_sized(encoder.width(), encoder.height())?;
    let recon_state = encoder.encode_state();

    for mb_row in 0..frame.macroblocks.rows() {
        for mb_column in 0..frame.macroblocks.columns() {
            let x0 = mb_column * 16;
            let y0 = mb_row * 16;
            let cx0 = mb_column * 8;
            let cy0 = mb_row * 8;

            let mut mb = std::mem::take(frame.macroblocks.at_mut(mb_column, mb_row));

            match &mb.kind {
                MbKind::Intra {
                    y_mode: YMode::B,
                    b_modes,
                    uv_mode,
                } => {
                    let b_modes = *b_modes;
                    let uv_mode = *uv_mode;
                    // interleaved: each subblock predicts from requantized
                    // neighbors
                    for index in 0..16 {
                        let sb_x = x0 + (index % 4) * 4;
                        let sb_y = y0 + (index / 4) * 4;
                        predict_luma_4x4(
                            &mut recon.y,
                            sb_x,
                            sb_y,
                            y0,
                            index % 4 == 3,
                            b_modes[index],
                        );
                        let residual =
                            crate::encoder::residual_4x4(&target.y, &recon.y, sb_x, sb_y);
                        let coefficients = requantizer.quantize(
                            &forward_dct(&residual),
                            quantizer.y_dc,
                            quantizer.y_ac,
                            0,
                        );
                        mb.y[index].coefficients = coefficients;

                        let mut dequantized = coefficients;
                        dequantized[0] = dequantized[0].saturating_mul(quantizer.y_dc);
                        for coefficient in dequantized.iter_mut().skip(1) {
                            *coefficient = coefficient.saturating_mul(quantizer.y_ac);
                        }
                        crate::transform::idct_add(&dequantized, &mut recon.y, sb_x, sb_y);
                    }
                    predict_chroma_8x8(&mut recon.u, cx0, cy0, uv_mode);
                    predict_chroma_8x8(&mut recon.v, cx0, cy0, uv_mode);
                }
                MbKind::Intra { y_mode, uv_mode, .. } => {
                    let y_mode = *y_mode;
                    let uv_mode = *uv_mode;
                    predict_luma_16x16(&mut recon.y, x0, y0, y_mode);
                    compute_luma_residuals_with(
                        &mut mb,
                        &target.y,
                        &recon.y,
                        x0,
                        y0,
                        quantizer,
                        true,
                        &requantizer,
                    );
                    predict_chroma_8x8(&mut recon.u, cx0, cy0, uv_mode);
                    predict_chroma_8x8(&mut recon.v, cx0, cy0, uv_mode);
                }
                MbKind::Inter {
                    mv,
                    reference,
                    partition,
                    sub_mvs,
                    ..
                } => {
                    let mv = *mv;
                    let split = partition.is_some();
                    let sub_mvs = *sub_mvs;
                    let reference_raster = encoder.references.get(*reference);
                    inter::write_inter_prediction(
                        reference_raster,
                        mv,
                        &sub_mvs,
                        split,
                        &mut recon,
                        mb_column,
                        mb_row,
                    );
                    compute_luma_residuals_with(
                        &mut mb,
                        &target.y,
                        &recon.y,
                        x0,
                        y0,
                        quantizer,
                        !split,
                        &requantizer,
                    );
                }
            }

            compute_chroma_residuals_with(&mut mb, target, &recon, cx0, cy0, quantizer, &requantizer);
            mb.calculate_has_nonzero();
            *frame.macroblocks.at_mut(mb_column, mb_row) = mb;

            reconstruct_macroblock(
                frame,
                &recon_state,
                &encoder.references,
                crate::chunk::ReconstructionFilter::Bicubic,
                &mut recon,
                mb_column,
                mb_row,
            )?;
        }
    }

    Ok(())
}
