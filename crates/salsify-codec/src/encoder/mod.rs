//! The encoder: a decode simulation that searches prediction modes per
//! macroblock, quantizes residuals, and reconstructs its own output so the
//! state it transmits is exactly the state a receiver reaches.

mod costs;
mod distortion;
mod inter;
mod intra;
mod reencode;
mod size_estimation;
mod trellis;

pub use costs::{mv_component_cost, mv_cost, tree_cost, tree_cost_table};

use std::sync::Arc;

use salsify_core::{minihash, Plane, Raster, RasterPool};
use tracing::{debug, trace};

use crate::chunk::ReconstructionFilter;
use crate::consts::{
    KF_UV_MODE_PROBS, KF_Y_MODE_PROBS, KF_Y_MODE_TREE, UV_MODE_TREE, Y_MODE_TREE,
};
use crate::decoder::Decoder;
use crate::error::{CodecError, Result};
use crate::frame::Frame;
use crate::frame_header::{
    FrameHeader, InterHeaderFields, ModeRefLfDeltaUpdate, QuantIndices,
};
use crate::loopfilter::filter_frame;
use crate::macroblock::{InterMode, MbKind, Reference, SubMvMode};
use crate::quantizer::Quantizer;
use crate::reconstruct::{reconstruct_frame, reconstruct_macroblock};
use crate::references::ReferenceSet;
use crate::state::DecoderState;
use crate::transform::{forward_dct, forward_walsh};

pub const DEFAULT_QUANTIZER: u8 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderQuality {
    Best,
    Realtime,
}

/// Stats about the latest encoded frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodeStats {
    pub ssim: Option<f64>,
}

#[derive(Clone)]
pub struct Encoder {
    state: DecoderState,
    references: ReferenceSet,
    pool: RasterPool,
    /// Dedicated pool for the quarter-size size-estimation scratch frames.
    proxy_pool: RasterPool,
    has_state: bool,
    two_pass: bool,
    quality: EncoderQuality,
    loop_filter_level: Option<u8>,
    last_y_ac_qi: Option<u8>,
    stats: EncodeStats,
    rate_multiplier: u32,
    distortion_multiplier: u32,
}

/// How much of the frame-level optimization the encode pass runs; size
/// estimation trims it down.
#[derive(Clone, Copy)]
struct PassOptions {
    search_loop_filter: bool,
    optimize_probabilities: bool,
}

impl PassOptions {
    fn full() -> Self {
        Self {
            search_loop_filter: true,
            optimize_probabilities: true,
        }
    }

    fn estimate() -> Self {
        Self {
            search_loop_filter: false,
            optimize_probabilities: false,
        }
    }
}

impl Encoder {
    pub fn new(
        width: u16,
        height: u16,
        two_pass: bool,
        quality: EncoderQuality,
        pool: &RasterPool,
    ) -> Result<Self> {
        let proxy_width = (width / size_estimation::WIDTH_SAMPLE_FACTOR).max(16);
        let proxy_height = (height / size_estimation::HEIGHT_SAMPLE_FACTOR).max(16);
        Ok(Self {
            state: DecoderState::new(width, height),
            references: ReferenceSet::new(width, height, pool)?,
            pool: pool.clone(),
            proxy_pool: RasterPool::new(proxy_width, proxy_height),
            has_state: false,
            two_pass,
            quality,
            loop_filter_level: None,
            last_y_ac_qi: None,
            stats: EncodeStats::default(),
            rate_multiplier: 300,
            distortion_multiplier: 1,
        })
    }

    /// Continue encoding from a decoder's state (the reencode entry point).
    pub fn from_decoder(
        decoder: &Decoder,
        two_pass: bool,
        quality: EncoderQuality,
        pool: &RasterPool,
    ) -> Result<Self> {
        let mut encoder = Self::new(decoder.width(), decoder.height(), two_pass, quality, pool)?;
        encoder.state = decoder.state().clone();
        encoder.references = decoder.references().clone();
        encoder.has_state = true;
        Ok(encoder)
    }

    pub fn export_decoder(&self) -> Decoder {
        Decoder::from_parts(self.state.clone(), self.references.clone())
    }

    pub fn width(&self) -> u16 {
        self.state.width()
    }

    pub fn height(&self) -> u16 {
        self.state.height()
    }

    pub fn stats(&self) -> EncodeStats {
        self.stats
    }

    pub fn last_y_ac_qi(&self) -> Option<u8> {
        self.last_y_ac_qi
    }

    pub fn minihash(&self) -> u32 {
        let (last, golden, alternate) = self.references.hashes();
        minihash(self.state.hash(), last, golden, alternate)
    }

    fn check_dimensions(&self, raster: &Raster) -> Result<()> {
        if raster.display_width() != self.width() as usize
            || raster.display_height() != self.height() as usize
        {
            return Err(CodecError::unsupported("scaling is not supported"));
        }
        Ok(())
    }

    /// Encode one raster at a fixed quantizer. The first frame of a session
    /// is a key frame; every later one is an inter frame.
    pub fn encode_with_quantizer(&mut self, raster: &Raster, y_ac_qi: u8) -> Result<Vec<u8>> {
        self.check_dimensions(raster)?;

        let quant_indices = QuantIndices {
            y_ac_qi,
            ..QuantIndices::default()
        };

        let key_frame = !self.has_state;
        let (frame, _) = self.encode_raster(raster, &quant_indices, key_frame, PassOptions::full())?;
        self.has_state = true;
        self.write_frame(&frame)
    }

    /// Binary-search the quantizer for the cheapest frame meeting a minimum
    /// SSIM against the source.
    pub fn encode_with_minimum_ssim(&mut self, raster: &Raster, minimum_ssim: f64) -> Result<Vec<u8>> {
        self.check_dimensions(raster)?;
        let key_frame = !self.has_state;

        let mut low = 0i32;
        let mut high = 127i32;
        let mut best: Option<u8> = None;

        while low <= high {
            let candidate = ((low + high) / 2) as u8;
            let quant_indices = QuantIndices {
                y_ac_qi: candidate,
                ..QuantIndices::default()
            };
            let (_, ssim) =
                self.encode_raster(raster, &quant_indices, key_frame, PassOptions::full())?;
            let ssim = ssim.unwrap_or(0.0);

            if ssim >= minimum_ssim || (low == high && best.is_none()) {
                best = Some(candidate);
            }
            if low == high {
                break;
            }
            if ssim < minimum_ssim {
                high = candidate as i32 - 1;
            } else {
                low = candidate as i32 + 1;
            }
        }

        let chosen = best.unwrap_or(0);
        trace!(quantizer = chosen, "minimum-SSIM search settled");
        self.encode_with_quantizer(raster, chosen)
    }

    /// Best quality not exceeding `target_size` bytes, using the fast
    /// quarter-scale size estimate.
    pub fn encode_with_target_size(&mut self, raster: &Raster, target_size: usize) -> Result<Vec<u8>> {
        self.check_dimensions(raster)?;

        let mut low = 4i32;
        let mut high = 127i32;
        if let Some(last) = self.last_y_ac_qi {
            let radius = 16;
            low = low.max(last as i32 - radius);
            high = high.min(last as i32 + radius);
        }

        let mut best: Option<u8> = None;
        while low <= high {
            let candidate = ((low + high) / 2) as u8;
            let estimated = self.estimate_frame_size(raster, candidate)?;

            if estimated <= target_size || (low == high && best.is_none()) {
                best = Some(candidate);
                high = candidate as i32 - 1;
            } else {
                low = candidate as i32 + 1;
            }
        }

        self.encode_with_quantizer(raster, best.unwrap_or(127))
    }

    /// libvpx rd multipliers: rate weight grows with the square of the AC
    /// quantizer, flipping to distortion-dominant at high rates.
    fn update_rd_multipliers(&mut self, quantizer: &Quantizer) {
        let q_ac = (quantizer.y_ac as f64).min(160.0);
        let mut rate_multiplier = (q_ac * q_ac * 2.80) as u32;

        if rate_multiplier > 1000 {
            self.distortion_multiplier = 1;
            rate_multiplier /= 100;
        } else {
            self.distortion_multiplier = 100;
        }
        self.rate_multiplier = rate_multiplier.max(1);
    }

    pub(crate) fn rdcost(&self, rate: u32, distortion: u32) -> u32 {
        (128 + rate.saturating_mul(self.rate_multiplier)) / 256
            + distortion.saturating_mul(self.distortion_multiplier)
    }

    /// The state in effect while reconstructing a frame this encoder
    /// emits: emitted headers never carry segmentation, so a decoder
    /// applying them has none.
    pub(crate) fn encode_state(&self) -> DecoderState {
        let mut state = self.state.clone();
        state.segmentation = None;
        state
    }

    fn initial_header(&self, key_frame: bool, quant_indices: &QuantIndices) -> FrameHeader {
        FrameHeader {
            quant_indices: *quant_indices,
            refresh_entropy_probs: false,
            prob_skip_false: Some(128),
            loop_filter_level: self.loop_filter_level.unwrap_or(16),
            inter: (!key_frame).then(InterHeaderFields::default),
            ..FrameHeader::default()
        }
    }

    /// Encode one raster into a frame structure, returning the SSIM of the
    /// final reconstruction when the loop-filter search ran.
    fn encode_raster(
        &mut self,
        raster: &Raster,
        quant_indices: &QuantIndices,
        key_frame: bool,
        options: PassOptions,
    ) -> Result<(Frame, Option<f64>)> {
        let quantizer = Quantizer::new(quant_indices);
        self.update_rd_multipliers(&quantizer);

        let mut frame = Frame::new(
            self.initial_header(key_frame, quant_indices),
            self.width(),
            self.height(),
        );

        let mut recon = self.pool.take_sized(self.width(), self.height())?;
        let recon_state = self.encode_state();
        let mut mv_counts = [[(0u32, 0u32); crate::consts::MV_PROB_CNT]; 2];

        let mode_costs = if key_frame {
            intra::IntraModeCosts {
                y_modes: tree_cost_table::<5>(&KF_Y_MODE_TREE, &KF_Y_MODE_PROBS),
                uv_modes: tree_cost_table::<4>(&UV_MODE_TREE, &KF_UV_MODE_PROBS),
                key_frame: true,
            }
        } else {
            intra::IntraModeCosts {
                y_modes: tree_cost_table::<5>(
                    &Y_MODE_TREE,
                    &self.state.probability_tables.y_mode_probs,
                ),
                uv_modes: tree_cost_table::<4>(
                    &UV_MODE_TREE,
                    &self.state.probability_tables.uv_mode_probs,
                ),
                key_frame: false,
            }
        };

        for mb_row in 0..frame.macroblocks.rows() {
            for mb_column in 0..frame.macroblocks.columns() {
                self.encode_macroblock(
                    &mut frame,
                    raster,
                    &mut recon,
                    &recon_state,
                    &quantizer,
                    &mode_costs,
                    key_frame,
                    mb_column,
                    mb_row,
                    &mut mv_counts,
                )?;
            }
        }

        if options.optimize_probabilities {
            self.optimize_probability_tables(&mut frame)?;
        }

        if self.two_pass {
            trellis::requantize_frame(self, &mut frame, raster, &quantizer)?;
            reconstruct_frame(
                &frame,
                &recon_state,
                &self.references,
                ReconstructionFilter::Bicubic,
                &mut recon,
            )?;
        }

        self.optimize_prob_skip(&mut frame);
        if !key_frame {
            self.optimize_interframe_probs(&mut frame);
            if options.optimize_probabilities {
                self.optimize_mv_probs(&mut frame, &mv_counts);
            }
        }

        let ssim = if options.search_loop_filter {
            Some(self.search_loop_filter(raster, &mut recon, &mut frame)?)
        } else {
            frame.header.loop_filter_level = 0;
            None
        };

        self.stats.ssim = ssim;
        Ok((frame, ssim))
    }

    /// Search one macroblock's prediction mode, quantize its residuals and
    /// reconstruct it in place.
    #[allow(clippy::too_many_arguments)]
    fn encode_macroblock(
        &mut self,
        frame: &mut Frame,
        original: &Raster,
        recon: &mut Raster,
        recon_state: &DecoderState,
        quantizer: &Quantizer,
        mode_costs: &intra::IntraModeCosts,
        key_frame: bool,
        mb_column: usize,
        mb_row: usize,
        mv_counts: &mut [[(u32, u32); crate::consts::MV_PROB_CNT]; 2],
    ) -> Result<()> {
        let x0 = mb_column * 16;
        let y0 = mb_row * 16;
        let cx0 = mb_column * 8;
        let cy0 = mb_row * 8;

        // neighbor 4x4 modes for key-frame contextual costs
        let (above_b, left_b) = intra::neighbor_b_modes(&frame.macroblocks, mb_column, mb_row);

        let allow_b_pred = key_frame || self.quality == EncoderQuality::Best;
        let mut mb = std::mem::take(frame.macroblocks.at_mut(mb_column, mb_row));
        mb.skip_coeff = Some(false);
        mb.segment_id = None;
        mb.segment = 0;

        let luma = intra::pick_luma_intra(
            self,
            original,
            recon,
            &mut mb,
            mb_column,
            mb_row,
            quantizer,
            mode_costs,
            above_b,
            left_b,
            allow_b_pred,
        );

        let inter_choice = if key_frame {
            None
        } else {
            inter::pick_inter(
                self,
                &frame.macroblocks,
                original,
                frame.header.quant_indices.y_ac_qi,
                mb_column,
                mb_row,
            )
        };

        let use_inter = inter_choice
            .as_ref()
            .map(|choice| choice.cost < luma.cost)
            .unwrap_or(false);

        if use_inter {
            let choice = inter_choice.expect("checked above");
            inter::apply_inter_prediction(
                self,
                &choice,
                original,
                recon,
                &mut mb,
                quantizer,
                mb_column,
                mb_row,
            )?;

            // motion-vector branch statistics for the header optimization
            if choice.mode == InterMode::New {
                let delta = choice.mv - choice.census_best;
                count_mv_component(delta.y, 0, mv_counts);
                count_mv_component(delta.x, 1, mv_counts);
            } else if let (InterMode::Split, Some(split)) = (choice.mode, &choice.split) {
                for (index, &mode) in split.sub_modes.iter().enumerate() {
                    if mode == SubMvMode::New {
                        let delta = split.sub_mvs[index] - choice.census_best;
                        count_mv_component(delta.y, 0, mv_counts);
                        count_mv_component(delta.x, 1, mv_counts);
                    }
                }
            }
        } else {
            // winner prediction back into the reconstruction, then residuals
            if luma.y_mode != crate::predict::intra::YMode::B {
                crate::predict::intra::predict_luma_16x16(&mut recon.y, x0, y0, luma.y_mode);
                compute_luma_residuals(&mut mb, &original.y, &recon.y, x0, y0, quantizer, true);
            }
            mb.kind = MbKind::Intra {
                y_mode: luma.y_mode,
                b_modes: luma.b_modes,
                uv_mode: crate::predict::intra::UvMode::Dc, // refined below
            };

            let uv_mode = intra::pick_chroma_intra(self, original, recon, cx0, cy0, mode_costs);
            crate::predict::intra::predict_chroma_8x8(&mut recon.u, cx0, cy0, uv_mode);
            crate::predict::intra::predict_chroma_8x8(&mut recon.v, cx0, cy0, uv_mode);
            if let MbKind::Intra { uv_mode: slot, .. } = &mut mb.kind {
                *slot = uv_mode;
            }
        }

        compute_chroma_residuals(&mut mb, original, recon, cx0, cy0, quantizer);
        mb.calculate_has_nonzero();
        *frame.macroblocks.at_mut(mb_column, mb_row) = mb;

        reconstruct_macroblock(
            frame,
            recon_state,
            &self.references,
            ReconstructionFilter::Bicubic,
            recon,
            mb_column,
            mb_row,
        )?;
        Ok(())
    }

    /// Derive `prob_skip_false` from the actual share of coded macroblocks.
    fn optimize_prob_skip(&self, frame: &mut Frame) {
        let mut no_skip = 0u32;
        let mut total = 0u32;
        for row in 0..frame.macroblocks.rows() {
            for column in 0..frame.macroblocks.columns() {
                no_skip += frame.macroblocks.at(column, row).has_nonzero as u32;
                total += 1;
            }
        }
        frame.header.prob_skip_false = Some(calc_prob_or(no_skip, total, 128));
    }

    /// Emit coefficient-probability updates where the collected branch
    /// counts disagree with the current tables.
    fn optimize_probability_tables(&self, frame: &mut Frame) -> Result<()> {
        let counts = frame.token_branch_counts()?;
        let baseline = &self.state.probability_tables.coeff_probs;

        for i in 0..crate::consts::BLOCK_TYPES {
            for j in 0..crate::consts::COEF_BANDS {
                for k in 0..crate::consts::PREV_COEF_CONTEXTS {
                    for l in 0..crate::consts::ENTROPY_NODES {
                        let (false_count, true_count) = counts[i][j][k][l];
                        let prob = calc_prob(false_count, false_count + true_count);
                        let current = if frame.is_key_frame() {
                            crate::consts::DEFAULT_COEFF_PROBS[i][j][k][l]
                        } else {
                            baseline[i][j][k][l]
                        };
                        if prob > 0 && prob != current {
                            frame.header.token_prob_update.0[i][j][k][l] = Some(prob);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Mode-choice probabilities from the frame's actual decisions.
    fn optimize_interframe_probs(&self, frame: &mut Frame) {
        let mut intra = 0u32;
        let mut last = 0u32;
        let mut golden = 0u32;
        let mut alternate = 0u32;

        for row in 0..frame.macroblocks.rows() {
            for column in 0..frame.macroblocks.columns() {
                match frame.macroblocks.at(column, row).reference() {
                    None => intra += 1,
                    Some(Reference::Last) => last += 1,
                    Some(Reference::Golden) => golden += 1,
                    Some(Reference::Alternate) => alternate += 1,
                }
            }
        }

        let total = intra + last + golden + alternate;
        if let Some(fields) = frame.header.inter.as_mut() {
            fields.prob_inter = calc_prob_or(intra, total, 128);
            fields.prob_references_last = calc_prob_or(last, total - intra, 128);
            fields.prob_references_golden = calc_prob_or(golden, golden + alternate, 128);
        }
    }

    /// Motion-vector probability updates from component branch counts.
    fn optimize_mv_probs(
        &self,
        frame: &mut Frame,
        counts: &[[(u32, u32); crate::consts::MV_PROB_CNT]; 2],
    ) {
        let Some(fields) = frame.header.inter.as_mut() else {
            return;
        };
        for (component, rows) in counts.iter().enumerate() {
            for (node, &(false_count, true_count)) in rows.iter().enumerate() {
                let total = false_count + true_count;
                if total == 0 {
                    continue;
                }
                let prob = calc_prob(false_count, total);
                // wire probabilities are doubled 7-bit values; zero means one
                let representable = if prob < 2 { 1 } else { prob & !1 };
                let current = self.state.probability_tables.motion_vector_probs[component][node];
                if representable != current {
                    fields.mv_prob_update[component][node] = Some(representable >> 1);
                }
            }
        }
    }

    /// Pick the loop-filter level by hill-climbing SSIM against the source,
    /// then filter the reconstruction in place.
    fn search_loop_filter(
        &mut self,
        original: &Raster,
        recon: &mut Raster,
        frame: &mut Frame,
    ) -> Result<f64> {
        frame.header.mode_lf_adjustments = Some(Some(ModeRefLfDeltaUpdate {
            ref_update: [Some(0); 4],
            mode_update: [Some(0); 4],
        }));

        // the state a decoder will hold while filtering this frame
        let mut filter_state = self.state.clone();
        filter_state.apply_frame(frame)?;

        let (min_level, max_level) = match self.loop_filter_level {
            Some(previous) => (previous.saturating_sub(1), (previous + 1).min(63)),
            None => (0, 63),
        };

        let mut best_level = 0u8;
        let mut best_ssim = -1.0f64;
        let mut scratch = self.pool.take_sized(self.width(), self.height())?;

        for level in min_level..=max_level {
            scratch.y.copy_from(&recon.y)?;
            scratch.u.copy_from(&recon.u)?;
            scratch.v.copy_from(&recon.v)?;

            frame.header.loop_filter_level = level;
            filter_frame(frame, &filter_state, &mut scratch);

            let ssim = salsify_metrics::raster_ssim(original, &scratch)
                .map_err(|e| CodecError::internal("loop filter search", e.to_string()))?;
            if ssim > best_ssim {
                best_ssim = ssim;
                best_level = level;
            } else {
                break;
            }
        }

        frame.header.loop_filter_level = best_level;
        filter_frame(frame, &filter_state, recon);
        Ok(best_ssim)
    }

    /// Serialize the frame and fold it into this encoder's decode state,
    /// exactly as a receiver would.
    fn write_frame(&mut self, frame: &Frame) -> Result<Vec<u8>> {
        let bytes = frame.serialize(&self.state.probability_tables)?;

        self.state.apply_frame(frame)?;
        let mut raster = self.pool.take_sized(self.width(), self.height())?;
        reconstruct_frame(
            frame,
            &self.state,
            &self.references,
            ReconstructionFilter::Bicubic,
            &mut raster,
        )?;
        filter_frame(frame, &self.state, &mut raster);
        self.references.apply_updates(frame, &Arc::new(raster));

        if self.quality == EncoderQuality::Realtime {
            self.loop_filter_level = Some(frame.header.loop_filter_level);
            self.last_y_ac_qi = Some(frame.header.quant_indices.y_ac_qi);
        }

        debug!(
            bytes = bytes.len(),
            key = frame.is_key_frame(),
            minihash = format_args!("{:08x}", self.minihash()),
            "frame written"
        );
        Ok(bytes)
    }
}

/// `prob = false_count / total` in 256ths, clamped to the valid range;
/// zero when nothing was counted.
pub(crate) fn calc_prob(false_count: u32, total: u32) -> u8 {
    if total == 0 {
        0
    } else {
        ((false_count as u64 * 256 + total as u64 / 2) / total as u64).clamp(1, 255) as u8
    }
}

fn calc_prob_or(false_count: u32, total: u32, default: u8) -> u8 {
    if total == 0 {
        default
    } else {
        calc_prob(false_count, total)
    }
}

/// 4x4 residual between the source and the prediction currently stored in
/// the reconstruction plane.
pub(crate) fn residual_4x4(original: &Plane, prediction: &Plane, x0: usize, y0: usize) -> [i16; 16] {
    let mut out = [0i16; 16];
    for row in 0..4 {
        for column in 0..4 {
            out[row * 4 + column] = original.at(x0 + column, y0 + row) as i16
                - prediction.at(x0 + column, y0 + row) as i16;
        }
    }
    out
}

pub(crate) fn quantize_coefficients(raw: &[i16; 16], dc: i16, ac: i16) -> [i16; 16] {
    let mut out = [0i16; 16];
    out[0] = raw[0] / dc;
    for (slot, &coefficient) in out.iter_mut().zip(raw.iter()).skip(1) {
        *slot = coefficient / ac;
    }
    out
}

/// Transform and quantize the sixteen luma residuals; `with_y2` extracts
/// the DC terms into the second-order block first.
pub(crate) fn compute_luma_residuals_with(
    mb: &mut crate::macroblock::MacroblockInfo,
    original: &Plane,
    prediction: &Plane,
    x0: usize,
    y0: usize,
    quantizer: &Quantizer,
    with_y2: bool,
    requantizer: &trellis::Requantizer,
) {
    let mut dc_values = [0i16; 16];
    let first_index = if with_y2 { 1 } else { 0 };
    for index in 0..16 {
        let sb_x = x0 + (index % 4) * 4;
        let sb_y = y0 + (index / 4) * 4;
        let residual = residual_4x4(original, prediction, sb_x, sb_y);
        let mut coefficients = forward_dct(&residual);
        if with_y2 {
            dc_values[index] = coefficients[0];
            coefficients[0] = 0;
        }
        mb.y[index].coefficients =
            requantizer.quantize(&coefficients, quantizer.y_dc, quantizer.y_ac, first_index);
    }

    if with_y2 {
        let second_order = forward_walsh(&dc_values);
        mb.y2.coefficients =
            requantizer.quantize(&second_order, quantizer.y2_dc, quantizer.y2_ac, 0);
    }
}

pub(crate) fn compute_luma_residuals(
    mb: &mut crate::macroblock::MacroblockInfo,
    original: &Plane,
    prediction: &Plane,
    x0: usize,
    y0: usize,
    quantizer: &Quantizer,
    with_y2: bool,
) {
    compute_luma_residuals_with(
        mb,
        original,
        prediction,
        x0,
        y0,
        quantizer,
        with_y2,
        &trellis::Requantizer::Plain,
    );
}

pub(crate) fn compute_chroma_residuals_with(
    mb: &mut crate::macroblock::MacroblockInfo,
    original: &Raster,
    prediction: &Raster,
    cx0: usize,
    cy0: usize,
    quantizer: &Quantizer,
    requantizer: &trellis::Requantizer,
) {
    for index in 0..4 {
        let sb_x = cx0 + (index % 2) * 4;
        let sb_y = cy0 + (index / 2) * 4;

        let residual = residual_4x4(&original.u, &prediction.u, sb_x, sb_y);
        mb.u[index].coefficients =
            requantizer.quantize(&forward_dct(&residual), quantizer.uv_dc, quantizer.uv_ac, 0);

        let residual = residual_4x4(&original.v, &prediction.v, sb_x, sb_y);
        mb.v[index].coefficients =
            requantizer.quantize(&forward_dct(&residual), quantizer.uv_dc, quantizer.uv_ac, 0);
    }
}

pub(crate) fn compute_chroma_residuals(
    mb: &mut crate::macroblock::MacroblockInfo,
    original: &Raster,
    prediction: &Raster,
    cx0: usize,
    cy0: usize,
    quantizer: &Quantizer,
) {
    compute_chroma_residuals_with(
        mb,
        original,
        prediction,
        cx0,
        cy0,
        quantizer,
        &trellis::Requantizer::Plain,
    );
}

/// Count the branch decisions one motion-vector component would produce,
/// mirroring its wire coding.
fn count_mv_component(
    component: i16,
    component_index: usize,
    counts: &mut [[(u32, u32); crate::consts::MV_PROB_CNT]; 2],
) {
    use crate::consts::{MVP_BITS, MVP_IS_SHORT, MVP_SIGN, MVP_SHORT, MV_LONG_WIDTH};

    let halved = component >> 1;
    let x = halved.unsigned_abs();
    let row = &mut counts[component_index];

    let mut bump = |node: usize, bit: bool| {
        if bit {
            row[node].1 += 1;
        } else {
            row[node].0 += 1;
        }
    };

    if x < 8 {
        bump(MVP_IS_SHORT, false);
        if let Some(path) = crate::bool_coder::tree_path(&crate::consts::SMALL_MV_TREE, 0, x as u8)
        {
            for (node, bit) in path {
                bump(MVP_SHORT + (node >> 1), bit);
            }
        }
    } else {
        bump(MVP_IS_SHORT, true);
        for i in 0..3 {
            bump(MVP_BITS + i, (x >> i) & 1 != 0);
        }
        for i in (4..MV_LONG_WIDTH).rev() {
            bump(MVP_BITS + i, (x >> i) & 1 != 0);
        }
        if x & 0xfff0 != 0 {
            bump(MVP_BITS + 3, (x >> 3) & 1 != 0);
        }
    }

    if x != 0 {
        bump(MVP_SIGN, halved < 0);
    }
}
