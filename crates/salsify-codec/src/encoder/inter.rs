//! Inter mode search: the motion-vector census candidates, the diamond
//! search for NEWMV, and the SPLITMV quadrant refinement.

use salsify_core::Raster;

use crate::chunk::ReconstructionFilter;
use crate::consts::MV_REF_TREE;
use crate::encoder::costs::{mv_cost, sad_mv_cost, tree_cost_table, SAD_PER_BIT_LUT};
use crate::encoder::distortion::{sad, sse, variance};
use crate::encoder::{compute_luma_residuals, Encoder, EncoderQuality};
use crate::macroblock::{
    clamp_mv, motion_vector_census, Census, InterMode, MacroblockGrid, MacroblockInfo, MbKind,
    Reference, SubMvMode,
};
use crate::mv::MotionVector;
use crate::predict::inter::{chroma_mv, predict_block, store_block};
use crate::quantizer::Quantizer;

/// The chosen SPLITMV layout.
pub(crate) struct SplitDecision {
    pub scheme: u8,
    pub sub_modes: [SubMvMode; 16],
    pub sub_mvs: [MotionVector; 16],
}

pub(crate) struct InterDecision {
    pub mode: InterMode,
    pub mv: MotionVector,
    pub cost: u32,
    pub census_best: MotionVector,
    pub split: Option<SplitDecision>,
}

fn out_of_bounds(mv: MotionVector) -> bool {
    mv.x.abs() > 1023 || mv.y.abs() > 1023
}

struct SearchContext<'a> {
    original: &'a Raster,
    reference: &'a Raster,
    mb_column: usize,
    mb_row: usize,
    columns: usize,
    rows: usize,
    sad_per_bit: u32,
}

/// One round of the five-point diamond: probe the center and the four
/// axis neighbors at `step_size`, halving until the step collapses.
/// Returns the best offset and the step to resume an outer iteration at.
#[allow(clippy::too_many_arguments)]
fn diamond_search(
    encoder: &Encoder,
    ctx: &SearchContext,
    base_mv: MotionVector,
    mut origin: MotionVector,
    mut step_size: i32,
    block: (usize, usize, usize, usize), // x0, y0, width, height
) -> (MotionVector, i32) {
    const CHECK_SITES: [(i16, i16); 5] = [(-1, 0), (0, -1), (0, 0), (0, 1), (1, 0)];

    let (x0, y0, width, height) = block;
    let mut first_step = step_size / 2;
    let mut prediction = vec![0u8; width * height];

    let base_mv = clamp_mv(base_mv, ctx.mb_column, ctx.mb_row, ctx.columns, ctx.rows);

    while step_size > 1 {
        let mut best_cost = u32::MAX;
        let mut best_offset = origin;

        for (site_x, site_y) in CHECK_SITES {
            let offset = origin
                + MotionVector::new(site_x * step_size as i16, site_y * step_size as i16);
            if out_of_bounds(offset) {
                continue;
            }

            let candidate = clamp_mv(
                offset + base_mv,
                ctx.mb_column,
                ctx.mb_row,
                ctx.columns,
                ctx.rows,
            );
            predict_block(
                &ctx.reference.y,
                x0,
                y0,
                width,
                height,
                candidate,
                ReconstructionFilter::Bicubic,
                &mut prediction,
            );
            let distortion = sad(&ctx.original.y, x0, y0, width, height, &prediction);
            let rate = sad_mv_cost(
                offset,
                MotionVector::default(),
                &encoder.state.probability_tables.motion_vector_probs,
                ctx.sad_per_bit,
            );
            let cost = rate + distortion;

            if cost < best_cost {
                best_cost = cost;
                best_offset = offset;
            }
        }

        if best_offset == origin {
            first_step = step_size / 2;
        }
        origin = best_offset;
        step_size /= 2;
    }

    (origin, first_step)
}

/// Full NEWMV search: repeated diamond rounds resuming at the recorded
/// first step, against the clamped census best vector.
fn search_new_mv(
    encoder: &Encoder,
    ctx: &SearchContext,
    census_best: MotionVector,
    block: (usize, usize, usize, usize),
) -> MotionVector {
    let mut mv = MotionVector::default();
    let mut step = 512;
    while step > 1 {
        let (result, first_step) = diamond_search(encoder, ctx, census_best, mv, step, block);
        if result == mv {
            break;
        }
        mv = result;
        step = first_step;
    }
    mv + census_best
}

/// Evaluate the inter candidates for one macroblock. The LAST reference
/// carries the motion search, as in the realtime pipeline.
pub(crate) fn pick_inter(
    encoder: &Encoder,
    grid: &MacroblockGrid,
    original: &Raster,
    y_ac_qi: u8,
    mb_column: usize,
    mb_row: usize,
) -> Option<InterDecision> {
    let reference = Reference::Last;
    let census: Census = motion_vector_census(
        grid,
        mb_column,
        mb_row,
        reference,
        crate::macroblock::SignBias::default(),
    );
    let mode_probs = census.mode_probs();
    let mode_costs = tree_cost_table::<5>(&MV_REF_TREE, &mode_probs);

    let y_ac_qi = y_ac_qi as usize;
    let ctx = SearchContext {
        original,
        reference: encoder.references.get(reference),
        mb_column,
        mb_row,
        columns: grid.columns(),
        rows: grid.rows(),
        sad_per_bit: SAD_PER_BIT_LUT[y_ac_qi.min(127)],
    };

    let x0 = mb_column * 16;
    let y0 = mb_row * 16;
    let mut prediction = [0u8; 16 * 16];
    let mut best: Option<InterDecision> = None;

    let mut consider = |decision: InterDecision| {
        if best.as_ref().map(|b| decision.cost < b.cost).unwrap_or(true) {
            best = Some(decision);
        }
    };

    for mode in [
        InterMode::Zero,
        InterMode::Nearest,
        InterMode::Near,
        InterMode::New,
    ] {
        let mv = match mode {
            InterMode::Zero => MotionVector::default(),
            InterMode::Nearest => census.nearest,
            InterMode::Near => census.near,
            InterMode::New => {
                // realtime only samples the motion grid sparsely
                if encoder.quality == EncoderQuality::Realtime
                    && !(mb_column % 4 == 0 && mb_row % 4 == 0)
                {
                    continue;
                }
                let mv = search_new_mv(encoder, &ctx, census.best, (x0, y0, 16, 16));
                if mv.is_zero() {
                    continue;
                }
                mv
            }
            InterMode::Split => unreachable!("Split is not produced by this search loop"),
        };

        // NEAREST/NEAR degenerate to ZEROMV when the census has nothing
        if matches!(mode, InterMode::Nearest | InterMode::Near) && mv.is_zero() {
            continue;
        }

        predict_block(
            &ctx.reference.y,
            x0,
            y0,
            16,
            16,
            mv,
            ReconstructionFilter::Bicubic,
            &mut prediction,
        );
        let distortion = variance(&original.y, x0, y0, 16, 16, &prediction);
        let mut rate = mode_costs[mode as usize];
        if mode == InterMode::New {
            rate += mv_cost(
                mv,
                census.best,
                &encoder.state.probability_tables.motion_vector_probs,
            );
        }
        consider(InterDecision {
            mode,
            mv,
            cost: encoder.rdcost(rate, distortion),
            census_best: census.best,
            split: None,
        });
    }

    if encoder.quality == EncoderQuality::Best {
        consider(split_search(encoder, &ctx, &census, &mode_costs, x0, y0));
    }

    best
}

/// SPLITMV candidate: a diamond search per 8x8 quadrant.
fn split_search(
    encoder: &Encoder,
    ctx: &SearchContext,
    census: &Census,
    mode_costs: &[u32; 5],
    x0: usize,
    y0: usize,
) -> InterDecision {
    let mut sub_mvs = [MotionVector::default(); 16];
    let mut rate = mode_costs[InterMode::Split as usize];
    let mut distortion = 0u32;
    let mut prediction = [0u8; 8 * 8];

    for quadrant in 0..4 {
        let qx = x0 + (quadrant % 2) * 8;
        let qy = y0 + (quadrant / 2) * 8;
        let mv = search_new_mv(encoder, ctx, census.best, (qx, qy, 8, 8));

        predict_block(
            &ctx.reference.y,
            qx,
            qy,
            8,
            8,
            mv,
            ReconstructionFilter::Bicubic,
            &mut prediction,
        );
        distortion += sse(&ctx.original.y, qx, qy, 8, 8, &prediction);
        rate += mv_cost(
            mv,
            census.best,
            &encoder.state.probability_tables.motion_vector_probs,
        );

        // quadrant (qi, qj) covers luma subblocks (2qi+dx, 2qj+dy)
        let base_column = (quadrant % 2) * 2;
        let base_row = (quadrant / 2) * 2;
        for dy in 0..2 {
            for dx in 0..2 {
                sub_mvs[(base_row + dy) * 4 + base_column + dx] = mv;
            }
        }
    }

    InterDecision {
        mode: InterMode::Split,
        mv: sub_mvs[15],
        cost: encoder.rdcost(rate, distortion),
        census_best: census.best,
        split: Some(SplitDecision {
            scheme: 2, // quadrants
            sub_modes: [SubMvMode::New; 16],
            sub_mvs,
        }),
    }
}

/// Write an inter prediction (luma and chroma) into the reconstruction
/// planes. `split` selects the per-subblock path with averaged chroma
/// vectors.
pub(crate) fn write_inter_prediction(
    reference_raster: &Raster,
    mv: MotionVector,
    sub_mvs: &[MotionVector; 16],
    split: bool,
    recon: &mut Raster,
    mb_column: usize,
    mb_row: usize,
) {
    let x0 = mb_column * 16;
    let y0 = mb_row * 16;
    let cx0 = mb_column * 8;
    let cy0 = mb_row * 8;

    if !split {
        let mut prediction = [0u8; 16 * 16];
        predict_block(
            &reference_raster.y,
            x0,
            y0,
            16,
            16,
            mv,
            ReconstructionFilter::Bicubic,
            &mut prediction,
        );
        store_block(&mut recon.y, x0, y0, 16, 16, &prediction);

        let uv_mv = chroma_mv([mv; 4]);
        let mut chroma = [0u8; 8 * 8];
        predict_block(
            &reference_raster.u,
            cx0,
            cy0,
            8,
            8,
            uv_mv,
            ReconstructionFilter::Bicubic,
            &mut chroma,
        );
        store_block(&mut recon.u, cx0, cy0, 8, 8, &chroma);
        predict_block(
            &reference_raster.v,
            cx0,
            cy0,
            8,
            8,
            uv_mv,
            ReconstructionFilter::Bicubic,
            &mut chroma,
        );
        store_block(&mut recon.v, cx0, cy0, 8, 8, &chroma);
        return;
    }

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
            ReconstructionFilter::Bicubic,
            &mut prediction,
        );
        store_block(&mut recon.y, sb_x, sb_y, 4, 4, &prediction);
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
        let uv_mv = chroma_mv(group);
        let sb_x = cx0 + ci * 4;
        let sb_y = cy0 + cj * 4;
        predict_block(
            &reference_raster.u,
            sb_x,
            sb_y,
            4,
            4,
            uv_mv,
            ReconstructionFilter::Bicubic,
            &mut prediction,
        );
        store_block(&mut recon.u, sb_x, sb_y, 4, 4, &prediction);
        predict_block(
            &reference_raster.v,
            sb_x,
            sb_y,
            4,
            4,
            uv_mv,
            ReconstructionFilter::Bicubic,
            &mut prediction,
        );
        store_block(&mut recon.v, sb_x, sb_y, 4, 4, &prediction);
    }
}

/// Write the chosen inter prediction into the reconstruction and quantize
/// the residuals against it.
#[allow(clippy::too_many_arguments)]
pub(crate) fn apply_inter_prediction(
    encoder: &Encoder,
    decision: &InterDecision,
    original: &Raster,
    recon: &mut Raster,
    mb: &mut MacroblockInfo,
    quantizer: &Quantizer,
    mb_column: usize,
    mb_row: usize,
) -> crate::error::Result<()> {
    let reference = Reference::Last;
    let reference_raster = encoder.references.get(reference);
    let x0 = mb_column * 16;
    let y0 = mb_row * 16;

    let (sub_modes, sub_mvs, partition) = match &decision.split {
        Some(split) => (split.sub_modes, split.sub_mvs, Some(split.scheme)),
        None => ([SubMvMode::New; 16], [decision.mv; 16], None),
    };

    write_inter_prediction(
        reference_raster,
        decision.mv,
        &sub_mvs,
        partition.is_some(),
        recon,
        mb_column,
        mb_row,
    );

    compute_luma_residuals(
        mb,
        &original.y,
        &recon.y,
        x0,
        y0,
        quantizer,
        partition.is_none(),
    );

    mb.kind = MbKind::Inter {
        mode: decision.mode,
        reference,
        mv: decision.mv,
        partition,
        sub_modes,
        sub_mvs,
    };
    Ok(())
}
