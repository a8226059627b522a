//! Coefficient token coding.
//!
//! Tokens walk the shared coefficient tree against probabilities selected by
//! (block class, band, neighbor context); categories carry extra magnitude
//! bits. The left/above nonzero flags that form the context are threaded
//! through `TokenContexts`, which both halves of the codec share so the
//! encoder's bits always re-parse to the same state.

use crate::bool_coder::{BoolDecoder, BoolEncoder};
use crate::consts::{
    BLOCK_TYPES, CAT1_BASE, CAT1_PROBS, CAT2_BASE, CAT2_PROBS, CAT3_BASE, CAT3_PROBS, CAT4_BASE,
    CAT4_PROBS, CAT5_BASE, CAT5_PROBS, CAT6_BASE, CAT6_PROBS, CAT6_TOKEN, COEFFICIENT_TO_BAND,
    COEF_BANDS, DCT_EOB_TOKEN, ENTROPY_NODES, FOUR_TOKEN, ONE_TOKEN, PREV_COEF_CONTEXTS,
    THREE_TOKEN, TOKEN_TREE, TWO_TOKEN, ZERO_TOKEN, ZIGZAG,
};
use crate::error::{CodecError, Result};
use crate::macroblock::{CoeffBlock, MacroblockInfo};
use crate::probability::CoeffProbs;

/// Coefficient block classes, in probability-table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockClass {
    YAfterY2 = 0,
    Y2 = 1,
    Chroma = 2,
    YWithoutY2 = 3,
}

impl BlockClass {
    pub fn first_index(self) -> usize {
        match self {
            BlockClass::YAfterY2 => 1,
            _ => 0,
        }
    }
}

/// Per-branch (false, true) counts collected during tokenization.
pub type TokenBranchCounts =
    Box<[[[[(u32, u32); ENTROPY_NODES]; PREV_COEF_CONTEXTS]; COEF_BANDS]; BLOCK_TYPES]>;

pub fn new_branch_counts() -> TokenBranchCounts {
    Box::new([[[[(0, 0); ENTROPY_NODES]; PREV_COEF_CONTEXTS]; COEF_BANDS]; BLOCK_TYPES])
}

fn category_probs(token: i8) -> &'static [u8] {
    match token {
        t if t == crate::consts::CAT1_TOKEN => &CAT1_PROBS,
        t if t == crate::consts::CAT2_TOKEN => &CAT2_PROBS,
        t if t == crate::consts::CAT3_TOKEN => &CAT3_PROBS,
        t if t == crate::consts::CAT4_TOKEN => &CAT4_PROBS,
        t if t == crate::consts::CAT5_TOKEN => &CAT5_PROBS,
        _ => &CAT6_PROBS,
    }
}

fn category_base(token: i8) -> u16 {
    match token {
        t if t == crate::consts::CAT1_TOKEN => CAT1_BASE,
        t if t == crate::consts::CAT2_TOKEN => CAT2_BASE,
        t if t == crate::consts::CAT3_TOKEN => CAT3_BASE,
        t if t == crate::consts::CAT4_TOKEN => CAT4_BASE,
        t if t == crate::consts::CAT5_TOKEN => CAT5_BASE,
        _ => CAT6_BASE,
    }
}

/// Token and its tree path for a coefficient magnitude.
fn token_for_magnitude(magnitude: u16) -> Result<i8> {
    Ok(match magnitude {
        0 => ZERO_TOKEN,
        1 => ONE_TOKEN,
        2 => TWO_TOKEN,
        3 => THREE_TOKEN,
        4 => FOUR_TOKEN,
        5..=6 => crate::consts::CAT1_TOKEN,
        7..=10 => crate::consts::CAT2_TOKEN,
        11..=18 => crate::consts::CAT3_TOKEN,
        19..=34 => crate::consts::CAT4_TOKEN,
        35..=66 => crate::consts::CAT5_TOKEN,
        67..=2048 => CAT6_TOKEN,
        _ => {
            return Err(CodecError::internal(
                "token encoder",
                format!("value too large: {magnitude}"),
            ))
        }
    })
}

/// Tree-node bits (node index, bit) that encode `token`. When the previous
/// token was a zero, the end-of-block branch is skipped.
fn token_path(token: i8, last_was_zero: bool) -> Vec<(usize, bool)> {
    let mut path = Vec::with_capacity(5);
    if !last_was_zero {
        if token == DCT_EOB_TOKEN {
            path.push((0, false));
            return path;
        }
        path.push((0, true));
    } else {
        debug_assert_ne!(token, DCT_EOB_TOKEN, "EOB cannot follow a zero token");
    }

    match token {
        t if t == ZERO_TOKEN => path.push((1, false)),
        t if t == ONE_TOKEN => {
            path.push((1, true));
            path.push((2, false));
        }
        t if t == TWO_TOKEN => {
            path.extend([(1, true), (2, true), (3, false), (4, false)]);
        }
        t if t == THREE_TOKEN => {
            path.extend([(1, true), (2, true), (3, false), (4, true), (5, false)]);
        }
        t if t == FOUR_TOKEN => {
            path.extend([(1, true), (2, true), (3, false), (4, true), (5, true)]);
        }
        t if t == crate::consts::CAT1_TOKEN => {
            path.extend([(1, true), (2, true), (3, true), (6, false), (7, false)]);
        }
        t if t == crate::consts::CAT2_TOKEN => {
            path.extend([(1, true), (2, true), (3, true), (6, false), (7, true)]);
        }
        t if t == crate::consts::CAT3_TOKEN => {
            path.extend([(1, true), (2, true), (3, true), (6, true), (8, false), (9, false)]);
        }
        t if t == crate::consts::CAT4_TOKEN => {
            path.extend([(1, true), (2, true), (3, true), (6, true), (8, false), (9, true)]);
        }
        t if t == crate::consts::CAT5_TOKEN => {
            path.extend([(1, true), (2, true), (3, true), (6, true), (8, true), (10, false)]);
        }
        _ => {
            path.extend([(1, true), (2, true), (3, true), (6, true), (8, true), (10, true)]);
        }
    }
    path
}

/// Decode one block's tokens; `context` is the left+above nonzero count.
pub fn decode_block(
    decoder: &mut BoolDecoder,
    class: BlockClass,
    probs: &CoeffProbs,
    context: u8,
) -> CoeffBlock {
    let mut block = CoeffBlock::default();
    let mut context = context as usize;
    let mut last_was_zero = false;

    let mut index = class.first_index();
    while index < 16 {
        let node_probs = &probs[class as usize][COEFFICIENT_TO_BAND[index]][context];
        let token =
            decoder.tree(&TOKEN_TREE, node_probs, if last_was_zero { 2 } else { 0 }) as i8;

        if token == DCT_EOB_TOKEN {
            break;
        }

        last_was_zero = token == ZERO_TOKEN;
        context = match token {
            t if t == ZERO_TOKEN => 0,
            t if t == ONE_TOKEN => 1,
            _ => 2,
        };

        if token != ZERO_TOKEN {
            let magnitude = if token <= FOUR_TOKEN {
                token as u16
            } else {
                let extra_probs = category_probs(token);
                let mut extra = 0u16;
                for &prob in extra_probs {
                    extra = (extra << 1) | decoder.get(prob) as u16;
                }
                category_base(token) + extra
            };
            let negative = decoder.bit();
            block.coefficients[ZIGZAG[index]] = if negative {
                -(magnitude as i16)
            } else {
                magnitude as i16
            };
            block.has_nonzero = true;
        }

        index += 1;
    }

    block
}

/// Number of tokens to code: position of the last nonzero coefficient plus
/// one, in decode order.
fn coded_length(block: &CoeffBlock, first_index: usize) -> usize {
    let mut length = 0;
    for index in first_index..16 {
        if block.coefficients[ZIGZAG[index]] != 0 {
            length = index + 1;
        }
    }
    length
}

/// Encode one block's tokens; exact inverse of `decode_block`.
pub fn encode_block(
    encoder: &mut BoolEncoder,
    block: &CoeffBlock,
    class: BlockClass,
    probs: &CoeffProbs,
    context: u8,
) -> Result<()> {
    let first_index = class.first_index();
    let length = coded_length(block, first_index);
    let mut context = context as usize;
    let mut last_was_zero = false;

    for index in first_index..length {
        let coefficient = block.coefficients[ZIGZAG[index]];
        let magnitude = coefficient.unsigned_abs();
        let token = token_for_magnitude(magnitude)?;
        let node_probs = &probs[class as usize][COEFFICIENT_TO_BAND[index]][context];

        for (node, bit) in token_path(token, last_was_zero) {
            encoder.put(bit, node_probs[node]);
        }

        if token != ZERO_TOKEN {
            if token > FOUR_TOKEN {
                let extra_probs = category_probs(token);
                let extra = magnitude - category_base(token);
                for (i, &prob) in extra_probs.iter().enumerate() {
                    encoder.put((extra >> (extra_probs.len() - 1 - i)) & 1 != 0, prob);
                }
            }
            encoder.put_bit(coefficient < 0);
        }

        last_was_zero = token == ZERO_TOKEN;
        context = match token {
            t if t == ZERO_TOKEN => 0,
            t if t == ONE_TOKEN => 1,
            _ => 2,
        };
    }

    debug_assert!(!last_was_zero, "trailing zeros are never coded");

    if length < 16 {
        let node_probs = &probs[class as usize][COEFFICIENT_TO_BAND[length.max(first_index)]][context];
        encoder.put(false, node_probs[0]);
    }
    Ok(())
}

/// Accumulate the tree-branch counts `encode_block` would produce.
pub fn count_block(
    block: &CoeffBlock,
    class: BlockClass,
    context: u8,
    counts: &mut TokenBranchCounts,
) -> Result<()> {
    let first_index = class.first_index();
    let length = coded_length(block, first_index);
    let mut context = context as usize;
    let mut last_was_zero = false;

    for index in first_index..length {
        let magnitude = block.coefficients[ZIGZAG[index]].unsigned_abs();
        let token = token_for_magnitude(magnitude)?;
        let band = COEFFICIENT_TO_BAND[index];

        for (node, bit) in token_path(token, last_was_zero) {
            let slot = &mut counts[class as usize][band][context][node];
            if bit {
                slot.1 += 1;
            } else {
                slot.0 += 1;
            }
        }

        last_was_zero = token == ZERO_TOKEN;
        context = match token {
            t if t == ZERO_TOKEN => 0,
            t if t == ONE_TOKEN => 1,
            _ => 2,
        };
    }

    if length < 16 {
        let band = COEFFICIENT_TO_BAND[length.max(first_index)];
        counts[class as usize][band][context][0].0 += 1;
    }
    Ok(())
}

/// Left/above nonzero context for one macroblock column.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenCtxPlanes {
    pub y: [bool; 4],
    pub u: [bool; 2],
    pub v: [bool; 2],
    pub y2: bool,
}

/// The running token-prediction contexts across a frame: one entry per
/// macroblock column above, plus the left edge of the current macroblock.
#[derive(Debug, Clone)]
pub struct TokenContexts {
    pub above: Vec<TokenCtxPlanes>,
    pub left: TokenCtxPlanes,
}

impl TokenContexts {
    pub fn new(columns: usize) -> Self {
        Self {
            above: vec![TokenCtxPlanes::default(); columns],
            left: TokenCtxPlanes::default(),
        }
    }

    pub fn start_row(&mut self) {
        self.left = TokenCtxPlanes::default();
    }
}

enum Pass<'a, 'b> {
    Decode(&'a mut BoolDecoder<'b>),
    Encode(&'a mut BoolEncoder),
    Count(&'a mut TokenBranchCounts),
}

/// Shared per-macroblock walk used by decode, encode and count passes, so
/// the context state machine cannot diverge between them.
fn walk_macroblock(
    pass: &mut Pass,
    mb: &mut MacroblockInfo,
    column: usize,
    contexts: &mut TokenContexts,
    probs: &CoeffProbs,
) -> Result<()> {
    let has_y2 = mb.has_y2();

    if mb.skip_coeff == Some(true) {
        if let Pass::Decode(_) = pass {
            mb.y2.zero_out();
            for block in mb.y.iter_mut() {
                block.zero_out();
            }
            for block in mb.u.iter_mut().chain(mb.v.iter_mut()) {
                block.zero_out();
            }
            mb.has_nonzero = false;
        }
        contexts.left.y = [false; 4];
        contexts.left.u = [false; 2];
        contexts.left.v = [false; 2];
        contexts.above[column].y = [false; 4];
        contexts.above[column].u = [false; 2];
        contexts.above[column].v = [false; 2];
        if has_y2 {
            contexts.left.y2 = false;
            contexts.above[column].y2 = false;
        }
        return Ok(());
    }

    let mut any_nonzero = false;

    if has_y2 {
        let context = contexts.left.y2 as u8 + contexts.above[column].y2 as u8;
        match pass {
            Pass::Decode(decoder) => {
                mb.y2 = decode_block(decoder, BlockClass::Y2, probs, context);
            }
            Pass::Encode(encoder) => {
                encode_block(encoder, &mb.y2, BlockClass::Y2, probs, context)?;
            }
            Pass::Count(counts) => {
                count_block(&mb.y2, BlockClass::Y2, context, counts)?;
            }
        }
        any_nonzero |= mb.y2.has_nonzero;
        contexts.left.y2 = mb.y2.has_nonzero;
        contexts.above[column].y2 = mb.y2.has_nonzero;
    }

    let y_class = if has_y2 {
        BlockClass::YAfterY2
    } else {
        BlockClass::YWithoutY2
    };

    for index in 0..16 {
        let sb_column = index % 4;
        let sb_row = index / 4;
        let left = if sb_column > 0 {
            mb.y[index - 1].has_nonzero
        } else {
            contexts.left.y[sb_row]
        };
        let above = if sb_row > 0 {
            mb.y[index - 4].has_nonzero
        } else {
            contexts.above[column].y[sb_column]
        };
        let context = left as u8 + above as u8;

        match pass {
            Pass::Decode(decoder) => {
                mb.y[index] = decode_block(decoder, y_class, probs, context);
            }
            Pass::Encode(encoder) => {
                encode_block(encoder, &mb.y[index], y_class, probs, context)?;
            }
            Pass::Count(counts) => {
                count_block(&mb.y[index], y_class, context, counts)?;
            }
        }
        any_nonzero |= mb.y[index].has_nonzero;
    }
    for row in 0..4 {
        contexts.left.y[row] = mb.y[row * 4 + 3].has_nonzero;
    }
    for column_index in 0..4 {
        contexts.above[column].y[column_index] = mb.y[12 + column_index].has_nonzero;
    }

    for plane in 0..2 {
        for index in 0..4 {
            let sb_column = index % 2;
            let sb_row = index / 2;
            let blocks = if plane == 0 { &mb.u } else { &mb.v };
            let left = if sb_column > 0 {
                blocks[index - 1].has_nonzero
            } else if plane == 0 {
                contexts.left.u[sb_row]
            } else {
                contexts.left.v[sb_row]
            };
            let above = if sb_row > 0 {
                blocks[index - 2].has_nonzero
            } else if plane == 0 {
                contexts.above[column].u[sb_column]
            } else {
                contexts.above[column].v[sb_column]
            };
            let context = left as u8 + above as u8;

            match pass {
                Pass::Decode(decoder) => {
                    let block = decode_block(decoder, BlockClass::Chroma, probs, context);
                    if plane == 0 {
                        mb.u[index] = block;
                    } else {
                        mb.v[index] = block;
                    }
                }
                Pass::Encode(encoder) => {
                    let block = if plane == 0 { &mb.u[index] } else { &mb.v[index] };
                    encode_block(encoder, block, BlockClass::Chroma, probs, context)?;
                }
                Pass::Count(counts) => {
                    let block = if plane == 0 { &mb.u[index] } else { &mb.v[index] };
                    count_block(block, BlockClass::Chroma, context, counts)?;
                }
            }
            let nz = if plane == 0 {
                mb.u[index].has_nonzero
            } else {
                mb.v[index].has_nonzero
            };
            any_nonzero |= nz;
        }
    }
    for row in 0..2 {
        contexts.left.u[row] = mb.u[row * 2 + 1].has_nonzero;
        contexts.left.v[row] = mb.v[row * 2 + 1].has_nonzero;
    }
    for column_index in 0..2 {
        contexts.above[column].u[column_index] = mb.u[2 + column_index].has_nonzero;
        contexts.above[column].v[column_index] = mb.v[2 + column_index].has_nonzero;
    }

    if let Pass::Decode(_) = pass {
        mb.has_nonzero = any_nonzero;
    }
    Ok(())
}

pub fn decode_macroblock_tokens(
    decoder: &mut BoolDecoder,
    mb: &mut MacroblockInfo,
    column: usize,
    contexts: &mut TokenContexts,
    probs: &CoeffProbs,
) -> Result<()> {
    walk_macroblock(&mut Pass::Decode(decoder), mb, column, contexts, probs)
}

pub fn encode_macroblock_tokens(
    encoder: &mut BoolEncoder,
    mb: &MacroblockInfo,
    column: usize,
    contexts: &mut TokenContexts,
    probs: &CoeffProbs,
) -> Result<()> {
    let mut mb = mb.clone();
    walk_macroblock(&mut Pass::Encode(encoder), &mut mb, column, contexts, probs)
}

pub fn count_macroblock_tokens(
    mb: &MacroblockInfo,
    column: usize,
    contexts: &mut TokenContexts,
    counts: &mut TokenBranchCounts,
) -> Result<()> {
    let probs = Box::new(crate::consts::DEFAULT_COEFF_PROBS);
    let mut mb = mb.clone();
    walk_macroblock(&mut Pass::Count(counts), &mut mb, column, contexts, &probs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::DEFAULT_COEFF_PROBS;

    fn probs() -> Box<CoeffProbs> {
        Box::new(DEFAULT_COEFF_PROBS)
    }

    fn round_trip(block: &CoeffBlock, class: BlockClass, context: u8) -> CoeffBlock {
        let probs = probs();
        let mut encoder = BoolEncoder::new();
        encode_block(&mut encoder, block, class, &probs, context).unwrap();
        let bytes = encoder.finish();
        let mut decoder = BoolDecoder::new(&bytes);
        decode_block(&mut decoder, class, &probs, context)
    }

    fn block_with(values: &[(usize, i16)]) -> CoeffBlock {
        let mut block = CoeffBlock::default();
        for &(position, value) in values {
            block.coefficients[position] = value;
        }
        block.has_nonzero = values.iter().any(|&(_, v)| v != 0);
        block
    }

    #[test]
    fn empty_block_round_trips() {
        let block = CoeffBlock::default();
        for context in 0..3 {
            let decoded = round_trip(&block, BlockClass::YWithoutY2, context);
            assert_eq!(decoded.coefficients, block.coefficients);
            assert!(!decoded.has_nonzero);
        }
    }

    #[test]
    fn small_tokens_round_trip() {
        let block = block_with(&[(0, 4), (1, -1), (4, 2), (5, 0), (2, 3)]);
        let decoded = round_trip(&block, BlockClass::YWithoutY2, 0);
        assert_eq!(decoded.coefficients, block.coefficients);
        assert!(decoded.has_nonzero);
    }

    #[test]
    fn every_category_round_trips() {
        for magnitude in [1i16, 4, 5, 6, 7, 10, 11, 18, 19, 34, 35, 66, 67, 500, 2048] {
            let block = block_with(&[(0, magnitude), (5, -magnitude)]);
            let decoded = round_trip(&block, BlockClass::Chroma, 1);
            assert_eq!(decoded.coefficients, block.coefficients, "magnitude {magnitude}");
        }
    }

    #[test]
    fn y_after_y2_ignores_dc_slot() {
        // DC (natural position 0) belongs to the Y2 block in this class
        let mut block = block_with(&[(1, 7), (4, -2)]);
        block.coefficients[0] = 999; // must not be coded
        let decoded = round_trip(&block, BlockClass::YAfterY2, 2);
        assert_eq!(decoded.coefficients[0], 0);
        assert_eq!(decoded.coefficients[1], 7);
        assert_eq!(decoded.coefficients[4], -2);
    }

    #[test]
    fn oversized_magnitude_is_internal_error() {
        let block = block_with(&[(0, 3000)]);
        let probs = probs();
        let mut encoder = BoolEncoder::new();
        assert!(matches!(
            encode_block(&mut encoder, &block, BlockClass::Y2, &probs, 0),
            Err(CodecError::Internal { .. })
        ));
    }

    #[test]
    fn trailing_zero_run_is_not_coded() {
        // only positions up to the last nonzero (zigzag order) get tokens;
        // the round trip must still reproduce interior zeros
        let block = block_with(&[(0, 1), (8, 5)]); // natural 8 is zigzag index 3
        let decoded = round_trip(&block, BlockClass::YWithoutY2, 0);
        assert_eq!(decoded.coefficients, block.coefficients);
    }

    #[test]
    fn macroblock_walk_keeps_contexts_in_sync() {
        use crate::predict::intra::{BMode, UvMode, YMode};

        // B_PRED macroblock: no Y2 block, so luma DC slots are coded
        let b_pred_kind = crate::macroblock::MbKind::Intra {
            y_mode: YMode::B,
            b_modes: [BMode::Dc; 16],
            uv_mode: UvMode::Dc,
        };

        let probs = probs();
        let mut mb = MacroblockInfo {
            kind: b_pred_kind.clone(),
            ..MacroblockInfo::default()
        };
        mb.y[0] = block_with(&[(0, 9)]);
        mb.y[3] = block_with(&[(1, -5)]);
        mb.u[1] = block_with(&[(0, 2)]);
        mb.skip_coeff = Some(false);
        mb.calculate_has_nonzero();
        // calculate_has_nonzero derives the skip flag from content
        assert_eq!(mb.skip_coeff, Some(false));

        let mut encoder = BoolEncoder::new();
        let mut enc_ctx = TokenContexts::new(2);
        encode_macroblock_tokens(&mut encoder, &mb, 0, &mut enc_ctx, &probs).unwrap();
        let bytes = encoder.finish();

        let mut template = MacroblockInfo {
            kind: b_pred_kind,
            skip_coeff: Some(false),
            ..MacroblockInfo::default()
        };
        let mut decoder = BoolDecoder::new(&bytes);
        let mut dec_ctx = TokenContexts::new(2);
        decode_macroblock_tokens(&mut decoder, &mut template, 0, &mut dec_ctx, &probs).unwrap();

        assert_eq!(template.y[0].coefficients, mb.y[0].coefficients);
        assert_eq!(template.y[3].coefficients, mb.y[3].coefficients);
        assert_eq!(template.u[1].coefficients, mb.u[1].coefficients);
        assert!(template.has_nonzero);

        // both passes leave identical context state behind
        assert_eq!(enc_ctx.left.y, dec_ctx.left.y);
        assert_eq!(enc_ctx.above[0].y, dec_ctx.above[0].y);
    }
}
