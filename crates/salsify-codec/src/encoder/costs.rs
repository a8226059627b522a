//! Bit-cost estimation for rate-distortion decisions.
//!
//! Costs are in 1/256-bit units: `cost(p) = -256 * log2(p / 256)` for a
//! zero branch at probability `p`, and the complement for a one branch.

use once_cell::sync::Lazy;

use crate::bool_coder::tree_path;
use crate::consts::{
    MVP_BITS, MVP_IS_SHORT, MVP_SHORT, MVP_SIGN, MV_LONG_WIDTH, MV_PROB_CNT, SMALL_MV_TREE,
    TreeNode,
};
use crate::mv::MotionVector;

/// Cost of coding a zero branch at each probability.
static PROB_COST: Lazy<[u32; 256]> = Lazy::new(|| {
    let mut table = [0u32; 256];
    for (p, slot) in table.iter_mut().enumerate() {
        let p = (p.max(1)) as f64 / 256.0;
        *slot = (-256.0 * p.log2()).round() as u32;
    }
    table
});

#[inline]
pub fn cost_zero(probability: u8) -> u32 {
    PROB_COST[probability as usize]
}

#[inline]
pub fn cost_one(probability: u8) -> u32 {
    PROB_COST[255 - probability as usize]
}

#[inline]
pub fn cost_bit(probability: u8, bit: bool) -> u32 {
    if bit {
        cost_one(probability)
    } else {
        cost_zero(probability)
    }
}

/// Cost of reaching `value` in a probability tree.
pub fn tree_cost(nodes: &[TreeNode], probabilities: &[u8], value: u8) -> u32 {
    tree_path(nodes, 0, value)
        .map(|path| {
            path.iter()
                .map(|&(node, bit)| cost_bit(probabilities[node >> 1], bit))
                .sum()
        })
        .unwrap_or(u32::MAX / 2)
}

/// Per-alphabet cost table for a tree.
pub fn tree_cost_table<const N: usize>(nodes: &[TreeNode], probabilities: &[u8]) -> [u32; N] {
    let mut table = [0u32; N];
    for (value, slot) in table.iter_mut().enumerate() {
        *slot = tree_cost(nodes, probabilities, value as u8);
    }
    table
}

/// Cost of one motion-vector component under its 19-probability model;
/// mirrors the encode path bit for bit.
pub fn mv_component_cost(component: i16, probs: &[u8; MV_PROB_CNT]) -> u32 {
    let halved = component >> 1;
    let x = halved.unsigned_abs();
    let mut cost;

    if x < 8 {
        cost = cost_zero(probs[MVP_IS_SHORT]);
        let short_probs: [u8; 7] = probs[MVP_SHORT..MVP_SHORT + 7].try_into().expect("7 probs");
        cost += tree_cost(&SMALL_MV_TREE, &short_probs, x as u8);
    } else {
        cost = cost_one(probs[MVP_IS_SHORT]);
        for i in 0..3 {
            cost += cost_bit(probs[MVP_BITS + i], (x >> i) & 1 != 0);
        }
        for i in (4..MV_LONG_WIDTH).rev() {
            cost += cost_bit(probs[MVP_BITS + i], (x >> i) & 1 != 0);
        }
        if x & 0xfff0 != 0 {
            cost += cost_bit(probs[MVP_BITS + 3], (x >> 3) & 1 != 0);
        }
    }

    if x != 0 {
        cost += cost_bit(probs[MVP_SIGN], halved < 0);
    }
    cost
}

/// Rate of coding `mv` relative to `base`.
pub fn mv_cost(mv: MotionVector, base: MotionVector, probs: &[[u8; MV_PROB_CNT]; 2]) -> u32 {
    let delta = mv - base;
    mv_component_cost(delta.y, &probs[0]) + mv_component_cost(delta.x, &probs[1])
}

/// Rate term used inside the SAD-based diamond search: the vector cost in
/// whole bits, weighted by the per-quantizer SAD multiplier.
pub fn sad_mv_cost(
    mv: MotionVector,
    base: MotionVector,
    probs: &[[u8; MV_PROB_CNT]; 2],
    sad_per_bit: u32,
) -> u32 {
    (mv_cost(mv, base, probs) * sad_per_bit) >> 8
}

/// SAD multiplier per quantizer index.
pub const SAD_PER_BIT_LUT: [u32; 128] = [
    2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2,
    3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3,
    4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4,
    5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5,
    6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6,
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7,
    8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8,
    9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9,
    10, 10, 10, 10, 10, 10, 10, 10,
    11, 11, 11, 11, 11, 11,
    12, 12, 12, 12, 12, 12,
    13, 13, 13, 13,
    14, 14,
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::DEFAULT_MV_PROBS;

    #[test]
    fn even_odds_bit_costs_256() {
        assert_eq!(cost_zero(128), 256);
        assert_eq!(cost_one(127), 256);
    }

    #[test]
    fn rarer_branches_cost_more() {
        assert!(cost_zero(10) > cost_zero(128));
        assert!(cost_one(250) > cost_one(128));
        assert!(cost_zero(250) < cost_zero(128));
    }

    #[test]
    fn longer_vectors_cost_more() {
        let zero = mv_component_cost(0, &DEFAULT_MV_PROBS[0]);
        let short = mv_component_cost(4, &DEFAULT_MV_PROBS[0]);
        let long = mv_component_cost(200, &DEFAULT_MV_PROBS[0]);
        assert!(zero < short);
        assert!(short < long);
    }

    #[test]
    fn mv_cost_is_relative_to_base() {
        let mv = MotionVector::new(32, -16);
        let absolute = mv_cost(mv, MotionVector::default(), &DEFAULT_MV_PROBS);
        let relative = mv_cost(mv, mv, &DEFAULT_MV_PROBS);
        assert!(relative < absolute);
    }
}
