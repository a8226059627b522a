//! Per-macroblock records and the motion-vector census.
//!
//! Macroblocks live in one arena-owned grid addressed by (column, row);
//! neighbor access is index arithmetic returning `Option`, never pointers.

use crate::consts::{MV_COUNTS_TO_PROBS, MV_PARTITIONS};
use crate::mv::MotionVector;
use crate::predict::intra::{BMode, UvMode, YMode};

/// One 4x4 coefficient block in natural (raster) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoeffBlock {
    pub coefficients: [i16; 16],
    pub has_nonzero: bool,
}

impl Default for CoeffBlock {
    fn default() -> Self {
        Self {
            coefficients: [0; 16],
            has_nonzero: false,
        }
    }
}

impl CoeffBlock {
    pub fn zero_out(&mut self) {
        self.coefficients = [0; 16];
        self.has_nonzero = false;
    }

    /// Recompute the nonzero flag; Y-after-Y2 blocks pass 1 to ignore the
    /// DC slot their Y2 block owns.
    pub fn recalculate_has_nonzero(&mut self, first_index: usize) {
        self.has_nonzero = self.coefficients[first_index..].iter().any(|&c| c != 0);
    }
}

/// Which reference raster an inter macroblock predicts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference {
    Last = 0,
    Golden = 1,
    Alternate = 2,
}

/// Macroblock-level inter prediction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterMode {
    Zero = 0,
    Nearest = 1,
    Near = 2,
    New = 3,
    Split = 4,
}

impl InterMode {
    pub fn from_index(index: u8) -> Self {
        match index {
            0 => Self::Zero,
            1 => Self::Nearest,
            2 => Self::Near,
            3 => Self::New,
            _ => Self::Split,
        }
    }
}

/// Per-subblock mode inside a SPLITMV macroblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubMvMode {
    Left = 0,
    Above = 1,
    Zero = 2,
    New = 3,
}

impl SubMvMode {
    pub fn from_index(index: u8) -> Self {
        match index {
            0 => Self::Left,
            1 => Self::Above,
            2 => Self::Zero,
            _ => Self::New,
        }
    }
}

/// Prediction half of a macroblock record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MbKind {
    Intra {
        y_mode: YMode,
        /// Per-subblock modes; for non-B macroblocks these hold the implied
        /// mode so key-frame neighbors context correctly.
        b_modes: [BMode; 16],
        uv_mode: UvMode,
    },
    Inter {
        mode: InterMode,
        reference: Reference,
        /// Macroblock-level vector (zero for SPLITMV).
        mv: MotionVector,
        /// SPLITMV partition scheme, when mode is Split.
        partition: Option<u8>,
        sub_modes: [SubMvMode; 16],
        /// Every subblock's vector; uniform for non-split modes.
        sub_mvs: [MotionVector; 16],
    },
}

/// The implied 4x4 mode of a 16x16 intra mode, for neighbor context.
pub fn implied_b_mode(y_mode: YMode) -> BMode {
    match y_mode {
        YMode::Dc => BMode::Dc,
        YMode::V => BMode::Ve,
        YMode::H => BMode::He,
        YMode::Tm => BMode::Tm,
        YMode::B => BMode::Dc,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroblockInfo {
    /// Segment id coded in this frame's map update, if any.
    pub segment_id: Option<u8>,
    /// Effective segment after consulting the persistent map.
    pub segment: u8,
    /// Coded skip flag; `None` when the header disables skipping.
    pub skip_coeff: Option<bool>,
    pub kind: MbKind,
    pub has_nonzero: bool,
    pub y2: CoeffBlock,
    pub y: [CoeffBlock; 16],
    pub u: [CoeffBlock; 4],
    pub v: [CoeffBlock; 4],
}

impl Default for MacroblockInfo {
    fn default() -> Self {
        Self {
            segment_id: None,
            segment: 0,
            skip_coeff: None,
            kind: MbKind::Intra {
                y_mode: YMode::Dc,
                b_modes: [BMode::Dc; 16],
                uv_mode: UvMode::Dc,
            },
            has_nonzero: false,
            y2: CoeffBlock::default(),
            y: [CoeffBlock::default(); 16],
            u: [CoeffBlock::default(); 4],
            v: [CoeffBlock::default(); 4],
        }
    }
}

impl MacroblockInfo {
    pub fn is_inter(&self) -> bool {
        matches!(self.kind, MbKind::Inter { .. })
    }

    /// Whether this macroblock carries a Y2 block.
    pub fn has_y2(&self) -> bool {
        match &self.kind {
            MbKind::Intra { y_mode, .. } => *y_mode != YMode::B,
            MbKind::Inter { mode, .. } => *mode != InterMode::Split,
        }
    }

    pub fn reference(&self) -> Option<Reference> {
        match &self.kind {
            MbKind::Intra { .. } => None,
            MbKind::Inter { reference, .. } => Some(*reference),
        }
    }

    /// The vector neighbors see in the census: the bottom-right subblock's.
    pub fn base_mv(&self) -> MotionVector {
        match &self.kind {
            MbKind::Intra { .. } => MotionVector::default(),
            MbKind::Inter { sub_mvs, .. } => sub_mvs[15],
        }
    }

    pub fn is_splitmv(&self) -> bool {
        matches!(
            &self.kind,
            MbKind::Inter {
                mode: InterMode::Split,
                ..
            }
        )
    }

    /// B mode of subblock `index`, using the implied mode for non-B
    /// macroblocks.
    pub fn b_mode_at(&self, index: usize) -> BMode {
        match &self.kind {
            MbKind::Intra {
                y_mode: YMode::B,
                b_modes,
                ..
            } => b_modes[index],
            MbKind::Intra { y_mode, .. } => implied_b_mode(*y_mode),
            MbKind::Inter { .. } => BMode::Dc,
        }
    }

    /// Subblock motion vector; zero for intra macroblocks.
    pub fn sub_mv_at(&self, index: usize) -> MotionVector {
        match &self.kind {
            MbKind::Intra { .. } => MotionVector::default(),
            MbKind::Inter { sub_mvs, .. } => sub_mvs[index],
        }
    }

    /// Fold per-block nonzero flags up into the macroblock flag and the
    /// skip flag.
    pub fn calculate_has_nonzero(&mut self) {
        let mut any = false;
        if self.has_y2() {
            self.y2.recalculate_has_nonzero(0);
            any |= self.y2.has_nonzero;
        } else {
            self.y2.zero_out();
        }
        let first = if self.has_y2() { 1 } else { 0 };
        for block in self.y.iter_mut() {
            block.recalculate_has_nonzero(first);
            any |= block.has_nonzero;
        }
        for block in self.u.iter_mut().chain(self.v.iter_mut()) {
            block.recalculate_has_nonzero(0);
            any |= block.has_nonzero;
        }
        self.has_nonzero = any;
        if self.skip_coeff.is_some() {
            self.skip_coeff = Some(!any);
        }
    }
}

/// Arena-owned macroblock grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroblockGrid {
    columns: usize,
    rows: usize,
    macroblocks: Vec<MacroblockInfo>,
}

impl MacroblockGrid {
    pub fn new(columns: usize, rows: usize) -> Self {
        Self {
            columns,
            rows,
            macroblocks: vec![MacroblockInfo::default(); columns * rows],
        }
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn at(&self, column: usize, row: usize) -> &MacroblockInfo {
        &self.macroblocks[row * self.columns + column]
    }

    pub fn at_mut(&mut self, column: usize, row: usize) -> &mut MacroblockInfo {
        &mut self.macroblocks[row * self.columns + column]
    }

    /// Neighbor access; `None` outside the grid.
    pub fn get(&self, column: isize, row: isize) -> Option<&MacroblockInfo> {
        if column < 0 || row < 0 || column as usize >= self.columns || row as usize >= self.rows {
            None
        } else {
            Some(self.at(column as usize, row as usize))
        }
    }
}

/// Sign-bias flags for the golden and alternate references.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignBias {
    pub golden: bool,
    pub alternate: bool,
}

impl SignBias {
    pub fn of(&self, reference: Reference) -> bool {
        match reference {
            Reference::Last => false,
            Reference::Golden => self.golden,
            Reference::Alternate => self.alternate,
        }
    }
}

/// Clamp a vector so the referenced 16x16 area stays within one macroblock
/// of the frame.
pub fn clamp_mv(
    mv: MotionVector,
    mb_column: usize,
    mb_row: usize,
    mb_columns: usize,
    mb_rows: usize,
) -> MotionVector {
    let lo_x = -(((mb_column * 16 + 16) * 8) as i32);
    let hi_x = (((mb_columns - mb_column - 1) * 16 + 16) * 8) as i32;
    let lo_y = -(((mb_row * 16 + 16) * 8) as i32);
    let hi_y = (((mb_rows - mb_row - 1) * 16 + 16) * 8) as i32;
    MotionVector::new(
        (mv.x as i32).clamp(lo_x, hi_x) as i16,
        (mv.y as i32).clamp(lo_y, hi_y) as i16,
    )
}

/// Result of the motion-vector census over the above, left and above-left
/// neighbors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Census {
    pub best: MotionVector,
    pub nearest: MotionVector,
    pub near: MotionVector,
    /// Context counts indexing the fixed inter-mode probability table.
    pub context: [u8; 4],
}

impl Census {
    /// Inter-mode tree probabilities for this context.
    pub fn mode_probs(&self) -> [u8; 4] {
        let mut probs = [0u8; 4];
        for (node, prob) in probs.iter_mut().enumerate() {
            let count = (self.context[node] as usize).min(MV_COUNTS_TO_PROBS.len() - 1);
            *prob = MV_COUNTS_TO_PROBS[count][node];
        }
        probs
    }
}

/// Inspect the neighbors with weights {2, 2, 1}, count agreeing nonzero
/// vectors, and classify into the context bins that drive mode coding.
/// Vectors borrowed across references with differing sign bias are negated.
pub fn motion_vector_census(
    grid: &MacroblockGrid,
    mb_column: usize,
    mb_row: usize,
    reference: Reference,
    sign_bias: SignBias,
) -> Census {
    let column = mb_column as isize;
    let row = mb_row as isize;
    let neighbors = [
        (grid.get(column, row - 1), 2u8),
        (grid.get(column - 1, row), 2u8),
        (grid.get(column - 1, row - 1), 1u8),
    ];

    let mut found: Vec<MotionVector> = Vec::with_capacity(3);
    let mut counts = [0u8; 4];

    for (neighbor, weight) in neighbors {
        let Some(mb) = neighbor else { continue };
        let Some(neighbor_ref) = mb.reference() else {
            counts[0] += weight;
            continue;
        };

        let mut mv = mb.base_mv();
        if sign_bias.of(neighbor_ref) != sign_bias.of(reference) {
            mv = -mv;
        }

        if mv.is_zero() {
            counts[0] += weight;
            continue;
        }

        match found.iter().position(|&seen| seen == mv) {
            Some(index) => counts[index + 1] += weight,
            None => {
                found.push(mv);
                if found.len() <= 3 {
                    counts[found.len()] += weight;
                }
            }
        }
    }

    // SPLITMV pressure context overrides the third slot
    let splitmv_count = |mb: Option<&MacroblockInfo>| -> u8 {
        mb.map(|m| m.is_splitmv() as u8).unwrap_or(0)
    };
    counts[3] = (splitmv_count(grid.get(column, row - 1))
        + splitmv_count(grid.get(column - 1, row)))
        * 2
        + splitmv_count(grid.get(column - 1, row - 1));

    let mut nearest = found.first().copied().unwrap_or_default();
    let mut near = found.get(1).copied().unwrap_or_default();

    if counts[2] > counts[1] {
        std::mem::swap(&mut nearest, &mut near);
        counts.swap(1, 2);
    }

    let best = if counts[1] >= counts[0] {
        nearest
    } else {
        MotionVector::default()
    };

    let clamp = |mv| clamp_mv(mv, mb_column, mb_row, grid.columns(), grid.rows());
    Census {
        best: clamp(best),
        nearest: clamp(nearest),
        near: clamp(near),
        context: counts,
    }
}

/// First subblock index of each partition in a SPLITMV scheme, in coding
/// order.
pub fn partition_first_subblocks(scheme: u8) -> Vec<usize> {
    let assignment = &MV_PARTITIONS[scheme as usize];
    let count = crate::consts::MV_PARTITION_COUNTS[scheme as usize];
    let mut first = Vec::with_capacity(count);
    for partition in 0..count as u8 {
        let index = assignment
            .iter()
            .position(|&p| p == partition)
            .expect("every partition id appears");
        first.push(index);
    }
    first
}

/// Neighboring subblock vectors for sub-mode coding: (left, above).
pub fn sub_mv_neighbors(
    grid: &MacroblockGrid,
    mb_column: usize,
    mb_row: usize,
    current: &[MotionVector; 16],
    subblock: usize,
) -> (MotionVector, MotionVector) {
    let sb_column = subblock % 4;
    let sb_row = subblock / 4;

    let left = if sb_column > 0 {
        current[subblock - 1]
    } else {
        grid.get(mb_column as isize - 1, mb_row as isize)
            .map(|mb| mb.sub_mv_at(subblock + 3))
            .unwrap_or_default()
    };

    let above = if sb_row > 0 {
        current[subblock - 4]
    } else {
        grid.get(mb_column as isize, mb_row as isize - 1)
            .map(|mb| mb.sub_mv_at(subblock + 12))
            .unwrap_or_default()
    };

    (left, above)
}

/// Context index for sub-mode probabilities, from left/above agreement.
pub fn sub_mv_context(left: MotionVector, above: MotionVector) -> usize {
    let left_is_zero = left.is_zero();
    let above_is_zero = above.is_zero();
    if left == above && left_is_zero {
        4
    } else if left == above {
        3
    } else if above_is_zero {
        2
    } else if left_is_zero {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inter_mb(mv: MotionVector, reference: Reference) -> MacroblockInfo {
        MacroblockInfo {
            kind: MbKind::Inter {
                mode: InterMode::New,
                reference,
                mv,
                partition: None,
                sub_modes: [SubMvMode::New; 16],
                sub_mvs: [mv; 16],
            },
            ..MacroblockInfo::default()
        }
    }

    #[test]
    fn census_counts_agreeing_neighbors() {
        let mut grid = MacroblockGrid::new(4, 4);
        let mv = MotionVector::new(16, -8);
        *grid.at_mut(1, 0) = inter_mb(mv, Reference::Last); // above
        *grid.at_mut(0, 1) = inter_mb(mv, Reference::Last); // left

        let census = motion_vector_census(&grid, 1, 1, Reference::Last, SignBias::default());
        assert_eq!(census.nearest, mv);
        assert_eq!(census.context[1], 4); // 2 + 2 agreeing
        assert_eq!(census.best, mv);
    }

    #[test]
    fn census_zero_vectors_count_as_intra_bin() {
        let mut grid = MacroblockGrid::new(4, 4);
        *grid.at_mut(1, 0) = inter_mb(MotionVector::default(), Reference::Last);

        let census = motion_vector_census(&grid, 1, 1, Reference::Last, SignBias::default());
        assert_eq!(census.context[0], 2);
        assert_eq!(census.nearest, MotionVector::default());
        assert_eq!(census.best, MotionVector::default());
    }

    #[test]
    fn census_flips_on_sign_bias_mismatch() {
        let mut grid = MacroblockGrid::new(4, 4);
        let mv = MotionVector::new(8, 8);
        *grid.at_mut(1, 0) = inter_mb(mv, Reference::Golden);

        let bias = SignBias {
            golden: true,
            alternate: false,
        };
        let census = motion_vector_census(&grid, 1, 1, Reference::Last, bias);
        assert_eq!(census.nearest, -mv);
    }

    #[test]
    fn census_orders_nearest_by_weight() {
        let mut grid = MacroblockGrid::new(8, 8);
        let mv_a = MotionVector::new(8, 0);
        let mv_b = MotionVector::new(-8, 0);
        *grid.at_mut(1, 0) = inter_mb(mv_a, Reference::Last); // above, weight 2
        *grid.at_mut(0, 1) = inter_mb(mv_b, Reference::Last); // left, weight 2
        *grid.at_mut(0, 0) = inter_mb(mv_b, Reference::Last); // above-left, weight 1

        let census = motion_vector_census(&grid, 1, 1, Reference::Last, SignBias::default());
        // b accumulates weight 3 and displaces a from nearest
        assert_eq!(census.nearest, mv_b);
        assert_eq!(census.near, mv_a);
    }

    #[test]
    fn clamp_keeps_vectors_near_frame() {
        let clamped = clamp_mv(MotionVector::new(-2000, 0), 0, 0, 4, 4);
        assert_eq!(clamped.x, -(16 * 8));

        let clamped = clamp_mv(MotionVector::new(2000, 2000), 3, 3, 4, 4);
        assert_eq!(clamped.x, 16 * 8);
        assert_eq!(clamped.y, 16 * 8);
    }

    #[test]
    fn partition_first_subblocks_quadrants() {
        assert_eq!(partition_first_subblocks(2), vec![0, 2, 8, 10]);
        assert_eq!(partition_first_subblocks(0), vec![0, 8]);
        assert_eq!(partition_first_subblocks(3).len(), 16);
    }

    #[test]
    fn sub_mv_context_classification() {
        let zero = MotionVector::default();
        let mv = MotionVector::new(4, 4);
        assert_eq!(sub_mv_context(zero, zero), 4);
        assert_eq!(sub_mv_context(mv, mv), 3);
        assert_eq!(sub_mv_context(mv, zero), 2);
        assert_eq!(sub_mv_context(zero, mv), 1);
        assert_eq!(sub_mv_context(mv, MotionVector::new(8, 0)), 0);
    }
}
