//! The deblocking loop filter.
//!
//! Runs in place on the reconstructed raster after all macroblocks are
//! done. Edge order per macroblock: left macroblock edge, interior vertical
//! subblock edges, top macroblock edge, interior horizontal subblock edges.
//! Subblock edges are skipped for macroblocks that carry no residual and
//! are not B_PRED or SPLITMV.

use salsify_core::{Plane, Raster};

use crate::frame::Frame;
use crate::macroblock::{InterMode, MacroblockInfo, MbKind, Reference};
use crate::predict::intra::YMode;
use crate::state::DecoderState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Normal,
    Simple,
}

/// Thresholds derived from one macroblock's filter level and the frame
/// sharpness.
#[derive(Debug, Clone, Copy)]
struct FilterLimits {
    interior_limit: u8,
    macroblock_edge_limit: u8,
    subblock_edge_limit: u8,
    hev_threshold: u8,
}

impl FilterLimits {
    fn new(filter_level: u8, sharpness_level: u8, key_frame: bool) -> Self {
        let mut interior_limit = filter_level;
        if sharpness_level > 0 {
            interior_limit >>= if sharpness_level > 4 { 2 } else { 1 };
            let cap = 9 - sharpness_level;
            if interior_limit > cap {
                interior_limit = cap;
            }
        }
        if interior_limit < 1 {
            interior_limit = 1;
        }

        let mut hev_threshold = 0;
        if filter_level >= 15 {
            hev_threshold += 1;
        }
        if filter_level >= 40 {
            hev_threshold += 1;
        }
        if filter_level >= 20 && !key_frame {
            hev_threshold += 1;
        }

        Self {
            interior_limit,
            macroblock_edge_limit: (filter_level + 2) * 2 + interior_limit,
            subblock_edge_limit: filter_level * 2 + interior_limit,
            hev_threshold,
        }
    }
}

#[inline]
fn s8(value: u8) -> i32 {
    value as i32 - 128
}

#[inline]
fn u8_of(value: i32) -> u8 {
    (value.clamp(-128, 127) + 128) as u8
}

#[inline]
fn c(value: i32) -> i32 {
    value.clamp(-128, 127)
}

/// Whether the edge is flat enough to filter at all.
#[allow(clippy::too_many_arguments)]
fn filter_mask(
    interior: u8,
    edge: u8,
    p3: u8,
    p2: u8,
    p1: u8,
    p0: u8,
    q0: u8,
    q1: u8,
    q2: u8,
    q3: u8,
) -> bool {
    let interior = interior as i32;
    (p3 as i32 - p2 as i32).abs() <= interior
        && (p2 as i32 - p1 as i32).abs() <= interior
        && (p1 as i32 - p0 as i32).abs() <= interior
        && (q1 as i32 - q0 as i32).abs() <= interior
        && (q2 as i32 - q1 as i32).abs() <= interior
        && (q3 as i32 - q2 as i32).abs() <= interior
        && (p0 as i32 - q0 as i32).abs() * 2 + (p1 as i32 - q1 as i32).abs() / 2 <= edge as i32
}

/// High edge variance: a sharp feature that the wide filter would smear.
fn hev(threshold: u8, p1: u8, p0: u8, q0: u8, q1: u8) -> bool {
    (p1 as i32 - p0 as i32).abs() > threshold as i32
        || (q1 as i32 - q0 as i32).abs() > threshold as i32
}

/// Subblock (narrow) filter kernel; returns the adjusted (p1, p0, q0, q1).
fn subblock_kernel(hev: bool, p1: u8, p0: u8, q0: u8, q1: u8) -> (u8, u8, u8, u8) {
    let (ps1, ps0, qs0, qs1) = (s8(p1), s8(p0), s8(q0), s8(q1));

    let mut w = if hev { c(ps1 - qs1) } else { 0 };
    w = c(w + 3 * (qs0 - ps0));

    let filter1 = c(w + 4) >> 3;
    let filter2 = c(w + 3) >> 3;
    let mut qs0 = c(qs0 - filter1);
    let mut ps0 = c(ps0 + filter2);
    let mut qs1 = qs1;
    let mut ps1 = ps1;

    if !hev {
        let adjustment = (filter1 + 1) >> 1;
        qs1 = c(qs1 - adjustment);
        ps1 = c(ps1 + adjustment);
    }

    (u8_of(ps1), u8_of(ps0), u8_of(qs0), u8_of(qs1))
}

/// Macroblock-edge (wide) filter kernel over six samples.
fn macroblock_kernel(
    hev: bool,
    p2: u8,
    p1: u8,
    p0: u8,
    q0: u8,
    q1: u8,
    q2: u8,
) -> (u8, u8, u8, u8, u8, u8) {
    let (ps2, ps1, ps0, qs0, qs1, qs2) = (s8(p2), s8(p1), s8(p0), s8(q0), s8(q1), s8(q2));

    let mut w = c(ps1 - qs1);
    w = c(w + 3 * (qs0 - ps0));

    if hev {
        let filter1 = c(w + 4) >> 3;
        let filter2 = c(w + 3) >> 3;
        return (
            u8_of(ps2),
            u8_of(ps1),
            u8_of(c(ps0 + filter2)),
            u8_of(c(qs0 - filter1)),
            u8_of(qs1),
            u8_of(qs2),
        );
    }

    let u0 = c((27 * w + 63) >> 7);
    let u1 = c((18 * w + 63) >> 7);
    let u2 = c((9 * w + 63) >> 7);

    (
        u8_of(c(ps2 + u2)),
        u8_of(c(ps1 + u1)),
        u8_of(c(ps0 + u0)),
        u8_of(c(qs0 - u0)),
        u8_of(c(qs1 - u1)),
        u8_of(c(qs2 - u2)),
    )
}

/// Fetch eight samples across an edge. `vertical` means a vertical edge
/// (samples run horizontally).
fn fetch(plane: &Plane, edge: usize, position: usize, vertical: bool) -> [u8; 8] {
    let mut samples = [0u8; 8];
    for (i, sample) in samples.iter_mut().enumerate() {
        let offset = edge - 4 + i;
        *sample = if vertical {
            plane.at(offset, position)
        } else {
            plane.at(position, offset)
        };
    }
    samples
}

fn write_back(plane: &mut Plane, edge: usize, position: usize, vertical: bool, samples: &[u8; 8]) {
    for (i, &sample) in samples.iter().enumerate() {
        let offset = edge - 4 + i;
        if vertical {
            plane.set(offset, position, sample);
        } else {
            plane.set(position, offset, sample);
        }
    }
}

/// Filter one edge of `length` samples with the normal kernel.
#[allow(clippy::too_many_arguments)]
fn normal_edge(
    plane: &mut Plane,
    edge: usize,
    start: usize,
    length: usize,
    vertical: bool,
    limits: &FilterLimits,
    mb_edge: bool,
) {
    let edge_limit = if mb_edge {
        limits.macroblock_edge_limit
    } else {
        limits.subblock_edge_limit
    };

    for position in start..start + length {
        let mut s = fetch(plane, edge, position, vertical);
        if !filter_mask(
            limits.interior_limit,
            edge_limit,
            s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7],
        ) {
            continue;
        }
        let high_variance = hev(limits.hev_threshold, s[2], s[3], s[4], s[5]);

        if mb_edge {
            let (p2, p1, p0, q0, q1, q2) =
                macroblock_kernel(high_variance, s[1], s[2], s[3], s[4], s[5], s[6]);
            s[1] = p2;
            s[2] = p1;
            s[3] = p0;
            s[4] = q0;
            s[5] = q1;
            s[6] = q2;
        } else {
            let (p1, p0, q0, q1) = subblock_kernel(high_variance, s[2], s[3], s[4], s[5]);
            s[2] = p1;
            s[3] = p0;
            s[4] = q0;
            s[5] = q1;
        }
        write_back(plane, edge, position, vertical, &s);
    }
}

/// Simple-filter edge: luma only, p0/q0 adjustment gated on the edge sum.
fn simple_edge(plane: &mut Plane, edge: usize, start: usize, length: usize, vertical: bool, edge_limit: u8) {
    for position in start..start + length {
        let s = fetch(plane, edge, position, vertical);
        let (p1, p0, q0, q1) = (s[2], s[3], s[4], s[5]);
        if (p0 as i32 - q0 as i32).abs() * 2 + (p1 as i32 - q1 as i32).abs() / 2 > edge_limit as i32 {
            continue;
        }

        let (ps1, ps0, qs0, qs1) = (s8(p1), s8(p0), s8(q0), s8(q1));
        let mut w = c(ps1 - qs1);
        w = c(w + 3 * (qs0 - ps0));
        let filter1 = c(w + 4) >> 3;
        let filter2 = c(w + 3) >> 3;

        let mut s = s;
        s[3] = u8_of(c(ps0 + filter2));
        s[4] = u8_of(c(qs0 - filter1));
        write_back(plane, edge, position, vertical, &s);
    }
}

fn mode_adjustment(adjustments: &[i8; 4], mb: &MacroblockInfo) -> i32 {
    match &mb.kind {
        MbKind::Intra { y_mode, .. } => {
            if *y_mode == YMode::B {
                adjustments[0] as i32
            } else {
                0
            }
        }
        MbKind::Inter { mode, .. } => match mode {
            InterMode::Zero => adjustments[1] as i32,
            InterMode::Split => adjustments[3] as i32,
            _ => adjustments[2] as i32,
        },
    }
}

fn reference_index(mb: &MacroblockInfo) -> usize {
    match mb.reference() {
        None => 0,
        Some(Reference::Last) => 1,
        Some(Reference::Golden) => 2,
        Some(Reference::Alternate) => 3,
    }
}

/// Effective filter level for one macroblock.
fn macroblock_filter_level(frame: &Frame, state: &DecoderState, mb: &MacroblockInfo) -> u8 {
    let mut level = match &state.segmentation {
        Some(segmentation) => {
            segmentation.filter_level_for(mb.segment, frame.header.loop_filter_level)
        }
        None => frame.header.loop_filter_level as i32,
    };

    if let Some(adjustments) = &state.filter_adjustments {
        level += adjustments.ref_adjustments[reference_index(mb)] as i32
            + mode_adjustment(&adjustments.mode_adjustments, mb);
    }

    level.clamp(0, 63) as u8
}

/// Run the loop filter over the whole raster.
pub fn filter_frame(frame: &Frame, state: &DecoderState, raster: &mut Raster) {
    let kind = if frame.header.filter_type {
        FilterKind::Simple
    } else {
        FilterKind::Normal
    };
    let key_frame = frame.is_key_frame();

    for mb_row in 0..frame.macroblocks.rows() {
        for mb_column in 0..frame.macroblocks.columns() {
            let mb = frame.macroblocks.at(mb_column, mb_row);
            let level = macroblock_filter_level(frame, state, mb);
            if level == 0 {
                continue;
            }

            let limits = FilterLimits::new(level, frame.header.sharpness_level, key_frame);
            let skip_subblock_edges = !matches!(
                &mb.kind,
                MbKind::Intra { y_mode: YMode::B, .. }
                    | MbKind::Inter { mode: InterMode::Split, .. }
            ) && !mb.has_nonzero;

            let x0 = mb_column * 16;
            let y0 = mb_row * 16;
            let cx0 = mb_column * 8;
            let cy0 = mb_row * 8;

            match kind {
                FilterKind::Normal => {
                    if mb_column > 0 {
                        normal_edge(&mut raster.y, x0, y0, 16, true, &limits, true);
                        normal_edge(&mut raster.u, cx0, cy0, 8, true, &limits, true);
                        normal_edge(&mut raster.v, cx0, cy0, 8, true, &limits, true);
                    }
                    if !skip_subblock_edges {
                        for offset in (4..16).step_by(4) {
                            normal_edge(&mut raster.y, x0 + offset, y0, 16, true, &limits, false);
                        }
                        normal_edge(&mut raster.u, cx0 + 4, cy0, 8, true, &limits, false);
                        normal_edge(&mut raster.v, cx0 + 4, cy0, 8, true, &limits, false);
                    }
                    if mb_row > 0 {
                        normal_edge(&mut raster.y, y0, x0, 16, false, &limits, true);
                        normal_edge(&mut raster.u, cy0, cx0, 8, false, &limits, true);
                        normal_edge(&mut raster.v, cy0, cx0, 8, false, &limits, true);
                    }
                    if !skip_subblock_edges {
                        for offset in (4..16).step_by(4) {
                            normal_edge(&mut raster.y, y0 + offset, x0, 16, false, &limits, false);
                        }
                        normal_edge(&mut raster.u, cy0 + 4, cx0, 8, false, &limits, false);
                        normal_edge(&mut raster.v, cy0 + 4, cx0, 8, false, &limits, false);
                    }
                }
                FilterKind::Simple => {
                    if mb_column > 0 {
                        simple_edge(&mut raster.y, x0, y0, 16, true, limits.macroblock_edge_limit);
                    }
                    if !skip_subblock_edges {
                        for offset in (4..16).step_by(4) {
                            simple_edge(
                                &mut raster.y,
                                x0 + offset,
                                y0,
                                16,
                                true,
                                limits.subblock_edge_limit,
                            );
                        }
                    }
                    if mb_row > 0 {
                        simple_edge(&mut raster.y, y0, x0, 16, false, limits.macroblock_edge_limit);
                    }
                    if !skip_subblock_edges {
                        for offset in (4..16).step_by(4) {
                            simple_edge(
                                &mut raster.y,
                                y0 + offset,
                                x0,
                                16,
                                false,
                                limits.subblock_edge_limit,
                            );
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_derivation() {
        let limits = FilterLimits::new(30, 0, true);
        assert_eq!(limits.interior_limit, 30);
        assert_eq!(limits.macroblock_edge_limit, (30 + 2) * 2 + 30);
        assert_eq!(limits.subblock_edge_limit, 30 * 2 + 30);
        assert_eq!(limits.hev_threshold, 1);

        // sharpness shrinks the interior limit
        let sharp = FilterLimits::new(30, 5, true);
        assert_eq!(sharp.interior_limit, 4);

        // inter frames get one more hev step at level >= 20
        let inter = FilterLimits::new(45, 0, false);
        assert_eq!(inter.hev_threshold, 3);

        let floor = FilterLimits::new(0, 7, true);
        assert_eq!(floor.interior_limit, 1);
    }

    #[test]
    fn flat_edges_pass_mask_and_steps_fail() {
        assert!(filter_mask(9, 50, 80, 80, 80, 80, 82, 82, 82, 82));
        assert!(!filter_mask(9, 50, 80, 80, 80, 10, 250, 82, 82, 82));
    }

    #[test]
    fn subblock_kernel_smooths_small_step() {
        // a mild step across the edge gets pulled together
        let (p1, p0, q0, q1) = subblock_kernel(false, 80, 80, 90, 90);
        assert!(p0 > 80);
        assert!(q0 < 90);
        assert!(p1 >= 80);
        assert!(q1 <= 90);
    }

    #[test]
    fn macroblock_kernel_widens_without_hev() {
        let (p2, p1, p0, q0, q1, q2) = macroblock_kernel(false, 60, 60, 60, 100, 100, 100);
        assert!(p0 > 60 && q0 < 100);
        assert!(p1 > 60 && q1 < 100);
        assert!(p2 >= 60 && q2 <= 100);
    }
}
