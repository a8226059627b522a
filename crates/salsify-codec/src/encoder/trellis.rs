//! Second-pass trellis quantization.
//!
//! Re-derives every coded block's raw transform coefficients by replaying
//! the first pass's mode decisions, then picks per-coefficient levels from
//! the {Q, Q-1} lattice by rate+distortion, with an end-of-block
//! propagation pass that prunes unprofitable tails.

use salsify_core::Raster;

use crate::consts::ZIGZAG;
use crate::encoder::reencode::replay_residuals;
use crate::encoder::{quantize_coefficients, Encoder};
use crate::error::Result;
use crate::frame::Frame;
use crate::quantizer::Quantizer;

/// Approximate rate of a coefficient magnitude, in 1/256-bit units: the
/// token-tree depth plus extra bits plus sign.
fn magnitude_rate(magnitude: u16) -> u32 {
    let tree_bits: u32 = match magnitude {
        0 => 2,
        1 => 3,
        2 => 5,
        3 | 4 => 6,
        5..=6 => 6,    // category 1 + 1 extra bit
        7..=10 => 7,   // category 2 + 2 extra
        11..=18 => 9,  // category 3 + 3 extra
        19..=34 => 10, // category 4 + 4 extra
        35..=66 => 11, // category 5 + 5 extra
        _ => 17,       // category 6 + 11 extra
    };
    (tree_bits + (magnitude != 0) as u32) * 256
}

/// The quantization strategy a residual pass uses.
#[derive(Clone, Copy)]
pub(crate) enum Requantizer {
    Plain,
    Trellis {
        rate_multiplier: u32,
        distortion_multiplier: u32,
    },
}

impl Requantizer {
    pub(crate) fn quantize(
        &self,
        raw: &[i16; 16],
        dc: i16,
        ac: i16,
        first_index: usize,
    ) -> [i16; 16] {
        match *self {
            Requantizer::Plain => {
                let mut out = quantize_coefficients(raw, dc, ac);
                if first_index > 0 {
                    out[0] = 0;
                }
                out
            }
            Requantizer::Trellis {
                rate_multiplier,
                distortion_multiplier,
            } => trellis_quantize(raw, dc, ac, first_index, rate_multiplier, distortion_multiplier),
        }
    }
}

fn rd(rate: u32, distortion: u32, rate_multiplier: u32, distortion_multiplier: u32) -> u64 {
    ((128 + rate.saturating_mul(rate_multiplier)) / 256) as u64
        + distortion as u64 * distortion_multiplier as u64
}

/// Requantize one block given its raw (unquantized) coefficients.
pub(crate) fn trellis_quantize(
    raw: &[i16; 16],
    dc: i16,
    ac: i16,
    first_index: usize,
    rate_multiplier: u32,
    distortion_multiplier: u32,
) -> [i16; 16] {
    let mut levels = [0i16; 16];

    for index in first_index..16 {
        let position = ZIGZAG[index];
        let quantum = if index == 0 { dc } else { ac } as i32;
        let raw_value = raw[position] as i32;

        let plain = raw_value / quantum;
        let reduced = plain - plain.signum();

        let mut best_level = 0i32;
        let mut best_cost = u64::MAX;
        for level in [plain, reduced] {
            let error = raw_value - level * quantum;
            let cost = rd(
                magnitude_rate(level.unsigned_abs() as u16),
                (error * error) as u32,
                rate_multiplier,
                distortion_multiplier,
            );
            if cost < best_cost {
                best_cost = cost;
                best_level = level;
            }
        }
        levels[position] = best_level as i16;
    }

    // end-of-block propagation: zero the tail while the token rate saved
    // outweighs the distortion introduced
    for index in (first_index..16).rev() {
        let position = ZIGZAG[index];
        let level = levels[position] as i32;
        if level == 0 {
            continue;
        }
        let quantum = if index == 0 { dc } else { ac } as i32;
        let raw_value = raw[position] as i32;

        let kept_error = raw_value - level * quantum;
        let kept = rd(
            magnitude_rate(level.unsigned_abs() as u16),
            (kept_error * kept_error) as u32,
            rate_multiplier,
            distortion_multiplier,
        );
        let dropped = rd(
            0,
            (raw_value * raw_value) as u32,
            rate_multiplier,
            distortion_multiplier,
        );
        if dropped <= kept {
            levels[position] = 0;
        } else {
            break;
        }
    }

    levels
}

/// Replay the frame's mode decisions with the trellis quantizer.
pub(crate) fn requantize_frame(
    encoder: &Encoder,
    frame: &mut Frame,
    target: &Raster,
    quantizer: &Quantizer,
) -> Result<()> {
    let requantizer = Requantizer::Trellis {
        rate_multiplier: encoder.rate_multiplier,
        distortion_multiplier: encoder.distortion_multiplier,
    };
    replay_residuals(encoder, frame, target, quantizer, requantizer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trellis_matches_plain_on_exact_multiples() {
        let mut raw = [0i16; 16];
        raw[0] = 80; // 10 * dc
        raw[1] = 24; // 3 * ac
        let levels = trellis_quantize(&raw, 8, 8, 0, 1, 100);
        assert_eq!(levels[0], 10);
        assert_eq!(levels[1], 3);
    }

    #[test]
    fn high_rate_pressure_prefers_smaller_levels() {
        let mut raw = [0i16; 16];
        raw[0] = 84; // between 10*8 and 11*8
        let cheap = trellis_quantize(&raw, 8, 8, 0, 1, 100);
        let pressured = trellis_quantize(&raw, 8, 8, 0, 100_000, 1);
        assert!(pressured[0].abs() <= cheap[0].abs());
    }

    #[test]
    fn tail_noise_is_pruned_under_rate_pressure() {
        let mut raw = [0i16; 16];
        raw[0] = 800;
        // tiny high-frequency coefficient barely above one quantum
        raw[15] = 9;
        let levels = trellis_quantize(&raw, 8, 8, 0, 1000, 1);
        assert_eq!(levels[15], 0);
        assert_ne!(levels[0], 0);
    }
}
