//! Motion vectors and their entropy coding.
//!
//! Components are stored doubled, so a unit step is an eighth of a luma
//! pixel. Luma vectors are always even in this scale (quarter-pel); the
//! chroma vectors derived by averaging may be odd (eighth-pel).

use crate::bool_coder::{BoolDecoder, BoolEncoder};
use crate::consts::{
    MVP_BITS, MVP_IS_SHORT, MVP_SHORT, MVP_SIGN, MV_LONG_WIDTH, MV_PROB_CNT, SMALL_MV_TREE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotionVector {
    pub x: i16,
    pub y: i16,
}

impl MotionVector {
    pub fn new(x: i16, y: i16) -> Self {
        Self { x, y }
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0 && self.y == 0
    }

    /// Whole-pixel part and filter phase of each component.
    pub fn luma_split(&self) -> ((i16, u8), (i16, u8)) {
        (
            (self.x >> 3, (self.x & 7) as u8),
            (self.y >> 3, (self.y & 7) as u8),
        )
    }
}

impl std::ops::Add for MotionVector {
    type Output = MotionVector;

    fn add(self, rhs: MotionVector) -> MotionVector {
        MotionVector::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for MotionVector {
    type Output = MotionVector;

    fn sub(self, rhs: MotionVector) -> MotionVector {
        MotionVector::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::Neg for MotionVector {
    type Output = MotionVector;

    fn neg(self) -> MotionVector {
        MotionVector::new(-self.x, -self.y)
    }
}

/// Decode one component against its 19-entry probability set. The wire codes
/// half the stored value.
pub fn decode_component(decoder: &mut BoolDecoder, probs: &[u8; MV_PROB_CNT]) -> i16 {
    let mut x: u16;

    if decoder.get(probs[MVP_IS_SHORT]) {
        // long form: bits 0..2, then 9 down to 4, then bit 3 unless the
        // value would still round to under 16
        x = 0;
        for i in 0..3 {
            x += (decoder.get(probs[MVP_BITS + i]) as u16) << i;
        }
        for i in (4..MV_LONG_WIDTH).rev() {
            x += (decoder.get(probs[MVP_BITS + i]) as u16) << i;
        }
        if x & 0xfff0 == 0 || decoder.get(probs[MVP_BITS + 3]) {
            x += 1 << 3;
        }
    } else {
        let short_probs: [u8; 7] = probs[MVP_SHORT..MVP_SHORT + 7].try_into().expect("7 probs");
        x = decoder.tree(&SMALL_MV_TREE, &short_probs, 0) as u16;
    }

    let magnitude = x as i16;
    let value = if x != 0 && decoder.get(probs[MVP_SIGN]) {
        -magnitude
    } else {
        magnitude
    };
    value * 2
}

/// Encode one component; exact inverse of `decode_component`.
pub fn encode_component(encoder: &mut BoolEncoder, value: i16, probs: &[u8; MV_PROB_CNT]) {
    let halved = value >> 1;
    let x = halved.unsigned_abs();

    if x < 8 {
        encoder.put(false, probs[MVP_IS_SHORT]);
        let short_probs: [u8; 7] = probs[MVP_SHORT..MVP_SHORT + 7].try_into().expect("7 probs");
        encoder.put_tree(&SMALL_MV_TREE, &short_probs, x as u8, 0);
    } else {
        encoder.put(true, probs[MVP_IS_SHORT]);
        for i in 0..3 {
            encoder.put((x >> i) & 1 != 0, probs[MVP_BITS + i]);
        }
        for i in (4..MV_LONG_WIDTH).rev() {
            encoder.put((x >> i) & 1 != 0, probs[MVP_BITS + i]);
        }
        if x & 0xfff0 != 0 {
            encoder.put((x >> 3) & 1 != 0, probs[MVP_BITS + 3]);
        }
    }

    if x != 0 {
        encoder.put(halved < 0, probs[MVP_SIGN]);
    }
}

pub fn decode_mv(decoder: &mut BoolDecoder, probs: &[[u8; MV_PROB_CNT]; 2]) -> MotionVector {
    let y = decode_component(decoder, &probs[0]);
    let x = decode_component(decoder, &probs[1]);
    MotionVector::new(x, y)
}

pub fn encode_mv(encoder: &mut BoolEncoder, mv: MotionVector, probs: &[[u8; MV_PROB_CNT]; 2]) {
    encode_component(encoder, mv.y, &probs[0]);
    encode_component(encoder, mv.x, &probs[1]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::DEFAULT_MV_PROBS;

    #[test]
    fn component_round_trip() {
        // all values even: luma vectors are quarter-pel in doubled units
        for value in (-400..=400i16).step_by(2) {
            let mut encoder = BoolEncoder::new();
            encode_component(&mut encoder, value, &DEFAULT_MV_PROBS[0]);
            let bytes = encoder.finish();

            let mut decoder = BoolDecoder::new(&bytes);
            assert_eq!(decode_component(&mut decoder, &DEFAULT_MV_PROBS[0]), value);
        }
    }

    #[test]
    fn vector_round_trip() {
        let cases = [
            MotionVector::default(),
            MotionVector::new(2, -2),
            MotionVector::new(-14, 6),
            MotionVector::new(320, -512),
        ];
        for mv in cases {
            let mut encoder = BoolEncoder::new();
            encode_mv(&mut encoder, mv, &DEFAULT_MV_PROBS);
            let bytes = encoder.finish();

            let mut decoder = BoolDecoder::new(&bytes);
            assert_eq!(decode_mv(&mut decoder, &DEFAULT_MV_PROBS), mv);
        }
    }
}
