//! Encoder/decoder round trips: every frame an encoder emits must decode,
//! land the decoder on the declared target state, and reproduce the
//! encoder's own reconstruction.

use salsify_codec::{Decoder, Encoder, EncoderQuality};
use salsify_core::{Raster, RasterPool};

fn gray_raster(pool: &RasterPool) -> Raster {
    let handle = pool.take().unwrap();
    let mut raster = handle.into_raster();
    raster.y.fill(128);
    raster.u.fill(128);
    raster.v.fill(128);
    raster
}

fn textured_raster(pool: &RasterPool, seed: u32) -> Raster {
    let handle = pool.take().unwrap();
    let mut raster = handle.into_raster();
    let mut state = seed | 1;
    for row in 0..raster.y.height() {
        for column in 0..raster.y.width() {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            // low-frequency gradient plus mild noise, so inter prediction
            // has something to find
            let value = (row * 2 + column + (state >> 28) as usize) % 256;
            raster.y.set(column, row, value as u8);
        }
    }
    for row in 0..raster.u.height() {
        for column in 0..raster.u.width() {
            raster.u.set(column, row, ((row * 3 + column) % 200 + 20) as u8);
            raster.v.set(column, row, ((row + column * 2) % 180 + 40) as u8);
        }
    }
    raster
}

#[test]
fn gray_keyframe_round_trip() {
    let pool = RasterPool::new(16, 16);
    let mut encoder = Encoder::new(16, 16, false, EncoderQuality::Realtime, &pool).unwrap();
    let raster = gray_raster(&pool);

    let bytes = encoder.encode_with_quantizer(&raster, 40).unwrap();
    assert!(!bytes.is_empty());

    let mut decoder = Decoder::new(16, 16, &pool).unwrap();
    let decoded = decoder.decode_frame(&bytes, &pool).unwrap();

    // an all-gray source survives within one step of quantization
    for row in 0..16 {
        for column in 0..16 {
            let y = decoded.y.at(column, row) as i32;
            assert!((y - 128).abs() <= 1, "Y[{column},{row}] = {y}");
        }
    }
    for row in 0..8 {
        for column in 0..8 {
            assert!((decoded.u.at(column, row) as i32 - 128).abs() <= 1);
            assert!((decoded.v.at(column, row) as i32 - 128).abs() <= 1);
        }
    }

    // the decoder lands exactly on the encoder's target state
    assert_eq!(decoder.minihash(), encoder.minihash());
}

#[test]
fn decoded_dimensions_match_source() {
    let pool = RasterPool::new(80, 48);
    let mut encoder = Encoder::new(80, 48, false, EncoderQuality::Realtime, &pool).unwrap();
    let raster = textured_raster(&pool, 7);

    let bytes = encoder.encode_with_quantizer(&raster, 60).unwrap();
    let mut decoder = Decoder::new(80, 48, &pool).unwrap();
    let decoded = decoder.decode_frame(&bytes, &pool).unwrap();

    assert_eq!(decoded.display_width(), 80);
    assert_eq!(decoded.display_height(), 48);
}

#[test]
fn frame_sequence_reaches_declared_targets() {
    let pool = RasterPool::new(64, 48);
    let mut encoder = Encoder::new(64, 48, false, EncoderQuality::Realtime, &pool).unwrap();
    let mut decoder = Decoder::new(64, 48, &pool).unwrap();

    assert_eq!(encoder.minihash(), decoder.minihash());

    for seed in 1..5u32 {
        let raster = textured_raster(&pool, seed);
        let source_minihash = encoder.minihash();
        let bytes = encoder.encode_with_quantizer(&raster, 50).unwrap();
        let target_minihash = encoder.minihash();

        assert_eq!(decoder.minihash(), source_minihash);
        decoder.decode_frame(&bytes, &pool).unwrap();
        assert_eq!(decoder.minihash(), target_minihash);
    }
}

#[test]
fn decoder_reconstruction_matches_encoder_references() {
    let pool = RasterPool::new(64, 48);
    let mut encoder = Encoder::new(64, 48, false, EncoderQuality::Realtime, &pool).unwrap();
    let mut decoder = Decoder::new(64, 48, &pool).unwrap();

    for seed in 1..4u32 {
        let raster = textured_raster(&pool, seed * 11);
        let bytes = encoder.encode_with_quantizer(&raster, 64).unwrap();
        let decoded = decoder.decode_frame(&bytes, &pool).unwrap();

        // byte-identical to the encoder's internal reconstruction
        assert_eq!(
            decoded.hash64(),
            encoder.export_decoder().references().last.hash64()
        );
    }
}

#[test]
fn tiny_frame_pads_to_one_macroblock() {
    let pool = RasterPool::new(1, 1);
    let mut encoder = Encoder::new(1, 1, false, EncoderQuality::Realtime, &pool).unwrap();
    let raster = gray_raster(&pool);

    let bytes = encoder.encode_with_quantizer(&raster, 30).unwrap();
    let mut decoder = Decoder::new(1, 1, &pool).unwrap();
    let decoded = decoder.decode_frame(&bytes, &pool).unwrap();

    assert_eq!(decoded.display_width(), 1);
    assert_eq!(decoded.display_height(), 1);
    assert_eq!(decoded.y.width(), 16);
    assert_eq!(decoded.y.height(), 16);
}

#[test]
fn size_shrinks_as_quantizer_grows() {
    let pool = RasterPool::new(64, 48);
    let raster = textured_raster(&pool, 3);

    let mut sizes = Vec::new();
    for q in [10u8, 40, 80, 120] {
        let mut encoder = Encoder::new(64, 48, false, EncoderQuality::Realtime, &pool).unwrap();
        sizes.push(encoder.encode_with_quantizer(&raster, q).unwrap().len());
    }

    for pair in sizes.windows(2) {
        assert!(pair[0] >= pair[1], "sizes not non-increasing: {sizes:?}");
    }
}

#[test]
fn quality_shrinks_as_quantizer_grows() {
    let pool = RasterPool::new(64, 48);
    let raster = textured_raster(&pool, 9);

    let mut ssims = Vec::new();
    for q in [10u8, 120] {
        let mut encoder = Encoder::new(64, 48, false, EncoderQuality::Realtime, &pool).unwrap();
        let bytes = encoder.encode_with_quantizer(&raster, q).unwrap();
        let mut decoder = Decoder::new(64, 48, &pool).unwrap();
        let decoded = decoder.decode_frame(&bytes, &pool).unwrap();
        ssims.push(salsify_metrics::raster_ssim(&raster, &decoded).unwrap());
    }

    assert!(
        ssims[0] >= ssims[1],
        "SSIM should not improve with coarser quantization: {ssims:?}"
    );
}

#[test]
fn wrong_dimension_frame_is_rejected() {
    let pool = RasterPool::with_options(64, 48, true);
    let mut encoder = Encoder::new(64, 48, false, EncoderQuality::Realtime, &pool).unwrap();
    let raster = textured_raster(&pool, 5);
    let bytes = encoder.encode_with_quantizer(&raster, 50).unwrap();

    let mut decoder = Decoder::new(32, 32, &pool).unwrap();
    assert!(decoder.decode_frame(&bytes, &pool).is_err());
}

#[test]
fn target_size_mode_respects_budget_direction() {
    let pool = RasterPool::new(64, 48);
    let raster = textured_raster(&pool, 21);

    let mut tight = Encoder::new(64, 48, false, EncoderQuality::Realtime, &pool).unwrap();
    let small = tight.encode_with_target_size(&raster, 400).unwrap();

    let mut loose = Encoder::new(64, 48, false, EncoderQuality::Realtime, &pool).unwrap();
    let large = loose.encode_with_target_size(&raster, 100_000).unwrap();

    assert!(small.len() <= large.len());
}
