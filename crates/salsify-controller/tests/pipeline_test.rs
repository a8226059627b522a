//! End-to-end pipeline: controller -> fragmentation -> reassembly ->
//! decoder cache, with acks closing the loop. No sockets; the "network"
//! is a function call.

use std::sync::Arc;
use std::time::Instant;

use salsify_codec::references::SharedRaster;
use salsify_codec::{Decoder, Encoder, EncoderQuality};
use salsify_controller::{
    DecoderStateCache, EncodePool, OperationMode, SelectedFrame, SenderController,
};
use salsify_core::RasterPool;
use salsify_transport::{fragment_frame, Ack, Fragment, Reassembler, ReassemblyEvent};

const WIDTH: u16 = 64;
const HEIGHT: u16 = 48;

struct Receiver {
    pool: RasterPool,
    decoder: Decoder,
    cache: DecoderStateCache,
    reassembler: Reassembler,
    initial_state: u32,
    current_state: u32,
    frames_displayed: usize,
}

impl Receiver {
    fn new() -> Self {
        let pool = RasterPool::new(WIDTH, HEIGHT);
        let decoder = Decoder::new(WIDTH, HEIGHT, &pool).unwrap();
        let initial_state = decoder.minihash();
        Self {
            cache: DecoderStateCache::new(decoder.clone()),
            decoder,
            pool,
            reassembler: Reassembler::new(),
            initial_state,
            current_state: initial_state,
            frames_displayed: 0,
        }
    }

    /// Process one datagram, returning the ack it emits.
    fn receive(&mut self, fragment: Fragment) -> Ack {
        let (frame_no, fragment_no) = (fragment.frame_no, fragment.fragment_no);

        if let ReassemblyEvent::Frames(frames) = self.reassembler.receive(fragment).unwrap() {
            for frame in frames {
                if self.current_state != frame.source_minihash {
                    match self.cache.get(frame.source_minihash) {
                        Some(cached) => self.decoder = cached.clone(),
                        None => continue, // cache miss; the ack reveals it
                    }
                }
                self.cache.prune_older_than(frame.source_minihash);

                if let Ok(_raster) = self.decoder.decode_frame(&frame.bytes, &self.pool) {
                    self.frames_displayed += 1;
                    self.current_state = self.decoder.minihash();
                    if frame.complete
                        && self.current_state == frame.target_minihash
                        && self.current_state != self.initial_state
                    {
                        self.cache.insert_complete(self.decoder.clone());
                    }
                } else {
                    self.current_state = self.decoder.minihash();
                }
            }
        }

        Ack {
            connection_id: 7,
            frame_no,
            fragment_no,
            avg_delay_us: 1000,
            current_state: self.current_state,
            complete_states: self.cache.complete_states(),
        }
    }
}

fn run_sender_frame(
    controller: &mut SenderController,
    encode_pool: &mut EncodePool,
    pool: &RasterPool,
    seed: u8,
) -> Option<SelectedFrame> {
    let mut handle = pool.take().unwrap();
    for row in 0..HEIGHT as usize {
        for column in 0..WIDTH as usize {
            handle
                .y
                .set(column, row, ((row + column) * seed as usize % 256) as u8);
        }
    }
    let raster: SharedRaster = Arc::new(handle);
    controller
        .dispatch(encode_pool, raster, Instant::now())
        .unwrap();
    let outputs = encode_pool.collect_batch();
    let selected = controller.select_output(outputs);
    if let Some(frame) = &selected {
        controller.frame_sent(frame.bytes.len().div_ceil(1400).max(1) as u16);
    }
    selected
}

fn fragments_for(frame: &SelectedFrame) -> Vec<Fragment> {
    fragment_frame(
        &frame.bytes,
        7,
        frame.source_minihash,
        frame.target_minihash,
        frame.frame_no,
        0,
    )
    .unwrap()
}

#[test]
fn lossless_session_stays_in_sync() {
    let pool = RasterPool::new(WIDTH, HEIGHT);
    let base = Encoder::new(WIDTH, HEIGHT, false, EncoderQuality::Realtime, &pool).unwrap();
    let mut controller = SenderController::new(base, OperationMode::S2, 1, Instant::now());
    let mut encode_pool = EncodePool::new();
    let mut receiver = Receiver::new();

    for seed in 1..6u8 {
        let frame = run_sender_frame(&mut controller, &mut encode_pool, &pool, seed).unwrap();
        for fragment in fragments_for(&frame) {
            let ack = receiver.receive(fragment);
            controller.process_ack(&ack);
        }
        // after every frame the receiver sits on the declared target
        assert_eq!(receiver.current_state, frame.target_minihash);
    }

    assert_eq!(receiver.frames_displayed, 5);
    assert!(!controller.in_conservative_mode(Instant::now()));
}

#[test]
fn cache_miss_ack_recovers_through_conservative_mode() {
    let pool = RasterPool::new(WIDTH, HEIGHT);
    let base = Encoder::new(WIDTH, HEIGHT, false, EncoderQuality::Realtime, &pool).unwrap();
    let mut controller = SenderController::new(base, OperationMode::S2, 1, Instant::now());
    let mut encode_pool = EncodePool::new();
    let mut receiver = Receiver::new();

    // frame 0 arrives fine; the receiver now holds its target complete
    let first = run_sender_frame(&mut controller, &mut encode_pool, &pool, 1).unwrap();
    for fragment in fragments_for(&first) {
        let ack = receiver.receive(fragment);
        controller.process_ack(&ack);
    }
    assert_eq!(receiver.current_state, first.target_minihash);

    // frame 1 is lost entirely; the sender assumed its target anyway
    let lost = run_sender_frame(&mut controller, &mut encode_pool, &pool, 2).unwrap();
    assert_eq!(lost.frame_no, 1);

    // a fresh (non-stale) ack arrives whose current_state the sender does
    // not hold, while still naming frame 0's target as complete
    controller.process_ack(&Ack {
        connection_id: 7,
        frame_no: 1,
        fragment_no: 0,
        avg_delay_us: 1000,
        current_state: 0xbaad_f00d,
        complete_states: vec![first.target_minihash],
    });

    // conservative mode: the next frame sources from the newest
    // acknowledged complete state, which the receiver really has
    let recovery = run_sender_frame(&mut controller, &mut encode_pool, &pool, 4).unwrap();
    assert!(controller.in_conservative_mode(Instant::now()));
    assert_eq!(recovery.source_minihash, first.target_minihash);
    assert_eq!(recovery.frame_no, 2);

    for fragment in fragments_for(&recovery) {
        let ack = receiver.receive(fragment);
        controller.process_ack(&ack);
    }
    assert_eq!(receiver.current_state, recovery.target_minihash);
    assert_eq!(receiver.frames_displayed, 2);
}

#[test]
fn sender_cache_covers_every_advertised_complete_state() {
    let pool = RasterPool::new(WIDTH, HEIGHT);
    let base = Encoder::new(WIDTH, HEIGHT, false, EncoderQuality::Realtime, &pool).unwrap();
    let mut controller = SenderController::new(base, OperationMode::S2, 1, Instant::now());
    let mut encode_pool = EncodePool::new();
    let mut receiver = Receiver::new();

    let mut last_ack = None;
    for seed in 1..5u8 {
        let frame = run_sender_frame(&mut controller, &mut encode_pool, &pool, seed).unwrap();
        for fragment in fragments_for(&frame) {
            let ack = receiver.receive(fragment);
            controller.process_ack(&ack);
            last_ack = Some(ack);
        }
    }

    // every state the receiver still advertises as complete is one the
    // sender holds: pointing the ack at any of them must not trip the
    // conservative-mode recovery
    let ack = last_ack.unwrap();
    assert!(!ack.complete_states.is_empty());
    let now = Instant::now();
    for state in &ack.complete_states {
        controller.process_ack(&Ack {
            current_state: *state,
            ..ack.clone()
        });
        controller.select_source(now);
        assert!(!controller.in_conservative_mode(now));
    }
}
