//! The per-frame sender controller.
//!
//! Each captured raster is speculatively encoded at two quantizers
//! ("improve" and "fail-small") from a cached source state; whichever
//! candidate fits the instantaneous capacity estimate is transmitted, and
//! its post-encode state joins the cache. When the receiver reports a
//! state the sender no longer holds, the controller spends five seconds in
//! conservative mode, encoding only from states the receiver has
//! acknowledged complete.

use std::time::{Duration, Instant};

use salsify_codec::references::SharedRaster;
use salsify_codec::Encoder;
use salsify_transport::{Ack, CapacityEstimator};
use tracing::{debug, info, warn};

use crate::conventional::ConventionalController;
use crate::error::Result;
use crate::jobs::{EncodeJob, EncodeOutput, EncodePool};
use crate::state_cache::EncoderStateCache;

pub const IMPROVE_DELTA: i16 = -17;
pub const FAIL_SMALL_DELTA: i16 = 23;
pub const QUANTIZER_FLOOR: i16 = 3;
pub const QUANTIZER_CEILING: i16 = 127;
pub const MAX_SKIPPED: usize = 3;
pub const CONSERVATIVE_WINDOW: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    /// Speculative candidates, sequential encode.
    S1,
    /// Speculative candidates, parallel encode.
    S2,
    /// Single candidate with conventional rate control.
    Conventional,
}

fn clamp_quantizer(quantizer: i16) -> u8 {
    quantizer.clamp(QUANTIZER_FLOOR, QUANTIZER_CEILING) as u8
}

/// A frame chosen for transmission.
pub struct SelectedFrame {
    pub frame_no: u32,
    pub bytes: Vec<u8>,
    pub source_minihash: u32,
    pub target_minihash: u32,
    pub job_name: &'static str,
    pub y_ac_qi: u8,
}

pub struct SenderController {
    mode: OperationMode,
    cache: EncoderStateCache,
    pub capacity: CapacityEstimator,
    conventional: ConventionalController,

    last_quantizer: u8,
    skipped_count: usize,
    frame_no: u32,

    conservative_until: Option<Instant>,
    receiver_last_acked_state: Option<u32>,
    receiver_assumed_state: Option<u32>,
    receiver_complete_states: Vec<u32>,
}

impl SenderController {
    pub fn new(base_encoder: Encoder, mode: OperationMode, update_rate: u32, now: Instant) -> Self {
        Self {
            mode,
            cache: EncoderStateCache::new(base_encoder),
            capacity: CapacityEstimator::new(),
            conventional: ConventionalController::new(update_rate, now),
            last_quantizer: salsify_codec::DEFAULT_QUANTIZER,
            skipped_count: 0,
            frame_no: 0,
            conservative_until: None,
            receiver_last_acked_state: None,
            receiver_assumed_state: None,
            receiver_complete_states: Vec::new(),
        }
    }

    pub fn mode(&self) -> OperationMode {
        self.mode
    }

    pub fn frame_no(&self) -> u32 {
        self.frame_no
    }

    pub fn initial_state(&self) -> u32 {
        self.cache.initial_state()
    }

    pub fn in_conservative_mode(&self, now: Instant) -> bool {
        self.conservative_until.map(|until| now < until).unwrap_or(false)
    }

    /// Pick the source state for the next encode, entering conservative
    /// mode when the receiver's acked state is not cached.
    pub fn select_source(&mut self, now: Instant) -> u32 {
        let fallback = || -> u32 {
            // newest state the receiver has acknowledged complete, or the
            // permanent initial state
            self.receiver_complete_states
                .iter()
                .rev()
                .copied()
                .find(|state| self.cache.contains(*state))
                .unwrap_or_else(|| self.cache.initial_state())
        };

        if self.in_conservative_mode(now) {
            return fallback();
        }

        match self.receiver_last_acked_state {
            None => self
                .receiver_assumed_state
                .unwrap_or_else(|| self.cache.initial_state()),
            Some(acked) if !self.cache.contains(acked) => {
                // the receiver is in a state we no longer (or never) had
                warn!(
                    acked = format_args!("{acked:08x}"),
                    "receiver state not cached; entering conservative mode"
                );
                self.conservative_until = Some(now + CONSERVATIVE_WINDOW);
                fallback()
            }
            Some(_) => self
                .receiver_assumed_state
                .unwrap_or_else(|| self.cache.initial_state()),
        }
    }

    /// Build this frame's encode jobs from the chosen source state. Also
    /// runs the ack-driven cache cleanup.
    pub fn prepare_jobs(&mut self, raster: SharedRaster, now: Instant) -> Result<Vec<EncodeJob>> {
        if let (Some(acked), assumed) = (self.receiver_last_acked_state, self.receiver_assumed_state)
        {
            self.cache.evict_older_than(acked, assumed);
        }

        let source = self.select_source(now);
        let encoder = self
            .cache
            .get(source)
            .expect("selected source is cached")
            .clone();

        let jobs = match self.mode {
            OperationMode::Conventional => {
                let quantizer = self
                    .conventional
                    .quantizer_for_frame(now, self.capacity.avg_delay_us());
                vec![EncodeJob {
                    name: "frame",
                    encoder,
                    raster,
                    y_ac_qi: quantizer,
                }]
            }
            OperationMode::S1 | OperationMode::S2 => vec![
                EncodeJob {
                    name: "improve",
                    encoder: encoder.clone(),
                    raster: raster.clone(),
                    y_ac_qi: clamp_quantizer(self.last_quantizer as i16 + IMPROVE_DELTA),
                },
                EncodeJob {
                    name: "fail-small",
                    encoder,
                    raster,
                    y_ac_qi: clamp_quantizer(self.last_quantizer as i16 + FAIL_SMALL_DELTA),
                },
            ],
        };
        Ok(jobs)
    }

    /// Dispatch prepared jobs onto the pool.
    pub fn dispatch(&mut self, pool: &mut EncodePool, raster: SharedRaster, now: Instant) -> Result<()> {
        let jobs = self.prepare_jobs(raster, now)?;
        pool.submit(jobs)
    }

    /// Pick which finished candidate (if any) to transmit. Consumes the
    /// batch; the chosen encoder joins the state cache.
    pub fn select_output(&mut self, mut outputs: Vec<EncodeOutput>) -> Option<SelectedFrame> {
        if outputs.is_empty() {
            warn!(frame_no = self.frame_no, "all encode jobs failed");
            return None;
        }

        let chosen_index = if self.mode == OperationMode::Conventional {
            Some(0)
        } else {
            let budget = self.capacity.target_frame_size();
            match budget {
                // no ack yet: capacity unknown, send the best candidate
                None => Some(
                    outputs
                        .iter()
                        .enumerate()
                        .max_by_key(|(_, o)| o.frame.len())
                        .map(|(i, _)| i)
                        .expect("nonempty"),
                ),
                Some(budget) => {
                    // largest candidate that fits
                    let best = outputs
                        .iter()
                        .enumerate()
                        .filter(|(_, o)| o.frame.len() <= budget)
                        .min_by_key(|(_, o)| budget - o.frame.len())
                        .map(|(i, _)| i);

                    match best {
                        Some(index) => Some(index),
                        None => {
                            let fail_small =
                                outputs.iter().position(|o| o.name == "fail-small");
                            if self.skipped_count < MAX_SKIPPED || fail_small.is_none() {
                                info!(frame_no = self.frame_no, "skipping frame over budget");
                                self.skipped_count += 1;
                                return None;
                            }
                            warn!(
                                frame_no = self.frame_no,
                                "too many skips; sending fail-small regardless"
                            );
                            fail_small
                        }
                    }
                }
            }
        };

        let EncodeOutput {
            name,
            encoder,
            frame,
            source_minihash,
            y_ac_qi,
            encode_time: _,
        } = outputs.swap_remove(chosen_index?);
        let target_minihash = encoder.minihash();

        debug!(
            frame_no = self.frame_no,
            job = name,
            bytes = frame.len(),
            source = format_args!("{source_minihash:08x}"),
            target = format_args!("{target_minihash:08x}"),
            "selected frame"
        );

        self.last_quantizer = y_ac_qi;
        self.receiver_assumed_state = Some(target_minihash);
        self.skipped_count = 0;

        let selected = SelectedFrame {
            frame_no: self.frame_no,
            bytes: frame,
            source_minihash,
            target_minihash,
            job_name: name,
            y_ac_qi,
        };

        self.cache.insert(encoder);
        self.frame_no += 1;
        Some(selected)
    }

    /// Record that the selected frame left as `fragment_count` fragments.
    pub fn frame_sent(&mut self, fragment_count: u16) {
        self.capacity.frame_sent(fragment_count);
    }

    /// Fold in one ack; stale acks are ignored wholesale.
    pub fn process_ack(&mut self, ack: &Ack) {
        if !self.capacity.process_ack(ack) {
            return;
        }
        self.receiver_last_acked_state = Some(ack.current_state);
        self.receiver_complete_states = ack.complete_states.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use salsify_codec::EncoderQuality;
    use salsify_core::RasterPool;
    use std::sync::Arc;

    fn controller(pool: &RasterPool) -> SenderController {
        let encoder = Encoder::new(32, 32, false, EncoderQuality::Realtime, pool).unwrap();
        SenderController::new(encoder, OperationMode::S2, 1, Instant::now())
    }

    fn ack_with(current_state: u32, complete: Vec<u32>, avg_delay: u32) -> Ack {
        Ack {
            connection_id: 1,
            frame_no: 0,
            fragment_no: 0,
            avg_delay_us: avg_delay,
            current_state,
            complete_states: complete,
        }
    }

    fn run_frame(
        controller: &mut SenderController,
        pool: &RasterPool,
        encode_pool: &mut EncodePool,
        seed: u8,
    ) -> Option<SelectedFrame> {
        let mut handle = pool.take().unwrap();
        handle.y.fill(seed);
        let raster: SharedRaster = Arc::new(handle);
        controller
            .dispatch(encode_pool, raster, Instant::now())
            .unwrap();
        let outputs = encode_pool.collect_batch();
        let selected = controller.select_output(outputs);
        if let Some(frame) = &selected {
            controller.frame_sent(frame.bytes.len().div_ceil(1400) as u16);
        }
        selected
    }

    #[test]
    fn improve_and_fail_small_quantizers_clamp() {
        assert_eq!(clamp_quantizer(64 + IMPROVE_DELTA), 47);
        assert_eq!(clamp_quantizer(64 + FAIL_SMALL_DELTA), 87);
        assert_eq!(clamp_quantizer(2 + IMPROVE_DELTA), 3);
        assert_eq!(clamp_quantizer(120 + FAIL_SMALL_DELTA), 127);
    }

    #[test]
    fn first_frame_encodes_from_initial_state() {
        let pool = RasterPool::new(32, 32);
        let mut controller = controller(&pool);
        let mut encode_pool = EncodePool::new();

        let frame = run_frame(&mut controller, &pool, &mut encode_pool, 100).unwrap();
        assert_eq!(frame.frame_no, 0);
        assert_eq!(frame.source_minihash, controller.initial_state());
        assert_ne!(frame.target_minihash, frame.source_minihash);
    }

    #[test]
    fn cache_miss_triggers_conservative_recovery() {
        let pool = RasterPool::new(32, 32);
        let mut controller = controller(&pool);
        let mut encode_pool = EncodePool::new();

        // ship a few frames so the cache has real states
        for seed in 0..3 {
            run_frame(&mut controller, &pool, &mut encode_pool, seed * 50).unwrap();
        }

        // the receiver reports a state we never produced
        controller.process_ack(&ack_with(0xdead_beef, Vec::new(), 1000));

        let now = Instant::now();
        let source = controller.select_source(now);
        assert!(controller.in_conservative_mode(now));
        // nothing acked complete, so recovery goes to the initial state
        assert_eq!(source, controller.initial_state());

        // the next emitted frame must start from that state
        let frame = run_frame(&mut controller, &pool, &mut encode_pool, 222).unwrap();
        assert_eq!(frame.source_minihash, controller.initial_state());
    }

    #[test]
    fn conservative_mode_prefers_acked_complete_states() {
        let pool = RasterPool::new(32, 32);
        let mut controller = controller(&pool);
        let mut encode_pool = EncodePool::new();

        let first = run_frame(&mut controller, &pool, &mut encode_pool, 10).unwrap();

        // receiver acked the first frame complete, then reported an
        // unknown current state
        controller.process_ack(&ack_with(
            0x1111_2222,
            vec![first.target_minihash],
            1000,
        ));

        let source = controller.select_source(Instant::now());
        assert_eq!(source, first.target_minihash);
    }

    #[test]
    fn over_budget_frames_skip_until_limit() {
        let pool = RasterPool::new(32, 32);
        let mut controller = controller(&pool);
        let mut encode_pool = EncodePool::new();

        run_frame(&mut controller, &pool, &mut encode_pool, 40).unwrap();

        // an ack with an enormous arrival interval collapses the budget
        controller.process_ack(&ack_with(0, Vec::new(), u32::MAX));
        // also re-point the sender at a state it definitely has
        controller.receiver_last_acked_state = None;

        let mut skips = 0;
        loop {
            match run_frame(&mut controller, &pool, &mut encode_pool, 90 + skips as u8) {
                None => skips += 1,
                Some(frame) => {
                    // after MAX_SKIPPED skips the fail-small candidate goes out
                    assert_eq!(frame.job_name, "fail-small");
                    break;
                }
            }
            assert!(skips <= MAX_SKIPPED, "never forced a frame out");
        }
        assert_eq!(skips, MAX_SKIPPED);
    }
}
