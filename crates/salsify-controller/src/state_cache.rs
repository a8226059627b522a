//! State caches on both sides of the wire.
//!
//! The sender keeps a map minihash -> Encoder, the receiver minihash ->
//! Decoder. Eviction is ack-driven on the sender (nothing older than the
//! states the receiver can still name as a source survives) and
//! source-driven on the receiver. The initial all-defaults state is never
//! evicted.

use std::collections::{HashMap, VecDeque};

use salsify_codec::{Decoder, Encoder};
use tracing::debug;

/// Sender-side cache of encoders by their target minihash.
pub struct EncoderStateCache {
    initial_state: u32,
    encoders: HashMap<u32, Encoder>,
    /// Insertion order of non-initial states, oldest first.
    order: VecDeque<u32>,
}

impl EncoderStateCache {
    pub fn new(initial: Encoder) -> Self {
        let initial_state = initial.minihash();
        let mut encoders = HashMap::new();
        encoders.insert(initial_state, initial);
        Self {
            initial_state,
            encoders,
            order: VecDeque::new(),
        }
    }

    pub fn initial_state(&self) -> u32 {
        self.initial_state
    }

    pub fn contains(&self, minihash: u32) -> bool {
        self.encoders.contains_key(&minihash)
    }

    pub fn get(&self, minihash: u32) -> Option<&Encoder> {
        self.encoders.get(&minihash)
    }

    pub fn len(&self) -> usize {
        self.encoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encoders.is_empty()
    }

    pub fn insert(&mut self, encoder: Encoder) {
        let minihash = encoder.minihash();
        if minihash == self.initial_state {
            return;
        }
        self.encoders.insert(minihash, encoder);
        self.order.push_back(minihash);
    }

    /// Sliding-window eviction: drop states older than the last-acked (or
    /// currently assumed) state, since the receiver can no longer name
    /// them as a source. The initial state always survives.
    pub fn evict_older_than(&mut self, last_acked: u32, assumed: Option<u32>) {
        if last_acked == self.initial_state || !self.encoders.contains_key(&last_acked) {
            return;
        }

        while let Some(&oldest) = self.order.front() {
            if oldest == last_acked || Some(oldest) == assumed {
                break;
            }
            self.order.pop_front();
            // a minihash can recur; only drop the encoder when no newer
            // entry still names it
            if !self.order.contains(&oldest) {
                self.encoders.remove(&oldest);
                debug!(minihash = format_args!("{oldest:08x}"), "evicted encoder state");
            }
        }
    }
}

/// Receiver-side cache of decoders by their (target) minihash.
pub struct DecoderStateCache {
    initial_state: u32,
    decoders: HashMap<u32, Decoder>,
    complete_states: VecDeque<u32>,
}

impl DecoderStateCache {
    pub fn new(initial: Decoder) -> Self {
        let initial_state = initial.minihash();
        let mut decoders = HashMap::new();
        decoders.insert(initial_state, initial);
        Self {
            initial_state,
            decoders,
            complete_states: VecDeque::new(),
        }
    }

    pub fn initial_state(&self) -> u32 {
        self.initial_state
    }

    pub fn get(&self, minihash: u32) -> Option<&Decoder> {
        self.decoders.get(&minihash)
    }

    pub fn contains(&self, minihash: u32) -> bool {
        self.decoders.contains_key(&minihash)
    }

    /// Record a fully-decoded state.
    pub fn insert_complete(&mut self, decoder: Decoder) {
        let minihash = decoder.minihash();
        if minihash == self.initial_state {
            return;
        }
        self.decoders.insert(minihash, decoder);
        self.complete_states.push_back(minihash);
    }

    /// States to advertise in acks, oldest first.
    pub fn complete_states(&self) -> Vec<u32> {
        self.complete_states.iter().copied().collect()
    }

    /// The sender will never again reference states older than
    /// `source_minihash`; drop them.
    pub fn prune_older_than(&mut self, source_minihash: u32) {
        if source_minihash == self.initial_state {
            return;
        }
        if !self.complete_states.contains(&source_minihash) {
            return;
        }
        while let Some(&oldest) = self.complete_states.front() {
            if oldest == source_minihash {
                break;
            }
            self.complete_states.pop_front();
            if !self.complete_states.contains(&oldest) {
                self.decoders.remove(&oldest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use salsify_codec::EncoderQuality;
    use salsify_core::RasterPool;

    fn encoder_with_frame(pool: &RasterPool, seed: u8) -> Encoder {
        let mut encoder = Encoder::new(32, 32, false, EncoderQuality::Realtime, pool).unwrap();
        let mut raster = pool.take().unwrap().into_raster();
        raster.y.fill(seed);
        encoder.encode_with_quantizer(&raster, 60).unwrap();
        encoder
    }

    #[test]
    fn initial_state_is_permanent() {
        let pool = RasterPool::new(32, 32);
        let initial = Encoder::new(32, 32, false, EncoderQuality::Realtime, &pool).unwrap();
        let initial_hash = initial.minihash();
        let mut cache = EncoderStateCache::new(initial);

        let a = encoder_with_frame(&pool, 10);
        let a_hash = a.minihash();
        cache.insert(a);
        let b = encoder_with_frame(&pool, 200);
        let b_hash = b.minihash();
        cache.insert(b);

        cache.evict_older_than(b_hash, Some(b_hash));
        assert!(cache.contains(initial_hash));
        assert!(cache.contains(b_hash));
        assert!(!cache.contains(a_hash));
    }

    #[test]
    fn eviction_stops_at_assumed_state() {
        let pool = RasterPool::new(32, 32);
        let initial = Encoder::new(32, 32, false, EncoderQuality::Realtime, &pool).unwrap();
        let mut cache = EncoderStateCache::new(initial);

        let hashes: Vec<u32> = (0..3)
            .map(|i| {
                let encoder = encoder_with_frame(&pool, 40 + i * 60);
                let hash = encoder.minihash();
                cache.insert(encoder);
                hash
            })
            .collect();

        // last acked is the newest, but the middle is still assumed
        cache.evict_older_than(hashes[2], Some(hashes[1]));
        assert!(!cache.contains(hashes[0]));
        assert!(cache.contains(hashes[1]));
        assert!(cache.contains(hashes[2]));
    }

    #[test]
    fn unknown_acked_state_evicts_nothing() {
        let pool = RasterPool::new(32, 32);
        let initial = Encoder::new(32, 32, false, EncoderQuality::Realtime, &pool).unwrap();
        let mut cache = EncoderStateCache::new(initial);
        let encoder = encoder_with_frame(&pool, 90);
        let hash = encoder.minihash();
        cache.insert(encoder);

        cache.evict_older_than(0xdeadbeef, None);
        assert!(cache.contains(hash));
    }
}
