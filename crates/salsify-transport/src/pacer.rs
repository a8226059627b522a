//! FIFO pacer for outgoing datagrams.
//!
//! Packets join the queue with an inter-send delay derived from the
//! receiver's reported inter-arrival interval (one fifth of it, clamped to
//! [500 µs, 2000 µs]). The first packet of an idle queue is due
//! immediately; later ones at monotonically increasing times.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const MIN_INTER_SEND_DELAY_US: u32 = 500;
pub const MAX_INTER_SEND_DELAY_US: u32 = 2000;

/// Inter-send delay for a reported average inter-arrival interval: send
/// five times faster than packets arrive, within the clamp.
pub fn inter_send_delay_us(avg_delay_us: u32) -> u32 {
    (avg_delay_us / 5).clamp(MIN_INTER_SEND_DELAY_US, MAX_INTER_SEND_DELAY_US)
}

struct ScheduledPacket {
    due: Instant,
    payload: Vec<u8>,
}

#[derive(Default)]
pub struct Pacer {
    queue: VecDeque<ScheduledPacket>,
}

impl Pacer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Enqueue a serialized packet, `delay_us` after the previous one.
    pub fn push(&mut self, payload: Vec<u8>, delay_us: u32, now: Instant) {
        let due = match self.queue.back() {
            Some(last) => last.due + Duration::from_micros(delay_us as u64),
            None => now,
        };
        self.queue.push_back(ScheduledPacket { due, payload });
    }

    /// Time until the front packet is due; a capped poll interval when the
    /// queue is empty, so a bookkeeping bug surfaces within a second.
    pub fn time_until_due(&self, now: Instant) -> Duration {
        match self.queue.front() {
            Some(front) => front.due.saturating_duration_since(now),
            None => Duration::from_secs(1),
        }
    }

    /// Pop every packet currently due; drained in one burst by the socket
    /// writer.
    pub fn pop_due(&mut self, now: Instant) -> Vec<Vec<u8>> {
        let mut due = Vec::new();
        while let Some(front) = self.queue.front() {
            if front.due > now {
                break;
            }
            due.push(self.queue.pop_front().expect("front checked").payload);
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_clamps_low_and_high() {
        assert_eq!(inter_send_delay_us(100), 500);
        assert_eq!(inter_send_delay_us(2500), 500);
        assert_eq!(inter_send_delay_us(5000), 1000);
        assert_eq!(inter_send_delay_us(20_000), 2000);
        assert_eq!(inter_send_delay_us(u32::MAX), 2000);
    }

    #[test]
    fn first_packet_is_due_immediately() {
        let now = Instant::now();
        let mut pacer = Pacer::new();
        pacer.push(vec![1], 1000, now);
        assert_eq!(pacer.time_until_due(now), Duration::ZERO);
    }

    #[test]
    fn subsequent_packets_space_out() {
        let now = Instant::now();
        let mut pacer = Pacer::new();
        pacer.push(vec![1], 1000, now);
        pacer.push(vec![2], 1000, now);
        pacer.push(vec![3], 1000, now);

        // only the first is due at t=0
        assert_eq!(pacer.pop_due(now).len(), 1);
        // the rest become due as time passes
        let later = now + Duration::from_micros(1000);
        assert_eq!(pacer.pop_due(later).len(), 1);
        let much_later = now + Duration::from_micros(10_000);
        assert_eq!(pacer.pop_due(much_later).len(), 1);
        assert!(pacer.is_empty());
    }

    #[test]
    fn burst_drains_all_due_packets() {
        let now = Instant::now();
        let mut pacer = Pacer::new();
        for i in 0..5u8 {
            pacer.push(vec![i], 500, now);
        }
        let later = now + Duration::from_micros(5_000);
        assert_eq!(pacer.pop_due(later).len(), 5);
    }

    #[test]
    fn empty_queue_polls_within_a_second() {
        let pacer = Pacer::new();
        assert_eq!(pacer.time_until_due(Instant::now()), Duration::from_secs(1));
    }

    #[test]
    fn front_is_never_due_beyond_the_clamp() {
        // with a known avg_delay, the head of a nonempty queue is due
        // within the maximum inter-send delay
        let now = Instant::now();
        let mut pacer = Pacer::new();
        let delay = inter_send_delay_us(100_000);
        pacer.push(vec![0], delay, now);
        pacer.push(vec![1], delay, now);
        pacer.pop_due(now);
        assert!(pacer.time_until_due(now) <= Duration::from_micros(MAX_INTER_SEND_DELAY_US as u64));
    }
}
