//! Inter-packet arrival estimation (receiver side) and the sender's
//! encoding-time average. Both are EWMAs with alpha 0.1; the arrival
//! estimator restarts after a gap rather than mixing a stale sample in.

const ALPHA: f64 = 0.1;

/// Reset threshold: silence longer than this starts a fresh estimate.
const GAP_RESET_US: u64 = 200_000;

/// EWMA over inter-packet arrival intervals. Each sample subtracts the
/// sender-declared grace (the intended inter-frame gap), so frame pacing
/// does not read as congestion.
#[derive(Debug, Default)]
pub struct AverageInterPacketDelay {
    value: Option<f64>,
    last_update_us: u64,
}

impl AverageInterPacketDelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one packet arrival at `timestamp_us` with `grace` microseconds
    /// of declared gap.
    pub fn add(&mut self, timestamp_us: u64, grace: u32) {
        match self.value {
            None => self.value = Some(0.0),
            Some(current) => {
                let elapsed = timestamp_us.saturating_sub(self.last_update_us);
                let sample = elapsed.saturating_sub(grace as u64) as f64;
                if elapsed > GAP_RESET_US {
                    // long gap: the link was idle, restart rather than mix
                    self.value = Some(sample);
                } else {
                    self.value = Some(ALPHA * sample + (1.0 - ALPHA) * current);
                }
            }
        }
        self.last_update_us = timestamp_us;
    }

    pub fn value_us(&self) -> u32 {
        self.value.map(|v| v as u32).unwrap_or(0)
    }
}

/// EWMA over the sender's per-frame encode turnaround, reset after a
/// second of idleness.
#[derive(Debug, Default)]
pub struct AverageEncodingTime {
    value: Option<f64>,
    last_update_us: u64,
}

impl AverageEncodingTime {
    const RESET_US: u64 = 1_000_000;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, timestamp_us: u64) {
        match self.value {
            None => self.value = Some(0.0),
            Some(current) => {
                let elapsed = timestamp_us.saturating_sub(self.last_update_us);
                if elapsed > Self::RESET_US {
                    self.value = Some(0.0);
                } else {
                    self.value = Some(ALPHA * elapsed as f64 + (1.0 - ALPHA) * current);
                }
            }
        }
        self.last_update_us = timestamp_us;
    }

    pub fn value_us(&self) -> u32 {
        self.value.map(|v| v as u32).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_initializes_to_zero() {
        let mut delay = AverageInterPacketDelay::new();
        delay.add(1_000_000, 0);
        assert_eq!(delay.value_us(), 0);
    }

    #[test]
    fn steady_arrivals_converge() {
        let mut delay = AverageInterPacketDelay::new();
        let mut now = 0u64;
        for _ in 0..200 {
            delay.add(now, 0);
            now += 1000;
        }
        let value = delay.value_us();
        assert!((900..=1000).contains(&value), "converged to {value}");
    }

    #[test]
    fn grace_is_subtracted() {
        let mut delay = AverageInterPacketDelay::new();
        let mut now = 0u64;
        for _ in 0..200 {
            delay.add(now, 900);
            now += 1000;
        }
        assert!(delay.value_us() <= 100);
    }

    #[test]
    fn long_gap_resets_instead_of_mixing() {
        let mut delay = AverageInterPacketDelay::new();
        let mut now = 0u64;
        for _ in 0..50 {
            delay.add(now, 0);
            now += 1000;
        }

        // half a second of silence, then a 2 ms cadence: the new sample
        // replaces the estimate outright
        now += 500_000;
        delay.add(now, 0);
        assert!(delay.value_us() >= 400_000, "got {}", delay.value_us());
    }

    #[test]
    fn encoding_time_tracks_cadence() {
        let mut average = AverageEncodingTime::new();
        let mut now = 0u64;
        for _ in 0..100 {
            average.add(now);
            now += 30_000;
        }
        let value = average.value_us();
        assert!((25_000..=30_000).contains(&value), "got {value}");
    }
}
