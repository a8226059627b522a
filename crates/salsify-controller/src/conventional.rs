//! Conventional-codec rate control: a single encode per frame with a
//! quantizer steered by the reported arrival rate, updated at a fixed
//! cadence.

use std::time::{Duration, Instant};

use tracing::debug;

pub struct ConventionalController {
    update_interval: Option<Duration>,
    next_update: Instant,
    quantizer: u8,
    rate_ewma: f64,
}

impl ConventionalController {
    /// `update_rate` is updates per second; zero disables adaptation.
    pub fn new(update_rate: u32, now: Instant) -> Self {
        let update_interval =
            (update_rate > 0).then(|| Duration::from_nanos(1_000_000_000 / update_rate as u64));
        Self {
            update_interval,
            next_update: now,
            quantizer: 32,
            rate_ewma: 0.0,
        }
    }

    pub fn quantizer(&self) -> u8 {
        self.quantizer
    }

    /// Possibly update the quantizer from the arrival-rate estimate, then
    /// return the quantizer to use for this frame.
    pub fn quantizer_for_frame(&mut self, now: Instant, avg_delay_us: Option<u32>) -> u8 {
        let Some(interval) = self.update_interval else {
            return self.quantizer;
        };
        let Some(avg_delay_us) = avg_delay_us else {
            return self.quantizer;
        };
        if now < self.next_update {
            return self.quantizer;
        }

        // achievable rate in bytes per second at the reported spacing
        let rate = 1_000_000.0 * 1400.0 / avg_delay_us.max(1) as f64;
        let change = if self.rate_ewma > 0.0 {
            ((rate - self.rate_ewma) / self.rate_ewma).clamp(-1.0, 1.5)
        } else {
            0.0
        };

        let old = self.quantizer;
        if change < -0.99 {
            // rate collapsed: go straight to the coarsest quantizer
            self.quantizer = 127;
        } else {
            let qalpha = 0.75;
            let scaled = self.quantizer as f64 / (change + 1.0).powf(1.0 / qalpha);
            self.quantizer = (scaled as i32).clamp(3, 127) as u8;
        }

        self.rate_ewma = 0.8 * rate + 0.2 * self.rate_ewma;
        self.next_update = now + interval;

        debug!(
            old_quantizer = old,
            new_quantizer = self.quantizer,
            rate_kb = (rate / 1000.0) as u64,
            change = format_args!("{change:.2}"),
            "conventional-mode quantizer update"
        );
        self.quantizer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_updates_keep_the_default() {
        let now = Instant::now();
        let mut controller = ConventionalController::new(0, now);
        assert_eq!(controller.quantizer_for_frame(now, Some(100)), 32);
        assert_eq!(controller.quantizer_for_frame(now, Some(100_000)), 32);
    }

    #[test]
    fn rising_rate_refines_the_quantizer() {
        let now = Instant::now();
        let mut controller = ConventionalController::new(1000, now);

        // establish a baseline rate
        controller.quantizer_for_frame(now, Some(10_000));
        // a much faster link on the next update drives the quantizer down
        let later = now + Duration::from_millis(10);
        let q = controller.quantizer_for_frame(later, Some(1000));
        assert!(q < 32, "expected refinement, got {q}");
    }

    #[test]
    fn rate_collapse_jumps_to_coarsest() {
        let now = Instant::now();
        let mut controller = ConventionalController::new(1000, now);
        controller.quantizer_for_frame(now, Some(100));

        // two orders of magnitude slower than the EWMA
        let later = now + Duration::from_millis(10);
        let q = controller.quantizer_for_frame(later, Some(4_000_000));
        assert_eq!(q, 127);
    }
}
