use rand::Rng;
use std::time::Duration;

/// Capped exponential backoff with upward jitter.
///
/// `delay(n) = min(base * 2^n, max)`, then up to `jitter_percent` of that is
/// added on top, so the result always lies in `[delay, delay * (1 + p)]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter_percent: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(15 * 60), 30)
    }
}

impl Backoff {
    pub const fn new(base: Duration, max: Duration, jitter_percent: u64) -> Self {
        Self {
            base,
            max,
            jitter_percent,
        }
    }

    /// Delay before jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        let shift = attempt.min(32);
        Duration::from_millis(base_ms.saturating_mul(1u64 << shift).min(max_ms))
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(attempt, &mut rng)
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let exp = self.base_delay(attempt);
        let exp_ms = u64::try_from(exp.as_millis()).unwrap_or(u64::MAX);
        let jitter_max = exp_ms.saturating_mul(self.jitter_percent) / 100;
        let jitter = if jitter_max == 0 {
            0
        } else {
            rng.gen_range(0..=jitter_max)
        };
        exp + Duration::from_millis(jitter)
    }
}
