use rand::Rng;
use std::time::Duration;

/// Exponential reconnect delay with a ceiling and additive jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub max_ms: u64,
    pub jitter_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 2000,
            max_ms: 30_000,
            jitter_ms: 500,
        }
    }
}

impl BackoffConfig {
    /// Delay before reconnect attempt `attempt` (1-based): base * 2^(attempt - 1),
    /// capped at `max_ms`, plus uniform jitter in `0..=jitter_ms`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let capped = self.capped_ms(attempt);
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        };
        Duration::from_millis(capped + jitter)
    }

    fn capped_ms(&self, attempt: u32) -> u64 {
        let shift = attempt.saturating_sub(1).min(32);
        let raw = self.base_ms.saturating_mul(1u64 << shift);
        raw.min(self.max_ms.max(self.base_ms))
    }
}
