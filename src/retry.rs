// src/retry.rs
// Bounded retry schedule. The delay is a pure function of the attempt
// number (base doubling per attempt, capped), so callers can unit-test the
// schedule without sleeping.

use std::time::Duration;

pub const DEFAULT_MAX_DELAY_SECS: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_secs: f64,
    pub max_delay_secs: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_secs: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_secs,
            max_delay_secs: DEFAULT_MAX_DELAY_SECS,
        }
    }

    /// Delay to wait after the `attempt`-th failure (1-based):
    /// `base * 2^(attempt-1)`, capped at `max_delay_secs`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let secs = self.base_delay_secs * f64::from(1u32 << exp);
        Duration::from_secs_f64(secs.min(self.max_delay_secs))
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 2.0)
    }
}
