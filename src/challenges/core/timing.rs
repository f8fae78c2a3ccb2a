//! Retry backoff between upstream attempts.

use std::time::Duration;

/// Linear backoff: attempt `n` waits `n * base` before the next try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    max_attempts: usize,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max_attempts: usize) -> Self {
        Self { base, max_attempts }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Delay to apply after `attempt` (1-based) failed.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        self.base.saturating_mul(attempt.min(u32::MAX as usize) as u32)
    }

    pub fn is_final(&self, attempt: usize) -> bool {
        attempt >= self.max_attempts
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 2)
    }
}
