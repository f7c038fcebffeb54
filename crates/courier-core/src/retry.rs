//! Timed retry policy.

use std::time::Duration;

/// Bounded exponential backoff for failed pushes.
///
/// Attempt `n` (1-based) waits `min(initial * 2^(n-1), max)`, plus up to half
/// that again as jitter when enabled. After `max_attempts` timed retries the
/// record falls back to presence-triggered redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Timed retries before falling back to presence
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound on the exponential part
    pub max_backoff: Duration,
    /// Add random jitter
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Whether attempt number `attempt` (1-based) may still be scheduled.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt >= 1 && attempt <= self.max_attempts
    }

    /// Delay before attempt `attempt`. `random` is any uniformly random value.
    pub fn backoff(&self, attempt: u32, random: u64) -> Duration {
        let initial = u64::try_from(self.initial_backoff.as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.max_backoff.as_millis()).unwrap_or(u64::MAX);

        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let capped = initial.saturating_mul(factor).min(max);
        let jitter = if self.jitter { random % (capped / 2 + 1) } else { 0 };

        Duration::from_millis(capped.saturating_add(jitter))
    }
}
