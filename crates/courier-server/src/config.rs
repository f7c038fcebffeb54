//! Orchestrator configuration.

use std::time::Duration;

use courier_core::RetryPolicy;
use courier_crypto::{DEFAULT_SKIPPED_CAPACITY, SessionConfig, double_ratchet::DEFAULT_MAX_SKIP};

use crate::suppressed::DEFAULT_SUPPRESSED_CAPACITY;

/// Default message lifetime: seven days.
pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default number of users kept in the pre-key registry.
pub const DEFAULT_PREKEY_CAPACITY: usize = 10_000;

/// Tunables for a `Courier`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CourierConfig {
    /// Timed redelivery after a failed push
    pub retry: RetryPolicy,
    /// Lifetime of a message that does not set its own
    pub default_ttl: Duration,
    /// Out-of-order message keys cached per session
    pub skipped_key_capacity: usize,
    /// Largest forward gap derived in one receive, for pairwise and group
    /// sessions alike
    pub max_skip: u32,
    /// Users kept in the pre-key registry before eviction
    pub prekey_capacity: usize,
    /// Block-suppressed sends remembered so the sender keeps seeing them
    /// as sent
    pub suppressed_capacity: usize,
    /// Immediate retries of a failed store write or broker publish before
    /// the failure is returned to the caller
    pub local_retries: u32,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            default_ttl: DEFAULT_TTL,
            skipped_key_capacity: DEFAULT_SKIPPED_CAPACITY,
            max_skip: DEFAULT_MAX_SKIP,
            prekey_capacity: DEFAULT_PREKEY_CAPACITY,
            suppressed_capacity: DEFAULT_SUPPRESSED_CAPACITY,
            local_retries: 2,
        }
    }
}

impl CourierConfig {
    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the default TTL.
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Replace the skipped-key cache size.
    #[must_use]
    pub fn with_skipped_key_capacity(mut self, capacity: usize) -> Self {
        self.skipped_key_capacity = capacity;
        self
    }

    /// Replace the forward-gap limit.
    #[must_use]
    pub fn with_max_skip(mut self, max_skip: u32) -> Self {
        self.max_skip = max_skip;
        self
    }

    /// Replace the pre-key registry capacity.
    #[must_use]
    pub fn with_prekey_capacity(mut self, capacity: usize) -> Self {
        self.prekey_capacity = capacity;
        self
    }

    /// Replace the suppressed-send log capacity.
    #[must_use]
    pub fn with_suppressed_capacity(mut self, capacity: usize) -> Self {
        self.suppressed_capacity = capacity;
        self
    }

    /// Replace the local retry budget.
    #[must_use]
    pub fn with_local_retries(mut self, retries: u32) -> Self {
        self.local_retries = retries;
        self
    }

    pub(crate) fn session(&self) -> SessionConfig {
        SessionConfig { skipped_capacity: self.skipped_key_capacity, max_skip: self.max_skip }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CourierConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.default_ttl, Duration::from_secs(604_800));
        assert_eq!(config.skipped_key_capacity, 1000);
        assert_eq!(config.session().max_skip, 1000);
        assert_eq!(config.suppressed_capacity, 10_000);
    }

    #[test]
    fn builders_override() {
        let config = CourierConfig::default()
            .with_max_skip(5)
            .with_default_ttl(Duration::from_secs(60))
            .with_local_retries(0);
        assert_eq!(config.max_skip, 5);
        assert_eq!(config.default_ttl, Duration::from_secs(60));
        assert_eq!(config.local_retries, 0);
    }
}
