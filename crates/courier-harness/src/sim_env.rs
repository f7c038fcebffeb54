//! Seeded environment with a manual clock.
//!
//! Time only moves when a test advances it (or something awaits `sleep`,
//! which advances it by the requested amount and returns at once). All
//! randomness comes from one `ChaCha8Rng`, so keys, message ids and jitter
//! are reproducible from the seed.

#![allow(clippy::disallowed_types, reason = "Synchronous RNG access only")]
#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use courier_core::{Environment, Timestamp};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Simulation start: 2024-01-01T00:00:00Z in milliseconds.
pub const EPOCH_MILLIS: u64 = 1_704_067_200_000;

/// Deterministic environment. Clones share the clock and the RNG.
#[derive(Clone)]
pub struct SimEnv {
    clock: Arc<AtomicU64>,
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl SimEnv {
    /// Environment seeded with zero.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment seeded with `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            clock: Arc::new(AtomicU64::new(EPOCH_MILLIS)),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, duration: Duration) {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.clock.fetch_add(millis, Ordering::SeqCst);
    }

    /// Jump the clock to `at`. Never moves backwards.
    pub fn advance_to(&self, at: Timestamp) {
        self.clock.fetch_max(at.as_millis(), Ordering::SeqCst);
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.clock.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().expect("SimEnv RNG mutex poisoned").fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_bytes() {
        let a = SimEnv::with_seed(42);
        let b = SimEnv::with_seed(42);
        assert_eq!(a.random_key(), b.random_key());
        assert_ne!(a.random_key(), SimEnv::with_seed(43).random_key());
    }

    #[test]
    fn clock_moves_only_when_told() {
        let env = SimEnv::new();
        let start = env.now();
        assert_eq!(env.now(), start);

        env.advance(Duration::from_secs(2));
        assert_eq!(env.now().saturating_duration_since(start), Duration::from_secs(2));

        env.advance_to(start);
        assert_eq!(env.now().saturating_duration_since(start), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn sleep_advances_virtual_time() {
        let env = SimEnv::new();
        let start = env.now();
        env.sleep(Duration::from_millis(1500)).await;
        assert_eq!(env.now().as_millis() - start.as_millis(), 1500);
    }
}
