//! Production environment: wall clock, OS entropy, tokio timers.
//!
//! Non-deterministic by construction; simulation swaps in a seeded
//! environment with a manual clock.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use courier_core::{Environment, Timestamp};

/// Production environment using the system clock and cryptographic RNG.
///
/// # Panics
///
/// `random_bytes` panics if the OS RNG fails. Content keys, ratchet keys and
/// message ids all come from it; there is no safe way to continue.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> Timestamp {
        let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        Timestamp::from_millis(u64::try_from(since_epoch.as_millis()).unwrap_or(u64::MAX))
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }
}
