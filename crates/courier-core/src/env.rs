//! Environment abstraction for deterministic testing.
//!
//! Decouples delivery logic from system resources (wall clock, randomness,
//! timers). Simulation uses a manual clock and a seeded RNG; production uses
//! the system clock and OS entropy.

use std::time::Duration;

use crate::message::Timestamp;

/// Abstract environment providing time, randomness, and async primitives.
///
/// # Invariants
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` uses cryptographically secure entropy in production;
///   key material and content keys are drawn from it
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current wall-clock time.
    ///
    /// Timestamps are persisted with messages and compared against TTLs, so
    /// this is wall time rather than a process-local monotonic instant.
    fn now(&self) -> Timestamp;

    /// Sleeps for the specified duration.
    ///
    /// Only used by driver code (broker pumps), never by delivery logic.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Generates a random `u128`, used for message ids.
    fn random_u128(&self) -> u128 {
        let mut bytes = [0u8; 16];
        self.random_bytes(&mut bytes);
        u128::from_be_bytes(bytes)
    }

    /// Generates 32 random bytes, used for key seeds.
    fn random_key(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        self.random_bytes(&mut bytes);
        bytes
    }
}
