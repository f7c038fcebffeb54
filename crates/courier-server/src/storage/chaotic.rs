//! Fault-injecting store wrapper.
//!
//! Randomly fails operations with `StorageError::Io` before they reach the
//! wrapped store, so an injected failure never leaves a partial write
//! behind. Chaos tests use it to check that no failure is reported as
//! success and that retries converge.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]
#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use courier_core::{DeliveryRecord, DeliveryStatus, Message, MessageId, Timestamp, UserId};

use super::{MessageStore, StorageError};

/// Store wrapper that randomly injects failures.
#[derive(Clone)]
pub struct ChaoticStore<S: MessageStore> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    rng: Arc<Mutex<ChaoticRng>>,
    operations: Arc<AtomicUsize>,
    failures: Arc<AtomicUsize>,
}

/// Linear congruential generator; reproducible for a given seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // Numerical Recipes constants
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }
}

impl<S: MessageStore> ChaoticStore<S> {
    /// Wrap `inner`, failing roughly `failure_rate` of operations.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0].
    pub fn new(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(ChaoticRng { state: seed })),
            operations: Arc::new(AtomicUsize::new(0)),
            failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wrapped store, for checking invariants after chaos.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Operations attempted so far.
    pub fn operation_count(&self) -> usize {
        self.operations.load(Ordering::Relaxed)
    }

    /// Operations failed on purpose so far.
    pub fn failure_count(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    fn chaos(&self) -> Result<(), StorageError> {
        self.operations.fetch_add(1, Ordering::Relaxed);
        let fail = self.rng.lock().expect("ChaoticRng mutex poisoned").next() < self.failure_rate;
        if fail {
            self.failures.fetch_add(1, Ordering::Relaxed);
            return Err(StorageError::Io("chaotic failure injection".to_string()));
        }
        Ok(())
    }
}

impl<S: MessageStore> MessageStore for ChaoticStore<S> {
    fn insert_message(
        &self,
        message: &Message,
        records: &[DeliveryRecord],
    ) -> Result<(), StorageError> {
        self.chaos()?;
        self.inner.insert_message(message, records)
    }

    fn load_message(&self, id: MessageId) -> Result<Option<Message>, StorageError> {
        self.chaos()?;
        self.inner.load_message(id)
    }

    fn load_record(
        &self,
        id: MessageId,
        recipient: UserId,
    ) -> Result<Option<DeliveryRecord>, StorageError> {
        self.chaos()?;
        self.inner.load_record(id, recipient)
    }

    fn load_records(&self, id: MessageId) -> Result<Vec<DeliveryRecord>, StorageError> {
        self.chaos()?;
        self.inner.load_records(id)
    }

    fn compare_and_set(
        &self,
        expected: &DeliveryRecord,
        next: &DeliveryRecord,
    ) -> Result<bool, StorageError> {
        self.chaos()?;
        self.inner.compare_and_set(expected, next)
    }

    fn records_for(
        &self,
        recipient: UserId,
        status: DeliveryStatus,
    ) -> Result<Vec<DeliveryRecord>, StorageError> {
        self.chaos()?;
        self.inner.records_for(recipient, status)
    }

    fn delete_message(&self, id: MessageId) -> Result<bool, StorageError> {
        self.chaos()?;
        self.inner.delete_message(id)
    }

    fn expired(&self, now: Timestamp) -> Result<Vec<MessageId>, StorageError> {
        self.chaos()?;
        self.inner.expired(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn zero_rate_never_fails() {
        let store = ChaoticStore::new(MemoryStore::new(), 0.0, 7);
        for _ in 0..100 {
            assert!(store.load_message(MessageId(1)).is_ok());
        }
        assert_eq!(store.operation_count(), 100);
        assert_eq!(store.failure_count(), 0);
    }

    #[test]
    fn full_rate_always_fails() {
        let store = ChaoticStore::new(MemoryStore::new(), 1.0, 7);
        assert_eq!(
            store.delete_message(MessageId(1)),
            Err(StorageError::Io("chaotic failure injection".to_string()))
        );
    }

    #[test]
    fn same_seed_same_failures() {
        let a = ChaoticStore::new(MemoryStore::new(), 0.5, 42);
        let b = ChaoticStore::new(MemoryStore::new(), 0.5, 42);
        let run = |s: &ChaoticStore<MemoryStore>| {
            (0..50).map(|_| s.expired(Timestamp::default()).is_err()).collect::<Vec<_>>()
        };
        assert_eq!(run(&a), run(&b));
    }
}
