//! Public pre-key directory.
//!
//! Holds each user's published bundle (identity keys plus signed pre-key) and
//! a queue of one-time pre-key publics. `fetch` hands out the bundle with one
//! one-time key attached and removes that key, so no two initiators ever
//! receive the same one. Capacity is bounded per user with LRU eviction.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]
#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use courier_core::UserId;
use courier_crypto::PreKeyBundle;

/// Result of publishing a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreResult {
    /// Bundle stored.
    Success,
    /// Bundle stored and the least recently used user was evicted.
    Evicted,
    /// Registry has zero capacity.
    Full,
}

struct Published {
    bundle: PreKeyBundle,
    one_time: VecDeque<(u32, [u8; 32])>,
}

struct RegistryInner {
    users: HashMap<UserId, Published>,
    lru_order: VecDeque<UserId>,
    max_capacity: usize,
}

impl RegistryInner {
    fn touch(&mut self, user: UserId) {
        self.lru_order.retain(|&id| id != user);
        self.lru_order.push_back(user);
    }
}

/// In-memory pre-key directory. Clones share state.
#[derive(Clone)]
pub struct PrekeyRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl PrekeyRegistry {
    /// Empty registry holding at most `max_capacity` users.
    pub fn with_capacity(max_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                users: HashMap::new(),
                lru_order: VecDeque::new(),
                max_capacity,
            })),
        }
    }

    /// Publish or replace a user's bundle. Any one-time key attached to
    /// `bundle` is ignored; queued one-time keys survive a republish.
    pub fn publish(&self, user: UserId, mut bundle: PreKeyBundle) -> StoreResult {
        bundle.one_time_prekey = None;
        let mut inner = self.inner.lock().expect("PrekeyRegistry mutex poisoned");

        if let Some(published) = inner.users.get_mut(&user) {
            published.bundle = bundle;
            inner.touch(user);
            return StoreResult::Success;
        }

        let result = if inner.users.len() >= inner.max_capacity {
            match inner.lru_order.pop_front() {
                Some(oldest) => {
                    inner.users.remove(&oldest);
                    StoreResult::Evicted
                },
                None => return StoreResult::Full,
            }
        } else {
            StoreResult::Success
        };

        inner.users.insert(user, Published { bundle, one_time: VecDeque::new() });
        inner.lru_order.push_back(user);
        result
    }

    /// Queue one-time pre-key publics for a published user.
    ///
    /// Returns `false` if the user has no bundle.
    pub fn add_one_time_keys(
        &self,
        user: UserId,
        keys: impl IntoIterator<Item = (u32, [u8; 32])>,
    ) -> bool {
        let mut inner = self.inner.lock().expect("PrekeyRegistry mutex poisoned");
        match inner.users.get_mut(&user) {
            Some(published) => {
                published.one_time.extend(keys);
                true
            },
            None => false,
        }
    }

    /// Bundle for `user` with the oldest queued one-time key attached and
    /// removed from the queue. When the queue is empty the bundle comes back
    /// without one and the agreement runs degraded.
    pub fn fetch(&self, user: UserId) -> Option<PreKeyBundle> {
        let mut inner = self.inner.lock().expect("PrekeyRegistry mutex poisoned");
        let published = inner.users.get_mut(&user)?;

        let mut bundle = published.bundle.clone();
        bundle.one_time_prekey = published.one_time.pop_front();
        inner.touch(user);
        Some(bundle)
    }

    /// One-time keys still queued for `user`.
    pub fn one_time_count(&self, user: UserId) -> usize {
        let inner = self.inner.lock().expect("PrekeyRegistry mutex poisoned");
        inner.users.get(&user).map_or(0, |published| published.one_time.len())
    }

    /// Whether `user` has a bundle.
    pub fn has(&self, user: UserId) -> bool {
        self.inner.lock().expect("PrekeyRegistry mutex poisoned").users.contains_key(&user)
    }

    /// Users with a bundle.
    pub fn count(&self) -> usize {
        self.inner.lock().expect("PrekeyRegistry mutex poisoned").users.len()
    }
}
