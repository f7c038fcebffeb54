//! Bounded cache of message keys for out-of-order delivery.
//!
//! When a message arrives ahead of the expected counter, the keys for the
//! gap are derived and parked here. Capacity is fixed; on overflow the
//! oldest entry is evicted and the message it belonged to becomes
//! permanently undecryptable. A key leaves the cache the moment it is taken.

use std::{
    collections::{HashMap, VecDeque},
    hash::Hash,
};

use zeroize::Zeroize;

/// Default number of cached keys per session.
pub const DEFAULT_SKIPPED_CAPACITY: usize = 1000;

/// Oldest-first bounded map from key id to 32-byte message key.
#[derive(Clone)]
pub struct SkippedKeys<K: Eq + Hash + Clone> {
    keys: HashMap<K, [u8; 32]>,
    /// Insertion order, oldest at the front
    order: VecDeque<K>,
    capacity: usize,
}

impl<K: Eq + Hash + Clone> SkippedKeys<K> {
    /// Create an empty cache holding at most `capacity` keys.
    pub fn new(capacity: usize) -> Self {
        Self { keys: HashMap::new(), order: VecDeque::new(), capacity }
    }

    /// Park a key. Returns the id of the entry evicted to make room, if any.
    ///
    /// With zero capacity the key is discarded and its own id is returned.
    pub fn insert(&mut self, id: K, mut key: [u8; 32]) -> Option<K> {
        if self.capacity == 0 {
            key.zeroize();
            return Some(id);
        }

        if let Some(old) = self.keys.get_mut(&id) {
            old.zeroize();
            *old = key;
            return None;
        }

        let evicted = if self.keys.len() >= self.capacity {
            self.order.pop_front().inspect(|oldest| {
                if let Some(mut stale) = self.keys.remove(oldest) {
                    stale.zeroize();
                }
            })
        } else {
            None
        };

        self.keys.insert(id.clone(), key);
        self.order.push_back(id);
        evicted
    }

    /// Remove and return the key for `id`.
    pub fn take(&mut self, id: &K) -> Option<[u8; 32]> {
        let key = self.keys.remove(id)?;
        self.order.retain(|k| k != id);
        Some(key)
    }

    /// Whether a key for `id` is cached.
    pub fn contains(&self, id: &K) -> bool {
        self.keys.contains_key(id)
    }

    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Maximum number of cached keys.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<K: Eq + Hash + Clone> Drop for SkippedKeys<K> {
    fn drop(&mut self) {
        for key in self.keys.values_mut() {
            key.zeroize();
        }
    }
}
