//! Sends suppressed by a block.
//!
//! Nothing about such a send is persisted, yet the sender must keep seeing it
//! as sent for as long as a delivered message would exist. This log keeps
//! only the message id, the recipients and the TTL deadline. Entries leave on
//! the TTL sweep, or oldest first once capacity is reached.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]
#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use courier_core::{MessageId, Timestamp, UserId};

/// Default number of suppressed sends remembered.
pub const DEFAULT_SUPPRESSED_CAPACITY: usize = 10_000;

struct Tombstone {
    recipients: Vec<UserId>,
    expires_at: Timestamp,
}

struct LogInner {
    entries: HashMap<MessageId, Tombstone>,
    order: VecDeque<MessageId>,
    max_capacity: usize,
}

/// Bounded in-memory log of suppressed message ids. Clones share state.
#[derive(Clone)]
pub(crate) struct SuppressedSends {
    inner: Arc<Mutex<LogInner>>,
}

impl SuppressedSends {
    pub(crate) fn with_capacity(max_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LogInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                max_capacity,
            })),
        }
    }

    /// Remember a suppressed send. Returns `false` at zero capacity.
    pub(crate) fn record(
        &self,
        message_id: MessageId,
        recipients: Vec<UserId>,
        expires_at: Timestamp,
    ) -> bool {
        let mut inner = self.inner.lock().expect("SuppressedSends mutex poisoned");
        if inner.max_capacity == 0 {
            return false;
        }
        while inner.entries.len() >= inner.max_capacity {
            let Some(oldest) = inner.order.pop_front() else { break };
            inner.entries.remove(&oldest);
        }
        if inner.entries.insert(message_id, Tombstone { recipients, expires_at }).is_none() {
            inner.order.push_back(message_id);
        }
        true
    }

    /// Whether `recipient` was an addressee of a suppressed send.
    pub(crate) fn contains(&self, message_id: MessageId, recipient: UserId) -> bool {
        let inner = self.inner.lock().expect("SuppressedSends mutex poisoned");
        inner.entries.get(&message_id).is_some_and(|entry| entry.recipients.contains(&recipient))
    }

    /// Drop every entry whose deadline is at or before `now`.
    pub(crate) fn sweep(&self, now: Timestamp) -> usize {
        let mut inner = self.inner.lock().expect("SuppressedSends mutex poisoned");
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.expires_at > now);
        let LogInner { entries, order, .. } = &mut *inner;
        order.retain(|id| entries.contains_key(id));
        before - entries.len()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().expect("SuppressedSends mutex poisoned").entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    #[test]
    fn lookup_is_per_recipient() {
        let log = SuppressedSends::with_capacity(4);
        assert!(log.record(MessageId(1), vec![2, 3], at(100)));

        assert!(log.contains(MessageId(1), 2));
        assert!(log.contains(MessageId(1), 3));
        assert!(!log.contains(MessageId(1), 4));
        assert!(!log.contains(MessageId(2), 2));
    }

    #[test]
    fn oldest_entry_is_evicted_at_capacity() {
        let log = SuppressedSends::with_capacity(2);
        log.record(MessageId(1), vec![2], at(100));
        log.record(MessageId(2), vec![2], at(100));
        log.record(MessageId(3), vec![2], at(100));

        assert_eq!(log.len(), 2);
        assert!(!log.contains(MessageId(1), 2));
        assert!(log.contains(MessageId(3), 2));
    }

    #[test]
    fn sweep_honours_deadline() {
        let log = SuppressedSends::with_capacity(4);
        log.record(MessageId(1), vec![2], at(100));
        log.record(MessageId(2), vec![2], at(200));

        assert_eq!(log.sweep(at(99)), 0);
        assert_eq!(log.sweep(at(100)), 1);
        assert!(!log.contains(MessageId(1), 2));
        assert!(log.contains(MessageId(2), 2));
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let log = SuppressedSends::with_capacity(0);
        assert!(!log.record(MessageId(1), vec![2], at(100)));
        assert!(!log.contains(MessageId(1), 2));
    }
}
