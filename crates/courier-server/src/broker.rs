//! Durable event broker contract.
//!
//! The broker delivers at least once, optionally after a delay. Consumers
//! re-check stored state for every event, so duplicates and reordering are
//! harmless.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]
#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::{
    cmp::Reverse,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use courier_core::{Environment, EventClass, RedeliveryEvent, Timestamp};
use thiserror::Error;

/// Broker could not accept an event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("broker unavailable: {0}")]
pub struct BrokerError(pub String);

/// Publishing side of the broker.
#[async_trait]
pub trait EventBroker: Send + Sync + 'static {
    /// Publish `event`, to be delivered no earlier than `delay` from now.
    async fn publish(
        &self,
        event: RedeliveryEvent,
        delay: Option<Duration>,
    ) -> Result<(), BrokerError>;
}

/// An event waiting in the in-memory broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedEvent {
    /// Earliest delivery time
    pub due: Timestamp,
    /// The event
    pub event: RedeliveryEvent,
    seq: u64,
}

/// In-memory broker. Due events are handed out by due time, then priority,
/// then publish order.
#[derive(Clone)]
pub struct MemoryBroker<E: Environment> {
    env: E,
    inner: Arc<Mutex<BrokerInner>>,
}

#[derive(Default)]
struct BrokerInner {
    queue: Vec<QueuedEvent>,
    next_seq: u64,
    unavailable: bool,
}

impl<E: Environment> MemoryBroker<E> {
    /// Empty broker using `env` for due times.
    pub fn new(env: E) -> Self {
        Self { env, inner: Arc::new(Mutex::new(BrokerInner::default())) }
    }

    /// Make `publish` fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().expect("Mutex poisoned").unavailable = unavailable;
    }

    /// Remove and return every event of `class` (or any class) due at `now`,
    /// in dispatch order.
    pub fn take_due(&self, now: Timestamp, class: Option<EventClass>) -> Vec<RedeliveryEvent> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        let (mut due, rest): (Vec<_>, Vec<_>) = inner.queue.drain(..).partition(|queued| {
            queued.due <= now && class.is_none_or(|class| queued.event.class() == class)
        });
        inner.queue = rest;

        due.sort_by_key(|queued| (queued.due, Reverse(queued.event.priority()), queued.seq));
        due.into_iter().map(|queued| queued.event).collect()
    }

    /// Earliest due time of any queued event.
    pub fn next_due(&self) -> Option<Timestamp> {
        self.inner.lock().expect("Mutex poisoned").queue.iter().map(|q| q.due).min()
    }

    /// Snapshot of queued events, in publish order.
    pub fn queued(&self) -> Vec<QueuedEvent> {
        let mut queue = self.inner.lock().expect("Mutex poisoned").queue.clone();
        queue.sort_by_key(|queued| queued.seq);
        queue
    }

    /// Queued events of one class.
    pub fn count(&self, class: EventClass) -> usize {
        let inner = self.inner.lock().expect("Mutex poisoned");
        inner.queue.iter().filter(|queued| queued.event.class() == class).count()
    }
}

#[async_trait]
impl<E: Environment> EventBroker for MemoryBroker<E> {
    async fn publish(
        &self,
        event: RedeliveryEvent,
        delay: Option<Duration>,
    ) -> Result<(), BrokerError> {
        let due = self.env.now().saturating_add(delay.unwrap_or_default());
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        if inner.unavailable {
            return Err(BrokerError("in-memory broker switched off".to_string()));
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.queue.push(QueuedEvent { due, event, seq });
        Ok(())
    }
}
