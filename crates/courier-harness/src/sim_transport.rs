//! Scripted push transport.
//!
//! Pushes succeed unless a script says otherwise. Scripts are per route and
//! consumed one outcome per push, so a test can say "the next three pushes
//! to this device time out" and then watch the retries happen.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]
#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use courier_core::{MessageId, Route};
use courier_server::{PushEnvelope, PushTransport, TransportError};

/// How a route answers pushes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushScript {
    /// Next outcomes in order; afterwards pushes succeed
    Sequence(VecDeque<Result<(), TransportError>>),
    /// Every push times out
    AlwaysTimeout,
}

#[derive(Default)]
struct Inner {
    scripts: HashMap<Route, PushScript>,
    attempts: Vec<(Route, MessageId, bool)>,
    delivered: Vec<(Route, PushEnvelope)>,
}

/// Recording push transport. Clones share state.
#[derive(Clone, Default)]
pub struct SimTransport {
    inner: Arc<Mutex<Inner>>,
}

impl SimTransport {
    /// Transport where every push succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` pushes to `route` time out.
    pub fn fail_next(&self, route: Route, count: usize) {
        let outcomes = std::iter::repeat_n(Err(TransportError::Timeout), count).collect();
        self.script(route, PushScript::Sequence(outcomes));
    }

    /// Every push to `route` times out until the script is replaced.
    pub fn fail_always(&self, route: Route) {
        self.script(route, PushScript::AlwaysTimeout);
    }

    /// Replace the script for `route`.
    pub fn script(&self, route: Route, script: PushScript) {
        self.inner.lock().expect("SimTransport mutex poisoned").scripts.insert(route, script);
    }

    /// Drop the script for `route`; pushes succeed again.
    pub fn heal(&self, route: Route) {
        self.inner.lock().expect("SimTransport mutex poisoned").scripts.remove(&route);
    }

    /// Successful pushes, in order.
    pub fn delivered(&self) -> Vec<(Route, PushEnvelope)> {
        self.inner.lock().expect("SimTransport mutex poisoned").delivered.clone()
    }

    /// Successful pushes to `route`.
    pub fn delivered_to(&self, route: Route) -> Vec<PushEnvelope> {
        let inner = self.inner.lock().expect("SimTransport mutex poisoned");
        inner.delivered.iter().filter(|(r, _)| *r == route).map(|(_, env)| env.clone()).collect()
    }

    /// Push attempts for `message_id`, successful or not.
    pub fn attempts_for(&self, message_id: MessageId) -> usize {
        let inner = self.inner.lock().expect("SimTransport mutex poisoned");
        inner.attempts.iter().filter(|(_, id, _)| *id == message_id).count()
    }

    /// Total push attempts.
    pub fn attempt_count(&self) -> usize {
        self.inner.lock().expect("SimTransport mutex poisoned").attempts.len()
    }
}

#[async_trait]
impl PushTransport for SimTransport {
    async fn push(&self, route: Route, envelope: PushEnvelope) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().expect("SimTransport mutex poisoned");

        let outcome = match inner.scripts.get_mut(&route) {
            Some(PushScript::AlwaysTimeout) => Err(TransportError::Timeout),
            Some(PushScript::Sequence(outcomes)) => outcomes.pop_front().unwrap_or(Ok(())),
            None => Ok(()),
        };

        inner.attempts.push((route, envelope.message_id, outcome.is_ok()));
        if outcome.is_ok() {
            inner.delivered.push((route, envelope));
        }
        outcome
    }
}
