//! Simulation fixture: one `Courier` wired to in-memory collaborators.
//!
//! Every user's device route is `Route(user)`. The broker is drained by
//! [`World::pump`], which hands due events to the orchestrator in priority
//! order and puts failed ones back, mimicking at-least-once delivery.

use std::{sync::Arc, time::Duration};

use courier_core::{Environment, EventClass, RedeliveryEvent, Route, UserId};
use courier_server::{
    Collaborators, Courier, CourierConfig, DeliveryError, EventBroker, MemoryBlobStore,
    MemoryBroker, MemoryCache, MemoryPresence, MemoryStore, MessageStore,
};
use tracing::debug;

use crate::{SimEnv, SimTransport};

/// Delay before an event whose handler failed is offered again.
const REDELIVERY_DELAY: Duration = Duration::from_secs(1);

/// A simulated deployment.
pub struct World<S: MessageStore = MemoryStore> {
    /// Shared clock and RNG
    pub env: SimEnv,
    /// Presence and block registry
    pub presence: MemoryPresence,
    /// Event broker
    pub broker: MemoryBroker<SimEnv>,
    /// Push transport
    pub transport: SimTransport,
    /// Media storage
    pub blobs: MemoryBlobStore,
    /// Distribution cache
    pub cache: MemoryCache,
    /// The orchestrator under test
    pub courier: Courier<SimEnv, S>,
}

impl World<MemoryStore> {
    /// World with an in-memory store and default configuration.
    pub fn new(seed: u64) -> Self {
        Self::with_store(seed, MemoryStore::new(), CourierConfig::default())
    }
}

impl<S: MessageStore> World<S> {
    /// World over `store` with `config`.
    pub fn with_store(seed: u64, store: S, config: CourierConfig) -> Self {
        let env = SimEnv::with_seed(seed);
        let presence = MemoryPresence::new();
        let broker = MemoryBroker::new(env.clone());
        let transport = SimTransport::new();
        let blobs = MemoryBlobStore::new();
        let cache = MemoryCache::new();

        let collaborators = Collaborators {
            presence: Arc::new(presence.clone()),
            broker: Arc::new(broker.clone()),
            transport: Arc::new(transport.clone()),
            blobs: Arc::new(blobs.clone()),
            cache: Arc::new(cache.clone()),
        };
        let courier = Courier::new(env.clone(), store, collaborators, config);

        Self { env, presence, broker, transport, blobs, cache, courier }
    }

    /// Register users with a few one-time pre-keys each.
    pub fn register(&self, users: &[UserId]) -> Result<(), DeliveryError> {
        for &user in users {
            self.courier.register_user(user, 4)?;
        }
        Ok(())
    }

    /// Bring `user` online and let the orchestrator react.
    ///
    /// Returns how many pending messages were pushed.
    pub async fn online(&self, user: UserId) -> Result<usize, DeliveryError> {
        self.presence.set_online(user, Route(user));
        self.courier.on_presence_change(user, true).await
    }

    /// Mark `user` online without notifying the orchestrator.
    pub fn online_silently(&self, user: UserId) {
        self.presence.set_online(user, Route(user));
    }

    /// Take `user` offline.
    pub async fn offline(&self, user: UserId) -> Result<usize, DeliveryError> {
        self.presence.set_offline(user);
        self.courier.on_presence_change(user, false).await
    }

    /// Dispatch every event due now. Returns how many were handled.
    pub async fn pump(&self) -> usize {
        let due = self.broker.take_due(self.env.now(), None);
        let count = due.len();
        for event in due {
            self.dispatch(event).await;
        }
        count
    }

    /// Dispatch due events of one class only.
    pub async fn pump_class(&self, class: EventClass) -> usize {
        let due = self.broker.take_due(self.env.now(), Some(class));
        let count = due.len();
        for event in due {
            self.dispatch(event).await;
        }
        count
    }

    /// Advance the clock by `duration`, then pump.
    pub async fn advance(&self, duration: Duration) -> usize {
        self.env.advance(duration);
        self.pump().await
    }

    /// Run the simulation for `duration` of virtual time, jumping from one
    /// due event to the next. Returns events handled.
    pub async fn run_for(&self, duration: Duration) -> usize {
        let end = self.env.now().saturating_add(duration);
        let mut handled = self.pump().await;
        while let Some(next) = self.broker.next_due().filter(|next| *next <= end) {
            self.env.advance_to(next);
            handled += self.pump().await;
        }
        self.env.advance_to(end);
        handled
    }

    async fn dispatch(&self, event: RedeliveryEvent) {
        if let Err(err) = self.courier.handle_event(event.clone()).await {
            debug!(?event, %err, "handler failed, offering event again");
            if let Err(err) = self.broker.publish(event, Some(REDELIVERY_DELAY)).await {
                debug!(%err, "event lost");
            }
        }
    }
}
