//! Courier delivery orchestrator.
//!
//! Wraps the pure delivery model from [`courier_core`] and the session
//! engines from [`courier_crypto`] with storage, presence, a durable event
//! broker and a push transport.
//!
//! # Components
//!
//! - [`Courier`]: send, ack, open, presence and broker event entry points
//! - [`MessageStore`]: message rows and delivery records ([`MemoryStore`],
//!   [`ChaoticStore`], [`RedbStore`])
//! - [`PrekeyRegistry`]: public pre-key directory
//! - Collaborator contracts: [`PresenceLookup`], [`EventBroker`],
//!   [`PushTransport`], [`BlobStore`], [`DistributionCache`], each with an
//!   in-memory implementation
//! - [`SystemEnv`]: production environment (wall clock, OS entropy)
//!
//! # Lock discipline
//!
//! Each conversation has one async mutex. Encryption, sequence assignment
//! and the durable insert happen under it; presence lookups, pushes and
//! broker publishes never do. The only nested acquisition is group before
//! direct, during key distribution.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod blob;
pub mod broker;
mod cleanup;
mod config;
mod devices;
mod error;
mod fanout;
mod group_keys;
mod prekey_registry;
pub mod presence;
mod routing;
mod scheduler;
mod service;
mod session_store;
pub mod storage;
mod suppressed;
mod system_env;
pub mod transport;
mod wire;

pub use blob::{BlobError, BlobStore, DistributionCache, MemoryBlobStore, MemoryCache};
pub use broker::{BrokerError, EventBroker, MemoryBroker, QueuedEvent};
pub use cleanup::PurgeReport;
pub use config::{CourierConfig, DEFAULT_PREKEY_CAPACITY, DEFAULT_TTL};
pub use error::DeliveryError;
pub use prekey_registry::{PrekeyRegistry, StoreResult};
pub use presence::{MemoryPresence, PresenceError, PresenceLookup};
pub use service::{AckOutcome, Collaborators, Courier, OutgoingMessage, SendReceipt};
pub use storage::{ChaoticStore, MemoryStore, MessageStore, RedbStore, StorageError};
pub use system_env::SystemEnv;
pub use transport::{PushEnvelope, PushTransport, TransportError};
