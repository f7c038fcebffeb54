//! Courier core: the delivery model and the pure decisions made on it.
//!
//! Nothing here performs I/O. The server crate feeds stored state and
//! presence snapshots in and acts on the decisions that come out:
//!
//! - [`status`]: per-recipient delivery state machine
//! - [`routing`]: block/presence routing decision
//! - [`retry`]: timed retry backoff
//! - [`event`]: broker event classes and priorities
//! - [`env`]: clock and randomness abstraction

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod env;
pub mod event;
pub mod message;
pub mod retry;
pub mod routing;
pub mod status;

pub use env::Environment;
pub use event::{EventClass, MediaPart, Priority, RedeliveryEvent};
pub use message::{
    ConversationId, DeliveryRecord, MediaRef, Message, MessageId, RedeliveryMode, Timestamp,
    UserId,
};
pub use retry::RetryPolicy;
pub use routing::{PresenceInfo, Route, RouteDecision, RouteOutcome, RoutingMode, decide};
pub use status::{AckKind, DeliveryStatus, ReportedStatus, Transition};
