//! Push transport contract.
//!
//! The transport owns the authenticated client channel. A push either is
//! accepted by the recipient connection, times out, or errors; delivery
//! acknowledgments come back separately through `Courier::ack`.

use async_trait::async_trait;
use courier_core::{ConversationId, MessageId, Route, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Push failure. Both variants are transient and lead to a timed retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Recipient connection did not accept the push in time
    #[error("push timed out")]
    Timeout,

    /// Gateway or connection error
    #[error("push failed: {0}")]
    Unreachable(String),
}

/// What a recipient device receives for one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEnvelope {
    /// Message id, echoed back in acks
    pub message_id: MessageId,
    /// Conversation
    pub conversation: ConversationId,
    /// Sender
    pub sender: UserId,
    /// Per-conversation sequence number
    pub sequence: u64,
    /// Sealed body
    pub body: Vec<u8>,
    /// Content key wrapped for this recipient
    pub wrapped_key: Vec<u8>,
}

/// Bidirectional push channel to connected clients.
#[async_trait]
pub trait PushTransport: Send + Sync + 'static {
    /// Push `envelope` to the connection at `route`.
    async fn push(&self, route: Route, envelope: PushEnvelope) -> Result<(), TransportError>;
}
