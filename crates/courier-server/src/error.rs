//! Orchestrator error type.

use courier_core::{ConversationId, MessageId, UserId};
use courier_crypto::CryptoError;
use thiserror::Error;

use crate::{broker::BrokerError, presence::PresenceError, storage::StorageError};

/// Errors returned from the `Courier` API.
///
/// Transient delivery failures (push timeouts, gateway errors) never reach
/// callers; they are retried through the broker. What surfaces here is
/// either infrastructure unavailability after the local retry budget, a
/// cryptographic failure, or a caller mistake.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Message store failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Event broker failed
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Presence registry failed
    #[error(transparent)]
    Presence(#[from] PresenceError),

    /// Session engine rejected the operation
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// No session exists for this conversation
    #[error("unknown conversation {0}")]
    UnknownConversation(ConversationId),

    /// Conversation already exists
    #[error("conversation {0} already exists")]
    ConversationExists(ConversationId),

    /// Message was never stored or has been purged
    #[error("unknown message {0}")]
    UnknownMessage(MessageId),

    /// User has no registered device keys
    #[error("unknown user {0}")]
    UnknownUser(UserId),

    /// User is not a participant of the conversation
    #[error("user {user} is not a participant of {conversation}")]
    NotAParticipant {
        /// Offending user
        user: UserId,
        /// Conversation
        conversation: ConversationId,
    },

    /// User is not a recipient of the message
    #[error("user {user} is not a recipient of message {message_id}")]
    NotARecipient {
        /// Message
        message_id: MessageId,
        /// Offending user
        user: UserId,
    },

    /// Membership change requested by a non-admin
    #[error("user {user} is not the admin of {conversation}")]
    NotAdmin {
        /// Requesting user
        user: UserId,
        /// Group conversation
        conversation: ConversationId,
    },

    /// The admin tried to leave their own group
    #[error("the admin cannot leave {0}")]
    AdminCannotLeave(ConversationId),

    /// Responder has not published a pre-key bundle
    #[error("no pre-key bundle published for user {0}")]
    NoPrekeyBundle(UserId),

    /// Wrapped key or distribution bytes could not be decoded
    #[error("encoding error: {0}")]
    Encoding(String),
}

impl DeliveryError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(err) => matches!(err, StorageError::Io(_)),
            Self::Broker(_) | Self::Presence(_) => true,
            Self::Crypto(_)
            | Self::UnknownConversation(_)
            | Self::ConversationExists(_)
            | Self::UnknownMessage(_)
            | Self::UnknownUser(_)
            | Self::NotAParticipant { .. }
            | Self::NotARecipient { .. }
            | Self::NotAdmin { .. }
            | Self::AdminCannotLeave(_)
            | Self::NoPrekeyBundle(_)
            | Self::Encoding(_) => false,
        }
    }
}
