//! Errors for sender-key chains.

use thiserror::Error;

/// Errors from group sender-key operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SenderKeyError {
    /// Requested generation is behind the chain and no cached key exists,
    /// or is further ahead than the skip limit allows.
    #[error("ratchet cannot reach generation {requested} from {current}")]
    RatchetTooFarBehind {
        /// Current chain generation
        current: u32,
        /// Generation carried by the message
        requested: u32,
    },

    /// Chain generation counter would overflow.
    #[error("generation overflow at {current}")]
    GenerationOverflow {
        /// Generation at which the overflow was detected
        current: u32,
    },

    /// AEAD authentication failed or the key did not match the message.
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// What went wrong
        reason: String,
    },

    /// Message was encrypted under a different group master key.
    #[error("key epoch mismatch: local {local}, message {message}")]
    EpochMismatch {
        /// Epoch of the local master key
        local: u64,
        /// Epoch the message was encrypted under
        message: u64,
    },

    /// A member tried to decrypt its own message. Own chains only move
    /// forward on send.
    #[error("member {0} cannot receive its own group message")]
    OwnMessage(u64),

    /// The message key for this generation was already used or evicted.
    #[error("message key for sender {sender} generation {generation} is unavailable")]
    MessageKeyUnavailable {
        /// Sending member
        sender: u64,
        /// Generation of the message
        generation: u32,
    },

    /// Distribution payload has the wrong length.
    #[error("invalid sender-key distribution: {0} bytes")]
    InvalidDistribution(usize),
}
