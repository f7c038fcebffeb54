//! Errors for pairwise key agreement and the double ratchet.

use thiserror::Error;

/// Errors from X3DH and ratchet session operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RatchetError {
    /// Signed pre-key signature does not verify under the bundle identity.
    #[error("signed pre-key signature is invalid")]
    InvalidSignature,

    /// A public key in a bundle or header could not be parsed.
    #[error("invalid {0} key")]
    InvalidKey(&'static str),

    /// The first message of a session carries no pre-key header.
    #[error("message has no pre-key header; no session to decrypt with")]
    MissingPreKey,

    /// Pre-key header names a signed pre-key this device does not hold.
    #[error("unknown signed pre-key {got} (current {expected})")]
    UnknownSignedPreKey {
        /// Id of the local signed pre-key
        expected: u32,
        /// Id named by the initiator
        got: u32,
    },

    /// One-time pre-key was never issued or has already been consumed.
    #[error("one-time pre-key {0} is unknown or already consumed")]
    UnknownOneTimePreKey(u32),

    /// Session has no sending chain yet (responder before first receive).
    #[error("session has no sending chain")]
    NoSendingChain,

    /// Counter jump larger than the configured skip limit.
    #[error("message skips {requested} keys, limit is {limit}")]
    TooManySkipped {
        /// Keys that would have to be derived
        requested: u32,
        /// Largest gap accepted
        limit: u32,
    },

    /// Message key was already used or evicted from the skipped-key cache.
    #[error("message key for counter {counter} is unavailable")]
    MessageKeyUnavailable {
        /// Counter carried by the message
        counter: u32,
    },

    /// AEAD authentication failed.
    #[error("ratchet message failed authentication")]
    DecryptionFailed,

    /// Chain counter would overflow.
    #[error("ratchet counter overflow")]
    CounterOverflow,
}
