//! Courier cryptography.
//!
//! Two session engines and the content sealing that sits on top of them.
//!
//! # Key lifecycle
//!
//! ```text
//! Direct conversation                     Group conversation
//!
//! PreKeyBundle (one-time key popped)      master key (admin mints, epoch n)
//!        │ X3DH                                  │ sent over pairwise sessions
//!        ▼                                       ▼
//! root key ──DH ratchet──► chain keys     HKDF(epoch, member) → member chain
//!        │                                       │
//!        ▼                                       ▼
//! message key (used once)                 message key (used once)
//!        │                                       │
//!        └──────────── wraps ContentKey ─────────┘
//!                          │
//!                          ▼
//!                    SealedContent
//! ```
//!
//! Every function here is pure: randomness (seeds, nonces, suffixes) is an
//! argument, so the server can drive it from a deterministic environment in
//! tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod content;
pub mod double_ratchet;
mod error;
pub mod sender_keys;
mod skipped;

pub use content::{ContentError, ContentKey, SealedContent};
pub use double_ratchet::{
    IdentityKeyPair, LocalKeys, OneTimePreKey, PreKeyBundle, RatchetError, RatchetMessage,
    RatchetSession, SessionConfig, SignedPreKey,
};
pub use error::CryptoError;
pub use sender_keys::{
    GroupMessage, GroupSession, SenderKeyDistribution, SenderKeyError, SymmetricRatchet,
};
pub use skipped::{DEFAULT_SKIPPED_CAPACITY, SkippedKeys};
