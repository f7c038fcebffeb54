//! Sender keys: one symmetric chain per group member.
//!
//! ```text
//! Group master key (minted by admin, sent over pairwise sessions)
//!        │
//!        ▼
//! HKDF(key_epoch, member_id) → member chain seed
//!        │
//!        ▼
//! Symmetric ratchet → message keys (one per group message)
//! ```

mod derivation;
mod encryption;
mod error;
mod group;
mod ratchet;

pub use derivation::derive_sender_key_seed;
pub use encryption::{GroupMessage, NONCE_RANDOM_SIZE, decrypt_message, encrypt_message};
pub use error::SenderKeyError;
pub use group::{DISTRIBUTION_HEADER_LEN, GroupSession, SenderKeyDistribution};
pub use ratchet::{MAX_SKIP, MessageKey, SymmetricRatchet};
