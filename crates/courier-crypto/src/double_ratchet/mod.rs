//! Pairwise sessions: X3DH agreement followed by a double ratchet.

mod error;
mod kdf;
mod keys;
mod session;
mod x3dh;

pub use error::RatchetError;
pub use keys::{IdentityKeyPair, KeyPair, LocalKeys, OneTimePreKey, PreKeyBundle, SignedPreKey};
pub use session::{DEFAULT_MAX_SKIP, RatchetHeader, RatchetMessage, RatchetSession, SessionConfig};
pub use x3dh::{Agreement, PreKeyHeader, initiate, respond};
