use thiserror::Error;

use crate::{content::ContentError, double_ratchet::RatchetError, sender_keys::SenderKeyError};

/// Any cryptographic failure. Fatal for the message it concerns only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Pairwise session failure
    #[error(transparent)]
    Ratchet(#[from] RatchetError),

    /// Group sender-key failure
    #[error(transparent)]
    SenderKey(#[from] SenderKeyError),

    /// Content sealing failure
    #[error(transparent)]
    Content(#[from] ContentError),
}
