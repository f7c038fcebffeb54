//! Per-message content sealing.
//!
//! A message body is sealed once under a fresh content key. Only the 32-byte
//! content key passes through the conversation's session, so a group message
//! costs one sender-key step however large the body is.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

/// Errors from sealing and opening message bodies.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentError {
    /// Body did not authenticate under the content key.
    #[error("content failed authentication")]
    AuthenticationFailed,

    /// Unwrapped content key has the wrong length.
    #[error("content key must be 32 bytes, got {0}")]
    InvalidKeyLength(usize),
}

/// Random symmetric key for one message body.
#[derive(Clone, PartialEq, Eq)]
pub struct ContentKey([u8; 32]);

impl ContentKey {
    /// Wrap 32 random bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse an unwrapped key.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ContentError> {
        let key: [u8; 32] =
            bytes.try_into().map_err(|_| ContentError::InvalidKeyLength(bytes.len()))?;
        Ok(Self(key))
    }

    /// Raw key bytes, for wrapping under a session.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ContentKey(..)")
    }
}

impl Drop for ContentKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// A sealed message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedContent {
    /// Random 24-byte nonce
    pub nonce: [u8; 24],
    /// Ciphertext including the Poly1305 tag
    pub ciphertext: Vec<u8>,
}

/// Seal `plaintext` under `key`. The nonce must be random.
pub fn seal(plaintext: &[u8], key: &ContentKey, nonce: [u8; 24]) -> SealedContent {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(&nonce), plaintext) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };
    SealedContent { nonce, ciphertext }
}

/// Open a sealed body.
pub fn open(sealed: &SealedContent, key: &ContentKey) -> Result<Vec<u8>, ContentError> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    cipher
        .decrypt(XNonce::from_slice(&sealed.nonce), sealed.ciphertext.as_slice())
        .map_err(|_| ContentError::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_key_fails() {
        let sealed = seal(b"body", &ContentKey::from_bytes([1; 32]), [2; 24]);
        assert_eq!(
            open(&sealed, &ContentKey::from_bytes([3; 32])),
            Err(ContentError::AuthenticationFailed)
        );
        assert_eq!(open(&sealed, &ContentKey::from_bytes([1; 32])).unwrap(), b"body");
    }

    #[test]
    fn short_key_is_rejected() {
        assert_eq!(ContentKey::from_slice(&[0; 31]), Err(ContentError::InvalidKeyLength(31)));
    }
}
