//! Group message encryption using `XChaCha20-Poly1305`
//!
//! Pure functions; the random nonce suffix is supplied by the caller.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use serde::{Deserialize, Serialize};

use super::{error::SenderKeyError, ratchet::MessageKey};

/// Size of the random suffix in the nonce (8 bytes)
pub const NONCE_RANDOM_SIZE: usize = 8;

/// A group message encrypted under one member's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMessage {
    /// Epoch of the master key the chain derives from
    pub key_epoch: u64,
    /// Member whose chain produced the key
    pub sender_id: u64,
    /// Chain generation of the message key
    pub generation: u32,
    /// The 24-byte `XChaCha20` nonce
    pub nonce: [u8; 24],
    /// Ciphertext including the 16-byte Poly1305 tag
    pub ciphertext: Vec<u8>,
}

/// Encrypt under a member chain key.
///
/// The nonce binds (`key_epoch`, `sender_id`, generation), so a message
/// replayed under another sender or epoch fails authentication.
pub fn encrypt_message(
    plaintext: &[u8],
    message_key: &MessageKey,
    key_epoch: u64,
    sender_id: u64,
    random_suffix: [u8; NONCE_RANDOM_SIZE],
) -> GroupMessage {
    let nonce = build_nonce(key_epoch, sender_id, message_key.generation(), random_suffix);
    let cipher = XChaCha20Poly1305::new(message_key.key().into());

    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(&nonce), plaintext) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    GroupMessage {
        key_epoch,
        sender_id,
        generation: message_key.generation(),
        nonce,
        ciphertext,
    }
}

/// Decrypt a group message with the matching member chain key.
pub fn decrypt_message(
    message: &GroupMessage,
    message_key: &MessageKey,
) -> Result<Vec<u8>, SenderKeyError> {
    if message_key.generation() != message.generation {
        return Err(SenderKeyError::DecryptionFailed {
            reason: format!(
                "generation mismatch: key is {}, message is {}",
                message_key.generation(),
                message.generation
            ),
        });
    }

    let expected = build_nonce(
        message.key_epoch,
        message.sender_id,
        message.generation,
        suffix_of(&message.nonce),
    );
    if expected != message.nonce {
        return Err(SenderKeyError::DecryptionFailed {
            reason: "nonce does not match message metadata".to_string(),
        });
    }

    let cipher = XChaCha20Poly1305::new(message_key.key().into());
    cipher
        .decrypt(XNonce::from_slice(&message.nonce), message.ciphertext.as_slice())
        .map_err(|_| SenderKeyError::DecryptionFailed {
            reason: "authentication failed".to_string(),
        })
}

/// Build a 24-byte nonce.
///
/// - bytes 0-7: `key_epoch` (big-endian)
/// - bytes 8-15: `sender_id` (big-endian)
/// - bytes 16-19: generation (big-endian)
/// - bytes 20-23: first half of the random suffix
///
/// Only four random bytes fit; the remaining suffix bytes are folded in with
/// XOR so the whole caller-provided suffix contributes.
fn build_nonce(
    key_epoch: u64,
    sender_id: u64,
    generation: u32,
    random_suffix: [u8; NONCE_RANDOM_SIZE],
) -> [u8; 24] {
    let mut nonce = [0u8; 24];
    nonce[0..8].copy_from_slice(&key_epoch.to_be_bytes());
    nonce[8..16].copy_from_slice(&sender_id.to_be_bytes());
    nonce[16..20].copy_from_slice(&generation.to_be_bytes());
    for i in 0..4 {
        nonce[20 + i] = random_suffix[i] ^ random_suffix[i + 4];
    }
    nonce
}

fn suffix_of(nonce: &[u8; 24]) -> [u8; NONCE_RANDOM_SIZE] {
    let mut suffix = [0u8; NONCE_RANDOM_SIZE];
    suffix[..4].copy_from_slice(&nonce[20..24]);
    suffix
}

#[cfg(test)]
mod tests {
    use super::{super::ratchet::SymmetricRatchet, *};

    fn key_at(generation: u32) -> MessageKey {
        let mut ratchet = SymmetricRatchet::new(&[0x42; 32]);
        let mut key = ratchet.advance().unwrap();
        for _ in 0..generation {
            key = ratchet.advance().unwrap();
        }
        key
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = key_at(0);
        let encrypted = encrypt_message(b"hello group", &key, 1, 42, [0xAB; NONCE_RANDOM_SIZE]);
        assert_eq!(decrypt_message(&encrypted, &key).unwrap(), b"hello group");
    }

    #[test]
    fn metadata_is_recorded() {
        let key = key_at(5);
        let encrypted = encrypt_message(b"x", &key, 9, 7, [0; NONCE_RANDOM_SIZE]);

        assert_eq!(encrypted.key_epoch, 9);
        assert_eq!(encrypted.sender_id, 7);
        assert_eq!(encrypted.generation, 5);
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = key_at(0);
        let mut encrypted = encrypt_message(b"hello", &key, 0, 1, [1; NONCE_RANDOM_SIZE]);
        encrypted.ciphertext[0] ^= 0xFF;

        assert!(matches!(
            decrypt_message(&encrypted, &key),
            Err(SenderKeyError::DecryptionFailed { .. })
        ));
    }

    #[test]
    fn relabelled_sender_fails() {
        let key = key_at(0);
        let mut encrypted = encrypt_message(b"hello", &key, 0, 1, [1; NONCE_RANDOM_SIZE]);
        encrypted.sender_id = 2;

        assert!(decrypt_message(&encrypted, &key).is_err());
    }

    #[test]
    fn wrong_generation_key_fails() {
        let encrypted = encrypt_message(b"hello", &key_at(0), 0, 1, [1; NONCE_RANDOM_SIZE]);
        assert!(decrypt_message(&encrypted, &key_at(1)).is_err());
    }
}
