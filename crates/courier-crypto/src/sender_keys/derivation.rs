//! Key derivation for sender chains using HKDF

use hkdf::Hkdf;
use sha2::Sha256;

/// Label used for sender chain derivation
const SENDER_KEY_LABEL: &[u8] = b"courierSenderV1";

/// Derive a member's chain seed from the group master key.
///
/// This produces a 32-byte seed that is unique per (`key_epoch`, `member_id`)
/// pair. The seed initializes a [`crate::SymmetricRatchet`] for that member.
///
/// # Security
///
/// - Different key epochs produce different seeds (a re-minted master key
///   shares nothing with the previous one)
/// - Different members produce different seeds (sender isolation)
/// - Deterministic: every holder of the master key derives the same chain
pub fn derive_sender_key_seed(master_key: &[u8], key_epoch: u64, member_id: u64) -> [u8; 32] {
    let hkdf = Hkdf::<Sha256>::new(None, master_key);

    // label || key_epoch || member_id
    let mut info = Vec::with_capacity(SENDER_KEY_LABEL.len() + 16);
    info.extend_from_slice(SENDER_KEY_LABEL);
    info.extend_from_slice(&key_epoch.to_be_bytes());
    info.extend_from_slice(&member_id.to_be_bytes());

    let mut seed = [0u8; 32];
    let Ok(()) = hkdf.expand(&info, &mut seed) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    seed
}
