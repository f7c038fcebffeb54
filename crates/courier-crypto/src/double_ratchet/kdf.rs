//! Root, chain and message-key derivation for the double ratchet.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const ROOT_INFO: &[u8] = b"courierRatchetRoot";
const MESSAGE_INFO: &[u8] = b"courierRatchetMessage";
const X3DH_INFO: &[u8] = b"courierX3dh";

/// Byte fed to HMAC to derive a message key.
const MESSAGE_KEY_CONSTANT: u8 = 0x01;
/// Byte fed to HMAC to derive the next chain key.
const CHAIN_KEY_CONSTANT: u8 = 0x02;

/// Combine the X3DH agreement outputs into the initial shared secret.
pub(crate) fn kdf_x3dh(dh_outputs: &[[u8; 32]]) -> [u8; 32] {
    let mut input = Vec::with_capacity(32 * (dh_outputs.len() + 1));
    input.extend_from_slice(&[0xFF; 32]);
    for output in dh_outputs {
        input.extend_from_slice(output);
    }

    let hkdf = Hkdf::<Sha256>::new(Some(&[0u8; 32]), &input);
    let mut secret = [0u8; 32];
    let Ok(()) = hkdf.expand(X3DH_INFO, &mut secret) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };
    secret
}

/// Root step: mix a DH output into the root key.
///
/// Returns `(new_root_key, new_chain_key)`.
pub(crate) fn kdf_root(root_key: &[u8; 32], dh_output: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let hkdf = Hkdf::<Sha256>::new(Some(root_key), dh_output);
    let mut okm = [0u8; 64];
    let Ok(()) = hkdf.expand(ROOT_INFO, &mut okm) else {
        unreachable!("64 bytes is a valid HKDF-SHA256 output length");
    };

    let mut root = [0u8; 32];
    let mut chain = [0u8; 32];
    root.copy_from_slice(&okm[..32]);
    chain.copy_from_slice(&okm[32..]);
    (root, chain)
}

/// Chain step. Returns `(next_chain_key, message_key)`; the input chain key
/// cannot be recovered from either.
pub(crate) fn kdf_chain(chain_key: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    (hmac_byte(chain_key, CHAIN_KEY_CONSTANT), hmac_byte(chain_key, MESSAGE_KEY_CONSTANT))
}

/// Expand a message key into an AEAD key and nonce.
pub(crate) fn expand_message_key(message_key: &[u8; 32]) -> ([u8; 32], [u8; 24]) {
    let hkdf = Hkdf::<Sha256>::new(None, message_key);
    let mut okm = [0u8; 56];
    let Ok(()) = hkdf.expand(MESSAGE_INFO, &mut okm) else {
        unreachable!("56 bytes is a valid HKDF-SHA256 output length");
    };

    let mut key = [0u8; 32];
    let mut nonce = [0u8; 24];
    key.copy_from_slice(&okm[..32]);
    nonce.copy_from_slice(&okm[32..]);
    (key, nonce)
}

fn hmac_byte(key: &[u8; 32], constant: u8) -> [u8; 32] {
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        unreachable!("HMAC accepts keys of any length");
    };
    mac.update(&[constant]);

    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_step_separates_outputs() {
        let (next, message) = kdf_chain(&[7; 32]);
        assert_ne!(next, message);
        assert_ne!(next, [7; 32]);
    }

    #[test]
    fn root_step_depends_on_dh_output() {
        let a = kdf_root(&[1; 32], &[2; 32]);
        let b = kdf_root(&[1; 32], &[3; 32]);
        assert_ne!(a.0, b.0);
        assert_ne!(a.1, b.1);
    }

    #[test]
    fn x3dh_secret_changes_with_optional_fourth_output() {
        let three = kdf_x3dh(&[[1; 32], [2; 32], [3; 32]]);
        let four = kdf_x3dh(&[[1; 32], [2; 32], [3; 32], [4; 32]]);
        assert_ne!(three, four);
    }
}
