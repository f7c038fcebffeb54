//! Long-term identity, pre-keys and the bundle a peer fetches to start a
//! session.
//!
//! All constructors take seed bytes; the caller owns the randomness source.

use std::collections::HashMap;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use x25519_dalek::{PublicKey, StaticSecret};

use super::error::RatchetError;

/// X25519 key pair.
#[derive(Clone)]
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Build a key pair from 32 random bytes.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let secret = StaticSecret::from(seed);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Public half as raw bytes.
    pub fn public_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// X25519 agreement with a peer public key.
    pub(crate) fn dh(&self, their_public: &[u8; 32]) -> [u8; 32] {
        self.secret.diffie_hellman(&PublicKey::from(*their_public)).to_bytes()
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair").field("public", &self.public.as_bytes()).finish_non_exhaustive()
    }
}

/// Long-term device identity: an X25519 agreement key and an Ed25519
/// signing key for pre-key signatures.
#[derive(Clone)]
pub struct IdentityKeyPair {
    dh: KeyPair,
    signing: SigningKey,
}

impl IdentityKeyPair {
    /// Build an identity from two independent 32-byte seeds.
    pub fn from_seeds(dh_seed: [u8; 32], signing_seed: [u8; 32]) -> Self {
        Self { dh: KeyPair::from_seed(dh_seed), signing: SigningKey::from_bytes(&signing_seed) }
    }

    /// Public agreement key.
    pub fn dh_public(&self) -> [u8; 32] {
        self.dh.public_bytes()
    }

    /// Public signing key.
    pub fn signing_public(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    pub(crate) fn dh_pair(&self) -> &KeyPair {
        &self.dh
    }

    fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }
}

/// Medium-term pre-key signed by the identity.
#[derive(Clone)]
pub struct SignedPreKey {
    id: u32,
    pair: KeyPair,
    signature: [u8; 64],
}

impl SignedPreKey {
    /// Create and sign a pre-key.
    pub fn new(id: u32, identity: &IdentityKeyPair, seed: [u8; 32]) -> Self {
        let pair = KeyPair::from_seed(seed);
        let signature = identity.sign(&pair.public_bytes());
        Self { id, pair, signature }
    }

    /// Pre-key id.
    pub fn id(&self) -> u32 {
        self.id
    }
}

/// Single-use pre-key.
#[derive(Clone)]
pub struct OneTimePreKey {
    id: u32,
    pair: KeyPair,
}

impl OneTimePreKey {
    /// Create a one-time pre-key.
    pub fn new(id: u32, seed: [u8; 32]) -> Self {
        Self { id, pair: KeyPair::from_seed(seed) }
    }

    /// Key id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Public half, as uploaded to the directory.
    pub fn public_bytes(&self) -> [u8; 32] {
        self.pair.public_bytes()
    }
}

/// Public material an initiator needs to agree on a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreKeyBundle {
    /// Responder identity agreement key
    pub identity_dh: [u8; 32],
    /// Responder identity signing key
    pub identity_signing: [u8; 32],
    /// Id of the signed pre-key
    pub signed_prekey_id: u32,
    /// Signed pre-key public bytes
    pub signed_prekey: [u8; 32],
    /// Ed25519 signature over `signed_prekey`
    pub signature: [u8; 64],
    /// One-time pre-key, absent when the directory has run out
    pub one_time_prekey: Option<(u32, [u8; 32])>,
}

impl PreKeyBundle {
    /// Check the signed pre-key signature.
    pub fn verify(&self) -> Result<(), RatchetError> {
        let verifying = VerifyingKey::from_bytes(&self.identity_signing)
            .map_err(|_| RatchetError::InvalidKey("identity signing"))?;
        let signature = Signature::from_bytes(&self.signature);
        verifying
            .verify_strict(&self.signed_prekey, &signature)
            .map_err(|_| RatchetError::InvalidSignature)
    }
}

/// Device-side secret key material.
#[derive(Clone)]
pub struct LocalKeys {
    identity: IdentityKeyPair,
    signed_prekey: SignedPreKey,
    one_time: HashMap<u32, OneTimePreKey>,
}

impl LocalKeys {
    /// Bundle an identity with its current signed pre-key.
    pub fn new(identity: IdentityKeyPair, signed_prekey: SignedPreKey) -> Self {
        Self { identity, signed_prekey, one_time: HashMap::new() }
    }

    /// Identity key pair.
    pub fn identity(&self) -> &IdentityKeyPair {
        &self.identity
    }

    /// Keep the secret half of a one-time pre-key until it is used.
    pub fn add_one_time(&mut self, key: OneTimePreKey) {
        self.one_time.insert(key.id, key);
    }

    /// One-time pre-keys not yet consumed.
    pub fn one_time_count(&self) -> usize {
        self.one_time.len()
    }

    /// Bundle without a one-time pre-key; the directory attaches one.
    pub fn public_bundle(&self) -> PreKeyBundle {
        PreKeyBundle {
            identity_dh: self.identity.dh_public(),
            identity_signing: self.identity.signing_public(),
            signed_prekey_id: self.signed_prekey.id,
            signed_prekey: self.signed_prekey.pair.public_bytes(),
            signature: self.signed_prekey.signature,
            one_time_prekey: None,
        }
    }

    pub(crate) fn signed_prekey(&self) -> &SignedPreKey {
        &self.signed_prekey
    }

    pub(crate) fn signed_pair(&self) -> &KeyPair {
        &self.signed_prekey.pair
    }

    pub(crate) fn peek_one_time(&self, id: u32) -> Option<&KeyPair> {
        self.one_time.get(&id).map(|key| &key.pair)
    }

    pub(crate) fn consume_one_time(&mut self, id: u32) -> bool {
        self.one_time.remove(&id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> LocalKeys {
        let identity = IdentityKeyPair::from_seeds([1; 32], [2; 32]);
        let spk = SignedPreKey::new(7, &identity, [3; 32]);
        LocalKeys::new(identity, spk)
    }

    #[test]
    fn published_bundle_verifies() {
        assert_eq!(local().public_bundle().verify(), Ok(()));
    }

    #[test]
    fn tampered_prekey_is_rejected() {
        let mut bundle = local().public_bundle();
        bundle.signed_prekey[0] ^= 0xFF;
        assert_eq!(bundle.verify(), Err(RatchetError::InvalidSignature));
    }

    #[test]
    fn dh_agrees_both_ways() {
        let a = KeyPair::from_seed([9; 32]);
        let b = KeyPair::from_seed([10; 32]);
        assert_eq!(a.dh(&b.public_bytes()), b.dh(&a.public_bytes()));
    }

    #[test]
    fn one_time_keys_are_consumed_once() {
        let mut keys = local();
        keys.add_one_time(OneTimePreKey::new(1, [4; 32]));

        assert!(keys.peek_one_time(1).is_some());
        assert!(keys.consume_one_time(1));
        assert!(!keys.consume_one_time(1));
        assert_eq!(keys.one_time_count(), 0);
    }
}
