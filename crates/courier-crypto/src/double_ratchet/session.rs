//! Double ratchet session.
//!
//! The session owns the root key, one sending and one receiving chain, the
//! local ratchet key pair and a bounded cache of skipped message keys keyed
//! by `(ratchet public key, counter)`.
//!
//! # Ratchet steps
//!
//! A message carrying an unseen ratchet public key closes the current
//! receiving chain (caching the keys it still owes), mixes a DH output into
//! the root key and opens a new receiving chain. The sending chain is
//! discarded at the same moment; the next `encrypt` generates a fresh key
//! pair and derives a new sending chain from the root. No operation can
//! recover an earlier chain key from a later one.
//!
//! # Transactions
//!
//! `decrypt` runs on a copy of the session and commits only if the message
//! authenticates, so garbage input never advances or corrupts state.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::{
    error::RatchetError,
    kdf::{expand_message_key, kdf_chain, kdf_root},
    keys::{IdentityKeyPair, KeyPair, LocalKeys, PreKeyBundle},
    x3dh::{self, PreKeyHeader},
};
use crate::skipped::{DEFAULT_SKIPPED_CAPACITY, SkippedKeys};

/// Largest counter gap accepted in one receive by default.
pub const DEFAULT_MAX_SKIP: u32 = 1000;

/// Encoded length of a [`RatchetHeader`].
const HEADER_LEN: usize = 32 + 4 + 4;

/// Per-session limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Size of the skipped-key cache
    pub skipped_capacity: usize,
    /// Largest forward gap derived in one receive
    pub max_skip: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { skipped_capacity: DEFAULT_SKIPPED_CAPACITY, max_skip: DEFAULT_MAX_SKIP }
    }
}

/// Cleartext, authenticated part of a ratchet message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatchetHeader {
    /// Sender's current ratchet public key
    pub dh_public: [u8; 32],
    /// Length of the sender's previous sending chain
    pub previous_chain_length: u32,
    /// Position in the current sending chain
    pub counter: u32,
}

impl RatchetHeader {
    fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[..32].copy_from_slice(&self.dh_public);
        bytes[32..36].copy_from_slice(&self.previous_chain_length.to_be_bytes());
        bytes[36..].copy_from_slice(&self.counter.to_be_bytes());
        bytes
    }
}

/// A message produced by [`RatchetSession::encrypt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatchetMessage {
    /// Ratchet header
    pub header: RatchetHeader,
    /// Present until the initiator has heard back from the responder
    pub prekey: Option<PreKeyHeader>,
    /// Ciphertext including the Poly1305 tag
    pub ciphertext: Vec<u8>,
}

/// One side of a pairwise double ratchet.
#[derive(Clone)]
pub struct RatchetSession {
    root_key: [u8; 32],
    dh_self: KeyPair,
    dh_remote: Option<[u8; 32]>,
    sending_chain: Option<[u8; 32]>,
    receiving_chain: Option<[u8; 32]>,
    send_counter: u32,
    recv_counter: u32,
    previous_chain_length: u32,
    needs_sending_ratchet: bool,
    skipped: SkippedKeys<([u8; 32], u32)>,
    max_skip: u32,
    associated_data: [u8; 64],
    pending_prekey: Option<PreKeyHeader>,
    degraded: bool,
}

impl RatchetSession {
    /// Start a session as initiator from a fetched bundle.
    ///
    /// `ephemeral_seed` feeds the X3DH ephemeral key and `ratchet_seed` the
    /// first ratchet key pair; both must be fresh randomness.
    pub fn initiate(
        identity: &IdentityKeyPair,
        bundle: &PreKeyBundle,
        ephemeral_seed: [u8; 32],
        ratchet_seed: [u8; 32],
        config: SessionConfig,
    ) -> Result<Self, RatchetError> {
        let (agreement, header) = x3dh::initiate(identity, bundle, ephemeral_seed)?;

        let dh_self = KeyPair::from_seed(ratchet_seed);
        let (root_key, sending_chain) =
            kdf_root(&agreement.shared_secret, &dh_self.dh(&bundle.signed_prekey));

        Ok(Self {
            root_key,
            dh_self,
            dh_remote: Some(bundle.signed_prekey),
            sending_chain: Some(sending_chain),
            receiving_chain: None,
            send_counter: 0,
            recv_counter: 0,
            previous_chain_length: 0,
            needs_sending_ratchet: false,
            skipped: SkippedKeys::new(config.skipped_capacity),
            max_skip: config.max_skip,
            associated_data: agreement.associated_data,
            pending_prekey: Some(header),
            degraded: agreement.degraded,
        })
    }

    /// Establish the responder side from the first message that arrives and
    /// decrypt it.
    ///
    /// The one-time pre-key named by the initiator is consumed from `local`
    /// only after the message authenticates; a second initiation naming the
    /// same key fails.
    pub fn respond(
        local: &mut LocalKeys,
        message: &RatchetMessage,
        config: SessionConfig,
    ) -> Result<(Self, Vec<u8>), RatchetError> {
        let prekey = message.prekey.as_ref().ok_or(RatchetError::MissingPreKey)?;
        let agreement = x3dh::respond(local, prekey)?;

        let mut session = Self {
            root_key: agreement.shared_secret,
            dh_self: local.signed_pair().clone(),
            dh_remote: None,
            sending_chain: None,
            receiving_chain: None,
            send_counter: 0,
            recv_counter: 0,
            previous_chain_length: 0,
            needs_sending_ratchet: false,
            skipped: SkippedKeys::new(config.skipped_capacity),
            max_skip: config.max_skip,
            associated_data: agreement.associated_data,
            pending_prekey: None,
            degraded: agreement.degraded,
        };
        let plaintext = session.decrypt(message)?;

        if let Some(id) = prekey.one_time_prekey_id {
            local.consume_one_time(id);
        }
        Ok((session, plaintext))
    }

    /// True when the agreement ran without a one-time pre-key.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Number of message keys parked for out-of-order delivery.
    pub fn skipped_len(&self) -> usize {
        self.skipped.len()
    }

    /// Encrypt the next message.
    ///
    /// `ratchet_seed` is only consumed when a ratchet step is due (first send
    /// after receiving a new ratchet key); callers pass fresh randomness on
    /// every call.
    pub fn encrypt(
        &mut self,
        plaintext: &[u8],
        ratchet_seed: [u8; 32],
    ) -> Result<RatchetMessage, RatchetError> {
        if self.needs_sending_ratchet {
            let remote = self.dh_remote.ok_or(RatchetError::NoSendingChain)?;
            let dh_self = KeyPair::from_seed(ratchet_seed);
            let (root_key, chain) = kdf_root(&self.root_key, &dh_self.dh(&remote));
            self.root_key.zeroize();
            self.root_key = root_key;
            self.dh_self = dh_self;
            self.sending_chain = Some(chain);
            self.needs_sending_ratchet = false;
        }

        let chain = self.sending_chain.as_mut().ok_or(RatchetError::NoSendingChain)?;
        if self.send_counter == u32::MAX {
            return Err(RatchetError::CounterOverflow);
        }

        let (next, mut message_key) = kdf_chain(chain);
        chain.zeroize();
        *chain = next;

        let header = RatchetHeader {
            dh_public: self.dh_self.public_bytes(),
            previous_chain_length: self.previous_chain_length,
            counter: self.send_counter,
        };
        self.send_counter += 1;

        let ciphertext = seal(&message_key, &self.associated_data, header, plaintext);
        message_key.zeroize();

        Ok(RatchetMessage { header, prekey: self.pending_prekey.clone(), ciphertext })
    }

    /// Decrypt a message. State changes only on success.
    pub fn decrypt(&mut self, message: &RatchetMessage) -> Result<Vec<u8>, RatchetError> {
        let mut staged = self.clone();
        let plaintext = staged.decrypt_staged(message)?;
        *self = staged;
        Ok(plaintext)
    }

    fn decrypt_staged(&mut self, message: &RatchetMessage) -> Result<Vec<u8>, RatchetError> {
        let header = message.header;

        if let Some(mut cached) = self.skipped.take(&(header.dh_public, header.counter)) {
            let plaintext = open(&cached, &self.associated_data, header, &message.ciphertext);
            cached.zeroize();
            return self.received(plaintext);
        }

        if self.dh_remote != Some(header.dh_public) {
            if self.receiving_chain.is_some() {
                self.skip_until(header.previous_chain_length)?;
            }
            self.receive_ratchet(header.dh_public);
        }

        if header.counter < self.recv_counter {
            return Err(RatchetError::MessageKeyUnavailable { counter: header.counter });
        }
        self.skip_until(header.counter)?;

        let chain = self.receiving_chain.as_mut().ok_or(RatchetError::DecryptionFailed)?;
        let (next, mut message_key) = kdf_chain(chain);
        chain.zeroize();
        *chain = next;
        self.recv_counter += 1;

        let plaintext = open(&message_key, &self.associated_data, header, &message.ciphertext);
        message_key.zeroize();
        self.received(plaintext)
    }

    /// Any authenticated message proves the peer holds the session.
    fn received(
        &mut self,
        plaintext: Result<Vec<u8>, RatchetError>,
    ) -> Result<Vec<u8>, RatchetError> {
        let plaintext = plaintext?;
        self.pending_prekey = None;
        Ok(plaintext)
    }

    fn receive_ratchet(&mut self, remote: [u8; 32]) {
        let (root_key, chain) = kdf_root(&self.root_key, &self.dh_self.dh(&remote));
        self.root_key.zeroize();
        self.root_key = root_key;
        self.receiving_chain = Some(chain);
        self.dh_remote = Some(remote);
        self.recv_counter = 0;

        if let Some(old) = self.sending_chain.as_mut() {
            old.zeroize();
        }
        self.sending_chain = None;
        self.previous_chain_length = self.send_counter;
        self.send_counter = 0;
        self.needs_sending_ratchet = true;
    }

    /// Derive and cache receiving keys up to (not including) `until`.
    fn skip_until(&mut self, until: u32) -> Result<(), RatchetError> {
        if until <= self.recv_counter {
            return Ok(());
        }
        let gap = until - self.recv_counter;
        if gap > self.max_skip {
            return Err(RatchetError::TooManySkipped { requested: gap, limit: self.max_skip });
        }
        let (Some(chain), Some(remote)) = (self.receiving_chain.as_mut(), self.dh_remote) else {
            return Ok(());
        };

        while self.recv_counter < until {
            let (next, message_key) = kdf_chain(chain);
            chain.zeroize();
            *chain = next;
            self.skipped.insert((remote, self.recv_counter), message_key);
            self.recv_counter += 1;
        }
        Ok(())
    }
}

impl Drop for RatchetSession {
    fn drop(&mut self) {
        self.root_key.zeroize();
        if let Some(chain) = self.sending_chain.as_mut() {
            chain.zeroize();
        }
        if let Some(chain) = self.receiving_chain.as_mut() {
            chain.zeroize();
        }
    }
}

fn aad(associated_data: &[u8; 64], header: RatchetHeader) -> Vec<u8> {
    let mut aad = Vec::with_capacity(64 + HEADER_LEN);
    aad.extend_from_slice(associated_data);
    aad.extend_from_slice(&header.to_bytes());
    aad
}

fn seal(
    message_key: &[u8; 32],
    associated_data: &[u8; 64],
    header: RatchetHeader,
    plaintext: &[u8],
) -> Vec<u8> {
    let (mut key, nonce) = expand_message_key(message_key);
    let cipher = XChaCha20Poly1305::new((&key).into());
    key.zeroize();

    let aad = aad(associated_data, header);
    let Ok(ciphertext) =
        cipher.encrypt(XNonce::from_slice(&nonce), Payload { msg: plaintext, aad: &aad })
    else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };
    ciphertext
}

fn open(
    message_key: &[u8; 32],
    associated_data: &[u8; 64],
    header: RatchetHeader,
    ciphertext: &[u8],
) -> Result<Vec<u8>, RatchetError> {
    let (mut key, nonce) = expand_message_key(message_key);
    let cipher = XChaCha20Poly1305::new((&key).into());
    key.zeroize();

    let aad = aad(associated_data, header);
    cipher
        .decrypt(XNonce::from_slice(&nonce), Payload { msg: ciphertext, aad: &aad })
        .map_err(|_| RatchetError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::double_ratchet::keys::{OneTimePreKey, SignedPreKey};

    fn bob_keys() -> LocalKeys {
        let identity = IdentityKeyPair::from_seeds([1; 32], [2; 32]);
        let spk = SignedPreKey::new(1, &identity, [3; 32]);
        let mut keys = LocalKeys::new(identity, spk);
        keys.add_one_time(OneTimePreKey::new(9, [4; 32]));
        keys
    }

    fn bundle_with_one_time(keys: &LocalKeys) -> PreKeyBundle {
        let mut bundle = keys.public_bundle();
        bundle.one_time_prekey = Some((9, OneTimePreKey::new(9, [4; 32]).public_bytes()));
        bundle
    }

    fn alice_session(bundle: &PreKeyBundle) -> RatchetSession {
        let alice = IdentityKeyPair::from_seeds([5; 32], [6; 32]);
        RatchetSession::initiate(&alice, bundle, [7; 32], [8; 32], SessionConfig::default())
            .unwrap()
    }

    #[test]
    fn first_message_establishes_responder() {
        let mut bob = bob_keys();
        let mut alice = alice_session(&bundle_with_one_time(&bob));

        let msg = alice.encrypt(b"hello bob", [0; 32]).unwrap();
        assert!(msg.prekey.is_some());

        let (_, plaintext) =
            RatchetSession::respond(&mut bob, &msg, SessionConfig::default()).unwrap();
        assert_eq!(plaintext, b"hello bob");
        assert_eq!(bob.one_time_count(), 0);
    }

    #[test]
    fn one_time_key_cannot_be_reused() {
        let mut bob = bob_keys();
        let bundle = bundle_with_one_time(&bob);
        let mut first = alice_session(&bundle);
        let mut second = alice_session(&bundle);

        let m1 = first.encrypt(b"one", [0; 32]).unwrap();
        let m2 = second.encrypt(b"two", [0; 32]).unwrap();

        RatchetSession::respond(&mut bob, &m1, SessionConfig::default()).unwrap();
        assert!(matches!(
            RatchetSession::respond(&mut bob, &m2, SessionConfig::default()),
            Err(RatchetError::UnknownOneTimePreKey(9))
        ));
    }

    #[test]
    fn reply_ratchets_and_clears_prekey_header() {
        let mut bob_local = bob_keys();
        let mut alice = alice_session(&bundle_with_one_time(&bob_local));

        let m1 = alice.encrypt(b"ping", [0; 32]).unwrap();
        let (mut bob, _) =
            RatchetSession::respond(&mut bob_local, &m1, SessionConfig::default()).unwrap();

        let reply = bob.encrypt(b"pong", [0x33; 32]).unwrap();
        assert_ne!(reply.header.dh_public, m1.header.dh_public);
        assert!(reply.prekey.is_none());
        assert_eq!(alice.decrypt(&reply).unwrap(), b"pong");

        let m2 = alice.encrypt(b"again", [0x44; 32]).unwrap();
        assert!(m2.prekey.is_none());
        assert_eq!(m2.header.previous_chain_length, 1);
        assert_eq!(bob.decrypt(&m2).unwrap(), b"again");
    }

    #[test]
    fn responder_sends_after_first_receive() {
        let mut bob_local = bob_keys();
        let mut alice = alice_session(&bundle_with_one_time(&bob_local));
        let m1 = alice.encrypt(b"x", [0; 32]).unwrap();
        let (mut bob, _) =
            RatchetSession::respond(&mut bob_local, &m1, SessionConfig::default()).unwrap();

        let reply = bob.encrypt(b"y", [1; 32]).unwrap();
        assert_eq!(reply.header.counter, 0);
        assert_eq!(reply.header.previous_chain_length, 0);
    }

    #[test]
    fn tampered_message_leaves_session_usable() {
        let mut bob_local = bob_keys();
        let mut alice = alice_session(&bundle_with_one_time(&bob_local));
        let m1 = alice.encrypt(b"first", [0; 32]).unwrap();
        let (mut bob, _) =
            RatchetSession::respond(&mut bob_local, &m1, SessionConfig::default()).unwrap();

        let mut m2 = alice.encrypt(b"second", [0; 32]).unwrap();
        let original = m2.clone();
        m2.ciphertext[0] ^= 0x80;

        assert_eq!(bob.decrypt(&m2), Err(RatchetError::DecryptionFailed));
        assert_eq!(bob.decrypt(&original).unwrap(), b"second");
    }

    #[test]
    fn gap_beyond_limit_is_rejected() {
        let mut bob_local = bob_keys();
        let config = SessionConfig { skipped_capacity: 10, max_skip: 2 };
        let alice_id = IdentityKeyPair::from_seeds([5; 32], [6; 32]);
        let mut alice = RatchetSession::initiate(
            &alice_id,
            &bundle_with_one_time(&bob_local),
            [7; 32],
            [8; 32],
            config,
        )
        .unwrap();

        let m0 = alice.encrypt(b"0", [0; 32]).unwrap();
        let (mut bob, _) = RatchetSession::respond(&mut bob_local, &m0, config).unwrap();
        for _ in 0..3 {
            alice.encrypt(b"lost", [0; 32]).unwrap();
        }
        let far = alice.encrypt(b"far", [0; 32]).unwrap();

        assert_eq!(
            bob.decrypt(&far),
            Err(RatchetError::TooManySkipped { requested: 3, limit: 2 })
        );
    }
}
