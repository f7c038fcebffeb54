//! Per-member view of a group's sender-key state.

use std::collections::{BTreeMap, HashMap};

use zeroize::Zeroize;

use super::{
    derivation::derive_sender_key_seed,
    encryption::{GroupMessage, NONCE_RANDOM_SIZE, decrypt_message, encrypt_message},
    error::SenderKeyError,
    ratchet::{MAX_SKIP, MessageKey, SymmetricRatchet},
};
use crate::skipped::{DEFAULT_SKIPPED_CAPACITY, SkippedKeys};

/// Length of an encoded [`SenderKeyDistribution`] with no chain starts.
pub const DISTRIBUTION_HEADER_LEN: usize = 16 + 8 + 32 + 4;

/// Encoded size of one chain start: member id (8) and generation (4).
const CHAIN_START_LEN: usize = 8 + 4;

/// Group master key as handed from the admin to one member.
///
/// Always travels inside a pairwise ratchet message, never on its own.
/// A member joining an active group also receives `chain_starts`: the
/// generation each existing sender's chain has reached, so the joiner's
/// receiving chains begin there instead of at zero.
#[derive(Clone, PartialEq, Eq)]
pub struct SenderKeyDistribution {
    /// Group the key belongs to
    pub group_id: u128,
    /// Incremented every time the admin mints a new master key
    pub key_epoch: u64,
    /// The master key every member chain derives from
    pub master_key: [u8; 32],
    /// Next generation of each sender's chain at the time of distribution
    pub chain_starts: BTreeMap<u64, u32>,
}

impl SenderKeyDistribution {
    /// Fresh master key; every chain starts at generation 0.
    pub fn new(group_id: u128, key_epoch: u64, master_key: [u8; 32]) -> Self {
        Self { group_id, key_epoch, master_key, chain_starts: BTreeMap::new() }
    }

    /// Attach the chain positions a joining member should start from.
    #[must_use]
    pub fn with_chain_starts(mut self, chain_starts: BTreeMap<u64, u32>) -> Self {
        self.chain_starts = chain_starts;
        self
    }

    /// Layout: `group_id` (16 BE) || `key_epoch` (8 BE) || master key ||
    /// start count (4 BE) || (member (8 BE) || generation (4 BE))*.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes =
            Vec::with_capacity(DISTRIBUTION_HEADER_LEN + self.chain_starts.len() * CHAIN_START_LEN);
        bytes.extend_from_slice(&self.group_id.to_be_bytes());
        bytes.extend_from_slice(&self.key_epoch.to_be_bytes());
        bytes.extend_from_slice(&self.master_key);
        bytes.extend_from_slice(&(self.chain_starts.len() as u32).to_be_bytes());
        for (&member, &generation) in &self.chain_starts {
            bytes.extend_from_slice(&member.to_be_bytes());
            bytes.extend_from_slice(&generation.to_be_bytes());
        }
        bytes
    }

    /// Parse the layout produced by [`Self::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SenderKeyError> {
        let invalid = || SenderKeyError::InvalidDistribution(bytes.len());
        if bytes.len() < DISTRIBUTION_HEADER_LEN {
            return Err(invalid());
        }
        let (header, entries) = bytes.split_at(DISTRIBUTION_HEADER_LEN);

        let mut group_id = [0u8; 16];
        group_id.copy_from_slice(&header[..16]);
        let mut key_epoch = [0u8; 8];
        key_epoch.copy_from_slice(&header[16..24]);
        let mut master_key = [0u8; 32];
        master_key.copy_from_slice(&header[24..56]);
        let mut count = [0u8; 4];
        count.copy_from_slice(&header[56..]);

        let count = u32::from_be_bytes(count) as usize;
        if count.checked_mul(CHAIN_START_LEN) != Some(entries.len()) {
            return Err(invalid());
        }

        let mut chain_starts = BTreeMap::new();
        for entry in entries.chunks_exact(CHAIN_START_LEN) {
            let mut member = [0u8; 8];
            member.copy_from_slice(&entry[..8]);
            let mut generation = [0u8; 4];
            generation.copy_from_slice(&entry[8..]);
            let previous =
                chain_starts.insert(u64::from_be_bytes(member), u32::from_be_bytes(generation));
            if previous.is_some() {
                return Err(invalid());
            }
        }

        Ok(Self {
            group_id: u128::from_be_bytes(group_id),
            key_epoch: u64::from_be_bytes(key_epoch),
            master_key,
            chain_starts,
        })
    }
}

impl std::fmt::Debug for SenderKeyDistribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SenderKeyDistribution")
            .field("group_id", &format_args!("{:032x}", self.group_id))
            .field("key_epoch", &self.key_epoch)
            .field("chain_starts", &self.chain_starts)
            .finish_non_exhaustive()
    }
}

impl Drop for SenderKeyDistribution {
    fn drop(&mut self) {
        self.master_key.zeroize();
    }
}

/// One member's sender-key state for one group.
///
/// Holds the member's own sending chain and one receiving chain per other
/// sender. Chains named in the distribution's `chain_starts` are created at
/// install time at the given generation; any other sender's chain is created
/// lazily from the master key on its first message. Receiving only ever
/// advances the sender's chain.
#[derive(Clone)]
pub struct GroupSession {
    member_id: u64,
    key_epoch: u64,
    master_key: [u8; 32],
    max_skip: u32,
    sending: SymmetricRatchet,
    receiving: HashMap<u64, SymmetricRatchet>,
    skipped: SkippedKeys<(u64, u32)>,
}

impl GroupSession {
    /// Install a distributed master key for `member_id`.
    pub fn new(
        member_id: u64,
        distribution: &SenderKeyDistribution,
    ) -> Result<Self, SenderKeyError> {
        Self::with_limits(member_id, distribution, DEFAULT_SKIPPED_CAPACITY, MAX_SKIP)
    }

    /// Same as [`Self::new`] with an explicit skipped-key cache size and
    /// largest forward gap accepted in one receive.
    ///
    /// Fails only if a chain start cannot be reached (generation overflow).
    pub fn with_limits(
        member_id: u64,
        distribution: &SenderKeyDistribution,
        skipped_capacity: usize,
        max_skip: u32,
    ) -> Result<Self, SenderKeyError> {
        let master_key = distribution.master_key;
        let key_epoch = distribution.key_epoch;
        let chain = |member: u64| {
            SymmetricRatchet::new(&derive_sender_key_seed(&master_key, key_epoch, member))
        };

        let mut receiving = HashMap::with_capacity(distribution.chain_starts.len());
        for (&sender, &generation) in &distribution.chain_starts {
            if sender == member_id {
                continue;
            }
            let mut receiver = chain(sender);
            receiver.fast_forward(generation)?;
            receiving.insert(sender, receiver);
        }

        Ok(Self {
            member_id,
            key_epoch,
            master_key,
            max_skip,
            sending: chain(member_id),
            receiving,
            skipped: SkippedKeys::new(skipped_capacity),
        })
    }

    /// Member that owns this state.
    pub fn member_id(&self) -> u64 {
        self.member_id
    }

    /// Epoch of the installed master key.
    pub fn key_epoch(&self) -> u64 {
        self.key_epoch
    }

    /// Next generation of the own sending chain.
    pub fn sending_generation(&self) -> u32 {
        self.sending.generation()
    }

    /// Next expected generation for `sender`, if a chain exists yet.
    pub fn receiving_generation(&self, sender: u64) -> Option<u32> {
        self.receiving.get(&sender).map(SymmetricRatchet::generation)
    }

    /// Encrypt with the own chain. Consumes exactly one chain step.
    pub fn encrypt(
        &mut self,
        plaintext: &[u8],
        random_suffix: [u8; NONCE_RANDOM_SIZE],
    ) -> Result<GroupMessage, SenderKeyError> {
        let key = self.sending.advance()?;
        Ok(encrypt_message(plaintext, &key, self.key_epoch, self.member_id, random_suffix))
    }

    /// Decrypt a message from another member.
    ///
    /// State changes only on success: a failed decryption leaves the sender
    /// chain and the skipped-key cache as they were.
    pub fn decrypt(&mut self, message: &GroupMessage) -> Result<Vec<u8>, SenderKeyError> {
        if message.sender_id == self.member_id {
            return Err(SenderKeyError::OwnMessage(self.member_id));
        }
        if message.key_epoch != self.key_epoch {
            return Err(SenderKeyError::EpochMismatch {
                local: self.key_epoch,
                message: message.key_epoch,
            });
        }

        let sender = message.sender_id;
        let mut chain = self.receiving.get(&sender).cloned().unwrap_or_else(|| {
            SymmetricRatchet::new(&derive_sender_key_seed(&self.master_key, self.key_epoch, sender))
        });

        if message.generation < chain.generation() {
            let id = (sender, message.generation);
            let Some(raw) = self.skipped.take(&id) else {
                return Err(SenderKeyError::MessageKeyUnavailable {
                    sender,
                    generation: message.generation,
                });
            };
            let key = MessageKey::from_parts(raw, message.generation);
            return decrypt_message(message, &key).inspect_err(|_| {
                self.skipped.insert(id, *key.key());
            });
        }

        let gap = chain.skip_to(message.generation, self.max_skip)?;
        let key = chain.advance()?;
        let plaintext = decrypt_message(message, &key)?;

        for skipped in gap {
            self.skipped.insert((sender, skipped.generation()), *skipped.key());
        }
        self.receiving.insert(sender, chain);
        Ok(plaintext)
    }
}

impl Drop for GroupSession {
    fn drop(&mut self) {
        self.master_key.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn distribution(epoch: u64) -> SenderKeyDistribution {
        SenderKeyDistribution::new(7, epoch, [0x5A; 32])
    }

    fn session(member: u64, dist: &SenderKeyDistribution) -> GroupSession {
        GroupSession::new(member, dist).unwrap()
    }

    #[test]
    fn distribution_bytes_roundtrip() {
        let dist = distribution(3).with_chain_starts(BTreeMap::from([(1, 1500), (2, 0)]));
        let parsed = SenderKeyDistribution::from_bytes(&dist.to_bytes()).unwrap();
        assert_eq!(parsed, dist);
    }

    #[test]
    fn distribution_rejects_wrong_length() {
        assert_eq!(
            SenderKeyDistribution::from_bytes(&[0; 10]),
            Err(SenderKeyError::InvalidDistribution(10))
        );

        let mut bytes = distribution(0).with_chain_starts(BTreeMap::from([(1, 4)])).to_bytes();
        bytes.pop();
        assert!(SenderKeyDistribution::from_bytes(&bytes).is_err());
    }

    #[test]
    fn members_decrypt_each_other() {
        let mut alice = session(1, &distribution(0));
        let mut bob = session(2, &distribution(0));

        let msg = alice.encrypt(b"hi all", [0; NONCE_RANDOM_SIZE]).unwrap();
        assert_eq!(bob.decrypt(&msg).unwrap(), b"hi all");
        assert_eq!(bob.receiving_generation(1), Some(1));
        assert_eq!(bob.sending_generation(), 0, "receiving must not touch own chain");
    }

    #[test]
    fn own_message_is_rejected_without_state_change() {
        let mut alice = session(1, &distribution(0));
        let msg = alice.encrypt(b"echo", [0; NONCE_RANDOM_SIZE]).unwrap();

        assert_eq!(alice.decrypt(&msg), Err(SenderKeyError::OwnMessage(1)));
        assert_eq!(alice.sending_generation(), 1);
    }

    #[test]
    fn out_of_order_uses_cached_keys_once() {
        let mut alice = session(1, &distribution(0));
        let mut bob = session(2, &distribution(0));

        let m0 = alice.encrypt(b"0", [0; NONCE_RANDOM_SIZE]).unwrap();
        let m1 = alice.encrypt(b"1", [0; NONCE_RANDOM_SIZE]).unwrap();
        let m2 = alice.encrypt(b"2", [0; NONCE_RANDOM_SIZE]).unwrap();

        assert_eq!(bob.decrypt(&m2).unwrap(), b"2");
        assert_eq!(bob.decrypt(&m0).unwrap(), b"0");
        assert_eq!(bob.decrypt(&m1).unwrap(), b"1");
        assert!(matches!(bob.decrypt(&m1), Err(SenderKeyError::MessageKeyUnavailable { .. })));
    }

    #[test]
    fn new_epoch_cannot_be_read_with_old_key() {
        let mut old_member = session(3, &distribution(0));
        let mut admin = session(1, &SenderKeyDistribution::new(7, 1, [0x77; 32]));

        let msg = admin.encrypt(b"after leave", [0; NONCE_RANDOM_SIZE]).unwrap();
        assert!(matches!(old_member.decrypt(&msg), Err(SenderKeyError::EpochMismatch { .. })));
    }

    #[test]
    fn failed_decrypt_leaves_chain_untouched() {
        let mut alice = session(1, &distribution(0));
        let mut bob = session(2, &distribution(0));

        let mut forged = alice.encrypt(b"x", [0; NONCE_RANDOM_SIZE]).unwrap();
        forged.ciphertext[0] ^= 1;

        assert!(bob.decrypt(&forged).is_err());
        assert_eq!(bob.receiving_generation(1), None);
    }

    #[test]
    fn joiner_starts_at_distributed_generation() {
        let dist = distribution(0);
        let mut alice = session(1, &dist);
        for _ in 0..(MAX_SKIP + 5) {
            alice.encrypt(b"history", [0; NONCE_RANDOM_SIZE]).unwrap();
        }
        let old = alice.encrypt(b"before join", [0; NONCE_RANDOM_SIZE]).unwrap();

        let join = dist.clone().with_chain_starts(BTreeMap::from([(1, alice.sending_generation())]));
        let mut carol = session(3, &join);
        assert_eq!(carol.receiving_generation(1), Some(MAX_SKIP + 6));

        let fresh = alice.encrypt(b"after join", [0; NONCE_RANDOM_SIZE]).unwrap();
        assert_eq!(carol.decrypt(&fresh).unwrap(), b"after join");
        assert!(matches!(carol.decrypt(&old), Err(SenderKeyError::MessageKeyUnavailable { .. })));
    }

    #[test]
    fn skip_limit_is_configurable() {
        let dist = distribution(0);
        let mut alice = session(1, &dist);
        let mut bob = GroupSession::with_limits(2, &dist, DEFAULT_SKIPPED_CAPACITY, 2).unwrap();

        for _ in 0..3 {
            alice.encrypt(b"lost", [0; NONCE_RANDOM_SIZE]).unwrap();
        }
        let far = alice.encrypt(b"far", [0; NONCE_RANDOM_SIZE]).unwrap();
        assert!(matches!(bob.decrypt(&far), Err(SenderKeyError::RatchetTooFarBehind { .. })));
        assert_eq!(bob.receiving_generation(1), None);
    }
}
