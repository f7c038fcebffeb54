//! Per-member hash chain for group message keys.
//!
//! A chain only moves forward. The chain key for generation `n` is
//! destroyed as soon as generation `n + 1` exists, so a leaked chain state
//! never exposes keys that were already used. Two chains built from the
//! same seed yield identical keys at identical generations.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

use super::error::SenderKeyError;

type HmacSha256 = Hmac<Sha256>;

/// Label for deriving the next chain key
const CHAIN_LABEL: &[u8] = b"chain";

/// Label for deriving a message key
const MESSAGE_LABEL: &[u8] = b"message";

/// Maximum number of generations a receiver skips in one step.
pub const MAX_SKIP: u32 = 1000;

/// A message key derived from a member chain.
///
/// Used for exactly one encryption or decryption, then dropped (zeroized).
#[derive(Clone)]
pub struct MessageKey {
    key: [u8; 32],
    generation: u32,
}

impl MessageKey {
    /// Rebuild a key taken from the skipped-key cache.
    pub(crate) fn from_parts(key: [u8; 32], generation: u32) -> Self {
        Self { key, generation }
    }

    /// 32-byte symmetric key for XChaCha20-Poly1305 AEAD.
    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    /// Chain generation this key was derived from.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl Drop for MessageKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Forward-secure symmetric ratchet.
///
/// Each [`advance()`](Self::advance) derives the message key for the current
/// generation, derives the next chain key and overwrites the old one. Nothing
/// in this type can move a chain backwards.
#[derive(Clone)]
pub struct SymmetricRatchet {
    chain_key: [u8; 32],
    generation: u32,
}

impl SymmetricRatchet {
    /// Create a new ratchet from a member chain seed (generation 0).
    pub fn new(seed: &[u8; 32]) -> Self {
        Self { chain_key: *seed, generation: 0 }
    }

    /// Generation of the next key this ratchet will produce.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Derive the message key for the current generation and step the chain.
    pub fn advance(&mut self) -> Result<MessageKey, SenderKeyError> {
        if self.generation == u32::MAX {
            return Err(SenderKeyError::GenerationOverflow { current: self.generation });
        }

        let message_key = self.derive(MESSAGE_LABEL);
        let next_chain_key = self.derive(CHAIN_LABEL);

        self.chain_key.zeroize();
        self.chain_key = next_chain_key;

        let current = self.generation;
        self.generation += 1;

        Ok(MessageKey { key: message_key, generation: current })
    }

    /// Step the chain forward until the next key has generation `target`.
    ///
    /// Returns the keys for every skipped generation so the caller can keep
    /// them for messages that arrive late. Fails without touching the chain
    /// if `target` is behind or more than `max_skip` ahead.
    pub fn skip_to(
        &mut self,
        target: u32,
        max_skip: u32,
    ) -> Result<Vec<MessageKey>, SenderKeyError> {
        if target < self.generation || target - self.generation > max_skip {
            return Err(SenderKeyError::RatchetTooFarBehind {
                current: self.generation,
                requested: target,
            });
        }

        let mut skipped = Vec::with_capacity((target - self.generation) as usize);
        while self.generation < target {
            skipped.push(self.advance()?);
        }
        Ok(skipped)
    }

    /// Move the chain to `target` and discard every key on the way.
    ///
    /// Used when joining a group whose senders are already mid-chain; the
    /// joiner must not hold keys for messages sent before it arrived. A
    /// target at or behind the current generation is a no-op.
    pub fn fast_forward(&mut self, target: u32) -> Result<(), SenderKeyError> {
        while self.generation < target {
            self.advance()?;
        }
        Ok(())
    }

    fn derive(&self, label: &[u8]) -> [u8; 32] {
        let Ok(mac) = HmacSha256::new_from_slice(&self.chain_key) else {
            unreachable!("HMAC-SHA256 accepts any key size");
        };
        mac.chain_update(label).finalize().into_bytes().into()
    }
}

impl Drop for SymmetricRatchet {
    fn drop(&mut self) {
        self.chain_key.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_seed() -> [u8; 32] {
        std::array::from_fn(|i| (i as u8).wrapping_mul(7))
    }

    #[test]
    fn each_step_yields_a_fresh_key_and_generation() {
        let mut chain = SymmetricRatchet::new(&test_seed());

        let first = chain.advance().unwrap();
        let second = chain.advance().unwrap();

        assert_eq!((first.generation(), second.generation()), (0, 1));
        assert_eq!(chain.generation(), 2);
        assert_ne!(first.key(), second.key());
    }

    #[test]
    fn chains_from_one_seed_agree() {
        let mut sender = SymmetricRatchet::new(&test_seed());
        let mut receiver = sender.clone();

        for _ in 0..10 {
            assert_eq!(sender.advance().unwrap().key(), receiver.advance().unwrap().key());
        }
    }

    #[test]
    fn exhausted_chain_refuses_to_wrap() {
        let mut chain = SymmetricRatchet::new(&test_seed());
        chain.generation = u32::MAX;
        assert!(matches!(chain.advance(), Err(SenderKeyError::GenerationOverflow { .. })));
    }

    #[test]
    fn skip_to_returns_intermediate_keys() {
        let mut sequential = SymmetricRatchet::new(&test_seed());
        let expected: Vec<[u8; 32]> = (0..4).map(|_| *sequential.advance().unwrap().key()).collect();

        let mut skipping = SymmetricRatchet::new(&test_seed());
        let skipped = skipping.skip_to(3, MAX_SKIP).unwrap();

        assert_eq!(skipped.len(), 3);
        for (key, want) in skipped.iter().zip(&expected) {
            assert_eq!(key.key(), want);
        }
        assert_eq!(skipping.advance().unwrap().key(), &expected[3]);
    }

    #[test]
    fn skip_to_rejects_past_generation() {
        let mut ratchet = SymmetricRatchet::new(&test_seed());
        ratchet.skip_to(5, MAX_SKIP).unwrap();

        let result = ratchet.skip_to(3, MAX_SKIP);
        assert!(matches!(
            result,
            Err(SenderKeyError::RatchetTooFarBehind { current: 5, requested: 3 })
        ));
    }

    #[test]
    fn fast_forward_ignores_skip_limit_and_keeps_no_keys() {
        let mut sequential = SymmetricRatchet::new(&test_seed());
        sequential.skip_to(MAX_SKIP, MAX_SKIP).unwrap();
        sequential.skip_to(MAX_SKIP + 2, MAX_SKIP).unwrap();
        let expected = *sequential.advance().unwrap().key();

        let mut joined = SymmetricRatchet::new(&test_seed());
        joined.fast_forward(MAX_SKIP + 2).unwrap();
        assert_eq!(joined.generation(), MAX_SKIP + 2);
        assert_eq!(joined.advance().unwrap().key(), &expected);

        joined.fast_forward(1).unwrap();
        assert_eq!(joined.generation(), MAX_SKIP + 3);
    }

    #[test]
    fn skip_to_rejects_gap_beyond_limit() {
        let mut ratchet = SymmetricRatchet::new(&test_seed());
        assert!(ratchet.skip_to(11, 10).is_err());
        assert_eq!(ratchet.generation(), 0, "failed skip must not move the chain");
    }
}
