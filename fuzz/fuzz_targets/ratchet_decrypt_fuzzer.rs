//! Fuzz target for pairwise ratchet decryption
//!
//! Two sessions exchange messages; the fuzzer picks who sends, which
//! message arrives next, and whether it is tampered with or replayed.
//!
//! # Invariants
//!
//! - An untouched message decrypts to its plaintext on first delivery,
//!   whatever the arrival order
//! - A replayed message is rejected
//! - A tampered message is rejected and leaves the session usable
//! - Arbitrary wire messages never panic

#![no_main]

use arbitrary::Arbitrary;
use courier_crypto::{
    IdentityKeyPair, LocalKeys, OneTimePreKey, RatchetMessage, RatchetSession, SessionConfig,
    SignedPreKey,
};
use courier_crypto::double_ratchet::RatchetHeader;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
struct Scenario {
    seed: u8,
    ops: Vec<Op>,
}

#[derive(Debug, Clone, Arbitrary)]
enum Op {
    Send { from_initiator: bool, body: Vec<u8> },
    Deliver { slot: u8 },
    Tamper { slot: u8, byte: u16, flip: u8 },
    Forge { to_initiator: bool, counter: u16, previous: u16, ciphertext: Vec<u8> },
}

struct InFlight {
    to_initiator: bool,
    message: RatchetMessage,
    body: Vec<u8>,
    delivered: bool,
}

const MAX_IN_FLIGHT: usize = 64;

fn seed(tag: u8, n: u8) -> [u8; 32] {
    let mut bytes = [tag; 32];
    bytes[0] = n;
    bytes
}

fuzz_target!(|scenario: Scenario| {
    let config = SessionConfig::default();
    let initiator_identity = IdentityKeyPair::from_seeds(seed(1, scenario.seed), seed(2, scenario.seed));
    let responder_identity = IdentityKeyPair::from_seeds(seed(3, scenario.seed), seed(4, scenario.seed));
    let signed = SignedPreKey::new(1, &responder_identity, seed(5, scenario.seed));
    let mut responder_keys = LocalKeys::new(responder_identity, signed);
    let one_time = OneTimePreKey::new(9, seed(6, scenario.seed));
    let mut bundle = responder_keys.public_bundle();
    bundle.one_time_prekey = Some((one_time.id(), one_time.public_bytes()));
    responder_keys.add_one_time(one_time);

    let mut initiator =
        RatchetSession::initiate(&initiator_identity, &bundle, seed(7, scenario.seed), seed(8, scenario.seed), config)
            .expect("valid bundle");
    let handshake = initiator.encrypt(&[], seed(9, 0)).expect("fresh sending chain");
    let (mut responder, opened) =
        RatchetSession::respond(&mut responder_keys, &handshake, config).expect("handshake");
    assert!(opened.is_empty());
    assert!(!responder.is_degraded());

    // One-time key is gone: a second initiation with the same bundle fails.
    assert!(RatchetSession::respond(&mut responder_keys, &handshake, config).is_err());

    let mut in_flight: Vec<InFlight> = Vec::new();
    let mut fresh: u8 = 0;

    for op in scenario.ops {
        match op {
            Op::Send { from_initiator, body } => {
                if in_flight.len() >= MAX_IN_FLIGHT {
                    continue;
                }
                fresh = fresh.wrapping_add(1);
                let sender = if from_initiator { &mut initiator } else { &mut responder };
                let message = sender.encrypt(&body, seed(10, fresh)).expect("sending chain");
                in_flight.push(InFlight { to_initiator: !from_initiator, message, body, delivered: false });
            },
            Op::Deliver { slot } => {
                let Some(entry) = pick(&mut in_flight, slot) else { continue };
                let receiver = if entry.to_initiator { &mut initiator } else { &mut responder };
                let result = receiver.decrypt(&entry.message);
                if entry.delivered {
                    assert!(result.is_err(), "replay must be rejected");
                } else {
                    assert_eq!(result.expect("honest message decrypts"), entry.body);
                    entry.delivered = true;
                }
            },
            Op::Tamper { slot, byte, flip } => {
                let Some(entry) = pick(&mut in_flight, slot) else { continue };
                let mut forged = entry.message.clone();
                if forged.ciphertext.is_empty() {
                    continue;
                }
                let at = usize::from(byte) % forged.ciphertext.len();
                forged.ciphertext[at] ^= flip.max(1);
                let receiver = if entry.to_initiator { &mut initiator } else { &mut responder };
                assert!(receiver.decrypt(&forged).is_err(), "tampered message must be rejected");
            },
            Op::Forge { to_initiator, counter, previous, ciphertext } => {
                let receiver = if to_initiator { &mut initiator } else { &mut responder };
                let forged = RatchetMessage {
                    header: RatchetHeader {
                        dh_public: seed(11, counter as u8),
                        previous_chain_length: u32::from(previous),
                        counter: u32::from(counter),
                    },
                    prekey: None,
                    ciphertext,
                };
                assert!(receiver.decrypt(&forged).is_err(), "forged message must be rejected");
            },
        }
    }
});

fn pick(in_flight: &mut [InFlight], slot: u8) -> Option<&mut InFlight> {
    if in_flight.is_empty() {
        return None;
    }
    let index = usize::from(slot) % in_flight.len();
    in_flight.get_mut(index)
}
