//! Fuzz target for group sender-key sessions
//!
//! Members of one group encrypt under their own chains; the fuzzer picks
//! the delivery order, duplicates, epoch changes and corrupted messages.
//!
//! # Invariants
//!
//! - First delivery of an untouched message within the skip window
//!   decrypts to its plaintext, in any order
//! - Duplicates and own messages are rejected
//! - Messages from another epoch are rejected
//! - Failed decryption never changes the receiver's chain position

#![no_main]

use arbitrary::Arbitrary;
use courier_crypto::{GroupMessage, GroupSession, SenderKeyDistribution};
use libfuzzer_sys::fuzz_target;

const MEMBERS: u64 = 4;

#[derive(Debug, Clone, Arbitrary)]
struct Scenario {
    master_key: [u8; 32],
    key_epoch: u8,
    ops: Vec<Op>,
}

#[derive(Debug, Clone, Arbitrary)]
enum Op {
    Send { sender: u8, body: Vec<u8>, suffix: [u8; 8] },
    Deliver { slot: u8, receiver: u8 },
    Corrupt { slot: u8, receiver: u8, byte: u16 },
    WrongEpoch { slot: u8, receiver: u8 },
}

struct Sent {
    message: GroupMessage,
    body: Vec<u8>,
    delivered_to: Vec<u64>,
}

fuzz_target!(|scenario: Scenario| {
    let distribution =
        SenderKeyDistribution::new(1, u64::from(scenario.key_epoch), scenario.master_key);
    let restored = SenderKeyDistribution::from_bytes(&distribution.to_bytes()).expect("roundtrip");
    assert!(restored == distribution, "distribution must survive encoding");

    let mut sessions: Vec<GroupSession> = (0..MEMBERS)
        .map(|member| GroupSession::new(member, &distribution).expect("install"))
        .collect();
    let mut sent: Vec<Sent> = Vec::new();

    for op in scenario.ops {
        match op {
            Op::Send { sender, body, suffix } => {
                if sent.len() >= 256 {
                    continue;
                }
                let sender = u64::from(sender) % MEMBERS;
                let message = sessions[sender as usize].encrypt(&body, suffix).expect("chain step");
                assert_eq!(message.sender_id, sender);
                sent.push(Sent { message, body, delivered_to: Vec::new() });
            },
            Op::Deliver { slot, receiver } => {
                let Some(entry) = pick(&mut sent, slot) else { continue };
                let receiver = u64::from(receiver) % MEMBERS;
                let result = sessions[receiver as usize].decrypt(&entry.message);
                if receiver == entry.message.sender_id || entry.delivered_to.contains(&receiver) {
                    assert!(result.is_err(), "own or duplicate message must be rejected");
                } else {
                    assert_eq!(result.expect("first delivery decrypts"), entry.body);
                    entry.delivered_to.push(receiver);
                }
            },
            Op::Corrupt { slot, receiver, byte } => {
                let Some(entry) = pick(&mut sent, slot) else { continue };
                let receiver = (u64::from(receiver) % MEMBERS) as usize;
                let mut forged = entry.message.clone();
                let at = usize::from(byte) % forged.ciphertext.len();
                forged.ciphertext[at] ^= 0x01;

                let before = sessions[receiver].receiving_generation(forged.sender_id);
                assert!(sessions[receiver].decrypt(&forged).is_err());
                assert_eq!(sessions[receiver].receiving_generation(forged.sender_id), before);
            },
            Op::WrongEpoch { slot, receiver } => {
                let Some(entry) = pick(&mut sent, slot) else { continue };
                let receiver = (u64::from(receiver) % MEMBERS) as usize;
                let mut forged = entry.message.clone();
                forged.key_epoch = forged.key_epoch.wrapping_add(1);
                assert!(sessions[receiver].decrypt(&forged).is_err());
            },
        }
    }
});

fn pick(sent: &mut [Sent], slot: u8) -> Option<&mut Sent> {
    if sent.is_empty() {
        return None;
    }
    let index = usize::from(slot) % sent.len();
    sent.get_mut(index)
}
