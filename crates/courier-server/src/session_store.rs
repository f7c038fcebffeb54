//! Per-conversation cryptographic state behind single-writer locks.
//!
//! The outer map lock is held only to look up or insert an entry; all
//! session work happens under the conversation's own async mutex, so
//! unrelated conversations never contend.

#![allow(clippy::disallowed_types, reason = "Outer map lock is never held across an await")]
#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex},
};

use courier_core::{ConversationId, UserId};
use courier_crypto::{GroupSession, RatchetSession, SenderKeyDistribution};

/// Handle to one conversation's state.
pub(crate) type ConversationLock = Arc<tokio::sync::Mutex<ConversationState>>;

/// Everything one conversation needs to encrypt and decrypt.
pub(crate) struct ConversationState {
    next_sequence: u64,
    pub(crate) context: CryptoContext,
}

impl ConversationState {
    pub(crate) fn direct() -> Self {
        Self { next_sequence: 0, context: CryptoContext::Direct(DirectContext::default()) }
    }

    pub(crate) fn group(context: GroupContext) -> Self {
        Self { next_sequence: 0, context: CryptoContext::Group(context) }
    }

    /// Sequence number the next persisted message will carry.
    pub(crate) fn peek_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Commit a sequence number once the message is durable.
    pub(crate) fn commit_sequence(&mut self) {
        self.next_sequence += 1;
    }
}

pub(crate) enum CryptoContext {
    Direct(DirectContext),
    Group(GroupContext),
}

/// Each participant's own ratchet session.
#[derive(Default)]
pub(crate) struct DirectContext {
    pub(crate) sessions: HashMap<UserId, RatchetSession>,
}

/// Membership, the admin's current master key and each member's
/// sender-key state.
pub(crate) struct GroupContext {
    pub(crate) admin: UserId,
    pub(crate) members: BTreeSet<UserId>,
    pub(crate) distribution: SenderKeyDistribution,
    pub(crate) sessions: HashMap<UserId, MemberKeys>,
}

/// A member's sender-key state for the current epoch and the one before.
///
/// The previous epoch is kept so messages already in flight when the group
/// re-keyed can still be opened.
pub(crate) struct MemberKeys {
    pub(crate) current: GroupSession,
    pub(crate) previous: Option<GroupSession>,
}

impl MemberKeys {
    pub(crate) fn new(current: GroupSession) -> Self {
        Self { current, previous: None }
    }

    /// Install a new epoch, keeping only the one it replaces.
    pub(crate) fn rotate(&mut self, next: GroupSession) {
        let old = std::mem::replace(&mut self.current, next);
        self.previous = Some(old);
    }

    pub(crate) fn for_epoch_mut(&mut self, epoch: u64) -> Option<&mut GroupSession> {
        if self.current.key_epoch() == epoch {
            return Some(&mut self.current);
        }
        self.previous.as_mut().filter(|session| session.key_epoch() == epoch)
    }
}

/// Map of conversation id to its lock.
#[derive(Default)]
pub(crate) struct SessionStore {
    conversations: Mutex<HashMap<ConversationId, ConversationLock>>,
}

impl SessionStore {
    pub(crate) fn get(&self, id: ConversationId) -> Option<ConversationLock> {
        self.conversations.lock().expect("SessionStore mutex poisoned").get(&id).cloned()
    }

    pub(crate) fn get_or_insert_with(
        &self,
        id: ConversationId,
        init: impl FnOnce() -> ConversationState,
    ) -> ConversationLock {
        let mut conversations = self.conversations.lock().expect("SessionStore mutex poisoned");
        Arc::clone(
            conversations.entry(id).or_insert_with(|| Arc::new(tokio::sync::Mutex::new(init()))),
        )
    }

    /// Insert a fresh conversation. Returns `None` if the id is taken.
    pub(crate) fn insert_new(
        &self,
        id: ConversationId,
        state: ConversationState,
    ) -> Option<ConversationLock> {
        let mut conversations = self.conversations.lock().expect("SessionStore mutex poisoned");
        if conversations.contains_key(&id) {
            return None;
        }
        let lock = Arc::new(tokio::sync::Mutex::new(state));
        conversations.insert(id, Arc::clone(&lock));
        Some(lock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(member: UserId, epoch: u64) -> GroupSession {
        let distribution = SenderKeyDistribution::new(1, epoch, [epoch as u8; 32]);
        GroupSession::new(member, &distribution).unwrap()
    }

    #[test]
    fn rotate_keeps_one_previous_epoch() {
        let mut keys = MemberKeys::new(session(1, 0));
        keys.rotate(session(1, 1));
        keys.rotate(session(1, 2));

        assert!(keys.for_epoch_mut(2).is_some());
        assert!(keys.for_epoch_mut(1).is_some());
        assert!(keys.for_epoch_mut(0).is_none());
    }

    #[tokio::test]
    async fn same_id_shares_one_lock() {
        let store = SessionStore::default();
        let id = ConversationId::direct(1, 2);

        let first = store.get_or_insert_with(id, ConversationState::direct);
        first.lock().await.commit_sequence();

        let second = store.get_or_insert_with(ConversationId::direct(2, 1), ConversationState::direct);
        assert_eq!(second.lock().await.peek_sequence(), 1);
        assert!(store.insert_new(id, ConversationState::direct()).is_none());
        assert!(store.get(ConversationId::group(7)).is_none());
    }
}
