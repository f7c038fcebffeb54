//! Presence and block registry contract.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]
#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use courier_core::{PresenceInfo, Route, UserId};
use thiserror::Error;

/// Presence registry could not be reached.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("presence lookup failed: {0}")]
pub struct PresenceError(pub String);

/// Key-value lookup of user to routing target and block list.
///
/// Results are snapshots; callers use one per routing attempt and never
/// cache them.
#[async_trait]
pub trait PresenceLookup: Send + Sync + 'static {
    /// Presence of one user. Unknown users are offline with no blocks.
    async fn get(&self, user: UserId) -> Result<PresenceInfo, PresenceError>;

    /// Presence of many users in one call. Every requested user is present
    /// in the result.
    async fn bulk_get(
        &self,
        users: &[UserId],
    ) -> Result<HashMap<UserId, PresenceInfo>, PresenceError>;
}

/// In-memory presence registry.
#[derive(Clone, Default)]
pub struct MemoryPresence {
    users: Arc<Mutex<HashMap<UserId, PresenceInfo>>>,
    lookups: Arc<AtomicUsize>,
    bulk_lookups: Arc<AtomicUsize>,
}

impl MemoryPresence {
    /// Empty registry; everyone is offline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `user` online at `route`.
    pub fn set_online(&self, user: UserId, route: Route) {
        let mut users = self.users.lock().expect("Mutex poisoned");
        let info = users.entry(user).or_default();
        info.online = true;
        info.route = Some(route);
    }

    /// Mark `user` offline and forget the route.
    pub fn set_offline(&self, user: UserId) {
        let mut users = self.users.lock().expect("Mutex poisoned");
        let info = users.entry(user).or_default();
        info.online = false;
        info.route = None;
    }

    /// `user` blocks messages from `sender`.
    pub fn block(&self, user: UserId, sender: UserId) {
        let mut users = self.users.lock().expect("Mutex poisoned");
        users.entry(user).or_default().blocked_by.insert(sender);
    }

    /// `user` unblocks `sender`.
    pub fn unblock(&self, user: UserId, sender: UserId) {
        let mut users = self.users.lock().expect("Mutex poisoned");
        if let Some(info) = users.get_mut(&user) {
            info.blocked_by.remove(&sender);
        }
    }

    /// Single lookups served so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }

    /// Bulk lookups served so far.
    pub fn bulk_lookup_count(&self) -> usize {
        self.bulk_lookups.load(Ordering::Relaxed)
    }

    fn snapshot(&self, user: UserId) -> PresenceInfo {
        self.users.lock().expect("Mutex poisoned").get(&user).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl PresenceLookup for MemoryPresence {
    async fn get(&self, user: UserId) -> Result<PresenceInfo, PresenceError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self.snapshot(user))
    }

    async fn bulk_get(
        &self,
        users: &[UserId],
    ) -> Result<HashMap<UserId, PresenceInfo>, PresenceError> {
        self.bulk_lookups.fetch_add(1, Ordering::Relaxed);
        Ok(users.iter().map(|&user| (user, self.snapshot(user))).collect())
    }
}
