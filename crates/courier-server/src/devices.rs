//! Device-side secret key material for registered users.
//!
//! Secret halves never leave this directory; only the public bundle and
//! one-time publics go to the pre-key registry.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]
#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::{collections::HashMap, sync::Mutex};

use courier_core::UserId;
use courier_crypto::{IdentityKeyPair, LocalKeys};

struct Device {
    keys: LocalKeys,
    next_one_time_id: u32,
}

#[derive(Default)]
pub(crate) struct DeviceDirectory {
    devices: Mutex<HashMap<UserId, Device>>,
}

impl DeviceDirectory {
    /// Store keys for a new user. Returns `false` if the user exists.
    pub(crate) fn register(&self, user: UserId, keys: LocalKeys) -> bool {
        let mut devices = self.devices.lock().expect("DeviceDirectory mutex poisoned");
        if devices.contains_key(&user) {
            return false;
        }
        devices.insert(user, Device { keys, next_one_time_id: 1 });
        true
    }

    pub(crate) fn identity(&self, user: UserId) -> Option<IdentityKeyPair> {
        let devices = self.devices.lock().expect("DeviceDirectory mutex poisoned");
        devices.get(&user).map(|device| device.keys.identity().clone())
    }

    /// Reserve `count` fresh one-time key ids for `user`.
    pub(crate) fn reserve_one_time_ids(&self, user: UserId, count: u32) -> Option<Vec<u32>> {
        let mut devices = self.devices.lock().expect("DeviceDirectory mutex poisoned");
        let device = devices.get_mut(&user)?;
        let start = device.next_one_time_id;
        device.next_one_time_id = start.saturating_add(count);
        Some((start..device.next_one_time_id).collect())
    }

    /// Run `f` against a user's keys.
    pub(crate) fn with_keys<R>(&self, user: UserId, f: impl FnOnce(&mut LocalKeys) -> R) -> Option<R> {
        let mut devices = self.devices.lock().expect("DeviceDirectory mutex poisoned");
        devices.get_mut(&user).map(|device| f(&mut device.keys))
    }
}
