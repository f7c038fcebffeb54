//! Object storage for encrypted media and the distribution cache in front
//! of it.
//!
//! Both are best-effort from the cleanup path's point of view: each delete
//! is attempted independently and retried on its own.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]
#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use thiserror::Error;

/// Object store or cache failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("blob store unavailable: {0}")]
pub struct BlobError(pub String);

/// Encrypted media and thumbnails. Deleting a missing key succeeds.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Store an encrypted object.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobError>;

    /// Fetch an encrypted object.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BlobError>;

    /// Delete an object. Idempotent.
    async fn delete(&self, key: &str) -> Result<(), BlobError>;
}

/// Content-distribution cache serving encrypted blobs.
#[async_trait]
pub trait DistributionCache: Send + Sync + 'static {
    /// Drop any cached copy of `key`. Idempotent.
    async fn invalidate(&self, key: &str) -> Result<(), BlobError>;
}

/// In-memory object store with a failure switch.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    inner: Arc<Mutex<MemoryBlobInner>>,
}

#[derive(Default)]
struct MemoryBlobInner {
    objects: HashMap<String, Vec<u8>>,
    unavailable: bool,
}

impl MemoryBlobStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().expect("Mutex poisoned").unavailable = unavailable;
    }

    /// Whether `key` is stored.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().expect("Mutex poisoned").objects.contains_key(key)
    }

    fn check(inner: &MemoryBlobInner) -> Result<(), BlobError> {
        if inner.unavailable {
            return Err(BlobError("in-memory blob store switched off".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        Self::check(&inner)?;
        inner.objects.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BlobError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Self::check(&inner)?;
        Ok(inner.objects.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        Self::check(&inner)?;
        inner.objects.remove(key);
        Ok(())
    }
}

/// In-memory distribution cache with a failure switch.
#[derive(Clone, Default)]
pub struct MemoryCache {
    inner: Arc<Mutex<MemoryCacheInner>>,
}

#[derive(Default)]
struct MemoryCacheInner {
    entries: HashSet<String>,
    unavailable: bool,
}

impl MemoryCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend `key` has been served and is now cached.
    pub fn warm(&self, key: &str) {
        self.inner.lock().expect("Mutex poisoned").entries.insert(key.to_string());
    }

    /// Whether `key` is cached.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().expect("Mutex poisoned").entries.contains(key)
    }

    /// Make invalidation fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().expect("Mutex poisoned").unavailable = unavailable;
    }
}

#[async_trait]
impl DistributionCache for MemoryCache {
    async fn invalidate(&self, key: &str) -> Result<(), BlobError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        if inner.unavailable {
            return Err(BlobError("in-memory cache switched off".to_string()));
        }
        inner.entries.remove(key);
        Ok(())
    }
}
