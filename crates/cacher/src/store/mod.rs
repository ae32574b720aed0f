//! # Store Module
//!
//! Backend interfaces consumed by the cache manager, plus the Redis and
//! in-process implementations.
//!
//! Implementations can be swapped for different backends (Redis, memory, mock).

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_store;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;

/// One entry of a batched write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: Vec<u8>,
    pub ttl: Duration,
}

/// One page of a cursor scan. A returned cursor of `0` means done.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    pub cursor: u64,
    pub keys: Vec<String>,
}

/// Key-value backend with TTLs, hashes and atomic batches.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Existence check and read in one atomic round trip.
    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Field existence check and read in one atomic round trip.
    async fn fetch_hash_member(&self, identifier: &str, field: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// All-or-nothing batch of TTL-bounded writes.
    async fn set_many(&self, entries: &[Entry]) -> Result<()>;

    /// All-or-nothing batch of writes with any TTL cleared.
    async fn set_many_persist(&self, entries: &[(String, Vec<u8>)]) -> Result<()>;

    /// Set one field and refresh the whole bucket's expiry, atomically.
    async fn set_hash_member(
        &self,
        identifier: &str,
        field: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<()>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// All-or-nothing batch of expiry updates.
    async fn expire_many(&self, entries: &[(String, Duration)]) -> Result<()>;

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage>;

    /// Returns the number of keys removed.
    async fn delete(&self, keys: &[String]) -> Result<u64>;

    /// Increment by one, treating a missing key as zero.
    async fn incr(&self, key: &str) -> Result<i64>;

    async fn exists(&self, key: &str) -> Result<bool>;
}

/// Expiring mutual-exclusion primitive shared across processes.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Take `name` for `token` if nobody holds it. Returns `false` when held.
    async fn try_lock(&self, name: &str, token: &str, expiry: Duration) -> Result<bool>;

    /// Drop `name` only if `token` still owns it. Returns whether it was removed.
    async fn unlock(&self, name: &str, token: &str) -> Result<bool>;

    async fn is_locked(&self, name: &str) -> Result<bool>;
}
