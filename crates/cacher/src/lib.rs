//! # Cacher
//!
//! Read-through / write-through access to a shared, TTL-based key-value store
//! with protection against cache stampedes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │               Repository / Service Layer                     │
//! │        (typed helpers: find_by_key, find_hash_member)        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      CacheManager                            │
//! │   get / get_or_lock / get_or_set, buckets, bulk, purge       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Stampede-Guard Protocol                     │
//! │        (one computation per key, others wait or read)        │
//! └─────────────────────────────────────────────────────────────┘
//!                    │                   │
//!                    ▼                   ▼
//! ┌─────────────────────────┐   ┌──────────────────────────────┐
//! │       CacheStore        │   │          LockStore           │
//! │   (Redis / in-memory)   │   │  (lock:<key>, SET NX PX)     │
//! └─────────────────────────┘   └──────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - `redis`: Enable the Redis backend (default)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cacher::{CacheConfig, CacheManager, ItemOption, RedisStore};
//!
//! let store = Arc::new(RedisStore::new("redis://127.0.0.1:6379").await?);
//! let cache = CacheManager::builder()
//!     .config(CacheConfig::from_env())
//!     .store(store)
//!     .build()?;
//!
//! let key = cache.keys().object("user", user_id);
//! let bytes = cache
//!     .get_or_set(&key, || db.find_user(user_id), [ItemOption::Ttl(Duration::from_secs(60))])
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod item;
pub mod keys;
pub mod lock;
pub mod manager;
pub mod response;
pub mod stampede;
pub mod store;
pub mod typed;

// Re-export commonly used types
pub use config::{CacheConfig, RedisConfig};
pub use error::{CacheError, Result};
pub use item::{Item, ItemOption};
pub use keys::CacheKeys;
pub use lock::LockGuard;
pub use manager::{CacheManager, CacheManagerBuilder, NIL_VALUE};
pub use response::MultiResponse;
pub use stampede::CacheLookup;
pub use store::{CacheStore, LockStore, MemoryStore};
#[cfg(feature = "redis")]
pub use store::RedisStore;
pub use typed::{
    find_by_key, find_hash_member, find_multi_response, find_raw_without_lock, store_nil_logged,
    Lookup,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Connect to Redis with the environment's settings and build a manager.
///
/// Locks share the data connection unless `REDIS_LOCK_URL` is set.
///
/// # Errors
///
/// Returns an error if a Redis connection fails or the configuration is invalid.
#[cfg(feature = "redis")]
pub async fn init_default() -> Result<CacheManager> {
    connect(&RedisConfig::from_env(), CacheConfig::from_env()).await
}

/// Build a manager over the Redis servers named in `redis`.
///
/// # Errors
///
/// Returns an error if a Redis connection fails or `config` is invalid.
#[cfg(feature = "redis")]
pub async fn connect(redis: &RedisConfig, config: CacheConfig) -> Result<CacheManager> {
    config.validate()?;
    let store = std::sync::Arc::new(RedisStore::new(&redis.url).await?);

    let mut builder = CacheManager::builder().config(config).store(store);
    if let Some(lock_url) = redis.lock_url.as_deref() {
        tracing::info!(lock_url = %lock_url, "Using dedicated lock server");
        builder = builder.lock_store(std::sync::Arc::new(RedisStore::new(lock_url).await?));
    }

    builder.build()
}
