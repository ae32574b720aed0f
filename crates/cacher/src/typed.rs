//! Typed reads over the byte-oriented manager.
//!
//! The manager never decodes payloads; repositories call these helpers with
//! the type they expect and get one of four outcomes back.

use serde::de::DeserializeOwned;

use crate::error::{CacheError, Result};
use crate::lock::LockGuard;
use crate::manager::{CacheManager, NIL_VALUE};
use crate::response::MultiResponse;
use crate::stampede::CacheLookup;

/// Decoded outcome of a stampede-guarded read.
#[derive(Debug)]
pub enum Lookup<T> {
    /// Cached value, decoded
    Found(T),
    /// Negative-cache hit: the system of record had nothing last time
    Nil,
    /// Miss; the caller holds the lock and should compute and store
    Populate(LockGuard),
    /// Caching disabled; go straight to the system of record
    Bypassed,
}

impl<T> Lookup<T> {
    /// The decoded value, discarding any lock.
    pub fn into_found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            _ => None,
        }
    }
}

fn decode<T, P>(lookup: CacheLookup, parse: P) -> Result<Lookup<T>>
where
    P: FnOnce(&[u8]) -> Result<T>,
{
    match lookup {
        CacheLookup::Hit(bytes) if bytes == NIL_VALUE => Ok(Lookup::Nil),
        CacheLookup::Hit(bytes) => parse(&bytes).map(Lookup::Found),
        CacheLookup::Locked(guard) => Ok(Lookup::Populate(guard)),
        CacheLookup::Bypassed => Ok(Lookup::Bypassed),
    }
}

/// Stampede-guarded read of `key`, decoded as JSON into `T`.
///
/// # Errors
///
/// `InvalidCacheValue` when the payload does not decode, plus anything
/// [`CacheManager::get_or_lock`] returns.
pub async fn find_by_key<T: DeserializeOwned>(cache: &CacheManager, key: &str) -> Result<Lookup<T>> {
    let lookup = cache.get_or_lock(key).await?;
    decode(lookup, |bytes| {
        serde_json::from_slice(bytes).map_err(|e| {
            tracing::error!(key = %key, error = %e, "Cached value does not decode");
            CacheError::InvalidCacheValue
        })
    })
}

/// Stampede-guarded read of a bucket member, decoded as JSON into `T`.
///
/// # Errors
///
/// `FailedCastMultiResponse` when the member does not decode, plus anything
/// [`CacheManager::get_hash_member_or_lock`] returns.
pub async fn find_hash_member<T: DeserializeOwned>(
    cache: &CacheManager,
    bucket: &str,
    field: &str,
) -> Result<Lookup<T>> {
    let lookup = cache.get_hash_member_or_lock(bucket, field).await?;
    decode(lookup, |bytes| {
        serde_json::from_slice(bytes).map_err(|e| {
            tracing::error!(
                bucket = %bucket,
                field = %field,
                reply = %String::from_utf8_lossy(bytes),
                error = %e,
                "Cached bucket member does not decode"
            );
            CacheError::FailedCastMultiResponse
        })
    })
}

/// Stampede-guarded read of a cached id page.
///
/// # Errors
///
/// As [`find_hash_member`].
pub async fn find_multi_response(
    cache: &CacheManager,
    bucket: &str,
    field: &str,
) -> Result<Lookup<MultiResponse>> {
    let lookup = cache.get_hash_member_or_lock(bucket, field).await?;
    decode(lookup, MultiResponse::from_bytes)
}

/// Plain read of `key` as text, no lock taken.
///
/// `Ok(None)` when caching is disabled.
///
/// # Errors
///
/// `KeyNotExist` when absent, store failures unchanged.
pub async fn find_raw_without_lock(cache: &CacheManager, key: &str) -> Result<Option<String>> {
    let bytes = cache.get(key).await?;
    Ok(bytes.map(|b| String::from_utf8_lossy(&b).into_owned()))
}

/// Best-effort negative-cache write; failures are logged, not returned.
pub async fn store_nil_logged(cache: &CacheManager, key: &str) {
    if let Err(e) = cache.store_nil(key).await {
        tracing::error!(cache_key = %key, error = %e, "Failed to store nil marker");
    }
}
