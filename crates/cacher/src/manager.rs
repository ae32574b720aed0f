//! # Cache Manager
//!
//! Read-through / write-through access to the shared store, with the
//! stampede guard on every compute-on-miss path.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::item::{Item, ItemOption};
use crate::keys::{self, CacheKeys};
use crate::lock::LockGuard;
use crate::stampede::{CacheLookup, Stampede};
use crate::store::{CacheStore, Entry, LockStore};

/// Marker stored for "looked up, found nothing".
pub const NIL_VALUE: &[u8] = b"null";

struct Inner {
    config: CacheConfig,
    keys: CacheKeys,
    store: Arc<dyn CacheStore>,
    locks: Arc<dyn LockStore>,
}

/// Cache manager shared by every caller in the process.
///
/// Cheap to clone; all clones share one configuration and one set of stores.
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheManager")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Collects configuration and stores before traffic begins.
#[derive(Default)]
pub struct CacheManagerBuilder {
    config: CacheConfig,
    store: Option<Arc<dyn CacheStore>>,
    shared_locks: Option<Arc<dyn LockStore>>,
    locks: Option<Arc<dyn LockStore>>,
}

impl CacheManagerBuilder {
    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Data store. Also serves locks unless [`Self::lock_store`] is set.
    #[must_use]
    pub fn store<S>(mut self, store: Arc<S>) -> Self
    where
        S: CacheStore + LockStore + 'static,
    {
        let locks: Arc<dyn LockStore> = store.clone();
        let data: Arc<dyn CacheStore> = store;
        self.shared_locks = Some(locks);
        self.store = Some(data);
        self
    }

    /// Dedicated lock store.
    #[must_use]
    pub fn lock_store(mut self, locks: Arc<dyn LockStore>) -> Self {
        self.locks = Some(locks);
        self
    }

    #[must_use]
    pub fn cache_prefix(mut self, prefix: impl Into<String>, environment: impl Into<String>) -> Self {
        self.config.key_prefix = prefix.into();
        self.config.environment = environment.into();
        self
    }

    #[must_use]
    pub const fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_ttl = ttl;
        self
    }

    #[must_use]
    pub const fn nil_ttl(mut self, ttl: Duration) -> Self {
        self.config.nil_ttl = ttl;
        self
    }

    #[must_use]
    pub const fn lock_duration(mut self, duration: Duration) -> Self {
        self.config.lock_duration = duration;
        self
    }

    #[must_use]
    pub const fn lock_tries(mut self, tries: u32) -> Self {
        self.config.lock_tries = tries;
        self
    }

    #[must_use]
    pub const fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.config.wait_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn disable_caching(mut self, disabled: bool) -> Self {
        self.config.disable_caching = disabled;
        self
    }

    #[must_use]
    pub const fn scan_count(mut self, count: usize) -> Self {
        self.config.scan_count = count;
        self
    }

    /// Validate and freeze.
    ///
    /// # Errors
    ///
    /// Returns `Config` when no store was given or a setting is unusable.
    pub fn build(self) -> Result<CacheManager> {
        self.config.validate()?;

        let store = self
            .store
            .ok_or_else(|| CacheError::Config("a cache store is required".into()))?;
        let locks = self
            .locks
            .or(self.shared_locks)
            .ok_or_else(|| CacheError::Config("a lock store is required".into()))?;

        Ok(CacheManager {
            inner: Arc::new(Inner {
                keys: CacheKeys::from_config(&self.config),
                config: self.config,
                store,
                locks,
            }),
        })
    }
}

impl CacheManager {
    #[must_use]
    pub fn builder() -> CacheManagerBuilder {
        CacheManagerBuilder::default()
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Key builder bound to this manager's prefix and environment.
    #[must_use]
    pub fn keys(&self) -> &CacheKeys {
        &self.inner.keys
    }

    fn disabled(&self) -> bool {
        self.inner.config.disable_caching
    }

    fn stampede(&self) -> Stampede<'_> {
        let config = &self.inner.config;
        Stampede {
            locks: &self.inner.locks,
            lock_duration: config.lock_duration,
            lock_tries: config.lock_tries,
            wait_timeout: config.wait_timeout,
        }
    }

    fn resolve_ttl(&self, item: &Item) -> Duration {
        item.resolve_ttl(self.inner.config.default_ttl)
    }

    // =========================================================================
    // PLAIN KEYS
    // =========================================================================

    /// Read a cached value.
    ///
    /// `Ok(None)` only when caching is disabled.
    ///
    /// # Errors
    ///
    /// `KeyNotExist` when the key is absent; store failures unchanged.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if self.disabled() {
            return Ok(None);
        }

        match self.inner.store.fetch(key).await? {
            Some(value) => Ok(Some(value)),
            None => Err(CacheError::KeyNotExist),
        }
    }

    /// Read `key`, or win the right to populate it, or wait for whoever did.
    ///
    /// # Errors
    ///
    /// `WaitTooLong` when the lock holder does not finish within the wait
    /// timeout; store failures unchanged.
    pub async fn get_or_lock(&self, key: &str) -> Result<CacheLookup> {
        if self.disabled() {
            return Ok(CacheLookup::Bypassed);
        }

        let store = &self.inner.store;
        self.stampede()
            .resolve(&keys::lock_name(key), || store.fetch(key))
            .await
    }

    /// [`Self::get_or_lock`] that gives up with `Cancelled` once `cancel`
    /// completes (request deadline, shutdown signal, ...).
    ///
    /// # Errors
    ///
    /// As [`Self::get_or_lock`], plus `Cancelled`.
    pub async fn get_or_lock_with_cancel<C>(&self, key: &str, cancel: C) -> Result<CacheLookup>
    where
        C: Future<Output = ()>,
    {
        if self.disabled() {
            return Ok(CacheLookup::Bypassed);
        }

        let store = &self.inner.store;
        self.stampede()
            .resolve_with_cancel(&keys::lock_name(key), || store.fetch(key), cancel)
            .await
    }

    /// Return the cached JSON for `key`, computing and caching it on a miss.
    ///
    /// Only one caller across the fleet runs `compute` for a given key at a
    /// time. A `None` result is cached as the nil marker for `nil_ttl`. With
    /// caching disabled `compute` always runs and the store is not touched.
    ///
    /// # Errors
    ///
    /// `InvalidCacheValue` when the cached payload is not JSON, `Compute`
    /// when `compute` fails, plus anything [`Self::get_or_lock`] returns.
    pub async fn get_or_set<T, E, F, Fut>(
        &self,
        key: &str,
        compute: F,
        options: impl IntoIterator<Item = ItemOption>,
    ) -> Result<Option<Vec<u8>>>
    where
        T: Serialize,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
    {
        if self.disabled() {
            let value = compute().await.map_err(|e| CacheError::Compute(e.into()))?;
            return Ok(Some(serde_json::to_vec(&value)?));
        }

        let guard = match self.get_or_lock(key).await? {
            CacheLookup::Hit(cached) => {
                if serde_json::from_slice::<serde::de::IgnoredAny>(&cached).is_err() {
                    tracing::error!(key = %key, "Cached value is not valid JSON");
                    return Err(CacheError::InvalidCacheValue);
                }
                tracing::debug!(key = %key, "Cache hit");
                return Ok(Some(cached));
            }
            CacheLookup::Locked(guard) => guard,
            CacheLookup::Bypassed => return Ok(None),
        };

        tracing::debug!(key = %key, "Cache miss, computing value");
        // a failed compute drops the guard, which releases the lock
        let computed = compute().await.map_err(|e| CacheError::Compute(e.into()))?;

        let Some(value) = computed else {
            if let Err(e) = self.store_nil(key).await {
                tracing::warn!(key = %key, error = %e, "Failed to cache nil marker");
            }
            if let Err(e) = guard.release().await {
                tracing::warn!(key = %key, error = %e, "Failed to release lock");
            }
            return Ok(None);
        };

        let bytes = serde_json::to_vec(&value)?;
        let item = Item::new(key, bytes.clone()).apply_options(options);
        if let Err(e) = self.store(guard, item).await {
            tracing::warn!(key = %key, error = %e, "Failed to populate cache");
        }

        Ok(Some(bytes))
    }

    /// Take the stampede lock for `key` directly.
    ///
    /// # Errors
    ///
    /// `LockNotObtained` when it is held elsewhere after all tries.
    pub async fn acquire_lock(&self, key: &str) -> Result<LockGuard> {
        let name = keys::lock_name(key);
        self.stampede()
            .try_acquire(&name, None)
            .await?
            .ok_or(CacheError::LockNotObtained(name))
    }

    // =========================================================================
    // HASH BUCKETS
    // =========================================================================

    /// Read one member of a bucket.
    ///
    /// # Errors
    ///
    /// `KeyNotExist` when the member (or bucket) is absent.
    pub async fn get_hash_member(&self, identifier: &str, field: &str) -> Result<Option<Vec<u8>>> {
        if self.disabled() {
            return Ok(None);
        }

        match self.inner.store.fetch_hash_member(identifier, field).await? {
            Some(value) => Ok(Some(value)),
            None => Err(CacheError::KeyNotExist),
        }
    }

    /// Stampede-guarded read of a bucket member, locked on `identifier:field`.
    ///
    /// # Errors
    ///
    /// As [`Self::get_or_lock`].
    pub async fn get_hash_member_or_lock(&self, identifier: &str, field: &str) -> Result<CacheLookup> {
        if self.disabled() {
            return Ok(CacheLookup::Bypassed);
        }

        let store = &self.inner.store;
        self.stampede()
            .resolve(&keys::hash_lock_name(identifier, field), || {
                store.fetch_hash_member(identifier, field)
            })
            .await
    }

    /// [`Self::get_hash_member_or_lock`] with a caller-supplied cancel signal.
    ///
    /// # Errors
    ///
    /// As [`Self::get_or_lock_with_cancel`].
    pub async fn get_hash_member_or_lock_with_cancel<C>(
        &self,
        identifier: &str,
        field: &str,
        cancel: C,
    ) -> Result<CacheLookup>
    where
        C: Future<Output = ()>,
    {
        if self.disabled() {
            return Ok(CacheLookup::Bypassed);
        }

        let store = &self.inner.store;
        self.stampede()
            .resolve_with_cancel(
                &keys::hash_lock_name(identifier, field),
                || store.fetch_hash_member(identifier, field),
                cancel,
            )
            .await
    }

    /// Write one member and refresh the whole bucket's expiry, atomically.
    ///
    /// The item's key is the field name.
    ///
    /// # Errors
    ///
    /// Store failures; the batch is all-or-nothing.
    pub async fn store_hash_member(&self, identifier: &str, item: Item) -> Result<()> {
        if self.disabled() {
            return Ok(());
        }

        let ttl = self.resolve_ttl(&item);
        self.inner
            .store
            .set_hash_member(identifier, item.key(), item.value(), ttl)
            .await
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Write `item`, then give up the lock that guarded its computation.
    ///
    /// # Errors
    ///
    /// The write's failure; the lock is released either way.
    pub async fn store(&self, guard: LockGuard, item: Item) -> Result<()> {
        let result = self.store_without_blocking(item).await;
        if let Err(e) = guard.release().await {
            tracing::warn!(error = %e, "Failed to release lock after store");
        }
        result
    }

    /// Write `item` without touching any lock.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn store_without_blocking(&self, item: Item) -> Result<()> {
        if self.disabled() {
            return Ok(());
        }

        let ttl = self.resolve_ttl(&item);
        self.inner.store.set(item.key(), item.value(), ttl).await
    }

    /// Write every item in one atomic batch, each with its resolved TTL.
    ///
    /// # Errors
    ///
    /// Store failures; nothing is written on failure.
    pub async fn store_multi_without_blocking(&self, items: Vec<Item>) -> Result<()> {
        if self.disabled() || items.is_empty() {
            return Ok(());
        }

        let entries: Vec<Entry> = items
            .into_iter()
            .map(|item| {
                let ttl = self.resolve_ttl(&item);
                let (key, value) = item.into_parts();
                Entry { key, value, ttl }
            })
            .collect();

        self.inner.store.set_many(&entries).await
    }

    /// Write every item in one atomic batch with no expiry.
    ///
    /// # Errors
    ///
    /// Store failures; nothing is written on failure.
    pub async fn store_multi_persist(&self, items: Vec<Item>) -> Result<()> {
        if self.disabled() || items.is_empty() {
            return Ok(());
        }

        let entries: Vec<(String, Vec<u8>)> = items.into_iter().map(Item::into_parts).collect();
        self.inner.store.set_many_persist(&entries).await
    }

    /// Cache "nothing here" for `key` for `nil_ttl`.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn store_nil(&self, key: &str) -> Result<()> {
        self.store_nil_with_ttl(key, self.inner.config.nil_ttl).await
    }

    /// Cache "nothing here" for `key` for `ttl`.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn store_nil_with_ttl(&self, key: &str, ttl: Duration) -> Result<()> {
        self.store_without_blocking(Item::with_ttl(key, NIL_VALUE, ttl))
            .await
    }

    // =========================================================================
    // MAINTENANCE
    // =========================================================================

    /// Set a new expiry on `key`. A zero duration removes it.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        if self.disabled() {
            return Ok(());
        }

        self.inner.store.expire(key, ttl).await
    }

    /// Apply every expiry in one atomic batch.
    ///
    /// # Errors
    ///
    /// Store failures; nothing changes on failure.
    pub async fn expire_multi(&self, items: &HashMap<String, Duration>) -> Result<()> {
        if self.disabled() || items.is_empty() {
            return Ok(());
        }

        let entries: Vec<(String, Duration)> =
            items.iter().map(|(key, ttl)| (key.clone(), *ttl)).collect();
        self.inner.store.expire_many(&entries).await
    }

    /// Delete every key matching the glob `pattern`, one scan page at a time.
    ///
    /// Returns the number of keys removed.
    ///
    /// # Errors
    ///
    /// Store failures; pages already deleted stay deleted.
    pub async fn purge(&self, pattern: &str) -> Result<u64> {
        if self.disabled() {
            return Ok(0);
        }

        let store = &self.inner.store;
        let mut cursor = 0;
        let mut deleted = 0;
        let mut pages = 0_u64;

        loop {
            let page = store.scan(cursor, pattern, self.inner.config.scan_count).await?;
            pages += 1;

            if !page.keys.is_empty() {
                deleted += store.delete(&page.keys).await?;
            }

            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }

        tracing::info!(pattern = %pattern, deleted, pages, "Purged cache keys");
        Ok(deleted)
    }

    /// Delete `keys` in one command. Empty input is a no-op.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn delete_by_keys(&self, keys: &[String]) -> Result<()> {
        if self.disabled() || keys.is_empty() {
            return Ok(());
        }

        self.inner.store.delete(keys).await?;
        Ok(())
    }

    /// Atomically add one to the counter at `key`, starting from zero.
    ///
    /// Returns the new value, or `None` when caching is disabled.
    ///
    /// # Errors
    ///
    /// Store failures, including a non-integer value at `key`.
    pub async fn increase_cached_value_by_one(&self, key: &str) -> Result<Option<i64>> {
        if self.disabled() {
            return Ok(None);
        }

        self.inner.store.incr(key).await.map(Some)
    }

    /// Whether `key` exists. Asks the store even when caching is disabled.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn check_key_exist(&self, key: &str) -> Result<bool> {
        self.inner.store.exists(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use fake::{Fake, Faker};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;
    use tokio_test::{assert_err, assert_ok};

    fn manager_with(store: &Arc<MemoryStore>) -> CacheManager {
        CacheManager::builder()
            .store(store.clone())
            .default_ttl(Duration::from_secs(60))
            .nil_ttl(Duration::from_secs(5))
            .lock_duration(Duration::from_secs(10))
            .wait_timeout(Duration::from_secs(2))
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_requires_store() {
        let err = CacheManager::builder().build().unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let store = Arc::new(MemoryStore::new());
        let cache = manager_with(&store);

        let err = cache.get("absent").await.unwrap_err();
        assert!(err.is_miss());
    }

    #[tokio::test]
    async fn test_store_twice_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let cache = manager_with(&store);
        let payload: String = Faker.fake();

        for _ in 0..2 {
            assert_ok!(cache.store_without_blocking(Item::new("k", payload.clone())).await);
        }

        assert_eq!(cache.get("k").await.unwrap(), Some(payload.into_bytes()));
        assert_eq!(cache.purge("*").await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_resolution() {
        let store = Arc::new(MemoryStore::new());
        let cache = manager_with(&store);

        cache
            .store_without_blocking(Item::with_ttl("short", "1", Duration::from_secs(5)))
            .await
            .unwrap();
        cache.store_without_blocking(Item::new("default", "1")).await.unwrap();

        assert_eq!(store.ttl("short"), Some(Duration::from_secs(5)));
        assert_eq!(store.ttl("default"), Some(Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_winner_under_contention() {
        let store = Arc::new(MemoryStore::new());
        let cache = manager_with(&store);
        let winners = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let winners = winners.clone();
            tasks.push(tokio::spawn(async move {
                match cache.get_or_lock("hot").await.unwrap() {
                    CacheLookup::Locked(guard) => {
                        winners.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        cache.store(guard, Item::new("hot", "\"fresh\"")).await.unwrap();
                        b"\"fresh\"".to_vec()
                    }
                    CacheLookup::Hit(value) => value,
                    CacheLookup::Bypassed => unreachable!("caching is enabled"),
                }
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap(), b"\"fresh\"".to_vec());
        }
        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crashed_winner_lets_waiter_take_over() {
        let store = Arc::new(MemoryStore::new());
        let cache = CacheManager::builder()
            .store(store.clone())
            .lock_duration(Duration::from_millis(300))
            .wait_timeout(Duration::from_secs(2))
            .build()
            .unwrap();

        // winner takes the lock and never writes or releases
        let abandoned = cache.acquire_lock("k").await.unwrap();
        std::mem::forget(abandoned);

        let outcome = cache.get_or_lock("k").await.unwrap();
        assert!(matches!(outcome, CacheLookup::Locked(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_wait() {
        let store = Arc::new(MemoryStore::new());
        let cache = CacheManager::builder()
            .store(store.clone())
            .lock_duration(Duration::from_millis(500))
            .wait_timeout(Duration::from_millis(100))
            .build()
            .unwrap();

        let _slow_winner = cache.acquire_lock("k").await.unwrap();

        let started = Instant::now();
        let outcome = cache.get_or_lock("k").await;
        let waited = started.elapsed();

        assert!(matches!(outcome, Err(CacheError::WaitTooLong)));
        assert!(waited >= Duration::from_millis(100), "{waited:?}");
        assert!(waited < Duration::from_millis(300), "{waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_wait_with_lock_retries() {
        let store = Arc::new(MemoryStore::new());
        let cache = CacheManager::builder()
            .store(store.clone())
            .lock_duration(Duration::from_secs(5))
            .lock_tries(5)
            .wait_timeout(Duration::from_millis(100))
            .build()
            .unwrap();

        assert!(store.try_lock("lock:k", "other", Duration::from_secs(5)).await.unwrap());

        let started = Instant::now();
        let outcome = cache.get_or_lock("k").await;
        let waited = started.elapsed();

        assert!(matches!(outcome, Err(CacheError::WaitTooLong)));
        assert!(waited >= Duration::from_millis(100), "{waited:?}");
        assert!(waited < Duration::from_millis(150), "{waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_or_lock_cancelled() {
        let store = Arc::new(MemoryStore::new());
        let cache = manager_with(&store);
        let _held = cache.acquire_lock("k").await.unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(());
        });

        let outcome = cache
            .get_or_lock_with_cancel("k", async move {
                let _ = rx.await;
            })
            .await;
        assert!(matches!(outcome, Err(CacheError::Cancelled)));
    }

    #[tokio::test]
    async fn test_get_or_set_computes_once() {
        let store = Arc::new(MemoryStore::new());
        let cache = manager_with(&store);
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        for _ in 0..3 {
            let value = cache
                .get_or_set(
                    "user:1",
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, CacheError>(Some(json!({"id": 1, "name": "ada"})))
                    },
                    [],
                )
                .await
                .unwrap()
                .unwrap();

            let decoded: serde_json::Value = serde_json::from_slice(&value).unwrap();
            assert_eq!(decoded["name"], "ada");
        }

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!store.is_locked("lock:user:1").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_or_set_applies_ttl_option() {
        let store = Arc::new(MemoryStore::new());
        let cache = manager_with(&store);

        cache
            .get_or_set(
                "k",
                || async { Ok::<_, CacheError>(Some(7)) },
                [ItemOption::Ttl(Duration::from_secs(3))],
            )
            .await
            .unwrap();

        assert_eq!(store.ttl("k"), Some(Duration::from_secs(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_negative_cache_round_trip() {
        let store = Arc::new(MemoryStore::new());
        let cache = manager_with(&store);
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let lookup = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<Option<String>, CacheError>(None)
        };

        assert_eq!(cache.get_or_set("ghost", lookup, []).await.unwrap(), None);
        assert_eq!(cache.get("ghost").await.unwrap(), Some(NIL_VALUE.to_vec()));

        // marker answers further reads without recomputing
        assert_eq!(
            cache.get_or_set("ghost", lookup, []).await.unwrap(),
            Some(NIL_VALUE.to_vec())
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.get("ghost").await.unwrap_err().is_miss());

        cache.get_or_set("ghost", lookup, []).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_get_or_set_rejects_corrupt_payload() {
        let store = Arc::new(MemoryStore::new());
        let cache = manager_with(&store);
        cache.store_without_blocking(Item::new("k", vec![0xff, 0x00])).await.unwrap();

        let err = cache
            .get_or_set("k", || async { Ok::<_, CacheError>(Some(1)) }, [])
            .await
            .unwrap_err();
        assert!(err.is_data_shape());
    }

    #[tokio::test]
    async fn test_compute_failure_releases_lock() {
        let store = Arc::new(MemoryStore::new());
        let cache = manager_with(&store);

        let result = cache
            .get_or_set(
                "k",
                || async { Err::<Option<u8>, _>(std::io::Error::other("db down")) },
                [],
            )
            .await;
        assert!(matches!(result, Err(CacheError::Compute(_))));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!store.is_locked("lock:k").await.unwrap());
        assert!(cache.get("k").await.unwrap_err().is_miss());
    }

    #[tokio::test]
    async fn test_disabled_never_touches_store() {
        let store = Arc::new(MemoryStore::new());
        let cache = CacheManager::builder()
            .store(store.clone())
            .disable_caching(true)
            .build()
            .unwrap();
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        for _ in 0..2 {
            let value = cache
                .get_or_set(
                    "k",
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, CacheError>(Some("v"))
                    },
                    [],
                )
                .await
                .unwrap();
            assert_eq!(value, Some(b"\"v\"".to_vec()));
        }

        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(matches!(cache.get_or_lock("k").await.unwrap(), CacheLookup::Bypassed));
        assert_ok!(cache.store_without_blocking(Item::new("k", "v")).await);
        assert_ok!(cache.store_hash_member("b", Item::new("f", "v")).await);
        assert_eq!(cache.purge("*").await.unwrap(), 0);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.operations(), 0);

        // existence probe ignores the switch
        assert!(!cache.check_key_exist("k").await.unwrap());
        assert_eq!(store.operations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_isolation_and_shared_ttl() {
        let store = Arc::new(MemoryStore::new());
        let cache = manager_with(&store);
        let ttl = Duration::from_secs(10);

        cache
            .store_hash_member("bucketA", Item::with_ttl("field1", "a1", ttl))
            .await
            .unwrap();
        assert_eq!(cache.get_hash_member("bucketA", "field1").await.unwrap(), Some(b"a1".to_vec()));
        assert!(cache.get_hash_member("bucketB", "field1").await.unwrap_err().is_miss());

        tokio::time::advance(Duration::from_secs(8)).await;
        cache
            .store_hash_member("bucketA", Item::with_ttl("field2", "a2", ttl))
            .await
            .unwrap();

        // field1 outlives its own 10s because the bucket expiry was refreshed
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.get_hash_member("bucketA", "field1").await.unwrap(), Some(b"a1".to_vec()));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.get_hash_member("bucketA", "field2").await.unwrap_err().is_miss());
    }

    #[tokio::test]
    async fn test_hash_member_or_lock_uses_composite_lock() {
        let store = Arc::new(MemoryStore::new());
        let cache = manager_with(&store);

        let CacheLookup::Locked(guard) = cache.get_hash_member_or_lock("users", "page:1").await.unwrap() else {
            panic!("expected to win the lock");
        };
        assert_eq!(guard.name(), "lock:users:page:1");

        cache.store_hash_member("users", Item::new("page:1", "{}")).await.unwrap();
        guard.release().await.unwrap();

        let outcome = cache.get_hash_member_or_lock("users", "page:1").await.unwrap();
        assert_eq!(outcome.value(), Some(b"{}".as_slice()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_waiter_sees_winner_value() {
        let store = Arc::new(MemoryStore::new());
        let cache = manager_with(&store);

        let CacheLookup::Locked(guard) = cache.get_hash_member_or_lock("users", "page:1").await.unwrap() else {
            panic!("expected to win the lock");
        };

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_hash_member_or_lock("users", "page:1").await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        cache.store_hash_member("users", Item::new("page:1", "1")).await.unwrap();
        guard.release().await.unwrap();

        let outcome = waiter.await.unwrap().unwrap();
        assert_eq!(outcome.value(), Some(b"1".as_slice()));
    }

    #[tokio::test]
    async fn test_purge_pattern_across_pages() {
        let store = Arc::new(MemoryStore::new());
        let cache = CacheManager::builder()
            .store(store.clone())
            .scan_count(1)
            .build()
            .unwrap();

        for key in ["p:1", "p:2", "q:1"] {
            cache.store_without_blocking(Item::new(key, "v")).await.unwrap();
        }

        assert_eq!(cache.purge("p:*").await.unwrap(), 2);
        assert!(!cache.check_key_exist("p:1").await.unwrap());
        assert!(!cache.check_key_exist("p:2").await.unwrap());
        assert!(cache.check_key_exist("q:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_multi_store_persist_and_expire() {
        let store = Arc::new(MemoryStore::new());
        let cache = manager_with(&store);

        cache
            .store_multi_without_blocking(vec![
                Item::new("a", "1"),
                Item::with_ttl("b", "2", Duration::from_secs(1)),
            ])
            .await
            .unwrap();
        cache
            .store_multi_persist(vec![Item::with_ttl("c", "3", Duration::from_secs(1))])
            .await
            .unwrap();

        assert!(store.ttl("a").is_some());
        assert_eq!(store.ttl("c"), None);
        assert!(cache.check_key_exist("c").await.unwrap());

        let expiries = HashMap::from([
            ("a".to_string(), Duration::ZERO),
            ("c".to_string(), Duration::from_secs(30)),
        ]);
        cache.expire_multi(&expiries).await.unwrap();

        assert!(!cache.check_key_exist("a").await.unwrap());
        assert!(store.ttl("c").is_some());
    }

    #[tokio::test]
    async fn test_delete_and_increment() {
        let store = Arc::new(MemoryStore::new());
        let cache = manager_with(&store);

        assert_ok!(cache.delete_by_keys(&[]).await);
        assert_eq!(cache.increase_cached_value_by_one("views").await.unwrap(), Some(1));
        assert_eq!(cache.increase_cached_value_by_one("views").await.unwrap(), Some(2));

        cache.delete_by_keys(&["views".to_string()]).await.unwrap();
        assert!(!cache.check_key_exist("views").await.unwrap());

        cache.store_without_blocking(Item::new("name", "ada")).await.unwrap();
        assert_err!(cache.increase_cached_value_by_one("name").await);
    }

    #[tokio::test]
    async fn test_acquire_lock_is_exclusive() {
        let store = Arc::new(MemoryStore::new());
        let cache = manager_with(&store);

        let guard = cache.acquire_lock("k").await.unwrap();
        assert!(matches!(
            cache.acquire_lock("k").await,
            Err(CacheError::LockNotObtained(name)) if name == "lock:k"
        ));
        guard.release().await.unwrap();
        assert_ok!(cache.acquire_lock("k").await);
    }
}
