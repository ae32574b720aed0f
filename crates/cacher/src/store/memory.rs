//! In-process store.
//!
//! Mirrors the Redis semantics the manager relies on (lazy TTL expiry, bucket
//! expiry, cursor scans, owner-checked locks) behind one lock, so every
//! call is atomic. Used by the test suite and for running without Redis.

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use super::{CacheStore, Entry, LockStore, ScanPage};
use crate::error::{CacheError, Result};

/// Abandoned scans beyond this many are forgotten, oldest first.
const MAX_OPEN_CURSORS: usize = 1024;

#[derive(Debug, Clone)]
enum Value {
    Bytes(Vec<u8>),
    Hash(HashMap<String, Vec<u8>>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    // None: persistent, or a TTL beyond what the clock can represent
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Thread-safe in-memory key space.
#[derive(Debug, Default)]
pub struct MemoryStore {
    // Ordered so scan cursors stay stable between pages
    slots: Mutex<BTreeMap<String, Slot>>,
    // Open scan cursors: id -> last key handed out, oldest first
    cursors: Mutex<BTreeMap<u64, String>>,
    next_cursor: AtomicU64,
    operations: AtomicU64,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of store calls served so far.
    pub fn operations(&self) -> u64 {
        self.operations.load(Ordering::Relaxed)
    }

    /// Remaining lifetime of `key`; `None` when absent or persistent.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let slots = self.slots.lock();
        slots
            .get(key)
            .filter(|slot| slot.is_live(now))
            .and_then(|slot| slot.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    fn touch(&self) -> Instant {
        self.operations.fetch_add(1, Ordering::Relaxed);
        Instant::now()
    }

    fn live<'a>(slots: &'a mut BTreeMap<String, Slot>, key: &str, now: Instant) -> Option<&'a mut Slot> {
        if slots.get(key).is_some_and(|slot| !slot.is_live(now)) {
            slots.remove(key);
        }
        slots.get_mut(key)
    }

    fn put(slots: &mut BTreeMap<String, Slot>, key: &str, value: &[u8], expires_at: Option<Instant>) {
        slots.insert(
            key.to_string(),
            Slot {
                value: Value::Bytes(value.to_vec()),
                expires_at,
            },
        );
    }

    fn wrong_type(key: &str) -> CacheError {
        CacheError::Store(format!(
            "WRONGTYPE Operation against a key holding the wrong kind of value: {key}"
        ))
    }
}

/// Translate a Redis glob (`*`, `?`, `[...]`, `\x`) into an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut re = String::with_capacity(pattern.len() + 12);
    // keys may contain newlines; `*` and `?` must match them too
    re.push_str("(?s)^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '[' => {
                re.push('[');
                while let Some(inner) = chars.next() {
                    match inner {
                        ']' => break,
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                re.push_str(&regex::escape(&escaped.to_string()));
                            }
                        }
                        '^' | '-' => re.push(inner),
                        other => re.push_str(&regex::escape(&other.to_string())),
                    }
                }
                re.push(']');
            }
            '\\' => {
                if let Some(escaped) = chars.next() {
                    re.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| CacheError::Store(format!("invalid pattern {pattern}: {e}")))
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = self.touch();
        let mut slots = self.slots.lock();
        match Self::live(&mut slots, key, now) {
            Some(Slot {
                value: Value::Bytes(bytes),
                ..
            }) => Ok(Some(bytes.clone())),
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn fetch_hash_member(&self, identifier: &str, field: &str) -> Result<Option<Vec<u8>>> {
        let now = self.touch();
        let mut slots = self.slots.lock();
        match Self::live(&mut slots, identifier, now) {
            Some(Slot {
                value: Value::Hash(members),
                ..
            }) => Ok(members.get(field).cloned()),
            Some(_) => Err(Self::wrong_type(identifier)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let now = self.touch();
        Self::put(&mut self.slots.lock(), key, value, now.checked_add(ttl));
        Ok(())
    }

    async fn set_many(&self, entries: &[Entry]) -> Result<()> {
        let now = self.touch();
        let mut slots = self.slots.lock();
        for entry in entries {
            Self::put(&mut slots, &entry.key, &entry.value, now.checked_add(entry.ttl));
        }
        Ok(())
    }

    async fn set_many_persist(&self, entries: &[(String, Vec<u8>)]) -> Result<()> {
        self.touch();
        let mut slots = self.slots.lock();
        for (key, value) in entries {
            Self::put(&mut slots, key, value, None);
        }
        Ok(())
    }

    async fn set_hash_member(
        &self,
        identifier: &str,
        field: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<()> {
        let now = self.touch();
        let mut slots = self.slots.lock();
        // drop an expired bucket before reusing the name
        let _ = Self::live(&mut slots, identifier, now);
        let slot = slots.entry(identifier.to_string()).or_insert_with(|| Slot {
            value: Value::Hash(HashMap::new()),
            expires_at: None,
        });
        let Value::Hash(members) = &mut slot.value else {
            return Err(Self::wrong_type(identifier));
        };
        members.insert(field.to_string(), value.to_vec());
        slot.expires_at = now.checked_add(ttl);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.expire_many(&[(key.to_string(), ttl)]).await
    }

    async fn expire_many(&self, entries: &[(String, Duration)]) -> Result<()> {
        let now = self.touch();
        let mut slots = self.slots.lock();
        for (key, ttl) in entries {
            if ttl.is_zero() {
                slots.remove(key);
            } else if let Some(slot) = Self::live(&mut slots, key, now) {
                slot.expires_at = now.checked_add(*ttl);
            }
        }
        Ok(())
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage> {
        let matcher = glob_to_regex(pattern)?;
        let now = self.touch();

        let after = if cursor == 0 {
            None
        } else {
            let resumed = self.cursors.lock().remove(&cursor);
            Some(resumed.ok_or_else(|| CacheError::Store(format!("ERR invalid cursor {cursor}")))?)
        };

        let slots = self.slots.lock();
        let lower = after.as_ref().map_or(Bound::Unbounded, |key| Bound::Excluded(key.clone()));
        let mut range = slots.range::<String, _>((lower, Bound::Unbounded));
        let page: Vec<(&String, &Slot)> = range.by_ref().take(count.max(1)).collect();
        let exhausted = range.next().is_none();

        let cursor = match page.last() {
            Some((last, _)) if !exhausted => {
                let id = self.next_cursor.fetch_add(1, Ordering::Relaxed) + 1;
                let mut cursors = self.cursors.lock();
                while cursors.len() >= MAX_OPEN_CURSORS {
                    cursors.pop_first();
                }
                cursors.insert(id, (*last).clone());
                id
            }
            _ => 0,
        };

        let keys = page
            .into_iter()
            .filter(|(key, slot)| slot.is_live(now) && matcher.is_match(key))
            .map(|(key, _)| key.clone())
            .collect();

        Ok(ScanPage { cursor, keys })
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        let now = self.touch();
        let mut slots = self.slots.lock();
        let mut deleted = 0;
        for key in keys {
            if slots.remove(key).is_some_and(|slot| slot.is_live(now)) {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let now = self.touch();
        let mut slots = self.slots.lock();
        let (current, expires_at) = match Self::live(&mut slots, key, now) {
            Some(Slot {
                value: Value::Bytes(bytes),
                expires_at,
            }) => {
                let current = std::str::from_utf8(bytes)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                    .ok_or_else(|| {
                        CacheError::Store("ERR value is not an integer or out of range".into())
                    })?;
                (current, *expires_at)
            }
            Some(_) => return Err(Self::wrong_type(key)),
            None => (0, None),
        };

        let next = current + 1;
        Self::put(&mut slots, key, next.to_string().as_bytes(), expires_at);
        Ok(next)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let now = self.touch();
        Ok(Self::live(&mut self.slots.lock(), key, now).is_some())
    }
}

#[async_trait]
impl LockStore for MemoryStore {
    async fn try_lock(&self, name: &str, token: &str, expiry: Duration) -> Result<bool> {
        let now = self.touch();
        let mut slots = self.slots.lock();
        if Self::live(&mut slots, name, now).is_some() {
            return Ok(false);
        }
        Self::put(&mut slots, name, token.as_bytes(), now.checked_add(expiry));
        Ok(true)
    }

    async fn unlock(&self, name: &str, token: &str) -> Result<bool> {
        let now = self.touch();
        let mut slots = self.slots.lock();
        let owned = matches!(
            Self::live(&mut slots, name, now),
            Some(Slot { value: Value::Bytes(held), .. }) if held.as_slice() == token.as_bytes()
        );
        if owned {
            slots.remove(name);
        }
        Ok(owned)
    }

    async fn is_locked(&self, name: &str) -> Result<bool> {
        self.exists(name).await
    }
}
