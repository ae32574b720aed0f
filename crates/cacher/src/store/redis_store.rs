//! # Redis Store
//!
//! Redis implementation of [`CacheStore`] and [`LockStore`].

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::sync::Arc;
use std::time::Duration;

use super::{CacheStore, Entry, LockStore, ScanPage};
use crate::error::Result;

/// Compare-and-delete so only the owner can release a lock.
const UNLOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Redis-backed store with a managed, auto-reconnecting connection
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    unlock: Arc<Script>,
}

impl RedisStore {
    /// Connect to the Redis server at `url`
    pub async fn new(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        Ok(Self {
            conn,
            unlock: Arc::new(Script::new(UNLOCK_SCRIPT)),
        })
    }

    /// Get raw connection for advanced operations
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();

        let (exists, value): (bool, Option<Vec<u8>>) = redis::pipe()
            .atomic()
            .exists(key)
            .get(key)
            .query_async(&mut conn)
            .await?;

        Ok(if exists { value } else { None })
    }

    async fn fetch_hash_member(&self, identifier: &str, field: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();

        let (exists, value): (bool, Option<Vec<u8>>) = redis::pipe()
            .atomic()
            .hexists(identifier, field)
            .hget(identifier, field)
            .query_async(&mut conn)
            .await?;

        Ok(if exists { value } else { None })
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();

        let _: () = redis::cmd("PSETEX")
            .arg(key)
            .arg(millis(ttl))
            .arg(value)
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn set_many(&self, entries: &[Entry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.atomic();
        for entry in entries {
            pipe.cmd("PSETEX")
                .arg(&entry.key)
                .arg(millis(entry.ttl))
                .arg(entry.value.as_slice())
                .ignore();
        }

        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn set_many_persist(&self, entries: &[(String, Vec<u8>)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in entries {
            pipe.set(key, value.as_slice()).ignore();
            pipe.persist(key).ignore();
        }

        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn set_hash_member(
        &self,
        identifier: &str,
        field: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<()> {
        let mut conn = self.conn.clone();

        let _: () = redis::pipe()
            .atomic()
            .hset(identifier, field, value)
            .ignore()
            .cmd("PEXPIRE")
            .arg(identifier)
            .arg(millis(ttl))
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();

        let _: () = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn expire_many(&self, entries: &[(String, Duration)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, ttl) in entries {
            pipe.cmd("PEXPIRE")
                .arg(key)
                .arg(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
                .ignore();
        }

        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage> {
        let mut conn = self.conn.clone();

        let (cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        Ok(ScanPage { cursor, keys })
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let deleted: u64 = conn.del(keys).await?;
        Ok(deleted)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.incr(key, 1_i64).await?;
        Ok(value)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }
}

#[async_trait]
impl LockStore for RedisStore {
    async fn try_lock(&self, name: &str, token: &str, expiry: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();

        // SET NX PX replies OK when taken, nil when someone else holds it
        let reply: Option<String> = redis::cmd("SET")
            .arg(name)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(millis(expiry))
            .query_async(&mut conn)
            .await?;

        Ok(reply.is_some())
    }

    async fn unlock(&self, name: &str, token: &str) -> Result<bool> {
        let mut conn = self.conn.clone();

        let removed: i64 = self
            .unlock
            .key(name)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;

        Ok(removed > 0)
    }

    async fn is_locked(&self, name: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(name).await?;
        Ok(exists)
    }
}
