//! Cache operator commands
//!
//! Each subcommand maps onto one [`CacheManager`] operation. Output goes to
//! any writer so the commands can be exercised against an in-memory store.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::io::Write;
use std::time::Duration;

use anyhow::Result;
use cacher::{CacheError, CacheManager, Item};
use clap::Subcommand;
use tracing::info;

/// Printed when a key is absent.
pub const MISS: &str = "(miss)";

/// Printed when `ENABLE_CACHING` turns the manager off.
pub const BYPASSED: &str = "(caching disabled)";

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the value stored at a key
    Get {
        key: String,

        /// Pretty-print JSON payloads
        #[arg(long)]
        pretty: bool,
    },

    /// Print one member of a hash bucket
    Hget { bucket: String, field: String },

    /// Report whether a key exists
    Exists { key: String },

    /// Store a value
    Set {
        key: String,
        value: String,

        /// Time to live in seconds (defaults to CACHE_DEFAULT_TTL_SECS)
        #[arg(long)]
        ttl_secs: Option<u64>,

        /// Store without expiry
        #[arg(long, conflicts_with = "ttl_secs")]
        persist: bool,
    },

    /// Store one member of a hash bucket
    Hset {
        bucket: String,
        field: String,
        value: String,

        /// Time to live of the whole bucket in seconds
        #[arg(long)]
        ttl_secs: Option<u64>,
    },

    /// Store the negative-cache marker at a key
    Nil {
        key: String,

        /// Time to live in seconds (defaults to CACHE_NIL_TTL_SECS)
        #[arg(long)]
        ttl_secs: Option<u64>,
    },

    /// Reset the time to live of a key
    Expire { key: String, secs: u64 },

    /// Increment a counter by one
    Incr { key: String },

    /// Delete keys
    #[command(alias = "delete")]
    Del {
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Delete every key matching a glob pattern
    Purge {
        pattern: String,

        /// Prefix the pattern with the configured key namespace
        #[arg(long)]
        namespaced: bool,
    },

    /// Print the namespaced form of a raw key
    Key { raw: String },
}

/// Run `command` against `cache`, writing the human-readable result to `out`.
///
/// # Errors
///
/// Store failures and write failures. A missing key is not an error.
pub async fn execute<W: Write>(cache: &CacheManager, command: Command, out: &mut W) -> Result<()> {
    match command {
        Command::Get { key, pretty } => {
            let value = miss_as_none(cache.get(&key).await)?;
            print_value(out, value, pretty)?;
        }

        Command::Hget { bucket, field } => {
            let value = miss_as_none(cache.get_hash_member(&bucket, &field).await)?;
            print_value(out, value, false)?;
        }

        Command::Exists { key } => {
            let exists = cache.check_key_exist(&key).await?;
            writeln!(out, "{exists}")?;
        }

        Command::Set {
            key,
            value,
            ttl_secs,
            persist,
        } => {
            if persist {
                cache.store_multi_persist(vec![Item::new(key.clone(), value)]).await?;
            } else {
                let item = Item::with_ttl(key.clone(), value, secs(ttl_secs));
                cache.store_without_blocking(item).await?;
            }
            info!(cache_key = %key, persist, "Stored value");
            writeln!(out, "OK")?;
        }

        Command::Hset {
            bucket,
            field,
            value,
            ttl_secs,
        } => {
            let item = Item::with_ttl(field, value, secs(ttl_secs));
            cache.store_hash_member(&bucket, item).await?;
            writeln!(out, "OK")?;
        }

        Command::Nil { key, ttl_secs } => {
            match ttl_secs {
                Some(ttl) => cache.store_nil_with_ttl(&key, Duration::from_secs(ttl)).await?,
                None => cache.store_nil(&key).await?,
            }
            writeln!(out, "OK")?;
        }

        Command::Expire { key, secs } => {
            cache.expire(&key, Duration::from_secs(secs)).await?;
            writeln!(out, "OK")?;
        }

        Command::Incr { key } => match cache.increase_cached_value_by_one(&key).await? {
            Some(value) => writeln!(out, "{value}")?,
            None => writeln!(out, "{BYPASSED}")?,
        },

        Command::Del { keys } => {
            cache.delete_by_keys(&keys).await?;
            writeln!(out, "OK")?;
        }

        Command::Purge {
            pattern,
            namespaced,
        } => {
            let pattern = if namespaced {
                cache.keys().pattern(&pattern)
            } else {
                pattern
            };
            let deleted = cache.purge(&pattern).await?;
            writeln!(out, "{deleted}")?;
        }

        Command::Key { raw } => {
            writeln!(out, "{}", cache.keys().key(&raw))?;
        }
    }

    Ok(())
}

/// Zero means "use the configured default" to the manager.
fn secs(ttl: Option<u64>) -> Duration {
    ttl.map_or(Duration::ZERO, Duration::from_secs)
}

fn miss_as_none(result: cacher::Result<Option<Vec<u8>>>) -> Result<Option<Option<Vec<u8>>>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(CacheError::KeyNotExist) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn print_value<W: Write>(out: &mut W, value: Option<Option<Vec<u8>>>, pretty: bool) -> Result<()> {
    let bytes = match value {
        None => return Ok(writeln!(out, "{MISS}")?),
        Some(None) => return Ok(writeln!(out, "{BYPASSED}")?),
        Some(Some(bytes)) => bytes,
    };

    if pretty {
        if let Ok(json) = serde_json::from_slice::<serde_json::Value>(&bytes) {
            writeln!(out, "{}", serde_json::to_string_pretty(&json)?)?;
            return Ok(());
        }
    }

    writeln!(out, "{}", String::from_utf8_lossy(&bytes))?;
    Ok(())
}
