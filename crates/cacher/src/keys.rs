//! Cache key naming.

use crate::config::CacheConfig;

/// Namespace for stampede locks, disjoint from data keys.
pub const LOCK_PREFIX: &str = "lock:";

/// Builds `{prefix}_{environment}_{raw}` keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeys {
    prefix: String,
}

impl CacheKeys {
    pub fn new(key_prefix: &str, environment: &str) -> Self {
        Self {
            prefix: format!("{key_prefix}_{environment}_"),
        }
    }

    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(&config.key_prefix, &config.environment)
    }

    /// Namespaced key for `raw`. Query-string separators (`=`, `&`) become `_`.
    #[must_use]
    pub fn key(&self, raw: &str) -> String {
        let mut key = String::with_capacity(self.prefix.len() + raw.len());
        key.push_str(&self.prefix);
        key.push_str(&raw.replace(['=', '&'], "_"));
        key
    }

    /// Key for a single object of `kind` looked up by id.
    #[must_use]
    pub fn object(&self, kind: &str, id: impl std::fmt::Display) -> String {
        self.key(&format!("cache:object:{kind}:id:{id}"))
    }

    /// Glob matching every key this builder produces.
    #[must_use]
    pub fn pattern(&self, raw_glob: &str) -> String {
        format!("{}{raw_glob}", self.prefix)
    }
}

/// Lock name guarding a plain key.
#[must_use]
pub fn lock_name(key: &str) -> String {
    format!("{LOCK_PREFIX}{key}")
}

/// Lock name guarding one member of a hash bucket.
#[must_use]
pub fn hash_lock_name(identifier: &str, field: &str) -> String {
    format!("{LOCK_PREFIX}{identifier}:{field}")
}
