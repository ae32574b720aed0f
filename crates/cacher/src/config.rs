//! # Cache Configuration
//!
//! Environment-based configuration for the cache manager.

use std::env;
use std::time::Duration;

use crate::error::{CacheError, Result};

pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_NIL_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_LOCK_DURATION: Duration = Duration::from_secs(60);
pub const DEFAULT_LOCK_TRIES: u32 = 1;
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_KEY_PREFIX: &str = "cacher";
pub const DEFAULT_ENVIRONMENT: &str = "development";
pub const DEFAULT_SCAN_COUNT: usize = 1000;

/// Cache manager configuration.
///
/// Built once at startup and handed to [`crate::CacheManager`]; the manager
/// never mutates it afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// First segment of every generated cache key
    pub key_prefix: String,

    /// Deployment environment tag, second segment of generated keys
    pub environment: String,

    /// TTL for items that carry no override
    pub default_ttl: Duration,

    /// TTL for negative-cache markers
    pub nil_ttl: Duration,

    /// Expiry of a stampede lock
    pub lock_duration: Duration,

    /// Acquisition attempts per lock request
    pub lock_tries: u32,

    /// How long a losing caller polls before giving up
    pub wait_timeout: Duration,

    /// Global kill switch; reads return nothing and writes are skipped
    pub disable_caching: bool,

    /// SCAN page size hint used by purge
    pub scan_count: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            default_ttl: DEFAULT_TTL,
            nil_ttl: DEFAULT_NIL_TTL,
            lock_duration: DEFAULT_LOCK_DURATION,
            lock_tries: DEFAULT_LOCK_TRIES,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            disable_caching: false,
            scan_count: DEFAULT_SCAN_COUNT,
        }
    }
}

impl CacheConfig {
    /// Load configuration from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Missing or unparsable values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let secs = |name: &str, default: Duration| {
            lookup(name)
                .and_then(|v| v.parse().ok())
                .map_or(default, Duration::from_secs)
        };

        Self {
            key_prefix: lookup("CACHE_KEY_PREFIX")
                .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),

            environment: lookup("APP_ENV").unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string()),

            default_ttl: secs("CACHE_DEFAULT_TTL_SECS", DEFAULT_TTL),

            nil_ttl: secs("CACHE_NIL_TTL_SECS", DEFAULT_NIL_TTL),

            lock_duration: secs("CACHE_LOCK_DURATION_SECS", DEFAULT_LOCK_DURATION),

            lock_tries: lookup("CACHE_LOCK_TRIES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_LOCK_TRIES),

            wait_timeout: lookup("CACHE_WAIT_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .map_or(DEFAULT_WAIT_TIMEOUT, Duration::from_millis),

            disable_caching: lookup("ENABLE_CACHING")
                .is_some_and(|v| v == "false" || v == "0"),

            scan_count: lookup("CACHE_SCAN_COUNT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_SCAN_COUNT),
        }
    }

    /// Reject settings the manager cannot operate with.
    ///
    /// # Errors
    ///
    /// `Config` naming the first unusable setting.
    pub fn validate(&self) -> Result<()> {
        if self.lock_tries == 0 {
            return Err(CacheError::Config("lock_tries must be at least 1".into()));
        }
        if self.lock_duration.is_zero() {
            return Err(CacheError::Config("lock_duration must be positive".into()));
        }
        if self.default_ttl.is_zero() {
            return Err(CacheError::Config("default_ttl must be positive".into()));
        }
        if self.scan_count == 0 {
            return Err(CacheError::Config("scan_count must be positive".into()));
        }
        Ok(())
    }
}

/// Redis connection configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    pub url: String,

    /// Separate server for stampede locks; `None` shares the data connection
    pub lock_url: Option<String>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            lock_url: None,
        }
    }
}

impl RedisConfig {
    /// Load configuration from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            url: env::var("REDIS_URL").unwrap_or_else(|_| Self::default().url),
            lock_url: env::var("REDIS_LOCK_URL").ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.default_ttl, Duration::from_secs(900));
        assert_eq!(config.nil_ttl, Duration::from_secs(300));
        assert_eq!(config.lock_duration, Duration::from_secs(60));
        assert_eq!(config.lock_tries, 1);
        assert_eq!(config.wait_timeout, Duration::from_secs(15));
        assert!(!config.disable_caching);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = CacheConfig::from_lookup(lookup_from(&[
            ("CACHE_KEY_PREFIX", "shop"),
            ("APP_ENV", "staging"),
            ("CACHE_DEFAULT_TTL_SECS", "30"),
            ("CACHE_WAIT_TIMEOUT_MS", "250"),
            ("CACHE_LOCK_TRIES", "3"),
            ("ENABLE_CACHING", "false"),
        ]));

        assert_eq!(config.key_prefix, "shop");
        assert_eq!(config.environment, "staging");
        assert_eq!(config.default_ttl, Duration::from_secs(30));
        assert_eq!(config.wait_timeout, Duration::from_millis(250));
        assert_eq!(config.lock_tries, 3);
        assert!(config.disable_caching);
        assert_eq!(config.nil_ttl, DEFAULT_NIL_TTL);
    }

    #[test]
    fn test_from_lookup_ignores_garbage() {
        let config = CacheConfig::from_lookup(lookup_from(&[
            ("CACHE_DEFAULT_TTL_SECS", "soon"),
            ("ENABLE_CACHING", "true"),
        ]));
        assert_eq!(config.default_ttl, DEFAULT_TTL);
        assert!(!config.disable_caching);
    }

    #[test]
    fn test_validate_rejects_zero_tries() {
        let config = CacheConfig {
            lock_tries: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(CacheError::Config(_))));
    }
}
