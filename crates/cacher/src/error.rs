//! Cache layer error types

use thiserror::Error;

/// Cache layer errors
#[derive(Debug, Error)]
pub enum CacheError {
    /// Expected miss. Compute-on-miss flows route this into lock acquisition.
    #[error("key not exist")]
    KeyNotExist,

    #[error("wait too long")]
    WaitTooLong,

    #[error("invalid cache value")]
    InvalidCacheValue,

    #[error("failed to cast cache multi response")]
    FailedCastMultiResponse,

    #[error("lock not obtained: {0}")]
    LockNotObtained(String),

    #[error("wait cancelled")]
    Cancelled,

    #[error("Redis error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("compute function failed: {0}")]
    Compute(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CacheError {
    /// True for the expected-miss condition.
    #[must_use]
    pub const fn is_miss(&self) -> bool {
        matches!(self, Self::KeyNotExist)
    }

    /// True when a cached payload had the wrong shape.
    ///
    /// These point at a schema change or a bug; callers usually treat the
    /// cache as unavailable and compute from the system of record.
    #[must_use]
    pub const fn is_data_shape(&self) -> bool {
        matches!(self, Self::InvalidCacheValue | Self::FailedCastMultiResponse)
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        Self::Store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors() {
        assert!(CacheError::KeyNotExist.is_miss());
        assert!(!CacheError::WaitTooLong.is_miss());
        assert!(CacheError::InvalidCacheValue.is_data_shape());
        assert!(CacheError::FailedCastMultiResponse.is_data_shape());
        assert!(!CacheError::Store("down".into()).is_data_shape());
    }

    #[test]
    fn messages_match_taxonomy() {
        assert_eq!(CacheError::WaitTooLong.to_string(), "wait too long");
        assert_eq!(CacheError::KeyNotExist.to_string(), "key not exist");
        assert_eq!(
            CacheError::FailedCastMultiResponse.to_string(),
            "failed to cast cache multi response"
        );
    }

    #[test]
    fn converts_serde_errors() {
        let err = serde_json::from_slice::<u32>(b"{").unwrap_err();
        assert!(matches!(CacheError::from(err), CacheError::Serialization(_)));
    }
}
