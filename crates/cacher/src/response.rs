//! Compound list payload cached inside hash buckets.

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// One page of ids plus the total count behind it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiResponse {
    pub ids: Vec<i64>,
    pub count: i64,
}

impl MultiResponse {
    #[must_use]
    pub const fn new(ids: Vec<i64>, count: i64) -> Self {
        Self { ids, count }
    }

    /// Decode a cached payload.
    ///
    /// # Errors
    ///
    /// `FailedCastMultiResponse` when the bytes are not a multi response.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            tracing::error!(payload = %String::from_utf8_lossy(bytes), error = %e, "Failed to decode multi response");
            CacheError::FailedCastMultiResponse
        })
    }

    /// # Errors
    ///
    /// Serialization failures.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
