//! Cache item value object.

use std::time::Duration;

/// A value waiting to be written: key, opaque payload and an optional TTL
/// override. A zero TTL defers to the manager's default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    key: String,
    value: Vec<u8>,
    ttl: Duration,
}

/// Per-call adjustments applied to the item `get_or_set` builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOption {
    /// Override the TTL of the stored item
    Ttl(Duration),
}

impl ItemOption {
    fn apply(self, item: &mut Item) {
        match self {
            Self::Ttl(ttl) => item.ttl = ttl,
        }
    }
}

impl Item {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ttl: Duration::ZERO,
        }
    }

    pub fn with_ttl(key: impl Into<String>, value: impl Into<Vec<u8>>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ttl,
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// TTL to write with: the override when it is positive, `default` otherwise.
    #[must_use]
    pub fn resolve_ttl(&self, default: Duration) -> Duration {
        if self.ttl.is_zero() {
            default
        } else {
            self.ttl
        }
    }

    pub(crate) fn apply_options(mut self, options: impl IntoIterator<Item = ItemOption>) -> Self {
        for option in options {
            option.apply(&mut self);
        }
        self
    }

    pub(crate) fn into_parts(self) -> (String, Vec<u8>) {
        (self.key, self.value)
    }
}
