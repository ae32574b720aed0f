//! Scoped ownership of a stampede lock.

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::store::LockStore;

/// Exclusive right to populate one cache key.
///
/// Released exactly once: explicitly through [`LockGuard::release`] or, if the
/// guard is dropped first, by a release task spawned on the current Tokio
/// runtime. Outside a runtime the lock is left to expire on its own.
pub struct LockGuard {
    name: String,
    token: String,
    locks: Arc<dyn LockStore>,
    released: bool,
}

impl LockGuard {
    pub(crate) fn new(name: String, token: String, locks: Arc<dyn LockStore>) -> Self {
        Self {
            name,
            token,
            locks,
            released: false,
        }
    }

    /// Lock name, `lock:` followed by the guarded key.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release now. Returns `false` if the lock had already expired or
    /// changed hands.
    pub async fn release(mut self) -> Result<bool> {
        self.released = true;
        let released = self.locks.unlock(&self.name, &self.token).await?;
        if !released {
            tracing::debug!(lock = %self.name, "Lock expired before release");
        }
        Ok(released)
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("name", &self.name)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let name = std::mem::take(&mut self.name);
        let token = std::mem::take(&mut self.token);
        let locks = Arc::clone(&self.locks);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = locks.unlock(&name, &token).await {
                        tracing::warn!(lock = %name, error = %e, "Failed to release lock");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(lock = %name, "No runtime to release lock, leaving it to expire");
            }
        }
    }
}
