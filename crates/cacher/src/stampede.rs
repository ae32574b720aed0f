//! Stampede guard: turns a miss seen by N concurrent callers into exactly one
//! "compute it" outcome while the rest wait for the result.
//!
//! ```text
//!   fetch ──found──────────────────────────────▶ Hit
//!     │ absent
//!     ▼
//!   try lock ──won─────────────────────────────▶ MissWinner
//!     │ held elsewhere
//!     ▼
//!   MissWaiting: sleep(backoff) ◀──────────────┐
//!     │ lock gone → probe again ── still held ─┘
//!     │ wait budget spent ─────────────────────▶ Failed(WaitTooLong)
//!     │ store error on re-fetch ───────────────▶ Failed(error)
//! ```
//!
//! The same protocol serves plain keys and hash-bucket members; only the
//! fetch closure and the lock name differ.

use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{CacheError, Result};
use crate::lock::LockGuard;
use crate::store::LockStore;

const BACKOFF_MIN: Duration = Duration::from_millis(20);
const BACKOFF_MAX: Duration = Duration::from_millis(200);

/// Delay between acquisition attempts when `lock_tries > 1`.
const RETRY_DELAY_MIN_MS: u64 = 50;
const RETRY_DELAY_MAX_MS: u64 = 250;

/// Outcome of a get-or-lock call.
#[derive(Debug)]
pub enum CacheLookup {
    /// Value was cached (possibly the negative-cache marker)
    Hit(Vec<u8>),
    /// Key was absent and this caller owns the right to populate it
    Locked(LockGuard),
    /// Caching is disabled; nothing was read and no lock was taken
    Bypassed,
}

impl CacheLookup {
    /// Cached bytes, if this was a hit.
    #[must_use]
    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Self::Hit(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// One look at the key: what a caller can conclude without waiting.
enum Probe {
    Hit(Vec<u8>),
    MissWinner(LockGuard),
    MissWaiting,
}

/// Exponential backoff with jitter, bounded by `min` and `max`.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    min: Duration,
    max: Duration,
    attempt: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            min: BACKOFF_MIN,
            max: BACKOFF_MAX,
            attempt: 0,
        }
    }
}

impl Backoff {
    /// Next sleep: uniformly drawn between `min` and `min * 2^attempt`
    /// (capped at `max`).
    pub(crate) fn next_delay(&mut self) -> Duration {
        let ceiling = self
            .min
            .checked_mul(1_u32.checked_shl(self.attempt).unwrap_or(u32::MAX))
            .map_or(self.max, |d| d.min(self.max));
        self.attempt = self.attempt.saturating_add(1);

        let low = u64::try_from(self.min.as_millis()).unwrap_or(u64::MAX);
        let high = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX).max(low);
        Duration::from_millis(rand::thread_rng().gen_range(low..=high))
    }
}

/// Lock settings the protocol runs with.
pub(crate) struct Stampede<'a> {
    pub(crate) locks: &'a Arc<dyn LockStore>,
    pub(crate) lock_duration: Duration,
    pub(crate) lock_tries: u32,
    pub(crate) wait_timeout: Duration,
}

impl Stampede<'_> {
    /// Try to take `name`, retrying up to `lock_tries` times.
    ///
    /// Retries stop at `deadline`; the last sleep is cut short to meet it.
    /// `Ok(None)` means somebody else holds it.
    pub(crate) async fn try_acquire(
        &self,
        name: &str,
        deadline: Option<Instant>,
    ) -> Result<Option<LockGuard>> {
        let token = Uuid::new_v4().to_string();

        for attempt in 1..=self.lock_tries.max(1) {
            if self.locks.try_lock(name, &token, self.lock_duration).await? {
                tracing::debug!(lock = %name, attempt, "Lock acquired");
                return Ok(Some(LockGuard::new(
                    name.to_string(),
                    token,
                    Arc::clone(self.locks),
                )));
            }
            if attempt >= self.lock_tries {
                break;
            }

            let delay = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    retry_delay().min(remaining)
                }
                None => retry_delay(),
            };
            tokio::time::sleep(delay).await;
        }

        Ok(None)
    }

    /// Run the protocol for the value behind `fetch`, guarded by `lock_name`.
    pub(crate) async fn resolve<F, Fut>(&self, lock_name: &str, fetch: F) -> Result<CacheLookup>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Option<Vec<u8>>>>,
    {
        let started = Instant::now();
        let deadline = started.checked_add(self.wait_timeout);

        match self.probe(lock_name, &fetch, deadline).await? {
            Probe::Hit(value) => return Ok(CacheLookup::Hit(value)),
            Probe::MissWinner(guard) => return Ok(CacheLookup::Locked(guard)),
            Probe::MissWaiting => {
                tracing::debug!(lock = %lock_name, "Lock held elsewhere, waiting for value");
            }
        }

        let mut backoff = Backoff::default();

        loop {
            if !self.is_locked(lock_name).await {
                match self.probe(lock_name, &fetch, deadline).await? {
                    Probe::Hit(value) => return Ok(CacheLookup::Hit(value)),
                    Probe::MissWinner(guard) => return Ok(CacheLookup::Locked(guard)),
                    Probe::MissWaiting => {}
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= self.wait_timeout {
                tracing::warn!(
                    lock = %lock_name,
                    waited_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    "Gave up waiting for lock holder"
                );
                return Err(CacheError::WaitTooLong);
            }

            let remaining = self.wait_timeout - elapsed;
            tokio::time::sleep(backoff.next_delay().min(remaining)).await;
        }
    }

    /// [`Self::resolve`], abandoned with `Cancelled` once `cancel` completes.
    pub(crate) async fn resolve_with_cancel<F, Fut, C>(
        &self,
        lock_name: &str,
        fetch: F,
        cancel: C,
    ) -> Result<CacheLookup>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Option<Vec<u8>>>>,
        C: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            outcome = self.resolve(lock_name, fetch) => outcome,
            () = cancel => {
                tracing::debug!(lock = %lock_name, "Wait cancelled by caller");
                Err(CacheError::Cancelled)
            }
        }
    }

    async fn probe<F, Fut>(
        &self,
        lock_name: &str,
        fetch: &F,
        deadline: Option<Instant>,
    ) -> Result<Probe>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Option<Vec<u8>>>>,
    {
        if let Some(value) = fetch().await? {
            return Ok(Probe::Hit(value));
        }

        match self.try_acquire(lock_name, deadline).await {
            Ok(Some(guard)) => Ok(Probe::MissWinner(guard)),
            Ok(None) => Ok(Probe::MissWaiting),
            Err(e) => {
                tracing::warn!(lock = %lock_name, error = %e, "Lock acquisition failed");
                Ok(Probe::MissWaiting)
            }
        }
    }

    /// Probe errors count as "not locked" so the caller re-fetches.
    async fn is_locked(&self, name: &str) -> bool {
        match self.locks.is_locked(name).await {
            Ok(locked) => locked,
            Err(e) => {
                tracing::warn!(lock = %name, error = %e, "Lock probe failed");
                false
            }
        }
    }
}

fn retry_delay() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(RETRY_DELAY_MIN_MS..=RETRY_DELAY_MAX_MS))
}
