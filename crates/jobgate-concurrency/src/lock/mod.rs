//! Advisory lock coordination.
//!
//! Provides cross-process mutual exclusion keyed by a [`LockKey`], using
//! either:
//! - PostgreSQL session advisory locks (for multi-process deployments)
//! - An in-memory table of held keys (for tests and single-process use)
//!
//! A lock is held through a [`LockHandle`]. Handles should be released
//! explicitly; a handle that is dropped while still held releases the lock
//! anyway, so an early return or a panic cannot leak it.

pub mod memory;
pub mod postgres;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use jobgate_core::result::AppResult;
use jobgate_core::types::LockKey;

pub use memory::MemoryAdvisoryLock;
pub use postgres::PgAdvisoryLock;

/// How long `acquire` may wait for a held lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockWait {
    /// Try once and give up if the lock is held.
    Immediate,
    /// Keep trying until the duration elapses.
    Bounded(Duration),
}

impl LockWait {
    /// Maximum time this mode waits.
    pub fn timeout(&self) -> Duration {
        match self {
            Self::Immediate => Duration::ZERO,
            Self::Bounded(duration) => *duration,
        }
    }
}

/// Acquires advisory locks.
#[async_trait]
pub trait AdvisoryLockCoordinator: Send + Sync + fmt::Debug {
    /// Acquire the lock on `key`.
    ///
    /// Returns `Ok(None)` when the lock could not be taken within `wait`.
    async fn acquire(&self, key: LockKey, wait: LockWait) -> AppResult<Option<Box<dyn LockHandle>>>;
}

/// A held advisory lock.
#[async_trait]
pub trait LockHandle: Send + fmt::Debug {
    /// The key this handle holds.
    fn key(&self) -> LockKey;

    /// Release the lock.
    async fn release(self: Box<Self>) -> AppResult<()>;
}

/// Run `f` while holding the lock on `key`.
///
/// Returns `Ok(None)` without running `f` if the lock was not acquired. The
/// lock is released after `f` completes whatever it returns.
pub async fn with_lock<F, Fut, T>(
    locks: &dyn AdvisoryLockCoordinator,
    key: LockKey,
    wait: LockWait,
    f: F,
) -> AppResult<Option<T>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let Some(handle) = locks.acquire(key, wait).await? else {
        return Ok(None);
    };

    let output = f().await;

    if let Err(e) = handle.release().await {
        warn!(lock_key = %key, error = %e, "Failed to release advisory lock");
    }

    Ok(Some(output))
}
