//! In-memory advisory locks for tests and single-process deployments.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use jobgate_core::result::AppResult;
use jobgate_core::types::LockKey;

use super::{AdvisoryLockCoordinator, LockHandle, LockWait};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Process-local advisory lock table.
///
/// Clones share the same table. A std mutex guards it so that handles can
/// release synchronously on drop.
#[derive(Debug, Clone)]
pub struct MemoryAdvisoryLock {
    held: Arc<Mutex<HashSet<i64>>>,
}

impl Default for MemoryAdvisoryLock {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAdvisoryLock {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self {
            held: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Whether any handle currently holds `key`.
    pub fn is_held(&self, key: LockKey) -> bool {
        lock_table(&self.held).contains(&key.as_i64())
    }

    /// Take `key` if it is free.
    pub fn try_acquire(&self, key: LockKey) -> Option<MemoryLockHandle> {
        if lock_table(&self.held).insert(key.as_i64()) {
            Some(MemoryLockHandle {
                held: Some(self.held.clone()),
                key,
            })
        } else {
            None
        }
    }
}

#[async_trait]
impl AdvisoryLockCoordinator for MemoryAdvisoryLock {
    async fn acquire(
        &self,
        key: LockKey,
        wait: LockWait,
    ) -> AppResult<Option<Box<dyn LockHandle>>> {
        let deadline = Instant::now() + wait.timeout();

        loop {
            if let Some(handle) = self.try_acquire(key) {
                return Ok(Some(Box::new(handle)));
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(lock_key = %key, "Advisory lock busy");
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }
}

/// A key held in a [`MemoryAdvisoryLock`] table.
#[derive(Debug)]
pub struct MemoryLockHandle {
    held: Option<Arc<Mutex<HashSet<i64>>>>,
    key: LockKey,
}

impl MemoryLockHandle {
    fn unlock(&mut self) {
        if let Some(held) = self.held.take() {
            lock_table(&held).remove(&self.key.as_i64());
        }
    }
}

#[async_trait]
impl LockHandle for MemoryLockHandle {
    fn key(&self) -> LockKey {
        self.key
    }

    async fn release(mut self: Box<Self>) -> AppResult<()> {
        self.unlock();
        Ok(())
    }
}

impl Drop for MemoryLockHandle {
    fn drop(&mut self) {
        self.unlock();
    }
}

fn lock_table(held: &Mutex<HashSet<i64>>) -> MutexGuard<'_, HashSet<i64>> {
    // The set stays consistent even if a holder panicked mid-operation.
    held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
