//! PostgreSQL session advisory locks.
//!
//! Each held lock owns one pooled connection. The lock lives exactly as long
//! as that session, so a crashed process frees its locks when the server
//! notices the connection is gone.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tokio::time::Instant;
use tracing::{debug, warn};

use jobgate_core::error::{AppError, ErrorKind};
use jobgate_core::result::AppResult;
use jobgate_core::types::LockKey;

use super::{AdvisoryLockCoordinator, LockHandle, LockWait};

/// Advisory lock coordinator backed by `pg_try_advisory_lock`.
#[derive(Debug, Clone)]
pub struct PgAdvisoryLock {
    pool: PgPool,
    poll_interval: Duration,
}

impl PgAdvisoryLock {
    /// Create a coordinator that polls a held lock every `poll_interval`.
    pub fn new(pool: PgPool, poll_interval: Duration) -> Self {
        Self {
            pool,
            poll_interval,
        }
    }
}

#[async_trait]
impl AdvisoryLockCoordinator for PgAdvisoryLock {
    async fn acquire(
        &self,
        key: LockKey,
        wait: LockWait,
    ) -> AppResult<Option<Box<dyn LockHandle>>> {
        let deadline = Instant::now() + wait.timeout();
        let mut conn = self.pool.acquire().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to acquire lock connection", e)
        })?;

        loop {
            let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
                .bind(key.as_i64())
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| {
                    AppError::with_source(ErrorKind::Database, "Failed to try advisory lock", e)
                })?;

            if locked {
                return Ok(Some(Box::new(PgLockHandle::held(conn, key))));
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(lock_key = %key, "Advisory lock busy");
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

/// A session advisory lock held on a dedicated pooled connection.
#[derive(Debug)]
pub struct PgLockHandle {
    conn: Option<PoolConnection<Postgres>>,
    key: LockKey,
}

impl PgLockHandle {
    /// Wrap a connection whose session already holds the lock on `key`.
    pub(crate) fn held(conn: PoolConnection<Postgres>, key: LockKey) -> Self {
        Self {
            conn: Some(conn),
            key,
        }
    }
}

#[async_trait]
impl LockHandle for PgLockHandle {
    fn key(&self) -> LockKey {
        self.key
    }

    async fn release(mut self: Box<Self>) -> AppResult<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        let result = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(self.key.as_i64())
            .fetch_one(&mut *conn)
            .await;

        match result {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(lock_key = %self.key, "Advisory lock was not held at release");
                Ok(())
            }
            Err(e) => {
                // Ending the session is the only way left to free the lock.
                conn.close_on_drop();
                Err(AppError::with_source(
                    ErrorKind::Database,
                    "Failed to release advisory lock",
                    e,
                ))
            }
        }
    }
}

impl Drop for PgLockHandle {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            warn!(lock_key = %self.key, "Advisory lock dropped without release, closing session");
            conn.close_on_drop();
        }
    }
}
