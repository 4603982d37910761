//! PostgreSQL connection pool.
//!
//! Concurrency locks and job claims are session advisory locks, so every
//! pooled connection doubles as a lock session. Closing the pool ends those
//! sessions and the server drops whatever they still hold.

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use jobgate_core::config::DatabaseConfig;
use jobgate_core::error::{AppError, ErrorKind};
use jobgate_core::result::AppResult;

/// sqlx pool shared by the job store and the advisory lock coordinator.
#[derive(Debug, Clone)]
pub struct DatabasePool {
    pool: PgPool,
}

impl DatabasePool {
    /// Connect and verify that the server accepts queries.
    pub async fn connect(config: &DatabaseConfig) -> AppResult<Self> {
        info!(
            url = %redact_url(&config.url),
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to connect to database", e)
            })?;

        let db = Self { pool };
        db.ping().await?;
        info!("Connected to PostgreSQL");
        Ok(db)
    }

    /// Round-trip a trivial query.
    pub async fn ping(&self) -> AppResult<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Database ping failed", e))?;
        Ok(())
    }

    /// A handle to the pool for stores and lock coordinators.
    pub fn handle(&self) -> PgPool {
        self.pool.clone()
    }

    /// Consume the wrapper, keeping the pool.
    pub fn into_pool(self) -> PgPool {
        self.pool
    }

    /// Wait for checked-out connections and close every session.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database pool closed");
    }
}

/// Replace the password in a connection URL with `****`.
fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:****@{host}"),
        None => url.to_string(),
    }
}
