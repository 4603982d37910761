//! Execution repository implementation.

use sqlx::PgPool;
use uuid::Uuid;

use jobgate_core::error::{AppError, ErrorKind};
use jobgate_core::result::AppResult;
use jobgate_entity::job::{CAPACITY_EXCEEDED, ExecutionFailure, ExecutionRecord};

/// Repository for execution attempt records.
#[derive(Debug, Clone)]
pub struct ExecutionRepository {
    pool: PgPool,
}

impl ExecutionRepository {
    /// Create a new execution repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record the start of an attempt and bump the parent job's attempt count.
    pub async fn create(&self, execution: &ExecutionRecord) -> AppResult<ExecutionRecord> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to begin transaction", e)
        })?;

        let record = sqlx::query_as::<_, ExecutionRecord>(
            "INSERT INTO executions (id, job_id, job_class, concurrency_key, attempt, started_at) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
        )
        .bind(execution.id)
        .bind(execution.job_id)
        .bind(&execution.job_class)
        .bind(&execution.concurrency_key)
        .bind(execution.attempt)
        .bind(execution.started_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to create execution", e))?;

        sqlx::query(
            "UPDATE jobs SET executions_count = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(execution.job_id)
        .bind(execution.attempt)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to update executions count", e)
        })?;

        tx.commit().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to commit execution", e)
        })?;

        Ok(record)
    }

    /// Mark an attempt as finished, optionally with failure details.
    pub async fn finish(&self, id: Uuid, failure: Option<&ExecutionFailure>) -> AppResult<()> {
        sqlx::query(
            "UPDATE executions SET finished_at = NOW(), error = $2, error_kind = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(failure.map(|f| f.message.as_str()))
        .bind(failure.map(|f| f.kind.as_str()))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to finish execution", e))?;
        Ok(())
    }

    /// All attempts of a job, oldest first.
    pub async fn list_for_job(&self, job_id: Uuid) -> AppResult<Vec<ExecutionRecord>> {
        sqlx::query_as::<_, ExecutionRecord>(
            "SELECT * FROM executions WHERE job_id = $1 ORDER BY attempt ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to list executions", e))
    }

    /// Failed attempts of a job, not counting capacity deferrals.
    pub async fn count_failures(&self, job_id: Uuid) -> AppResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM executions
             WHERE job_id = $1 AND error_kind IS NOT NULL AND error_kind <> $2",
        )
        .bind(job_id)
        .bind(CAPACITY_EXCEEDED)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to count failures", e))
    }
}
