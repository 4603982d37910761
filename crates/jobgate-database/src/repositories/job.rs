//! Job repository implementation.
//!
//! A job counts as *locked* while some session holds the advisory lock whose
//! id is stored in `jobs.lock_id`. Workers take that lock when they claim a
//! job, so the lock disappears with the worker's connection if it crashes.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use jobgate_core::error::{AppError, ErrorKind};
use jobgate_core::result::AppResult;
use jobgate_entity::job::{JobRecord, NewJob};

/// Matches `jobs` rows whose claim lock is currently held by any session.
///
/// A single-`bigint` advisory lock shows up in `pg_locks` with the high half
/// in `classid`, the low half in `objid`, and `objsubid = 1`.
const LOCKED: &str = "EXISTS ( \
    SELECT 1 FROM pg_locks l \
    WHERE l.locktype = 'advisory' \
      AND l.objsubid = 1 \
      AND l.granted \
      AND l.database = (SELECT oid FROM pg_database WHERE datname = current_database()) \
      AND ((l.classid::bigint << 32) | l.objid::bigint) = jobs.lock_id \
)";

/// How many queued jobs a claim attempt considers before giving up.
const CLAIM_CANDIDATES: i64 = 100;

/// Which unfinished jobs a count includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    /// Locked and unlocked jobs alike.
    Any,
    /// Only jobs no worker has claimed.
    Unlocked,
    /// Only jobs a worker has claimed.
    Locked,
}

/// Repository for job records and claim queries.
#[derive(Debug, Clone)]
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    /// Create a new job repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find a job by ID.
    pub async fn find_by_id(&self, id: Uuid) -> AppResult<Option<JobRecord>> {
        sqlx::query_as::<_, JobRecord>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find job", e))
    }

    /// Insert a new job. Commits immediately.
    pub async fn insert(&self, data: &NewJob) -> AppResult<JobRecord> {
        sqlx::query_as::<_, JobRecord>(
            "INSERT INTO jobs \
             (id, job_class, queue, arguments, concurrency_key, lock_id, scheduled_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
        )
        .bind(data.id)
        .bind(&data.job_class)
        .bind(&data.queue)
        .bind(&data.arguments)
        .bind(&data.concurrency_key)
        .bind(data.lock_key().as_i64())
        .bind(data.scheduled_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to insert job", e))
    }

    /// Count unfinished jobs sharing a concurrency key.
    pub async fn count_unfinished(&self, key: &str, scope: LockScope) -> AppResult<i64> {
        let sql = match scope {
            LockScope::Any => {
                "SELECT COUNT(*) FROM jobs WHERE concurrency_key = $1 AND finished_at IS NULL"
                    .to_string()
            }
            LockScope::Unlocked => format!(
                "SELECT COUNT(*) FROM jobs \
                 WHERE concurrency_key = $1 AND finished_at IS NULL AND NOT {LOCKED}"
            ),
            LockScope::Locked => format!(
                "SELECT COUNT(*) FROM jobs \
                 WHERE concurrency_key = $1 AND finished_at IS NULL AND {LOCKED}"
            ),
        };

        sqlx::query_scalar::<_, i64>(&sql)
            .bind(key)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to count jobs", e))
    }

    /// Count claimed, unfinished jobs sharing a key, ignoring one job.
    pub async fn count_locked_excluding(&self, key: &str, exclude: Uuid) -> AppResult<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM jobs \
             WHERE concurrency_key = $1 AND finished_at IS NULL AND id <> $2 AND {LOCKED}"
        );

        sqlx::query_scalar::<_, i64>(&sql)
            .bind(key)
            .bind(exclude)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to count executing jobs", e)
            })
    }

    /// Unfinished jobs sharing a key, oldest first, with their lock state.
    pub async fn list_unfinished(&self, key: &str) -> AppResult<Vec<(JobRecord, bool)>> {
        let jobs = sqlx::query_as::<_, JobRecord>(
            "SELECT * FROM jobs WHERE concurrency_key = $1 AND finished_at IS NULL \
             ORDER BY created_at ASC",
        )
        .bind(key)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to list jobs", e))?;

        let locked_sql = format!(
            "SELECT id FROM jobs WHERE concurrency_key = $1 AND finished_at IS NULL AND {LOCKED}"
        );
        let locked: Vec<Uuid> = sqlx::query_scalar(&locked_sql)
            .bind(key)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to list locked jobs", e)
            })?;

        Ok(jobs
            .into_iter()
            .map(|job| {
                let is_locked = locked.contains(&job.id);
                (job, is_locked)
            })
            .collect())
    }

    /// Take the claim lock of the next runnable job on `conn`.
    ///
    /// The lock is session-scoped: it stays held for as long as `conn` is
    /// open and is released with `pg_advisory_unlock` or by closing it.
    pub async fn claim_next(
        &self,
        conn: &mut PgConnection,
        queues: &[String],
    ) -> AppResult<Option<JobRecord>> {
        let claimed: Option<(Uuid, i64)> = sqlx::query_as(
            "WITH candidates AS MATERIALIZED ( \
                SELECT id, lock_id FROM jobs \
                WHERE queue = ANY($1) AND finished_at IS NULL \
                  AND (scheduled_at IS NULL OR scheduled_at <= NOW()) \
                ORDER BY scheduled_at ASC NULLS FIRST, created_at ASC \
                LIMIT $2 \
             ) \
             SELECT id, lock_id FROM candidates \
             WHERE pg_try_advisory_lock(candidates.lock_id) \
             LIMIT 1",
        )
        .bind(queues)
        .bind(CLAIM_CANDIDATES)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to claim job", e))?;

        let Some((id, lock_id)) = claimed else {
            return Ok(None);
        };

        // Another worker may have finished the job between the candidate
        // scan and taking the lock.
        let job = sqlx::query_as::<_, JobRecord>(
            "SELECT * FROM jobs WHERE id = $1 AND finished_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to reload claimed job", e)
        })?;

        if job.is_none() {
            sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
                .bind(lock_id)
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| {
                    AppError::with_source(ErrorKind::Database, "Failed to release stale claim", e)
                })?;
        }

        Ok(job)
    }

    /// Mark a job as finished successfully.
    pub async fn mark_finished(&self, job_id: Uuid) -> AppResult<()> {
        sqlx::query(
            "UPDATE jobs SET finished_at = NOW(), error = NULL, updated_at = NOW() WHERE id = $1",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to finish job", e))?;
        Ok(())
    }

    /// Mark a job as discarded. Discarded jobs are finished.
    pub async fn discard(&self, job_id: Uuid, error: &str) -> AppResult<()> {
        sqlx::query(
            "UPDATE jobs \
             SET finished_at = NOW(), discarded_at = NOW(), error = $2, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(job_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to discard job", e))?;
        Ok(())
    }

    /// Keep the job (and its concurrency key) and run it again later.
    pub async fn reschedule(&self, job_id: Uuid, at: DateTime<Utc>, error: &str) -> AppResult<()> {
        sqlx::query(
            "UPDATE jobs SET scheduled_at = $2, error = $3, updated_at = NOW() \
             WHERE id = $1 AND finished_at IS NULL",
        )
        .bind(job_id)
        .bind(at)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to reschedule job", e))?;
        Ok(())
    }
}
