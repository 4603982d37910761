//! PostgreSQL job store over the `jobgate-database` repositories.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use jobgate_core::error::{AppError, ErrorKind};
use jobgate_core::result::AppResult;
use jobgate_database::repositories::{ExecutionRepository, JobRepository};
use jobgate_entity::job::{ExecutionFailure, ExecutionRecord, JobRecord, NewJob};

use super::{ClaimedJob, JobStore, LockScope};
use crate::lock::postgres::PgLockHandle;

/// Job store backed by the `jobs` and `executions` tables.
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
    jobs: JobRepository,
    executions: ExecutionRepository,
}

impl PgJobStore {
    /// Create a store over a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            jobs: JobRepository::new(pool.clone()),
            executions: ExecutionRepository::new(pool.clone()),
            pool,
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert_job(&self, job: NewJob) -> AppResult<JobRecord> {
        self.jobs.insert(&job).await
    }

    async fn find_job(&self, id: Uuid) -> AppResult<Option<JobRecord>> {
        self.jobs.find_by_id(id).await
    }

    async fn count_unfinished(&self, key: &str, scope: LockScope) -> AppResult<i64> {
        self.jobs.count_unfinished(key, scope).await
    }

    async fn count_executing(&self, key: &str, exclude: Uuid) -> AppResult<i64> {
        self.jobs.count_locked_excluding(key, exclude).await
    }

    async fn list_unfinished(&self, key: &str) -> AppResult<Vec<(JobRecord, bool)>> {
        self.jobs.list_unfinished(key).await
    }

    async fn claim_next(&self, queues: &[String]) -> AppResult<Option<ClaimedJob>> {
        // The claim lock belongs to this connection's session, so the
        // connection travels with the claim until it is released.
        let mut conn = self.pool.acquire().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to acquire claim connection", e)
        })?;

        let Some(job) = self.jobs.claim_next(&mut *conn, queues).await? else {
            return Ok(None);
        };

        let lock = PgLockHandle::held(conn, job.lock_key());
        Ok(Some(ClaimedJob {
            job,
            lock: Box::new(lock),
        }))
    }

    async fn start_execution(&self, job: &JobRecord) -> AppResult<ExecutionRecord> {
        self.executions
            .create(&ExecutionRecord::begin(job, Utc::now()))
            .await
    }

    async fn finish_execution(
        &self,
        id: Uuid,
        failure: Option<&ExecutionFailure>,
    ) -> AppResult<()> {
        self.executions.finish(id, failure).await
    }

    async fn mark_finished(&self, job_id: Uuid) -> AppResult<()> {
        self.jobs.mark_finished(job_id).await
    }

    async fn discard(&self, job_id: Uuid, error: &str) -> AppResult<()> {
        self.jobs.discard(job_id, error).await
    }

    async fn reschedule(&self, job_id: Uuid, at: DateTime<Utc>, error: &str) -> AppResult<()> {
        self.jobs.reschedule(job_id, at, error).await
    }

    async fn executions_for(&self, job_id: Uuid) -> AppResult<Vec<ExecutionRecord>> {
        self.executions.list_for_job(job_id).await
    }

    async fn count_failures(&self, job_id: Uuid) -> AppResult<i64> {
        self.executions.count_failures(job_id).await
    }
}
