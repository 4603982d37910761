//! Persistent job store abstraction.
//!
//! The guards only need counts by key and lock state plus an insert; the
//! worker additionally claims jobs and records attempts. Two backends:
//! - [`PgJobStore`] over the `jobgate-database` repositories
//! - [`MemoryJobStore`] for tests and single-process use

pub mod memory;
pub mod postgres;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use jobgate_core::result::AppResult;
use jobgate_entity::job::{ExecutionFailure, ExecutionRecord, JobRecord, NewJob};

use crate::lock::LockHandle;

pub use jobgate_database::repositories::LockScope;
pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;

/// Unfinished job counts for one concurrency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyStats {
    /// Unfinished jobs no worker has claimed.
    pub queued: i64,
    /// Unfinished jobs a worker has claimed.
    pub executing: i64,
    /// All unfinished jobs.
    pub total: i64,
}

/// A job a worker has claimed, together with its claim lock.
///
/// The job counts as executing for as long as the lock is held.
#[derive(Debug)]
pub struct ClaimedJob {
    /// The claimed job.
    pub job: JobRecord,
    /// The session lock on the job's `lock_id`.
    pub lock: Box<dyn LockHandle>,
}

impl ClaimedJob {
    /// Give up the claim.
    pub async fn release(self) -> AppResult<()> {
        self.lock.release().await
    }
}

/// Storage for job and execution records.
#[async_trait]
pub trait JobStore: Send + Sync + fmt::Debug {
    /// Insert a job and make it visible to other processes.
    async fn insert_job(&self, job: NewJob) -> AppResult<JobRecord>;

    /// Find a job by id.
    async fn find_job(&self, id: Uuid) -> AppResult<Option<JobRecord>>;

    /// Count unfinished jobs with `key` in the given lock scope.
    async fn count_unfinished(&self, key: &str, scope: LockScope) -> AppResult<i64>;

    /// Count claimed, unfinished jobs with `key`, not counting `exclude`.
    async fn count_executing(&self, key: &str, exclude: Uuid) -> AppResult<i64>;

    /// Unfinished jobs with `key`, oldest first, with their lock state.
    async fn list_unfinished(&self, key: &str) -> AppResult<Vec<(JobRecord, bool)>>;

    /// Claim the next runnable job from `queues`.
    async fn claim_next(&self, queues: &[String]) -> AppResult<Option<ClaimedJob>>;

    /// Record the start of a new attempt of `job`.
    async fn start_execution(&self, job: &JobRecord) -> AppResult<ExecutionRecord>;

    /// Record the end of an attempt.
    async fn finish_execution(&self, id: Uuid, failure: Option<&ExecutionFailure>) -> AppResult<()>;

    /// Mark a job as successfully finished.
    async fn mark_finished(&self, job_id: Uuid) -> AppResult<()>;

    /// Mark a job as discarded.
    async fn discard(&self, job_id: Uuid, error: &str) -> AppResult<()>;

    /// Run the same job again at `at`. The job keeps its key.
    async fn reschedule(&self, job_id: Uuid, at: DateTime<Utc>, error: &str) -> AppResult<()>;

    /// All attempts of a job, oldest first.
    async fn executions_for(&self, job_id: Uuid) -> AppResult<Vec<ExecutionRecord>>;

    /// Attempts of a job that failed in the job body.
    async fn count_failures(&self, job_id: Uuid) -> AppResult<i64> {
        let executions = self.executions_for(job_id).await?;
        let failures = executions.iter().filter(|e| e.is_application_failure()).count();
        Ok(i64::try_from(failures).unwrap_or(i64::MAX))
    }

    /// Queued, executing, and total unfinished counts for `key`.
    async fn key_stats(&self, key: &str) -> AppResult<KeyStats> {
        let queued = self.count_unfinished(key, LockScope::Unlocked).await?;
        let executing = self.count_unfinished(key, LockScope::Locked).await?;
        Ok(KeyStats {
            queued,
            executing,
            total: queued + executing,
        })
    }
}
