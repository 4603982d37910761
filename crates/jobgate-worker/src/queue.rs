//! Job queue: admission on enqueue, claims and bookkeeping for workers.

use std::sync::Arc;

use chrono::Utc;
use tracing;
use uuid::Uuid;

use jobgate_concurrency::{
    Admission, ClaimedJob, ConcurrencyError, EnqueueGuard, JobStore, KeyStats,
};
use jobgate_core::error::AppError;
use jobgate_entity::job::{ExecutionFailure, ExecutionRecord, JobRecord, NewJob};

use crate::executor::JobExecutionError;
use crate::retry::{RetryDecision, RetryPolicy};

/// Job queue for enqueuing and dequeuing work
#[derive(Debug, Clone)]
pub struct JobQueue {
    /// Persistent job store
    store: Arc<dyn JobStore>,
    /// Admission against enqueue and total limits
    guard: EnqueueGuard,
    /// Follow-up for failed attempts
    retry: RetryPolicy,
}

impl JobQueue {
    /// Create a new job queue
    pub fn new(store: Arc<dyn JobStore>, guard: EnqueueGuard, retry: RetryPolicy) -> Self {
        Self { store, guard, retry }
    }

    /// Enqueue a new job, subject to its concurrency policy
    pub async fn enqueue(&self, job: NewJob) -> Result<Admission, ConcurrencyError> {
        let admission = self.guard.try_admit(job).await?;

        if let Admission::Admitted(job) = &admission {
            tracing::debug!(
                "Enqueued job: id={}, class='{}', queue='{}'",
                job.id,
                job.job_class,
                job.queue
            );
        }

        Ok(admission)
    }

    /// Claim the next runnable job from the given queues
    pub async fn dequeue(&self, queues: &[String]) -> Result<Option<ClaimedJob>, AppError> {
        let claimed = self.store.claim_next(queues).await?;

        if let Some(claimed) = &claimed {
            tracing::debug!(
                "Dequeued job: id={}, class='{}', queue='{}'",
                claimed.job.id,
                claimed.job.job_class,
                claimed.job.queue
            );
        }

        Ok(claimed)
    }

    /// Record the start of an attempt of a claimed job
    pub async fn start(&self, job: &JobRecord) -> Result<ExecutionRecord, AppError> {
        self.store.start_execution(job).await
    }

    /// Mark an attempt and its job as completed successfully
    pub async fn complete(&self, job_id: Uuid, execution_id: Uuid) -> Result<(), AppError> {
        self.store.finish_execution(execution_id, None).await?;
        self.store.mark_finished(job_id).await?;

        tracing::debug!("Job completed: id={}", job_id);
        Ok(())
    }

    /// Record a failed attempt and retry or discard the job
    pub async fn fail(
        &self,
        execution: &ExecutionRecord,
        error: &JobExecutionError,
    ) -> Result<RetryDecision, AppError> {
        let message = error.to_string();
        let failure = ExecutionFailure::new(error.kind(), message.clone());
        self.store.finish_execution(execution.id, Some(&failure)).await?;

        // Only failures of the job body use up `max_attempts`.
        let attempt = match error {
            JobExecutionError::Transient(_) => self.store.count_failures(execution.job_id).await?,
            _ => i64::from(execution.attempt),
        };
        let decision = self.retry.decide(error, attempt, Utc::now());
        match decision {
            RetryDecision::Retry(at) => {
                self.store.reschedule(execution.job_id, at, &message).await?;
                tracing::debug!(
                    "Job retry scheduled: id={}, kind={}, at={}",
                    execution.job_id,
                    error.kind(),
                    at
                );
            }
            RetryDecision::Discard => {
                self.store.discard(execution.job_id, &message).await?;
                tracing::debug!("Job discarded: id={}, error='{}'", execution.job_id, message);
            }
        }

        Ok(decision)
    }

    /// Counts of unfinished jobs sharing a concurrency key
    pub async fn stats(&self, key: &str) -> Result<KeyStats, AppError> {
        self.store.key_stats(key).await
    }

    /// The underlying job store
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }
}
