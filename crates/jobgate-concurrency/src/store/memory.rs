//! In-memory job store.
//!
//! Claims use the same kind of lock table as [`MemoryAdvisoryLock`], so a job
//! counts as executing exactly while its claim handle is held, mirroring the
//! `pg_locks` view of the PostgreSQL store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use jobgate_core::error::AppError;
use jobgate_core::result::AppResult;
use jobgate_entity::job::{ExecutionFailure, ExecutionRecord, JobRecord, NewJob};

use super::{ClaimedJob, JobStore, LockScope};
use crate::lock::MemoryAdvisoryLock;

#[derive(Debug, Default)]
struct StoreState {
    /// Jobs in insertion order.
    jobs: Vec<JobRecord>,
    executions: Vec<ExecutionRecord>,
}

impl StoreState {
    fn job_mut(&mut self, id: Uuid) -> AppResult<&mut JobRecord> {
        self.jobs
            .iter_mut()
            .find(|job| job.id == id)
            .ok_or_else(|| AppError::not_found(format!("Job {id} not found")))
    }
}

/// Job store kept in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    state: std::sync::Arc<Mutex<StoreState>>,
    claims: MemoryAdvisoryLock,
}

impl MemoryJobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn is_claimed(&self, job: &JobRecord) -> bool {
        self.claims.is_held(job.lock_key())
    }

    fn in_scope(&self, job: &JobRecord, key: &str, scope: LockScope) -> bool {
        if job.is_finished() || job.concurrency_key() != Some(key) {
            return false;
        }
        match scope {
            LockScope::Any => true,
            LockScope::Unlocked => !self.is_claimed(job),
            LockScope::Locked => self.is_claimed(job),
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert_job(&self, job: NewJob) -> AppResult<JobRecord> {
        let mut state = self.state.lock().await;
        if state.jobs.iter().any(|existing| existing.id == job.id) {
            return Err(AppError::conflict(format!("Job {} already exists", job.id)));
        }
        let record = job.into_record(Utc::now());
        state.jobs.push(record.clone());
        Ok(record)
    }

    async fn find_job(&self, id: Uuid) -> AppResult<Option<JobRecord>> {
        let state = self.state.lock().await;
        Ok(state.jobs.iter().find(|job| job.id == id).cloned())
    }

    async fn count_unfinished(&self, key: &str, scope: LockScope) -> AppResult<i64> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .iter()
            .filter(|job| self.in_scope(job, key, scope))
            .count() as i64)
    }

    async fn count_executing(&self, key: &str, exclude: Uuid) -> AppResult<i64> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .iter()
            .filter(|job| job.id != exclude && self.in_scope(job, key, LockScope::Locked))
            .count() as i64)
    }

    async fn list_unfinished(&self, key: &str) -> AppResult<Vec<(JobRecord, bool)>> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .iter()
            .filter(|job| self.in_scope(job, key, LockScope::Any))
            .map(|job| (job.clone(), self.is_claimed(job)))
            .collect())
    }

    async fn claim_next(&self, queues: &[String]) -> AppResult<Option<ClaimedJob>> {
        let state = self.state.lock().await;
        let now = Utc::now();

        let mut candidates: Vec<&JobRecord> = state
            .jobs
            .iter()
            .filter(|job| {
                !job.is_finished()
                    && queues.contains(&job.queue)
                    && job.scheduled_at.is_none_or(|at| at <= now)
            })
            .collect();
        candidates.sort_by_key(|job| (job.scheduled_at, job.created_at));

        for job in candidates {
            if let Some(lock) = self.claims.try_acquire(job.lock_key()) {
                debug!(job_id = %job.id, job_class = %job.job_class, "Claimed job");
                return Ok(Some(ClaimedJob {
                    job: job.clone(),
                    lock: Box::new(lock),
                }));
            }
        }

        Ok(None)
    }

    async fn start_execution(&self, job: &JobRecord) -> AppResult<ExecutionRecord> {
        let mut state = self.state.lock().await;
        let execution = ExecutionRecord::begin(job, Utc::now());

        let stored = state.job_mut(job.id)?;
        stored.executions_count = execution.attempt;
        stored.updated_at = execution.started_at;

        state.executions.push(execution.clone());
        Ok(execution)
    }

    async fn finish_execution(
        &self,
        id: Uuid,
        failure: Option<&ExecutionFailure>,
    ) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let execution = state
            .executions
            .iter_mut()
            .find(|execution| execution.id == id)
            .ok_or_else(|| AppError::not_found(format!("Execution {id} not found")))?;

        execution.finished_at = Some(Utc::now());
        execution.error = failure.map(|f| f.message.clone());
        execution.error_kind = failure.map(|f| f.kind.clone());
        Ok(())
    }

    async fn mark_finished(&self, job_id: Uuid) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(job_id)?;
        let now = Utc::now();
        job.finished_at = Some(now);
        job.error = None;
        job.updated_at = now;
        Ok(())
    }

    async fn discard(&self, job_id: Uuid, error: &str) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(job_id)?;
        let now = Utc::now();
        job.finished_at = Some(now);
        job.discarded_at = Some(now);
        job.error = Some(error.to_string());
        job.updated_at = now;
        Ok(())
    }

    async fn reschedule(&self, job_id: Uuid, at: DateTime<Utc>, error: &str) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(job_id)?;
        if job.is_finished() {
            return Ok(());
        }
        job.scheduled_at = Some(at);
        job.error = Some(error.to_string());
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn executions_for(&self, job_id: Uuid) -> AppResult<Vec<ExecutionRecord>> {
        let state = self.state.lock().await;
        let mut executions: Vec<ExecutionRecord> = state
            .executions
            .iter()
            .filter(|execution| execution.job_id == job_id)
            .cloned()
            .collect();
        executions.sort_by_key(|execution| execution.attempt);
        Ok(executions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn keyed(key: &str) -> NewJob {
        let mut job = NewJob::new("Sync", json!({}));
        job.concurrency_key = Some(key.to_string());
        job
    }

    fn queues() -> Vec<String> {
        vec!["default".to_string()]
    }

    #[tokio::test]
    async fn test_counts_follow_claims() {
        let store = MemoryJobStore::new();
        store.insert_job(keyed("Alice")).await.unwrap();
        store.insert_job(keyed("Alice")).await.unwrap();
        store.insert_job(keyed("Bob")).await.unwrap();

        let claimed = store.claim_next(&queues()).await.unwrap().unwrap();
        assert_eq!(claimed.job.concurrency_key(), Some("Alice"));

        let stats = store.key_stats("Alice").await.unwrap();
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.executing, 1);
        assert_eq!(stats.total, 2);
        assert_eq!(store.count_executing("Alice", claimed.job.id).await.unwrap(), 0);

        claimed.release().await.unwrap();
        assert_eq!(store.count_unfinished("Alice", LockScope::Locked).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_claim_skips_claimed_and_future_jobs() {
        let store = MemoryJobStore::new();
        let first = store.insert_job(keyed("Alice")).await.unwrap();
        store
            .insert_job(keyed("Alice").scheduled_at(Utc::now() + Duration::hours(1)))
            .await
            .unwrap();

        let claimed = store.claim_next(&queues()).await.unwrap().unwrap();
        assert_eq!(claimed.job.id, first.id);
        assert!(store.claim_next(&queues()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_ignores_other_queues() {
        let store = MemoryJobStore::new();
        store.insert_job(keyed("Alice").on_queue("mail")).await.unwrap();
        assert!(store.claim_next(&queues()).await.unwrap().is_none());
        assert!(store.claim_next(&["mail".to_string()]).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_execution_bookkeeping() {
        let store = MemoryJobStore::new();
        let job = store.insert_job(keyed("Alice")).await.unwrap();

        let first = store.start_execution(&job).await.unwrap();
        assert_eq!(first.attempt, 1);
        assert_eq!(first.concurrency_key(), Some("Alice"));
        store
            .finish_execution(first.id, Some(&ExecutionFailure::new("capacity_exceeded", "busy")))
            .await
            .unwrap();

        let job = store.find_job(job.id).await.unwrap().unwrap();
        let second = store.start_execution(&job).await.unwrap();
        assert_eq!(second.attempt, 2);
        store.finish_execution(second.id, None).await.unwrap();

        let executions = store.executions_for(job.id).await.unwrap();
        assert_eq!(executions.len(), 2);
        assert_eq!(executions[0].error_kind.as_deref(), Some("capacity_exceeded"));
        assert!(executions[1].error_kind.is_none());
    }

    #[tokio::test]
    async fn test_finished_jobs_are_out_of_scope() {
        let store = MemoryJobStore::new();
        let done = store.insert_job(keyed("Alice")).await.unwrap();
        let dropped = store.insert_job(keyed("Alice")).await.unwrap();
        store.insert_job(keyed("Alice")).await.unwrap();

        store.mark_finished(done.id).await.unwrap();
        store.discard(dropped.id, "boom").await.unwrap();

        assert_eq!(store.count_unfinished("Alice", LockScope::Any).await.unwrap(), 1);
        let dropped = store.find_job(dropped.id).await.unwrap().unwrap();
        assert!(dropped.discarded_at.is_some());
    }
}
