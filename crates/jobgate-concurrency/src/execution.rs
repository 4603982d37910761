//! Execution-time admission against `perform_limit`.

use std::sync::Arc;

use tracing::{debug, info, warn};

use jobgate_core::types::LockKey;
use jobgate_entity::job::{ExecutionRecord, JobRecord};

use crate::error::ConcurrencyError;
use crate::lock::{AdvisoryLockCoordinator, LockWait, with_lock};
use crate::policy::{JobContext, LimitKind};
use crate::registry::JobRegistry;
use crate::store::JobStore;

/// Whether a claimed job may start running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionDecision {
    /// Run the job body.
    Proceed,
    /// The key lock was busy or the count failed; capacity is unknown and
    /// treated as exceeded.
    Deferred {
        /// Concurrency key.
        key: String,
        /// Perform limit for the job.
        limit: u32,
    },
    /// Enough other jobs with the key are executing.
    Exceeded {
        /// Concurrency key.
        key: String,
        /// Perform limit for the job.
        limit: u32,
        /// Other executing jobs with the key.
        executing: i64,
    },
}

impl ExecutionDecision {
    /// Whether the job body may run.
    pub fn is_proceed(&self) -> bool {
        matches!(self, Self::Proceed)
    }
}

/// Gates the start of each execution attempt on `perform_limit`.
///
/// The check never waits for the key lock, so a saturated key cannot stall
/// workers serving other keys.
#[derive(Debug, Clone)]
pub struct ExecutionGuard {
    registry: Arc<JobRegistry>,
    store: Arc<dyn JobStore>,
    locks: Arc<dyn AdvisoryLockCoordinator>,
}

impl ExecutionGuard {
    /// Create a guard.
    pub fn new(
        registry: Arc<JobRegistry>,
        store: Arc<dyn JobStore>,
        locks: Arc<dyn AdvisoryLockCoordinator>,
    ) -> Self {
        Self {
            registry,
            store,
            locks,
        }
    }

    /// Decide whether `execution` of the claimed `job` may start.
    ///
    /// Uses the key persisted on the execution record. The job's own claim
    /// is not counted.
    pub async fn try_begin_execution(
        &self,
        job: &JobRecord,
        execution: &ExecutionRecord,
    ) -> Result<ExecutionDecision, ConcurrencyError> {
        let Some(key) = execution.concurrency_key() else {
            return Ok(ExecutionDecision::Proceed);
        };

        let limit = self.registry.policy_for(&job.job_class).and_then(|policy| {
            let ctx = JobContext::new(&job.job_class, Some(job.id), &job.arguments);
            policy.limit(LimitKind::PerformLimit, &ctx)
        });
        let Some(limit) = limit else {
            return Ok(ExecutionDecision::Proceed);
        };

        let lock_key = LockKey::for_concurrency_key(key);
        let counted = with_lock(self.locks.as_ref(), lock_key, LockWait::Immediate, || {
            self.store.count_executing(key, job.id)
        })
        .await
        .and_then(Option::transpose);

        let decision = match counted {
            Ok(Some(executing)) if executing >= i64::from(limit) => ExecutionDecision::Exceeded {
                key: key.to_string(),
                limit,
                executing,
            },
            Ok(Some(_)) => ExecutionDecision::Proceed,
            Ok(None) => ExecutionDecision::Deferred {
                key: key.to_string(),
                limit,
            },
            Err(e) => {
                warn!(
                    job_id = %job.id,
                    concurrency_key = %key,
                    error = %e,
                    "Could not count executing jobs, deferring"
                );
                ExecutionDecision::Deferred {
                    key: key.to_string(),
                    limit,
                }
            }
        };

        match &decision {
            ExecutionDecision::Proceed => debug!(
                job_id = %job.id,
                concurrency_key = %key,
                "Execution within perform limit"
            ),
            ExecutionDecision::Deferred { .. } => info!(
                job_class = %job.job_class,
                job_id = %job.id,
                concurrency_key = %key,
                limit = limit,
                "Execution deferred, capacity unknown"
            ),
            ExecutionDecision::Exceeded { executing, .. } => info!(
                job_class = %job.job_class,
                job_id = %job.id,
                concurrency_key = %key,
                limit = limit,
                executing = executing,
                "Execution exceeds perform limit"
            ),
        }

        Ok(decision)
    }

    /// Like [`Self::try_begin_execution`], but any outcome other than
    /// proceeding is a [`ConcurrencyError::CapacityExceeded`].
    pub async fn check(
        &self,
        job: &JobRecord,
        execution: &ExecutionRecord,
    ) -> Result<(), ConcurrencyError> {
        match self.try_begin_execution(job, execution).await? {
            ExecutionDecision::Proceed => Ok(()),
            ExecutionDecision::Deferred { key, limit } => Err(ConcurrencyError::CapacityExceeded {
                key,
                limit,
                executing: None,
            }),
            ExecutionDecision::Exceeded {
                key,
                limit,
                executing,
            } => Err(ConcurrencyError::CapacityExceeded {
                key,
                limit,
                executing: Some(executing),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::MemoryAdvisoryLock;
    use crate::policy::LimitPolicy;
    use crate::registry::JobType;
    use crate::store::MemoryJobStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use jobgate_core::error::AppError;
    use jobgate_core::result::AppResult;
    use jobgate_entity::job::{ExecutionFailure, NewJob};
    use serde_json::json;
    use uuid::Uuid;

    use crate::store::{ClaimedJob, LockScope};

    /// Memory store whose executing-job count always fails.
    #[derive(Debug, Default)]
    struct UnreachableCountStore {
        inner: MemoryJobStore,
    }

    #[async_trait]
    impl JobStore for UnreachableCountStore {
        async fn insert_job(&self, job: NewJob) -> AppResult<JobRecord> {
            self.inner.insert_job(job).await
        }

        async fn find_job(&self, id: Uuid) -> AppResult<Option<JobRecord>> {
            self.inner.find_job(id).await
        }

        async fn count_unfinished(&self, key: &str, scope: LockScope) -> AppResult<i64> {
            self.inner.count_unfinished(key, scope).await
        }

        async fn count_executing(&self, _key: &str, _exclude: Uuid) -> AppResult<i64> {
            Err(AppError::database("connection reset"))
        }

        async fn list_unfinished(&self, key: &str) -> AppResult<Vec<(JobRecord, bool)>> {
            self.inner.list_unfinished(key).await
        }

        async fn claim_next(&self, queues: &[String]) -> AppResult<Option<ClaimedJob>> {
            self.inner.claim_next(queues).await
        }

        async fn start_execution(&self, job: &JobRecord) -> AppResult<ExecutionRecord> {
            self.inner.start_execution(job).await
        }

        async fn finish_execution(
            &self,
            id: Uuid,
            failure: Option<&ExecutionFailure>,
        ) -> AppResult<()> {
            self.inner.finish_execution(id, failure).await
        }

        async fn mark_finished(&self, job_id: Uuid) -> AppResult<()> {
            self.inner.mark_finished(job_id).await
        }

        async fn discard(&self, job_id: Uuid, error: &str) -> AppResult<()> {
            self.inner.discard(job_id, error).await
        }

        async fn reschedule(&self, job_id: Uuid, at: DateTime<Utc>, error: &str) -> AppResult<()> {
            self.inner.reschedule(job_id, at, error).await
        }

        async fn executions_for(&self, job_id: Uuid) -> AppResult<Vec<ExecutionRecord>> {
            self.inner.executions_for(job_id).await
        }
    }

    struct Fixture {
        guard: ExecutionGuard,
        store: Arc<MemoryJobStore>,
        locks: MemoryAdvisoryLock,
    }

    fn fixture(perform_limit: u32) -> Fixture {
        let mut registry = JobRegistry::new();
        registry.register(
            JobType::new("Render").with_concurrency(
                LimitPolicy::new()
                    .perform_limit(perform_limit)
                    .key_argument("name"),
            ),
        );
        let store = Arc::new(MemoryJobStore::new());
        let locks = MemoryAdvisoryLock::new();
        let guard = ExecutionGuard::new(Arc::new(registry), store.clone(), Arc::new(locks.clone()));
        Fixture {
            guard,
            store,
            locks,
        }
    }

    async fn insert(store: &MemoryJobStore, name: Option<&str>) -> JobRecord {
        let mut job = NewJob::new("Render", json!({ "name": name }));
        job.concurrency_key = name.map(str::to_string);
        store.insert_job(job).await.unwrap()
    }

    fn queues() -> Vec<String> {
        vec!["default".to_string()]
    }

    #[tokio::test]
    async fn test_proceeds_under_limit() {
        let f = fixture(1);
        insert(&f.store, Some("Alice")).await;

        let claim = f.store.claim_next(&queues()).await.unwrap().unwrap();
        let execution = f.store.start_execution(&claim.job).await.unwrap();
        let decision = f.guard.try_begin_execution(&claim.job, &execution).await.unwrap();
        assert!(decision.is_proceed());
    }

    #[tokio::test]
    async fn test_exceeded_when_others_execute() {
        let f = fixture(1);
        insert(&f.store, Some("Alice")).await;
        insert(&f.store, Some("Alice")).await;

        let first = f.store.claim_next(&queues()).await.unwrap().unwrap();
        let second = f.store.claim_next(&queues()).await.unwrap().unwrap();
        let execution = f.store.start_execution(&second.job).await.unwrap();

        let decision = f.guard.try_begin_execution(&second.job, &execution).await.unwrap();
        assert_eq!(
            decision,
            ExecutionDecision::Exceeded {
                key: "Alice".to_string(),
                limit: 1,
                executing: 1,
            }
        );

        first.release().await.unwrap();
        let decision = f.guard.try_begin_execution(&second.job, &execution).await.unwrap();
        assert!(decision.is_proceed());
    }

    #[tokio::test]
    async fn test_zero_limit_always_exceeded() {
        let f = fixture(0);
        insert(&f.store, Some("Alice")).await;
        let claim = f.store.claim_next(&queues()).await.unwrap().unwrap();
        let execution = f.store.start_execution(&claim.job).await.unwrap();

        let err = f.guard.check(&claim.job, &execution).await.unwrap_err();
        assert!(err.is_capacity_exceeded());
    }

    #[tokio::test]
    async fn test_busy_lock_defers() {
        let f = fixture(5);
        insert(&f.store, Some("Alice")).await;
        let claim = f.store.claim_next(&queues()).await.unwrap().unwrap();
        let execution = f.store.start_execution(&claim.job).await.unwrap();
        let _busy = f.locks.try_acquire(LockKey::for_concurrency_key("Alice")).unwrap();

        let decision = f.guard.try_begin_execution(&claim.job, &execution).await.unwrap();
        assert_eq!(
            decision,
            ExecutionDecision::Deferred {
                key: "Alice".to_string(),
                limit: 5,
            }
        );
        match f.guard.check(&claim.job, &execution).await {
            Err(ConcurrencyError::CapacityExceeded { executing, .. }) => {
                assert!(executing.is_none())
            }
            other => panic!("expected CapacityExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unkeyed_execution_proceeds() {
        let f = fixture(0);
        insert(&f.store, None).await;
        let claim = f.store.claim_next(&queues()).await.unwrap().unwrap();
        let execution = f.store.start_execution(&claim.job).await.unwrap();
        assert!(f.guard.check(&claim.job, &execution).await.is_ok());
    }

    #[tokio::test]
    async fn test_store_failure_defers() {
        let mut registry = JobRegistry::new();
        registry.register(
            JobType::new("Render")
                .with_concurrency(LimitPolicy::new().perform_limit(1).key_argument("name")),
        );
        let store = Arc::new(UnreachableCountStore::default());
        let locks = MemoryAdvisoryLock::new();
        let guard = ExecutionGuard::new(Arc::new(registry), store.clone(), Arc::new(locks.clone()));

        let mut job = NewJob::new("Render", json!({ "name": "Alice" }));
        job.concurrency_key = Some("Alice".to_string());
        store.insert_job(job).await.unwrap();
        let claim = store.claim_next(&queues()).await.unwrap().unwrap();
        let execution = store.start_execution(&claim.job).await.unwrap();

        let decision = guard.try_begin_execution(&claim.job, &execution).await.unwrap();
        assert_eq!(
            decision,
            ExecutionDecision::Deferred {
                key: "Alice".to_string(),
                limit: 1,
            }
        );
        let err = guard.check(&claim.job, &execution).await.unwrap_err();
        assert!(err.is_capacity_exceeded());
        assert!(!locks.is_held(LockKey::for_concurrency_key("Alice")));
    }
}
