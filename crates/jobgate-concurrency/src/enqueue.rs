//! Enqueue-time admission.
//!
//! Admission for a key is a check-then-insert sequence. It runs under the
//! key's advisory lock so that two processes cannot both see a free slot,
//! and the insert happens before the lock is released.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use jobgate_core::types::LockKey;
use jobgate_entity::job::{JobRecord, NewJob};

use crate::error::ConcurrencyError;
use crate::key::resolve_key;
use crate::lock::{AdvisoryLockCoordinator, LockWait, with_lock};
use crate::policy::{JobContext, LimitKind, LimitPolicy};
use crate::registry::JobRegistry;
use crate::store::{JobStore, LockScope};

/// Default bound on waiting for the key lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a job was not admitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    /// Id the job would have had.
    pub job_id: Uuid,
    /// Job class.
    pub job_class: String,
    /// Concurrency key at capacity.
    pub key: String,
    /// Limit that was hit.
    pub limit: LimitKind,
    /// Value of that limit for this job.
    pub limit_value: u32,
    /// Jobs counted against the limit.
    pub count: i64,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rejected: {} of {} reached for key '{}' ({} counted)",
            self.job_class, self.limit, self.limit_value, self.key, self.count
        )
    }
}

/// Outcome of an admission attempt.
#[derive(Debug, Clone)]
pub enum Admission {
    /// The job was inserted.
    Admitted(JobRecord),
    /// The job was not created.
    Rejected(Rejection),
}

impl Admission {
    /// Whether the job was inserted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted(_))
    }

    /// The inserted job, if admitted.
    pub fn job(&self) -> Option<&JobRecord> {
        match self {
            Self::Admitted(job) => Some(job),
            Self::Rejected(_) => None,
        }
    }

    /// The rejection, if rejected.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Admitted(_) => None,
            Self::Rejected(rejection) => Some(rejection),
        }
    }
}

/// Admits or rejects new jobs against `enqueue_limit` and `total_limit`.
#[derive(Debug, Clone)]
pub struct EnqueueGuard {
    registry: Arc<JobRegistry>,
    store: Arc<dyn JobStore>,
    locks: Arc<dyn AdvisoryLockCoordinator>,
    lock_timeout: Duration,
}

impl EnqueueGuard {
    /// Create a guard with the default lock timeout.
    pub fn new(
        registry: Arc<JobRegistry>,
        store: Arc<dyn JobStore>,
        locks: Arc<dyn AdvisoryLockCoordinator>,
    ) -> Self {
        Self {
            registry,
            store,
            locks,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Set how long admission waits for the key lock.
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Decide whether `job` may be enqueued, inserting it if so.
    ///
    /// The resolved key is persisted on the inserted record. Rejection is a
    /// normal outcome; errors are reserved for a bad key function, a lock
    /// timeout, or a store failure.
    pub async fn try_admit(&self, mut job: NewJob) -> Result<Admission, ConcurrencyError> {
        let policy = self.registry.policy_for(&job.job_class);
        let key = match policy {
            Some(policy) => {
                let ctx = JobContext::new(&job.job_class, Some(job.id), &job.arguments);
                resolve_key(policy, &ctx)?
            }
            None => None,
        };
        job.concurrency_key = key.clone();

        let admission = match (policy, key) {
            (Some(policy), Some(key)) if policy.has_admission_limits() => {
                self.admit_under_lock(policy, key, job).await?
            }
            _ => Admission::Admitted(self.store.insert_job(job).await?),
        };

        log_admission(&admission);
        Ok(admission)
    }

    async fn admit_under_lock(
        &self,
        policy: &LimitPolicy,
        key: String,
        job: NewJob,
    ) -> Result<Admission, ConcurrencyError> {
        let lock_key = LockKey::for_concurrency_key(&key);
        let wait = LockWait::Bounded(self.lock_timeout);

        let outcome = with_lock(self.locks.as_ref(), lock_key, wait, || {
            self.check_and_insert(policy, &key, job)
        })
        .await?;

        match outcome {
            Some(result) => result,
            None => Err(ConcurrencyError::LockTimeout {
                key,
                waited: self.lock_timeout,
            }),
        }
    }

    async fn check_and_insert(
        &self,
        policy: &LimitPolicy,
        key: &str,
        job: NewJob,
    ) -> Result<Admission, ConcurrencyError> {
        let checks = [
            (LimitKind::EnqueueLimit, LockScope::Unlocked),
            (LimitKind::TotalLimit, LockScope::Any),
        ];

        for (kind, scope) in checks {
            let limit = {
                let ctx = JobContext::new(&job.job_class, Some(job.id), &job.arguments);
                policy.limit(kind, &ctx)
            };
            let Some(limit) = limit else {
                continue;
            };

            let count = self.store.count_unfinished(key, scope).await?;
            if count >= i64::from(limit) {
                return Ok(Admission::Rejected(Rejection {
                    job_id: job.id,
                    job_class: job.job_class,
                    key: key.to_string(),
                    limit: kind,
                    limit_value: limit,
                    count,
                }));
            }
        }

        Ok(Admission::Admitted(self.store.insert_job(job).await?))
    }
}

fn log_admission(admission: &Admission) {
    match admission {
        Admission::Admitted(job) => info!(
            job_class = %job.job_class,
            job_id = %job.id,
            concurrency_key = ?job.concurrency_key,
            "Job admitted"
        ),
        Admission::Rejected(rejection) => info!(
            job_class = %rejection.job_class,
            job_id = %rejection.job_id,
            concurrency_key = %rejection.key,
            limit = %rejection.limit,
            limit_value = rejection.limit_value,
            count = rejection.count,
            "Job rejected by concurrency limit"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::MemoryAdvisoryLock;
    use crate::registry::JobType;
    use crate::store::MemoryJobStore;
    use serde_json::{Value, json};

    fn guard(registry: JobRegistry) -> (EnqueueGuard, Arc<MemoryJobStore>, MemoryAdvisoryLock) {
        let store = Arc::new(MemoryJobStore::new());
        let locks = MemoryAdvisoryLock::new();
        let guard = EnqueueGuard::new(Arc::new(registry), store.clone(), Arc::new(locks.clone()));
        (guard, store, locks)
    }

    fn named(class: &str, name: &str) -> NewJob {
        NewJob::new(class, json!({ "name": name }))
    }

    #[tokio::test]
    async fn test_enqueue_limit_per_key() {
        let mut registry = JobRegistry::new();
        registry.register(
            JobType::new("Greet")
                .with_concurrency(LimitPolicy::new().enqueue_limit(2).key_argument("name")),
        );
        let (guard, store, _) = guard(registry);

        assert!(guard.try_admit(named("Greet", "Alice")).await.unwrap().is_admitted());
        assert!(guard.try_admit(named("Greet", "Alice")).await.unwrap().is_admitted());

        let third = guard.try_admit(named("Greet", "Alice")).await.unwrap();
        let rejection = third.rejection().unwrap();
        assert_eq!(rejection.limit, LimitKind::EnqueueLimit);
        assert_eq!(rejection.limit_value, 2);
        assert_eq!(rejection.count, 2);
        assert_eq!(rejection.key, "Alice");

        assert!(guard.try_admit(named("Greet", "Bob")).await.unwrap().is_admitted());
        assert_eq!(store.count_unfinished("Alice", LockScope::Any).await.unwrap(), 2);
        assert_eq!(store.count_unfinished("Bob", LockScope::Any).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_total_limit_counts_claimed_jobs() {
        let mut registry = JobRegistry::new();
        registry
            .register(JobType::new("Report").with_concurrency(LimitPolicy::new().total_limit(1)));
        let (guard, store, _) = guard(registry);

        let admitted = guard.try_admit(NewJob::new("Report", json!({}))).await.unwrap();
        assert_eq!(admitted.job().unwrap().concurrency_key(), Some("Report"));

        let _claim = store.claim_next(&["default".to_string()]).await.unwrap().unwrap();
        let second = guard.try_admit(NewJob::new("Report", json!({}))).await.unwrap();
        assert_eq!(second.rejection().unwrap().limit, LimitKind::TotalLimit);
    }

    #[tokio::test]
    async fn test_key_type_error_inserts_nothing() {
        let mut registry = JobRegistry::new();
        registry.register(
            JobType::new("Bad").with_concurrency(
                LimitPolicy::new()
                    .total_limit(1)
                    .key_with(|_| json!({"nested": true})),
            ),
        );
        let (guard, store, _) = guard(registry);

        let job = NewJob::new("Bad", json!({}));
        let id = job.id;
        let err = guard.try_admit(job).await.unwrap_err();
        assert!(matches!(err, ConcurrencyError::KeyType { type_name: "object", .. }));
        assert!(store.find_job(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_null_key_is_uncontrolled() {
        let mut registry = JobRegistry::new();
        registry.register(
            JobType::new("Free").with_concurrency(
                LimitPolicy::new()
                    .total_limit(1)
                    .key_with(|_| Value::Null),
            ),
        );
        let (guard, _, _) = guard(registry);

        for _ in 0..5 {
            let admission = guard.try_admit(NewJob::new("Free", json!({}))).await.unwrap();
            assert_eq!(admission.job().unwrap().concurrency_key(), None);
        }
    }

    #[tokio::test]
    async fn test_perform_only_policy_persists_key_without_locking() {
        let mut registry = JobRegistry::new();
        registry.register(
            JobType::new("Render")
                .with_concurrency(LimitPolicy::new().perform_limit(1).key_argument("name")),
        );
        let (guard, _, locks) = guard(registry);
        let _busy = locks.try_acquire(LockKey::for_concurrency_key("Alice"));

        let admission = guard.try_admit(named("Render", "Alice")).await.unwrap();
        assert_eq!(admission.job().unwrap().concurrency_key(), Some("Alice"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_timeout() {
        let mut registry = JobRegistry::new();
        registry.register(
            JobType::new("Greet")
                .with_concurrency(LimitPolicy::new().enqueue_limit(1).key_argument("name")),
        );
        let (guard, store, locks) = guard(registry);
        let guard = guard.with_lock_timeout(Duration::from_millis(100));
        let _busy = locks.try_acquire(LockKey::for_concurrency_key("Alice")).unwrap();

        let job = named("Greet", "Alice");
        let id = job.id;
        match guard.try_admit(job).await {
            Err(ConcurrencyError::LockTimeout { key, waited }) => {
                assert_eq!(key, "Alice");
                assert_eq!(waited, Duration::from_millis(100));
            }
            other => panic!("expected LockTimeout, got {other:?}"),
        }
        assert!(store.find_job(id).await.unwrap().is_none());
    }
}
