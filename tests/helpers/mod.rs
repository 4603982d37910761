//! Shared fixtures for the workspace integration tests.
//!
//! `TestApp` wires the guards, queue, executor, and runner over the
//! in-memory store and lock table.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use jobgate_concurrency::lock::MemoryAdvisoryLock;
use jobgate_concurrency::store::MemoryJobStore;
use jobgate_concurrency::{EnqueueGuard, ExecutionGuard, JobRegistry, JobStore};
use jobgate_core::config::{RetryConfig, WorkerConfig};
use jobgate_entity::job::{JobRecord, NewJob};
use jobgate_worker::{
    JobExecutionError, JobExecutor, JobHandler, JobQueue, RetryPolicy, WorkerRunner,
};

/// Handler that counts how often its body ran
#[derive(Debug)]
pub struct CountingHandler {
    job_class: String,
    performed: Arc<AtomicUsize>,
}

impl CountingHandler {
    pub fn new(job_class: &str) -> (Self, Arc<AtomicUsize>) {
        let performed = Arc::new(AtomicUsize::new(0));
        let handler = Self {
            job_class: job_class.to_string(),
            performed: performed.clone(),
        };
        (handler, performed)
    }
}

#[async_trait]
impl JobHandler for CountingHandler {
    fn job_class(&self) -> &str {
        &self.job_class
    }

    async fn perform(&self, _job: &JobRecord) -> Result<Option<Value>, JobExecutionError> {
        self.performed.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

/// Handler whose body always fails transiently
#[derive(Debug)]
pub struct FlakyHandler {
    job_class: String,
    performed: Arc<AtomicUsize>,
}

impl FlakyHandler {
    pub fn new(job_class: &str) -> (Self, Arc<AtomicUsize>) {
        let performed = Arc::new(AtomicUsize::new(0));
        let handler = Self {
            job_class: job_class.to_string(),
            performed: performed.clone(),
        };
        (handler, performed)
    }
}

#[async_trait]
impl JobHandler for FlakyHandler {
    fn job_class(&self) -> &str {
        &self.job_class
    }

    async fn perform(&self, _job: &JobRecord) -> Result<Option<Value>, JobExecutionError> {
        self.performed.fetch_add(1, Ordering::SeqCst);
        Err(JobExecutionError::Transient("upstream unavailable".to_string()))
    }
}

/// Retries become runnable immediately, so `work_off` can drive them.
pub fn immediate_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        base_delay_seconds: 0,
        max_delay_seconds: 0,
        jitter_seconds: 0,
    }
}

pub struct TestApp {
    pub store: Arc<MemoryJobStore>,
    pub locks: MemoryAdvisoryLock,
    pub queue: Arc<JobQueue>,
    pub executor: Arc<JobExecutor>,
    pub worker_config: WorkerConfig,
}

impl TestApp {
    pub fn new(registry: JobRegistry, handlers: Vec<Arc<dyn JobHandler>>) -> Self {
        Self::with_retry(registry, handlers, immediate_retry(5))
    }

    pub fn with_retry(
        registry: JobRegistry,
        handlers: Vec<Arc<dyn JobHandler>>,
        retry: RetryConfig,
    ) -> Self {
        let registry = Arc::new(registry);
        let store = Arc::new(MemoryJobStore::new());
        let locks = MemoryAdvisoryLock::new();

        let enqueue_guard = EnqueueGuard::new(
            registry.clone(),
            store.clone(),
            Arc::new(locks.clone()),
        );
        let execution_guard =
            ExecutionGuard::new(registry, store.clone(), Arc::new(locks.clone()));

        let queue = Arc::new(JobQueue::new(
            store.clone(),
            enqueue_guard,
            RetryPolicy::from_config(&retry),
        ));

        let mut executor = JobExecutor::new(execution_guard);
        for handler in handlers {
            executor.register(handler);
        }

        let worker_config = WorkerConfig {
            retry,
            ..WorkerConfig::default()
        };

        Self {
            store,
            locks,
            queue,
            executor: Arc::new(executor),
            worker_config,
        }
    }

    pub fn runner(&self) -> WorkerRunner {
        WorkerRunner::new(
            self.queue.clone(),
            self.executor.clone(),
            self.worker_config.clone(),
            "test-worker".to_string(),
        )
    }

    /// Enqueue and return whether the job was admitted
    pub async fn enqueue(&self, job_class: &str, arguments: Value) -> bool {
        self.queue
            .enqueue(NewJob::new(job_class, arguments))
            .await
            .expect("enqueue should not error")
            .is_admitted()
    }

    pub async fn count(&self, key: &str) -> i64 {
        self.store.key_stats(key).await.unwrap().total
    }
}
