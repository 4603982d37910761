//! Job executor: gates each attempt and dispatches to registered handlers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing;

use jobgate_concurrency::{ConcurrencyError, ExecutionGuard};
use jobgate_core::error::AppError;
use jobgate_entity::job::{CAPACITY_EXCEEDED, ExecutionRecord, JobRecord, NewJob};

/// Trait for job handler implementations
#[async_trait]
pub trait JobHandler: Send + Sync + std::fmt::Debug {
    /// The job class this handler performs
    fn job_class(&self) -> &str;

    /// Run the job body
    async fn perform(&self, job: &JobRecord) -> Result<Option<Value>, JobExecutionError>;
}

/// Error from job execution
#[derive(Debug, thiserror::Error)]
pub enum JobExecutionError {
    /// Permanent failure, do not retry
    #[error("Permanent job failure: {0}")]
    Permanent(String),

    /// Transient failure, may retry
    #[error("Transient job failure: {0}")]
    Transient(String),

    /// The perform limit for the job's key was reached; always retried
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(ConcurrencyError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] AppError),
}

impl JobExecutionError {
    /// Machine-readable kind recorded on the execution record.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Permanent(_) => "permanent",
            Self::Transient(_) => "transient",
            Self::CapacityExceeded(_) => CAPACITY_EXCEEDED,
            Self::Internal(_) => "internal",
        }
    }
}

impl From<ConcurrencyError> for JobExecutionError {
    fn from(err: ConcurrencyError) -> Self {
        match err {
            ConcurrencyError::App(e) => Self::Internal(e),
            err if err.is_capacity_exceeded() => Self::CapacityExceeded(err),
            err => Self::Transient(err.to_string()),
        }
    }
}

/// Dispatches jobs to the handler registered for their class
#[derive(Debug)]
pub struct JobExecutor {
    /// Registered job handlers by class
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    /// Perform-limit gate run before every pooled attempt
    guard: ExecutionGuard,
}

impl JobExecutor {
    /// Create a new job executor
    pub fn new(guard: ExecutionGuard) -> Self {
        Self {
            handlers: HashMap::new(),
            guard,
        }
    }

    /// Register a job handler
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        let job_class = handler.job_class().to_string();
        tracing::info!("Registered job handler for class '{}'", job_class);
        self.handlers.insert(job_class, handler);
    }

    /// Execute one attempt of a claimed job
    ///
    /// The body only runs if the execution guard lets the attempt proceed.
    pub async fn execute(
        &self,
        job: &JobRecord,
        execution: &ExecutionRecord,
    ) -> Result<Option<Value>, JobExecutionError> {
        let handler = self.handler(&job.job_class)?;

        self.guard.check(job, execution).await?;

        tracing::info!(
            job_id = %job.id,
            job_class = %job.job_class,
            concurrency_key = ?execution.concurrency_key(),
            attempt = execution.attempt,
            "Executing job"
        );

        handler.perform(job).await
    }

    /// Run a job body directly, outside the pool
    ///
    /// Nothing is stored and no concurrency limit applies.
    pub async fn perform_now(
        &self,
        job_class: &str,
        arguments: Value,
    ) -> Result<Option<Value>, JobExecutionError> {
        let handler = self.handler(job_class)?;
        let job = NewJob::new(job_class, arguments).into_record(Utc::now());

        tracing::debug!("Performing job '{}' inline", job_class);
        handler.perform(&job).await
    }

    /// Check if a handler is registered for a job class
    pub fn has_handler(&self, job_class: &str) -> bool {
        self.handlers.contains_key(job_class)
    }

    /// Get the list of registered job classes
    pub fn registered_classes(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    fn handler(&self, job_class: &str) -> Result<&Arc<dyn JobHandler>, JobExecutionError> {
        self.handlers.get(job_class).ok_or_else(|| {
            JobExecutionError::Permanent(format!(
                "No handler registered for job class '{}'",
                job_class
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_capacity_error_keeps_its_kind() {
        let err = JobExecutionError::from(ConcurrencyError::CapacityExceeded {
            key: "Alice".to_string(),
            limit: 0,
            executing: Some(0),
        });
        assert!(matches!(err, JobExecutionError::CapacityExceeded(_)));
        assert_eq!(err.kind(), "capacity_exceeded");
    }

    #[test]
    fn test_other_concurrency_errors_map() {
        let timeout = JobExecutionError::from(ConcurrencyError::LockTimeout {
            key: "Alice".to_string(),
            waited: Duration::from_secs(1),
        });
        assert_eq!(timeout.kind(), "transient");

        let app = JobExecutionError::from(ConcurrencyError::App(AppError::database("down")));
        assert_eq!(app.kind(), "internal");
    }

    #[derive(Debug)]
    struct Named(&'static str);

    #[async_trait]
    impl JobHandler for Named {
        fn job_class(&self) -> &str {
            self.0
        }

        async fn perform(&self, _job: &JobRecord) -> Result<Option<Value>, JobExecutionError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_registered_classes() {
        use jobgate_concurrency::JobRegistry;
        use jobgate_concurrency::lock::MemoryAdvisoryLock;
        use jobgate_concurrency::store::MemoryJobStore;

        let guard = ExecutionGuard::new(
            Arc::new(JobRegistry::new()),
            Arc::new(MemoryJobStore::new()),
            Arc::new(MemoryAdvisoryLock::new()),
        );
        let mut executor = JobExecutor::new(guard);
        executor.register(Arc::new(Named("noop")));
        executor.register(Arc::new(Named("sleep")));

        assert!(executor.has_handler("noop"));
        assert!(!executor.has_handler("Render"));
        let mut classes = executor.registered_classes();
        classes.sort();
        assert_eq!(classes, vec!["noop".to_string(), "sleep".to_string()]);

        let err = executor.perform_now("Render", serde_json::json!({})).await.unwrap_err();
        assert_eq!(err.kind(), "permanent");
    }
}
