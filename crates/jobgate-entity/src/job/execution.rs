//! Execution attempt records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::model::JobRecord;

/// Error kind of an attempt stopped by a perform limit before its body ran.
pub const CAPACITY_EXCEEDED: &str = "capacity_exceeded";

/// One execution attempt of a job, as stored in the `executions` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExecutionRecord {
    /// Unique execution identifier.
    pub id: Uuid,
    /// Parent job.
    pub job_id: Uuid,
    /// Job class of the parent job.
    pub job_class: String,
    /// Concurrency key inherited from the parent job.
    pub concurrency_key: Option<String>,
    /// 1-based attempt number.
    pub attempt: i32,
    /// When the attempt started.
    pub started_at: DateTime<Utc>,
    /// When the attempt finished.
    pub finished_at: Option<DateTime<Utc>>,
    /// Error message if the attempt failed.
    pub error: Option<String>,
    /// Machine-readable error kind if the attempt failed.
    pub error_kind: Option<String>,
}

impl ExecutionRecord {
    /// Start a new attempt for a job. The key is copied, never recomputed.
    pub fn begin(job: &JobRecord, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id: job.id,
            job_class: job.job_class.clone(),
            concurrency_key: job.concurrency_key.clone(),
            attempt: job.executions_count + 1,
            started_at: now,
            finished_at: None,
            error: None,
            error_kind: None,
        }
    }

    /// The concurrency key carried by this attempt.
    pub fn concurrency_key(&self) -> Option<&str> {
        self.concurrency_key.as_deref()
    }

    /// Whether the attempt is still running.
    pub fn is_running(&self) -> bool {
        self.finished_at.is_none()
    }

    /// Whether the attempt failed in the job itself.
    ///
    /// Capacity deferrals never ran the body and do not count.
    pub fn is_application_failure(&self) -> bool {
        self.error_kind
            .as_deref()
            .is_some_and(|kind| kind != CAPACITY_EXCEEDED)
    }
}

/// Terminal failure details recorded on an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    /// Machine-readable error kind, e.g. `capacity_exceeded`.
    pub kind: String,
    /// Human-readable error message.
    pub message: String,
}

impl ExecutionFailure {
    /// Create failure details.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::NewJob;

    #[test]
    fn test_begin_copies_key_and_numbers_attempts() {
        let mut new_job = NewJob::new("Report", serde_json::json!({}));
        new_job.concurrency_key = Some("report-2024-01-01".to_string());
        let mut job = new_job.into_record(Utc::now());

        let first = ExecutionRecord::begin(&job, Utc::now());
        assert_eq!(first.attempt, 1);
        assert_eq!(first.concurrency_key(), Some("report-2024-01-01"));
        assert!(first.is_running());

        job.executions_count = 1;
        let second = ExecutionRecord::begin(&job, Utc::now());
        assert_eq!(second.attempt, 2);
        assert_eq!(second.concurrency_key(), first.concurrency_key());
        assert_ne!(second.id, first.id);
    }

    #[test]
    fn test_capacity_deferrals_are_not_application_failures() {
        let job = NewJob::new("Report", serde_json::json!({})).into_record(Utc::now());
        let mut execution = ExecutionRecord::begin(&job, Utc::now());
        assert!(!execution.is_application_failure());

        execution.error_kind = Some(CAPACITY_EXCEEDED.to_string());
        assert!(!execution.is_application_failure());

        execution.error_kind = Some("transient".to_string());
        assert!(execution.is_application_failure());
    }
}
