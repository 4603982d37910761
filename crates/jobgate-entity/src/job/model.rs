//! Job record model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use jobgate_core::types::LockKey;

use super::state::JobState;

/// One logical job, as stored in the `jobs` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobRecord {
    /// Unique job identifier.
    pub id: Uuid,
    /// Job class name used for handler dispatch and policy lookup.
    pub job_class: String,
    /// Queue name.
    pub queue: String,
    /// Serialized job arguments.
    pub arguments: serde_json::Value,
    /// Concurrency key computed once at enqueue time.
    pub concurrency_key: Option<String>,
    /// Advisory lock id a worker holds while the job is claimed.
    pub lock_id: i64,
    /// Earliest time the job may run (None = immediately).
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Number of execution attempts started so far.
    pub executions_count: i32,
    /// When the job finished (successfully or by being discarded).
    pub finished_at: Option<DateTime<Utc>>,
    /// When the job was discarded after a failure.
    pub discarded_at: Option<DateTime<Utc>>,
    /// Last error message.
    pub error: Option<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// The persisted concurrency key, if any.
    pub fn concurrency_key(&self) -> Option<&str> {
        self.concurrency_key.as_deref()
    }

    /// Whether the job has reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// The advisory lock key guarding claims of this job.
    pub fn lock_key(&self) -> LockKey {
        LockKey::from_raw(self.lock_id)
    }

    /// Derive the job state. `locked` reports whether a worker holds the claim lock.
    pub fn state(&self, locked: bool, now: DateTime<Utc>) -> JobState {
        if self.discarded_at.is_some() {
            JobState::Discarded
        } else if self.finished_at.is_some() {
            JobState::Succeeded
        } else if locked {
            JobState::Running
        } else if self.scheduled_at.is_some_and(|at| at > now) {
            if self.executions_count > 0 {
                JobState::Retried
            } else {
                JobState::Scheduled
            }
        } else {
            JobState::Queued
        }
    }
}

/// Data required to insert a new job.
///
/// The id is assigned before admission so that rejection logs can name it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    /// Job identifier.
    pub id: Uuid,
    /// Job class name.
    pub job_class: String,
    /// Queue name.
    pub queue: String,
    /// Serialized job arguments.
    pub arguments: serde_json::Value,
    /// Concurrency key, filled in by admission.
    pub concurrency_key: Option<String>,
    /// Earliest time the job may run.
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl NewJob {
    /// Create a job for the default queue with a fresh id.
    pub fn new(job_class: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_class: job_class.into(),
            queue: "default".to_string(),
            arguments,
            concurrency_key: None,
            scheduled_at: None,
        }
    }

    /// Set the queue name.
    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Delay the job until the given time.
    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// The lock id stored on the row.
    pub fn lock_key(&self) -> LockKey {
        LockKey::for_job(self.id)
    }

    /// Build the record as it looks right after insertion.
    pub fn into_record(self, now: DateTime<Utc>) -> JobRecord {
        let lock_id = self.lock_key().as_i64();
        JobRecord {
            id: self.id,
            job_class: self.job_class,
            queue: self.queue,
            arguments: self.arguments,
            concurrency_key: self.concurrency_key,
            lock_id,
            scheduled_at: self.scheduled_at,
            executions_count: 0,
            finished_at: None,
            discarded_at: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}
