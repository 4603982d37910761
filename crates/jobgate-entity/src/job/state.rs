//! Derived job state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a job, derived from its timestamps and claim lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting for its first run at a future time.
    Scheduled,
    /// Waiting for a retry at a future time.
    Retried,
    /// Ready to be claimed.
    Queued,
    /// Claimed by a worker.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Finished by being discarded.
    Discarded,
}

impl JobState {
    /// Return the state as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Retried => "retried",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Discarded => "discarded",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
