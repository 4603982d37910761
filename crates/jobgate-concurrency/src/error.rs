//! Concurrency control errors.

use std::time::Duration;

use jobgate_core::error::AppError;
use jobgate_entity::job::CAPACITY_EXCEEDED;

/// Errors raised by key resolution, admission, and execution checks.
///
/// Enqueue rejection is not an error: it is [`crate::Admission::Rejected`].
#[derive(Debug, thiserror::Error)]
pub enum ConcurrencyError {
    /// The key function returned something other than a string or null.
    #[error("concurrency key for '{job_class}' must be a string or null, got {type_name}")]
    KeyType {
        /// Job class whose key function misbehaved.
        job_class: String,
        /// JSON type name of the returned value.
        type_name: &'static str,
    },

    /// The enqueue-time advisory lock was not acquired in time.
    #[error("timed out after {waited:?} waiting for the concurrency lock on key '{key}'")]
    LockTimeout {
        /// Concurrency key being locked.
        key: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// The perform limit was reached (or could not be checked) at execution time.
    #[error("perform limit of {limit} reached for concurrency key '{key}'")]
    CapacityExceeded {
        /// Concurrency key at capacity.
        key: String,
        /// Configured perform limit.
        limit: u32,
        /// Executing jobs observed, or `None` when the key lock was busy.
        executing: Option<i64>,
    },

    /// Store or lock backend failure.
    #[error(transparent)]
    App(#[from] AppError),
}

impl ConcurrencyError {
    /// Machine-readable kind recorded on failed executions.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::KeyType { .. } => "key_type",
            Self::LockTimeout { .. } => "lock_timeout",
            Self::CapacityExceeded { .. } => CAPACITY_EXCEEDED,
            Self::App(_) => "internal",
        }
    }

    /// Whether this is a capacity failure, which is always retried.
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }
}
