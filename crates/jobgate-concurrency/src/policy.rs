//! Per-job-type limit configuration.
//!
//! A [`LimitPolicy`] holds up to three independent limit functions and the
//! key function. Each is an explicit function of a [`JobContext`], so every
//! job instance is evaluated against its own arguments.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The job instance a policy is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct JobContext<'a> {
    /// Job class name.
    pub job_class: &'a str,
    /// Job id, when one has been assigned.
    pub job_id: Option<Uuid>,
    /// Bound job arguments.
    pub arguments: &'a Value,
}

impl<'a> JobContext<'a> {
    /// Create a context for a job instance.
    pub fn new(job_class: &'a str, job_id: Option<Uuid>, arguments: &'a Value) -> Self {
        Self {
            job_class,
            job_id,
            arguments,
        }
    }

    /// Look up a top-level argument by name.
    pub fn argument(&self, name: &str) -> Option<&'a Value> {
        self.arguments.get(name)
    }
}

/// A limit evaluated per job instance.
pub type LimitFn = Arc<dyn Fn(&JobContext<'_>) -> u32 + Send + Sync>;

/// A key function evaluated per job instance. Must return a string or null.
pub type KeyFn = Arc<dyn Fn(&JobContext<'_>) -> Value + Send + Sync>;

/// Which limit a decision was made against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    /// Queued (not executing) jobs sharing a key.
    EnqueueLimit,
    /// Unfinished jobs sharing a key.
    TotalLimit,
    /// Executing jobs sharing a key.
    PerformLimit,
}

impl LimitKind {
    /// Return the limit name as used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnqueueLimit => "enqueue_limit",
            Self::TotalLimit => "total_limit",
            Self::PerformLimit => "perform_limit",
        }
    }
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Concurrency limits attached to a job type.
///
/// An absent limit means unlimited for that dimension. When no key function
/// is set but some limit is, the job class name is the key.
#[derive(Clone, Default)]
pub struct LimitPolicy {
    enqueue_limit: Option<LimitFn>,
    total_limit: Option<LimitFn>,
    perform_limit: Option<LimitFn>,
    key: Option<KeyFn>,
}

impl LimitPolicy {
    /// Create an empty policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap queued jobs per key at a constant.
    pub fn enqueue_limit(self, limit: u32) -> Self {
        self.enqueue_limit_with(move |_| limit)
    }

    /// Cap queued jobs per key with a per-instance function.
    pub fn enqueue_limit_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&JobContext<'_>) -> u32 + Send + Sync + 'static,
    {
        self.enqueue_limit = Some(Arc::new(f));
        self
    }

    /// Cap unfinished jobs per key at a constant.
    pub fn total_limit(self, limit: u32) -> Self {
        self.total_limit_with(move |_| limit)
    }

    /// Cap unfinished jobs per key with a per-instance function.
    pub fn total_limit_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&JobContext<'_>) -> u32 + Send + Sync + 'static,
    {
        self.total_limit = Some(Arc::new(f));
        self
    }

    /// Cap executing jobs per key at a constant.
    pub fn perform_limit(self, limit: u32) -> Self {
        self.perform_limit_with(move |_| limit)
    }

    /// Cap executing jobs per key with a per-instance function.
    pub fn perform_limit_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&JobContext<'_>) -> u32 + Send + Sync + 'static,
    {
        self.perform_limit = Some(Arc::new(f));
        self
    }

    /// Compute the concurrency key with a per-instance function.
    pub fn key_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&JobContext<'_>) -> Value + Send + Sync + 'static,
    {
        self.key = Some(Arc::new(f));
        self
    }

    /// Use the value of a top-level argument as the key.
    ///
    /// A missing argument yields no key.
    pub fn key_argument(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.key_with(move |ctx| ctx.argument(&name).cloned().unwrap_or(Value::Null))
    }

    /// Use the same literal key for every instance.
    pub fn key_literal(self, key: impl Into<String>) -> Self {
        let key = Value::String(key.into());
        self.key_with(move |_| key.clone())
    }

    /// Whether any limit is configured.
    pub fn has_limits(&self) -> bool {
        self.enqueue_limit.is_some() || self.total_limit.is_some() || self.perform_limit.is_some()
    }

    /// Whether an admission-time limit is configured.
    pub fn has_admission_limits(&self) -> bool {
        self.enqueue_limit.is_some() || self.total_limit.is_some()
    }

    /// The key function, if set.
    pub fn key_fn(&self) -> Option<&KeyFn> {
        self.key.as_ref()
    }

    /// Evaluate a limit for a job instance. `None` means unlimited.
    pub fn limit(&self, kind: LimitKind, ctx: &JobContext<'_>) -> Option<u32> {
        let f = match kind {
            LimitKind::EnqueueLimit => self.enqueue_limit.as_ref(),
            LimitKind::TotalLimit => self.total_limit.as_ref(),
            LimitKind::PerformLimit => self.perform_limit.as_ref(),
        };
        f.map(|f| f(ctx))
    }
}

impl fmt::Debug for LimitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimitPolicy")
            .field("enqueue_limit", &self.enqueue_limit.is_some())
            .field("total_limit", &self.total_limit.is_some())
            .field("perform_limit", &self.perform_limit.is_some())
            .field("key", &self.key.is_some())
            .finish()
    }
}
