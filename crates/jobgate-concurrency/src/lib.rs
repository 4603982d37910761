//! Per-key concurrency control for background jobs.
//!
//! This crate decides, for jobs sharing a *concurrency key*:
//! - at enqueue time, whether a new job may be inserted
//!   ([`EnqueueGuard`], `enqueue_limit` / `total_limit`)
//! - right before the job body runs, whether it may start
//!   ([`ExecutionGuard`], `perform_limit`)
//!
//! Both decisions are check-then-act sequences over a shared store. They are
//! serialized per key with a session-scoped advisory lock
//! ([`AdvisoryLockCoordinator`]) so that concurrent processes cannot both
//! observe spare capacity and both act on it.
//!
//! Two backends are provided for the lock and the job store:
//! - PostgreSQL (for multi-process deployments)
//! - In-memory (for tests and single-process use)

pub mod enqueue;
pub mod error;
pub mod execution;
pub mod key;
pub mod lock;
pub mod policy;
pub mod registry;
pub mod store;

pub use enqueue::{Admission, EnqueueGuard, Rejection};
pub use error::ConcurrencyError;
pub use execution::{ExecutionDecision, ExecutionGuard};
pub use key::resolve_key;
pub use lock::{AdvisoryLockCoordinator, LockHandle, LockWait};
pub use policy::{JobContext, LimitKind, LimitPolicy};
pub use registry::{JobRegistry, JobType};
pub use store::{ClaimedJob, JobStore, KeyStats};
