//! Background job processing for jobgate.
//!
//! This crate provides:
//! - A job queue that admits new jobs through the enqueue guard
//! - A job executor that gates each attempt on the execution guard and
//!   dispatches to the registered handler
//! - A worker runner that claims and executes jobs concurrently
//! - Retry scheduling, with capacity failures always retried
//! - Built-in `noop` and `sleep` handlers

pub mod executor;
pub mod jobs;
pub mod queue;
pub mod retry;
pub mod runner;

pub use executor::{JobExecutionError, JobExecutor, JobHandler};
pub use queue::JobQueue;
pub use retry::{RetryDecision, RetryPolicy};
pub use runner::{WorkOffSummary, WorkerRunner};
