//! Repository implementations for jobgate records.

pub mod execution;
pub mod job;

pub use execution::ExecutionRepository;
pub use job::{JobRepository, LockScope};
