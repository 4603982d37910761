//! Job and execution records.

pub mod execution;
pub mod model;
pub mod state;

pub use execution::{CAPACITY_EXCEEDED, ExecutionFailure, ExecutionRecord};
pub use model::{JobRecord, NewJob};
pub use state::JobState;
