//! Built-in job handler implementations.

pub mod noop;
pub mod sleep;

pub use noop::NoopJobHandler;
pub use sleep::SleepJobHandler;
