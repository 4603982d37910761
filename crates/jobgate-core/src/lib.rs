//! # jobgate-core
//!
//! Core crate for jobgate. Contains configuration schemas, the unified
//! error system, and the lock key type shared by the advisory lock
//! backends and the job store.
//!
//! This crate has **no** internal dependencies on other jobgate crates.

pub mod config;
pub mod error;
pub mod result;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
