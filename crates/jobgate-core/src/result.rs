//! Convenience result type alias for jobgate.

use crate::error::AppError;

/// A specialized `Result` type for jobgate operations.
pub type AppResult<T> = Result<T, AppError>;
