//! Shared value types.

pub mod lock_key;

pub use lock_key::LockKey;
