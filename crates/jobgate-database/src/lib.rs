//! # jobgate-database
//!
//! PostgreSQL connection management, migrations, and the repositories for
//! job and execution records.

pub mod connection;
pub mod migration;
pub mod repositories;

pub use connection::DatabasePool;
