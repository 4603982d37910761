//! # jobgate-entity
//!
//! Persisted models for jobgate. Every struct in this crate represents a
//! database table row or the data needed to create one. Row types derive
//! `sqlx::FromRow` in addition to `Serialize`/`Deserialize`.

pub mod job;
