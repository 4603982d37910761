//! Mapping of arbitrary strings onto the 64-bit advisory lock namespace.
//!
//! PostgreSQL advisory locks are identified by a single `bigint`. Concurrency
//! keys and job ids are arbitrary strings, so they are hashed with SHA-256 and
//! the first eight bytes are read as a big-endian `i64`. Two distinct strings
//! can collide, in which case they merely serialize against each other; the
//! probability is about 2^-64 per pair and is accepted.
//!
//! Keys are namespaced by purpose so that a concurrency key can never share a
//! lock with a job claim.

use std::fmt;

use sha2::{Digest, Sha256};
use uuid::Uuid;

const CONCURRENCY_NAMESPACE: &str = "jobgate:concurrency:";
const JOB_NAMESPACE: &str = "jobgate:job:";

/// A 64-bit advisory lock identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockKey(i64);

impl LockKey {
    /// Hash an arbitrary string into a lock key.
    pub fn hash(input: &str) -> Self {
        let digest = Sha256::digest(input.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        Self(i64::from_be_bytes(bytes))
    }

    /// Lock key guarding admission and execution checks for a concurrency key.
    pub fn for_concurrency_key(key: &str) -> Self {
        Self::hash(&format!("{CONCURRENCY_NAMESPACE}{key}"))
    }

    /// Lock key a worker holds while a job is claimed for execution.
    pub fn for_job(job_id: Uuid) -> Self {
        Self::hash(&format!("{JOB_NAMESPACE}{job_id}"))
    }

    /// Wrap a raw lock id, e.g. one read back from the database.
    pub fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// The raw `bigint` value passed to the advisory lock functions.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
