//! Concurrency control configuration.

use serde::{Deserialize, Serialize};

/// Concurrency control settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// How long an enqueue waits for the per-key advisory lock, in milliseconds.
    #[serde(default = "default_enqueue_lock_timeout")]
    pub enqueue_lock_timeout_ms: u64,
    /// Interval between advisory lock attempts while waiting, in milliseconds.
    #[serde(default = "default_lock_poll_interval")]
    pub lock_poll_interval_ms: u64,
    /// Policies declared in configuration rather than code.
    #[serde(default)]
    pub policies: Vec<PolicyConfig>,
}

/// A concurrency policy declared in configuration.
///
/// Limits are constants here; code-registered policies may compute them per
/// job instance instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Job class the policy is attached to.
    pub job_class: String,
    /// Parent job class whose policy applies when this one has none.
    #[serde(default)]
    pub extends: Option<String>,
    /// Top-level argument whose value becomes the concurrency key.
    #[serde(default)]
    pub key_argument: Option<String>,
    /// Literal concurrency key shared by every instance.
    #[serde(default)]
    pub key: Option<String>,
    /// Cap on queued (not executing) jobs sharing a key.
    #[serde(default)]
    pub enqueue_limit: Option<u32>,
    /// Cap on unfinished jobs sharing a key.
    #[serde(default)]
    pub total_limit: Option<u32>,
    /// Cap on executing jobs sharing a key.
    #[serde(default)]
    pub perform_limit: Option<u32>,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            enqueue_lock_timeout_ms: default_enqueue_lock_timeout(),
            lock_poll_interval_ms: default_lock_poll_interval(),
            policies: Vec::new(),
        }
    }
}

fn default_enqueue_lock_timeout() -> u64 {
    10_000
}

fn default_lock_poll_interval() -> u64 {
    25
}
