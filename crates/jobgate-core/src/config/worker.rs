//! Background worker configuration.

use serde::{Deserialize, Serialize};

/// Background job worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Whether the worker is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Number of concurrent job processing tasks.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Interval in seconds between job queue polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Queues to poll, in priority order.
    #[serde(default = "default_queues")]
    pub queues: Vec<String>,
    /// Retry behaviour for failed executions.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry and backoff settings for failed executions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts for application failures.
    ///
    /// Capacity failures are retried regardless of this value.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Constant added to the polynomial backoff, in seconds.
    #[serde(default = "default_base_delay")]
    pub base_delay_seconds: u64,
    /// Upper bound of the backoff delay, in seconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_seconds: u64,
    /// Upper bound of the random delay added to each retry, in seconds.
    #[serde(default = "default_jitter")]
    pub jitter_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            concurrency: default_concurrency(),
            poll_interval_seconds: default_poll_interval(),
            queues: default_queues(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_seconds: default_base_delay(),
            max_delay_seconds: default_max_delay(),
            jitter_seconds: default_jitter(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    4
}

fn default_poll_interval() -> u64 {
    5
}

fn default_queues() -> Vec<String> {
    vec!["default".to_string()]
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay() -> u64 {
    2
}

fn default_max_delay() -> u64 {
    3600
}

fn default_jitter() -> u64 {
    5
}
