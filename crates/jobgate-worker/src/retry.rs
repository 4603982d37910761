//! Retry scheduling for failed executions.

use chrono::{DateTime, Duration, Utc};

use jobgate_core::config::RetryConfig;

use crate::executor::JobExecutionError;

/// What to do with a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Run the same job again at the given time.
    Retry(DateTime<Utc>),
    /// Give up on the job.
    Discard,
}

/// Polynomial backoff: `attempt^4 + base` seconds, capped at `max`, plus
/// up to `jitter` random seconds.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay_seconds: u64,
    max_delay_seconds: u64,
    jitter_seconds: u64,
}

impl RetryPolicy {
    /// Build a policy from configuration.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay_seconds: config.base_delay_seconds,
            max_delay_seconds: config.max_delay_seconds,
            jitter_seconds: config.jitter_seconds,
        }
    }

    /// Delay before the retry that follows `attempt`, without jitter.
    pub fn backoff(&self, attempt: i64) -> Duration {
        let attempt = attempt.max(0).unsigned_abs();
        let seconds = attempt
            .saturating_pow(4)
            .saturating_add(self.base_delay_seconds)
            .min(self.max_delay_seconds);
        Duration::seconds(i64::try_from(seconds).unwrap_or(i64::MAX))
    }

    fn jitter(&self) -> Duration {
        if self.jitter_seconds == 0 {
            return Duration::zero();
        }
        let seconds = rand::random_range(0..=self.jitter_seconds);
        Duration::seconds(i64::try_from(seconds).unwrap_or(i64::MAX))
    }

    /// Decide how to follow up on a failure.
    ///
    /// `attempt` numbers the failure within its budget: every attempt for
    /// capacity failures, application failures only for everything else.
    /// Capacity failures are retried regardless of `max_attempts`.
    pub fn decide(
        &self,
        error: &JobExecutionError,
        attempt: i64,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        let retry = || RetryDecision::Retry(now + self.backoff(attempt) + self.jitter());
        match error {
            JobExecutionError::CapacityExceeded(_) => retry(),
            JobExecutionError::Transient(_) if attempt < i64::from(self.max_attempts) => retry(),
            JobExecutionError::Transient(_)
            | JobExecutionError::Permanent(_)
            | JobExecutionError::Internal(_) => RetryDecision::Discard,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
