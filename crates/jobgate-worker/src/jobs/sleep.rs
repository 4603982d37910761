//! A handler that holds a worker slot for a while.
//!
//! Useful for watching `perform_limit` in action from the CLI.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use jobgate_entity::job::JobRecord;

use crate::executor::{JobExecutionError, JobHandler};

/// Handles `sleep` jobs: `{"millis": 500}`
#[derive(Debug, Default)]
pub struct SleepJobHandler;

impl SleepJobHandler {
    fn duration(arguments: &Value) -> Result<Duration, JobExecutionError> {
        match arguments.get("millis") {
            None => Ok(Duration::ZERO),
            Some(value) => value.as_u64().map(Duration::from_millis).ok_or_else(|| {
                JobExecutionError::Permanent(format!(
                    "'millis' must be a non-negative integer, got {}",
                    value
                ))
            }),
        }
    }
}

#[async_trait]
impl JobHandler for SleepJobHandler {
    fn job_class(&self) -> &str {
        "sleep"
    }

    async fn perform(&self, job: &JobRecord) -> Result<Option<Value>, JobExecutionError> {
        let duration = Self::duration(&job.arguments)?;
        tokio::time::sleep(duration).await;
        Ok(Some(json!({ "slept_ms": duration.as_millis() as u64 })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_parsing() {
        assert_eq!(SleepJobHandler::duration(&json!({})).unwrap(), Duration::ZERO);
        assert_eq!(
            SleepJobHandler::duration(&json!({"millis": 250})).unwrap(),
            Duration::from_millis(250)
        );
        assert!(matches!(
            SleepJobHandler::duration(&json!({"millis": "soon"})),
            Err(JobExecutionError::Permanent(_))
        ));
    }
}
