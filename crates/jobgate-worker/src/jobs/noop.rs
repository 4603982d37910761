//! A handler that does nothing, for smoke tests and benchmarks.

use async_trait::async_trait;
use serde_json::Value;

use jobgate_entity::job::JobRecord;

use crate::executor::{JobExecutionError, JobHandler};

/// Handles `noop` jobs by returning their arguments
#[derive(Debug, Default)]
pub struct NoopJobHandler;

#[async_trait]
impl JobHandler for NoopJobHandler {
    fn job_class(&self) -> &str {
        "noop"
    }

    async fn perform(&self, job: &JobRecord) -> Result<Option<Value>, JobExecutionError> {
        tracing::debug!("noop job {} performed", job.id);
        Ok(Some(job.arguments.clone()))
    }
}
