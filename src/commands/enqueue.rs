//! Enqueue command.

use clap::Args;
use serde_json::Value;

use jobgate_concurrency::{Admission, ConcurrencyError};
use jobgate_core::config::AppConfig;
use jobgate_core::error::{AppError, ErrorKind};
use jobgate_entity::job::NewJob;

use crate::output::{self, OutputFormat};

/// Arguments for the enqueue command
#[derive(Debug, Args)]
pub struct EnqueueArgs {
    /// Job class
    pub job_class: String,

    /// Job arguments as a JSON object
    #[arg(short, long, default_value = "{}")]
    pub args: String,

    /// Queue name
    #[arg(short, long, default_value = "default")]
    pub queue: String,
}

/// Enqueue one job and report whether it was admitted
pub async fn execute(
    args: &EnqueueArgs,
    config: &AppConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    let arguments: Value = serde_json::from_str(&args.args)
        .map_err(|e| AppError::validation(format!("Invalid JSON arguments: {}", e)))?;

    let services = super::build_services(config).await?;
    if !services.executor.has_handler(&args.job_class) {
        output::print_warning(&format!(
            "No built-in handler for '{}'; the job waits for a worker that has one",
            args.job_class
        ));
    }
    let job = NewJob::new(&args.job_class, arguments).on_queue(&args.queue);

    let admission = services.queue.enqueue(job).await;
    services.db.close().await;
    let admission = admission.map_err(concurrency_error)?;

    match (&admission, format) {
        (Admission::Admitted(job), OutputFormat::Json) => output::print_json(job),
        (Admission::Rejected(rejection), OutputFormat::Json) => output::print_json(rejection),
        (Admission::Admitted(job), OutputFormat::Table) => {
            output::print_success(&format!("Enqueued {} ({})", job.job_class, job.id));
            output::print_kv(
                "Concurrency key",
                job.concurrency_key().unwrap_or("(none)"),
            );
        }
        (Admission::Rejected(rejection), OutputFormat::Table) => {
            output::print_warning(&rejection.to_string());
        }
    }

    Ok(())
}

fn concurrency_error(err: ConcurrencyError) -> AppError {
    match err {
        ConcurrencyError::App(e) => e,
        ConcurrencyError::KeyType { .. } => AppError::new(ErrorKind::Validation, err.to_string()),
        other => AppError::new(ErrorKind::Conflict, other.to_string()),
    }
}
