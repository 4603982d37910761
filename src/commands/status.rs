//! Per-key status command.

use chrono::Utc;
use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use jobgate_core::config::AppConfig;
use jobgate_core::error::AppError;

use crate::output::{self, OutputFormat};

/// Arguments for the status command
#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Concurrency key
    pub key: String,
}

/// One unfinished job in the status table
#[derive(Debug, Serialize, Tabled)]
struct JobRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Class")]
    job_class: String,
    #[tabled(rename = "Queue")]
    queue: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Attempts")]
    attempts: i32,
    #[tabled(rename = "Created")]
    created_at: String,
}

/// Show counts and unfinished jobs for a key
pub async fn execute(
    args: &StatusArgs,
    config: &AppConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    let services = super::build_services(config).await?;
    let store = services.queue.store();

    let stats = store.key_stats(&args.key).await?;
    let now = Utc::now();
    let rows: Vec<JobRow> = store
        .list_unfinished(&args.key)
        .await?
        .into_iter()
        .map(|(job, locked)| JobRow {
            id: job.id.to_string(),
            state: job.state(locked, now).to_string(),
            attempts: job.executions_count,
            created_at: job.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            job_class: job.job_class,
            queue: job.queue,
        })
        .collect();

    match format {
        OutputFormat::Table => {
            println!("Concurrency key '{}':", args.key);
            output::print_kv("Queued", &stats.queued.to_string());
            output::print_kv("Executing", &stats.executing.to_string());
            output::print_kv("Total", &stats.total.to_string());
            println!();
            output::print_list(&rows, format);
        }
        OutputFormat::Json => output::print_json(&serde_json::json!({
            "key": args.key,
            "stats": stats,
            "jobs": rows,
        })),
    }

    Ok(())
}
