//! Worker pool command.

use clap::Args;
use tokio::sync::watch;

use jobgate_core::config::AppConfig;
use jobgate_core::error::AppError;
use jobgate_worker::WorkerRunner;

/// Arguments for the worker command
#[derive(Debug, Args)]
pub struct WorkerArgs {
    /// Override the number of concurrent jobs
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Override the queues to poll (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub queues: Option<Vec<String>>,
}

/// Run the worker until Ctrl-C
pub async fn execute(args: &WorkerArgs, config: AppConfig) -> Result<(), AppError> {
    let mut worker_config = config.worker.clone();
    if let Some(concurrency) = args.concurrency {
        worker_config.concurrency = concurrency;
    }
    if let Some(queues) = &args.queues {
        worker_config.queues = queues.clone();
    }

    if !worker_config.enabled {
        tracing::warn!("Worker is disabled in configuration");
        return Ok(());
    }

    let services = super::build_services(&config).await?;
    let mut handlers = services.executor.registered_classes();
    handlers.sort();
    let mut policies = services.registry.job_classes();
    policies.sort();
    tracing::info!(?handlers, ?policies, "Worker services ready");

    let worker_id = format!("worker-{}", &uuid::Uuid::new_v4().to_string()[..8]);
    let runner = WorkerRunner::new(services.queue, services.executor, worker_config, worker_id);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        runner.run(shutdown_rx).await;
    });

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| AppError::internal(format!("Failed to listen for Ctrl-C: {}", e)))?;
    tracing::info!("Shutdown requested");
    let _ = shutdown_tx.send(true);

    let joined = handle.await;
    services.db.close().await;
    joined.map_err(|e| AppError::internal(format!("Worker task failed: {}", e)))?;
    Ok(())
}
