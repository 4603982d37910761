//! CLI command definitions and dispatch.

pub mod enqueue;
pub mod migrate;
pub mod status;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use jobgate_concurrency::lock::PgAdvisoryLock;
use jobgate_concurrency::store::PgJobStore;
use jobgate_concurrency::{
    AdvisoryLockCoordinator, EnqueueGuard, ExecutionGuard, JobRegistry, JobStore,
};
use jobgate_core::config::AppConfig;
use jobgate_core::error::AppError;
use jobgate_database::DatabasePool;
use jobgate_worker::jobs::{NoopJobHandler, SleepJobHandler};
use jobgate_worker::{JobExecutor, JobQueue, RetryPolicy};

use crate::output::OutputFormat;

/// jobgate: per-key concurrency limits for background jobs
#[derive(Debug, Parser)]
#[command(name = "jobgate", version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Run a worker pool until interrupted
    Worker(worker::WorkerArgs),
    /// Enqueue a job through its concurrency policy
    Enqueue(enqueue::EnqueueArgs),
    /// Show unfinished jobs for a concurrency key
    Status(status::StatusArgs),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self, config: AppConfig) -> Result<(), AppError> {
        match &self.command {
            Commands::Migrate => migrate::execute(&config).await,
            Commands::Worker(args) => worker::execute(args, config).await,
            Commands::Enqueue(args) => enqueue::execute(args, &config, self.format).await,
            Commands::Status(args) => status::execute(args, &config, self.format).await,
        }
    }
}

/// Queue, executor, and store wired against PostgreSQL
pub struct Services {
    /// Connection pool; also the session pool for advisory locks
    pub db: DatabasePool,
    /// Policies by job class
    pub registry: Arc<JobRegistry>,
    /// Admission and bookkeeping
    pub queue: Arc<JobQueue>,
    /// Guarded dispatch to handlers
    pub executor: Arc<JobExecutor>,
}

/// Helper: build the queue and executor from config
pub async fn build_services(config: &AppConfig) -> Result<Services, AppError> {
    let db = DatabasePool::connect(&config.database).await?;
    let pool = db.handle();

    let registry = Arc::new(JobRegistry::from_config(&config.concurrency));
    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));
    let locks: Arc<dyn AdvisoryLockCoordinator> = Arc::new(PgAdvisoryLock::new(
        pool,
        Duration::from_millis(config.concurrency.lock_poll_interval_ms),
    ));

    let enqueue_guard = EnqueueGuard::new(registry.clone(), store.clone(), locks.clone())
        .with_lock_timeout(Duration::from_millis(
            config.concurrency.enqueue_lock_timeout_ms,
        ));
    let execution_guard = ExecutionGuard::new(registry.clone(), store.clone(), locks);

    let queue = Arc::new(JobQueue::new(
        store,
        enqueue_guard,
        RetryPolicy::from_config(&config.worker.retry),
    ));

    let mut executor = JobExecutor::new(execution_guard);
    executor.register(Arc::new(NoopJobHandler));
    executor.register(Arc::new(SleepJobHandler));

    Ok(Services {
        db,
        registry,
        queue,
        executor: Arc::new(executor),
    })
}
