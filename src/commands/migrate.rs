//! Database migration command.

use jobgate_core::config::AppConfig;
use jobgate_core::error::AppError;
use jobgate_database::DatabasePool;

use crate::output;

/// Apply all pending migrations
pub async fn execute(config: &AppConfig) -> Result<(), AppError> {
    let db = DatabasePool::connect(&config.database).await?;

    println!("Running database migrations...");
    let applied = jobgate_database::migration::run_migrations(&db.handle()).await;
    db.close().await;
    applied?;
    output::print_success("All migrations applied successfully.");

    Ok(())
}
