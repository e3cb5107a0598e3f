//! Database Migrations
//!
//! Embedded refinery migrations for tokio-postgres.

use anyhow::{Context, Result};
use deadpool_postgres::Pool;

refinery::embed_migrations!("migrations");

/// Run all pending migrations
pub async fn run_migrations(pool: &Pool) -> Result<()> {
    tracing::info!("Running database migrations...");

    let mut client = pool
        .get()
        .await
        .context("Failed to get connection for migrations")?;

    let report = migrations::runner()
        .run_async(&mut **client)
        .await
        .context("Failed to apply migrations")?;

    for migration in report.applied_migrations() {
        tracing::info!(version = migration.version(), name = migration.name(), "Applied migration");
    }

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
