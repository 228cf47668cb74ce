//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! cartsync migrate
//! ```
//!
//! # Environment Variables
//!
//! - `CARTSYNC_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//!
//! # Migration Files
//!
//! Migrations live in `crates/sync/migrations/` and are embedded at build time:
//! ```text
//! migrations/
//! ├── 20261019000001_create_products.sql
//! ├── 20261019000002_create_cart_lines.sql
//! └── 20261019000003_create_notifications.sql
//! ```

use cartsync::SyncConfig;
use cartsync::config::ConfigError;
use cartsync::remote::postgres::{MIGRATOR, create_pool};
use thiserror::Error;

/// Errors that can occur while migrating.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Run every pending migration.
pub async fn run(config: &SyncConfig) -> Result<(), MigrationError> {
    let database_url = config.require_database_url()?;

    tracing::info!("Connecting to database...");
    let pool = create_pool(database_url).await?;

    tracing::info!("Running migrations...");
    MIGRATOR.run(&pool).await?;

    tracing::info!("Migrations complete!");

    #[allow(clippy::print_stdout)]
    {
        println!("Schema up to date ({} migrations)", MIGRATOR.iter().count());
    }

    Ok(())
}
