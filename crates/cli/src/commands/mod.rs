//! CLI command implementations.

pub mod cart;
pub mod migrate;
pub mod notify;

use cartsync::Advisory;
use cartsync::config::ConfigError;
use cartsync::local::LocalStoreError;
use cartsync::remote::StoreError;
use cartsync::remote::postgres::create_pool;
use cartsync::{SyncConfig, SyncError};
use sqlx::PgPool;
use thiserror::Error;

/// Errors that can occur while running cart and notify commands.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database connection error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Remote store error: {0}")]
    Store(#[from] StoreError),

    #[error("Local store error: {0}")]
    Local(#[from] LocalStoreError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Unknown product: {0}")]
    UnknownProduct(String),

    #[error("Remote write failed: {0}")]
    RemoteWrite(Advisory),
}

/// Connect to the configured database.
async fn connect(config: &SyncConfig) -> Result<PgPool, CommandError> {
    let database_url = config.require_database_url()?;
    tracing::info!("Connecting to database...");
    Ok(create_pool(database_url).await?)
}
