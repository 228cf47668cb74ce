//! Engine configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required (remote backends only)
//! - `CARTSYNC_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//!
//! ## Optional
//! - `CARTSYNC_LOCAL_DIR` - Directory for device-local cart storage (default: .cartsync)
//! - `CARTSYNC_WRITE_ORDERING` - `per-key` or `unordered` (default: per-key)
//! - `CARTSYNC_PRODUCT_CACHE_TTL_SECS` - Product cache TTL (default: 300)
//! - `CARTSYNC_PRODUCT_CACHE_CAPACITY` - Product cache size (default: 1000)
//! - `CARTSYNC_NOTIFICATION_PERMISSION` - `granted`, `denied` or `unsupported` (default: granted)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use crate::mirror::WriteOrdering;
use crate::notifications::Permission;

const DEFAULT_LOCAL_DIR: &str = ".cartsync";
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_CACHE_CAPACITY: u64 = 1000;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Sync engine configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: Option<SecretString>,
    /// Directory backing the device-local store
    pub local_dir: PathBuf,
    /// How remote mirror writes are ordered
    pub write_ordering: WriteOrdering,
    /// Product catalog cache configuration
    pub product_cache: ProductCacheConfig,
    /// Permission reported by the log-based system notifier
    pub notification_permission: Permission,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// Product catalog cache configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductCacheConfig {
    pub time_to_live: Duration,
    pub max_capacity: u64,
}

impl Default for ProductCacheConfig {
    fn default() -> Self {
        Self {
            time_to_live: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            max_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            local_dir: PathBuf::from(DEFAULT_LOCAL_DIR),
            write_ordering: WriteOrdering::default(),
            product_cache: ProductCacheConfig::default(),
            notification_permission: Permission::Granted,
            sentry_dsn: None,
            sentry_environment: None,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("CARTSYNC_DATABASE_URL")
            .map(|url| validate_database_url(url, "CARTSYNC_DATABASE_URL"))
            .transpose()?;
        let local_dir = PathBuf::from(get_env_or_default("CARTSYNC_LOCAL_DIR", DEFAULT_LOCAL_DIR));
        let write_ordering = parse_env("CARTSYNC_WRITE_ORDERING", WriteOrdering::default())?;
        let product_cache = ProductCacheConfig::from_env()?;
        let notification_permission =
            parse_env("CARTSYNC_NOTIFICATION_PERMISSION", Permission::Granted)?;

        Ok(Self {
            database_url,
            local_dir,
            write_ordering,
            product_cache,
            notification_permission,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }

    /// The database URL, or an error naming the variable to set.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` when no URL was configured.
    pub fn require_database_url(&self) -> Result<&SecretString, ConfigError> {
        self.database_url
            .as_ref()
            .ok_or_else(|| ConfigError::MissingEnvVar("CARTSYNC_DATABASE_URL".to_string()))
    }
}

impl ProductCacheConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let ttl_secs = parse_env("CARTSYNC_PRODUCT_CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS)?;
        let max_capacity = parse_env("CARTSYNC_PRODUCT_CACHE_CAPACITY", DEFAULT_CACHE_CAPACITY)?;
        Ok(Self {
            time_to_live: Duration::from_secs(ttl_secs),
            max_capacity,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Option<SecretString> {
    std::env::var(primary_key)
        .or_else(|_| std::env::var("DATABASE_URL"))
        .ok()
        .map(SecretString::from)
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an optional environment variable, falling back to `default` when unset.
fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_optional_env(key).map_or(Ok(default), |raw| {
        raw.parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    })
}

/// Validate that a database URL points at `PostgreSQL`.
fn validate_database_url(url: SecretString, var_name: &str) -> Result<SecretString, ConfigError> {
    let value = url.expose_secret();
    if value.starts_with("postgres://") || value.starts_with("postgresql://") {
        Ok(url)
    } else {
        Err(ConfigError::InvalidEnvVar(
            var_name.to_string(),
            "must be a postgres:// or postgresql:// URL".to_string(),
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_database_url_accepts_postgres() {
        let url = SecretString::from("postgres://user:pw@localhost/cartsync");
        assert!(validate_database_url(url, "TEST_VAR").is_ok());

        let url = SecretString::from("postgresql://localhost/cartsync");
        assert!(validate_database_url(url, "TEST_VAR").is_ok());
    }

    #[test]
    fn test_validate_database_url_rejects_other_schemes() {
        let url = SecretString::from("mysql://localhost/cartsync");
        let err = validate_database_url(url, "TEST_VAR").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(_, _)));
    }

    #[test]
    fn test_parse_env_uses_default_when_unset() {
        let value: u64 = parse_env("CARTSYNC_TEST_SURELY_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_require_database_url_missing() {
        let config = SyncConfig::default();
        assert!(matches!(
            config.require_database_url(),
            Err(ConfigError::MissingEnvVar(_))
        ));
    }

    #[test]
    fn test_debug_redacts_database_url() {
        let config = SyncConfig {
            database_url: Some(SecretString::from("postgres://user:hunter2@db/cartsync")),
            ..SyncConfig::default()
        };
        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains("hunter2"));
    }

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.local_dir, PathBuf::from(".cartsync"));
        assert_eq!(config.write_ordering, WriteOrdering::PerKey);
        assert_eq!(config.product_cache.max_capacity, 1000);
        assert_eq!(config.product_cache.time_to_live, Duration::from_secs(300));
    }
}
