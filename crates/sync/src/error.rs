//! Unified error handling with Sentry integration.
//!
//! Remote failures on the mutation path never reach callers as `Err`: they are
//! captured to Sentry, logged, and published as non-blocking [`Advisory`]
//! values. Operations that genuinely need an answer (sending a notification,
//! CLI commands) return [`SyncError`].

use thiserror::Error;

use crate::config::ConfigError;
use crate::local::LocalStoreError;
use crate::notifications::NotifierError;
use crate::remote::StoreError;

/// Top-level error type for fallible engine operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Remote store operation failed.
    #[error("Remote store error: {0}")]
    Store(#[from] StoreError),

    /// Device-local storage failed.
    #[error("Local store error: {0}")]
    Local(#[from] LocalStoreError),

    /// Configuration was missing or invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The system notification surface failed.
    #[error("Notifier error: {0}")]
    Notifier(#[from] NotifierError),

    /// The operation needs an attached account.
    #[error("No account attached")]
    NoAccount,
}

/// Result type alias for `SyncError`.
pub type Result<T> = std::result::Result<T, SyncError>;

/// A non-blocking, user-facing report of a failed background operation.
///
/// The local state that triggered the operation has already been applied and
/// stays applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advisory {
    /// Short operation name, e.g. `cart.upsert_line`.
    pub operation: &'static str,
    /// Human-readable description of what failed.
    pub message: String,
}

impl std::fmt::Display for Advisory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.operation, self.message)
    }
}

/// Capture an error to Sentry and log it, returning the advisory to publish.
pub fn report_failure(operation: &'static str, error: &(dyn std::error::Error + 'static)) -> Advisory {
    let event_id = sentry::capture_error(error);
    tracing::warn!(
        operation,
        error = %error,
        sentry_event_id = %event_id,
        "Background sync operation failed"
    );

    Advisory {
        operation,
        message: error.to_string(),
    }
}

/// Set the Sentry user context from an account ID.
///
/// Call this when an account is attached to associate errors with it.
pub fn set_sentry_user(account_id: &impl ToString) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(account_id.to_string()),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Call this when the account detaches to stop associating errors with it.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for user actions.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of cart and
/// inbox actions leading up to an error.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("cart", "Added to cart", Some(&[("product_id", "123")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_error_display() {
        let err = SyncError::Store(StoreError::Unavailable("timeout".to_string()));
        assert_eq!(err.to_string(), "Remote store error: Remote store unavailable: timeout");

        assert_eq!(SyncError::NoAccount.to_string(), "No account attached");
    }

    #[test]
    fn test_report_failure_builds_advisory() {
        let err = StoreError::Unavailable("connection reset".to_string());
        let advisory = report_failure("cart.delete_line", &err);
        assert_eq!(advisory.operation, "cart.delete_line");
        assert!(advisory.message.contains("connection reset"));
        assert_eq!(
            advisory.to_string(),
            "cart.delete_line: Remote store unavailable: connection reset"
        );
    }
}
