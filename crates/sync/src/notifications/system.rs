//! OS-level notification surface.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

/// Tri-state capability gating OS-level surfacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Granted,
    Denied,
    /// The platform has no notification surface.
    Unsupported,
}

impl Permission {
    #[must_use]
    pub const fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Denied => "denied",
            Self::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "granted" => Ok(Self::Granted),
            "denied" => Ok(Self::Denied),
            "unsupported" => Ok(Self::Unsupported),
            other => Err(format!(
                "unknown permission '{other}' (expected granted, denied or unsupported)"
            )),
        }
    }
}

/// Errors from the system notification surface.
#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("System notifications are not supported on this platform")]
    Unsupported,

    #[error("Notification permission denied")]
    Denied,

    #[error("Failed to show notification: {0}")]
    Show(String),
}

/// Platform notification surface.
#[async_trait]
pub trait SystemNotifier: Send + Sync {
    /// Current permission state.
    fn permission(&self) -> Permission;

    /// Ask the user for permission, returning the resulting state.
    async fn request_permission(&self) -> Permission;

    /// Surface a notification. Callers check [`SystemNotifier::permission`]
    /// first.
    ///
    /// # Errors
    ///
    /// Returns `NotifierError` if the platform rejects the notification.
    fn show(&self, title: &str, body: &str) -> Result<(), NotifierError>;
}

/// Surfaces notifications as structured `tracing` events.
#[derive(Debug, Clone, Copy)]
pub struct LogNotifier {
    permission: Permission,
}

impl LogNotifier {
    #[must_use]
    pub const fn new(permission: Permission) -> Self {
        Self { permission }
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new(Permission::Granted)
    }
}

#[async_trait]
impl SystemNotifier for LogNotifier {
    fn permission(&self) -> Permission {
        self.permission
    }

    async fn request_permission(&self) -> Permission {
        self.permission
    }

    fn show(&self, title: &str, body: &str) -> Result<(), NotifierError> {
        match self.permission {
            Permission::Granted => {
                info!(target: "cartsync::notify", title, body, "Notification");
                Ok(())
            }
            Permission::Denied => Err(NotifierError::Denied),
            Permission::Unsupported => Err(NotifierError::Unsupported),
        }
    }
}

/// Notifier for platforms with no notification surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedNotifier;

#[async_trait]
impl SystemNotifier for UnsupportedNotifier {
    fn permission(&self) -> Permission {
        Permission::Unsupported
    }

    async fn request_permission(&self) -> Permission {
        Permission::Unsupported
    }

    fn show(&self, _title: &str, _body: &str) -> Result<(), NotifierError> {
        Err(NotifierError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_parse() {
        assert_eq!("granted".parse::<Permission>(), Ok(Permission::Granted));
        assert_eq!(" Denied ".parse::<Permission>(), Ok(Permission::Denied));
        assert_eq!("unsupported".parse::<Permission>(), Ok(Permission::Unsupported));
        assert!("maybe".parse::<Permission>().is_err());
    }

    #[test]
    fn test_log_notifier_respects_permission() {
        assert!(LogNotifier::new(Permission::Granted).show("Hi", "there").is_ok());
        assert!(matches!(
            LogNotifier::new(Permission::Denied).show("Hi", "there"),
            Err(NotifierError::Denied)
        ));
    }

    #[tokio::test]
    async fn test_unsupported_notifier() {
        let notifier = UnsupportedNotifier;
        assert_eq!(notifier.request_permission().await, Permission::Unsupported);
        assert!(notifier.show("Hi", "there").is_err());
    }
}
