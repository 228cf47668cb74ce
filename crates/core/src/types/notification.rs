//! Inbox notification types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{AccountId, NotificationId};

/// Category of an inbox entry.
///
/// Stored as snake_case text. Unrecognized values read back as `General`
/// so that new server-side kinds never break older clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderUpdate,
    CartReminder,
    Promotion,
    #[default]
    #[serde(other)]
    General,
}

impl NotificationKind {
    /// The stored text form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OrderUpdate => "order_update",
            Self::CartReminder => "cart_reminder",
            Self::Promotion => "promotion",
            Self::General => "general",
        }
    }

    /// Parse the stored text form, falling back to `General`.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "order_update" => Self::OrderUpdate,
            "cart_reminder" => Self::CartReminder,
            "promotion" => Self::Promotion,
            _ => Self::General,
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inbox entry owned by an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: NotificationId,
    pub account_id: AccountId,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Content of a notification that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationDraft {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

impl NotificationDraft {
    #[must_use]
    pub fn new(kind: NotificationKind, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            body: body.into(),
            payload: None,
        }
    }

    /// Attach a structured payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Materialize the draft as an unread record.
    #[must_use]
    pub fn into_record(
        self,
        id: NotificationId,
        account_id: AccountId,
        created_at: DateTime<Utc>,
    ) -> NotificationRecord {
        NotificationRecord {
            id,
            account_id,
            kind: self.kind,
            title: self.title,
            body: self.body,
            payload: self.payload,
            read: false,
            created_at,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_text() {
        for kind in [
            NotificationKind::OrderUpdate,
            NotificationKind::CartReminder,
            NotificationKind::Promotion,
            NotificationKind::General,
        ] {
            assert_eq!(NotificationKind::parse(kind.as_str()), kind);
        }
    }

    #[test]
    fn test_unknown_kind_is_general() {
        assert_eq!(NotificationKind::parse("flash_sale"), NotificationKind::General);
        let kind: NotificationKind = serde_json::from_str("\"flash_sale\"").unwrap();
        assert_eq!(kind, NotificationKind::General);
    }

    #[test]
    fn test_draft_into_record_is_unread() {
        let record = NotificationDraft::new(NotificationKind::OrderUpdate, "Shipped", "On its way")
            .with_payload(serde_json::json!({ "order": 17 }))
            .into_record(
                NotificationId::new("n1"),
                AccountId::new("a1"),
                Utc::now(),
            );
        assert!(!record.read);
        assert_eq!(record.title, "Shipped");
        assert_eq!(record.payload.unwrap()["order"], 17);
    }
}
