//! `PostgreSQL` remote backend.
//!
//! # Tables
//!
//! - `cart_lines` - one row per `(account_id, product_id, selected_size, selected_color)`
//! - `notifications` - inbox records, published on insert via `pg_notify`
//! - `products` - catalog snapshots (see [`crate::catalog::PgProductCatalog`])
//!
//! # Migrations
//!
//! Migrations are stored in `crates/sync/migrations/` and run via:
//! ```bash
//! cargo run -p cartsync-cli -- migrate
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde::Deserialize;
use sqlx::PgPool;
use sqlx::postgres::{PgListener, PgPoolOptions};
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use cartsync_core::{
    AccountId, CartLine, LineKey, NotificationDraft, NotificationId, NotificationKind,
    NotificationRecord, ProductId, Variant,
};

use super::{
    FeedSubscription, NotificationFeed, RemoteCartStore, RemoteNotificationStore, StoreError,
};

/// Channel the insert trigger publishes on.
pub const NOTIFICATION_CHANNEL: &str = "notification_inserted";

const FEED_CAPACITY: usize = 256;

/// Embedded migrations for the remote schema.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

fn quantity_param(quantity: u32) -> Result<i32, StoreError> {
    i32::try_from(quantity)
        .map_err(|_| StoreError::DataCorruption(format!("quantity {quantity} out of range")))
}

// =============================================================================
// Cart lines
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct CartLineRow {
    product_id: String,
    quantity: i32,
    selected_size: Option<String>,
    selected_color: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<CartLineRow> for CartLine {
    type Error = StoreError;

    fn try_from(row: CartLineRow) -> Result<Self, Self::Error> {
        let quantity = u32::try_from(row.quantity)
            .ok()
            .filter(|q| *q >= 1)
            .ok_or_else(|| {
                StoreError::DataCorruption(format!(
                    "non-positive quantity {} for product {}",
                    row.quantity, row.product_id
                ))
            })?;

        Ok(Self::new(
            ProductId::new(row.product_id),
            quantity,
            Some(Variant::new(row.selected_size, row.selected_color)),
            row.created_at,
        ))
    }
}

/// Cart lines in the `cart_lines` table.
#[derive(Clone)]
pub struct PgCartStore {
    pool: PgPool,
}

impl PgCartStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RemoteCartStore for PgCartStore {
    #[instrument(skip(self))]
    async fn fetch_lines(&self, account: &AccountId) -> Result<Vec<CartLine>, StoreError> {
        let rows: Vec<CartLineRow> = sqlx::query_as(
            r"
            SELECT product_id, quantity, selected_size, selected_color, created_at
            FROM cart_lines
            WHERE account_id = $1
            ORDER BY created_at, id
            ",
        )
        .bind(account)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CartLine::try_from).collect()
    }

    async fn insert_line(&self, account: &AccountId, line: &CartLine) -> Result<(), StoreError> {
        let key = line.key();
        sqlx::query(
            r"
            INSERT INTO cart_lines
                (account_id, product_id, quantity, selected_size, selected_color, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT ON CONSTRAINT cart_line_identity DO NOTHING
            ",
        )
        .bind(account)
        .bind(&key.product_id)
        .bind(quantity_param(line.quantity)?)
        .bind(key.size())
        .bind(key.color())
        .bind(line.added_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_line(
        &self,
        account: &AccountId,
        key: &LineKey,
        quantity: u32,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO cart_lines
                (account_id, product_id, quantity, selected_size, selected_color)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT ON CONSTRAINT cart_line_identity
            DO UPDATE SET quantity = EXCLUDED.quantity
            ",
        )
        .bind(account)
        .bind(&key.product_id)
        .bind(quantity_param(quantity)?)
        .bind(key.size())
        .bind(key.color())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_line(&self, account: &AccountId, key: &LineKey) -> Result<(), StoreError> {
        sqlx::query(
            r"
            DELETE FROM cart_lines
            WHERE account_id = $1
              AND product_id = $2
              AND selected_size IS NOT DISTINCT FROM $3
              AND selected_color IS NOT DISTINCT FROM $4
            ",
        )
        .bind(account)
        .bind(&key.product_id)
        .bind(key.size())
        .bind(key.color())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_product(
        &self,
        account: &AccountId,
        product_id: &ProductId,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM cart_lines WHERE account_id = $1 AND product_id = $2")
            .bind(account)
            .bind(product_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_all(&self, account: &AccountId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM cart_lines WHERE account_id = $1")
            .bind(account)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// =============================================================================
// Notifications
// =============================================================================

/// A `notifications` row, as selected or as published by the insert trigger.
#[derive(Debug, Deserialize, sqlx::FromRow)]
struct NotificationRow {
    id: String,
    account_id: String,
    kind: String,
    title: String,
    body: String,
    payload: Option<serde_json::Value>,
    read: bool,
    created_at: DateTime<Utc>,
}

impl From<NotificationRow> for NotificationRecord {
    fn from(row: NotificationRow) -> Self {
        Self {
            id: NotificationId::new(row.id),
            account_id: AccountId::new(row.account_id),
            kind: NotificationKind::parse(&row.kind),
            title: row.title,
            body: row.body,
            payload: row.payload,
            read: row.read,
            created_at: row.created_at,
        }
    }
}

/// Inbox records in the `notifications` table.
#[derive(Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RemoteNotificationStore for PgNotificationStore {
    #[instrument(skip(self))]
    async fn fetch_notifications(
        &self,
        account: &AccountId,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        let rows: Vec<NotificationRow> = sqlx::query_as(
            r"
            SELECT id, account_id, kind, title, body, payload, read, created_at
            FROM notifications
            WHERE account_id = $1
            ORDER BY created_at DESC
            ",
        )
        .bind(account)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(NotificationRecord::from).collect())
    }

    #[instrument(skip(self, draft), fields(kind = %draft.kind))]
    async fn insert_notification(
        &self,
        account: &AccountId,
        draft: &NotificationDraft,
    ) -> Result<NotificationRecord, StoreError> {
        let row: NotificationRow = sqlx::query_as(
            r"
            INSERT INTO notifications (account_id, kind, title, body, payload)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, account_id, kind, title, body, payload, read, created_at
            ",
        )
        .bind(account)
        .bind(draft.kind.as_str())
        .bind(&draft.title)
        .bind(&draft.body)
        .bind(&draft.payload)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn mark_read(&self, account: &AccountId, id: &NotificationId) -> Result<(), StoreError> {
        sqlx::query("UPDATE notifications SET read = true WHERE account_id = $1 AND id = $2")
            .bind(account)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_all_read(&self, account: &AccountId) -> Result<(), StoreError> {
        sqlx::query("UPDATE notifications SET read = true WHERE account_id = $1 AND NOT read")
            .bind(account)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_notification(
        &self,
        account: &AccountId,
        id: &NotificationId,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM notifications WHERE account_id = $1 AND id = $2")
            .bind(account)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_all_notifications(&self, account: &AccountId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM notifications WHERE account_id = $1")
            .bind(account)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// =============================================================================
// Realtime feed
// =============================================================================

/// Realtime inserts delivered through `LISTEN notification_inserted`.
///
/// Each subscription holds its own listener connection. The payload is the
/// full row as JSON; rows for other accounts are dropped client-side. When the
/// connection is lost the subscription ends and the inbox keeps its last
/// snapshot.
#[derive(Clone)]
pub struct PgNotificationFeed {
    pool: PgPool,
}

impl PgNotificationFeed {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationFeed for PgNotificationFeed {
    #[instrument(skip(self))]
    async fn subscribe(&self, account: &AccountId) -> Result<FeedSubscription, StoreError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(|e| StoreError::Subscription(e.to_string()))?;
        listener
            .listen(NOTIFICATION_CHANNEL)
            .await
            .map_err(|e| StoreError::Subscription(e.to_string()))?;

        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let scope = account.clone();

        let task = tokio::spawn(async move {
            loop {
                match listener.try_recv().await {
                    Ok(Some(notification)) => {
                        let row = match serde_json::from_str::<NotificationRow>(
                            notification.payload(),
                        ) {
                            Ok(row) => row,
                            Err(e) => {
                                warn!(error = %e, "Ignoring malformed notification payload");
                                continue;
                            }
                        };
                        if row.account_id != scope.as_str() {
                            continue;
                        }
                        if tx.send(row.into()).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        warn!(account = %scope, "Notification listener connection lost");
                        break;
                    }
                    Err(e) => {
                        warn!(account = %scope, error = %e, "Notification listener failed");
                        break;
                    }
                }
            }
            debug!(account = %scope, "Notification listener stopped");
        });

        Ok(FeedSubscription::new(account.clone(), rx, task))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cart_row_conversion_normalizes_variant() {
        let row = CartLineRow {
            product_id: "p1".to_string(),
            quantity: 2,
            selected_size: None,
            selected_color: None,
            created_at: Utc::now(),
        };
        let line = CartLine::try_from(row).unwrap();
        assert_eq!(line.variant, None);
        assert_eq!(line.quantity, 2);
    }

    #[test]
    fn test_cart_row_rejects_non_positive_quantity() {
        let row = CartLineRow {
            product_id: "p1".to_string(),
            quantity: 0,
            selected_size: Some("M".to_string()),
            selected_color: None,
            created_at: Utc::now(),
        };
        assert!(matches!(
            CartLine::try_from(row),
            Err(StoreError::DataCorruption(_))
        ));
    }

    #[test]
    fn test_trigger_payload_parses() {
        let payload = r#"{
            "id": "6f1c",
            "account_id": "acct_1",
            "kind": "order_update",
            "title": "Order Confirmed",
            "body": "Thanks!",
            "payload": {"order_id": 42},
            "read": false,
            "created_at": "2026-10-19T12:30:00.123456+00:00"
        }"#;
        let record: NotificationRecord = serde_json::from_str::<NotificationRow>(payload)
            .unwrap()
            .into();
        assert_eq!(record.kind, NotificationKind::OrderUpdate);
        assert_eq!(record.account_id, AccountId::new("acct_1"));
        assert_eq!(record.payload.unwrap()["order_id"], 42);
    }

    #[test]
    fn test_quantity_param_range() {
        assert_eq!(quantity_param(3).unwrap(), 3);
        assert!(quantity_param(u32::MAX).is_err());
    }
}
