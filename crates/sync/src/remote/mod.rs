//! Remote store contracts and backends.
//!
//! # Stores
//!
//! - [`RemoteCartStore`] - per-account cart lines, addressable by identity key
//! - [`RemoteNotificationStore`] - per-account inbox records
//! - [`NotificationFeed`] - realtime insert events for one account
//!
//! # Backends
//!
//! - [`postgres`] - `PostgreSQL` tables plus `LISTEN`/`NOTIFY` for the feed
//! - [`memory`] - in-process implementation with failure injection

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;

use cartsync_core::{
    AccountId, CartLine, LineKey, NotificationDraft, NotificationId, NotificationRecord, ProductId,
};

/// Errors that can occur when talking to a remote store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from sqlx.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The store could not be reached.
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    /// Data in the store is corrupted or invalid.
    #[error("Data corruption: {0}")]
    DataCorruption(String),

    /// Requested record was not found.
    #[error("Not found")]
    NotFound,

    /// The realtime subscription could not be opened.
    #[error("Subscription error: {0}")]
    Subscription(String),
}

/// Per-account authoritative cart lines.
#[async_trait]
pub trait RemoteCartStore: Send + Sync {
    /// Fetch every line in the account's cart.
    async fn fetch_lines(&self, account: &AccountId) -> Result<Vec<CartLine>, StoreError>;

    /// Insert a line unless one with the same identity key exists.
    async fn insert_line(&self, account: &AccountId, line: &CartLine) -> Result<(), StoreError>;

    /// Insert the line if absent, otherwise set its quantity.
    async fn upsert_line(
        &self,
        account: &AccountId,
        key: &LineKey,
        quantity: u32,
    ) -> Result<(), StoreError>;

    /// Delete the line with exactly this identity key.
    async fn delete_line(&self, account: &AccountId, key: &LineKey) -> Result<(), StoreError>;

    /// Delete every variant line of a product.
    async fn delete_product(
        &self,
        account: &AccountId,
        product_id: &ProductId,
    ) -> Result<(), StoreError>;

    /// Delete every line in the account's cart.
    async fn delete_all(&self, account: &AccountId) -> Result<(), StoreError>;
}

/// Per-account inbox records.
#[async_trait]
pub trait RemoteNotificationStore: Send + Sync {
    /// Fetch every record, newest first.
    async fn fetch_notifications(
        &self,
        account: &AccountId,
    ) -> Result<Vec<NotificationRecord>, StoreError>;

    /// Store a new unread record and return it.
    async fn insert_notification(
        &self,
        account: &AccountId,
        draft: &NotificationDraft,
    ) -> Result<NotificationRecord, StoreError>;

    async fn mark_read(&self, account: &AccountId, id: &NotificationId) -> Result<(), StoreError>;

    async fn mark_all_read(&self, account: &AccountId) -> Result<(), StoreError>;

    async fn delete_notification(
        &self,
        account: &AccountId,
        id: &NotificationId,
    ) -> Result<(), StoreError>;

    async fn delete_all_notifications(&self, account: &AccountId) -> Result<(), StoreError>;
}

/// Realtime channel of notification inserts.
#[async_trait]
pub trait NotificationFeed: Send + Sync {
    /// Open a subscription delivering inserts for `account` only.
    async fn subscribe(&self, account: &AccountId) -> Result<FeedSubscription, StoreError>;
}

/// A live feed subscription.
///
/// The listener task behind it is torn down exactly once: by
/// [`FeedSubscription::release`] or, failing that, when the value is dropped.
#[derive(Debug)]
pub struct FeedSubscription {
    account: AccountId,
    events: mpsc::Receiver<NotificationRecord>,
    listener: Option<JoinHandle<()>>,
}

impl FeedSubscription {
    /// Wrap a receiver fed by `listener`.
    #[must_use]
    pub const fn new(
        account: AccountId,
        events: mpsc::Receiver<NotificationRecord>,
        listener: JoinHandle<()>,
    ) -> Self {
        Self {
            account,
            events,
            listener: Some(listener),
        }
    }

    /// Account this subscription is scoped to.
    #[must_use]
    pub const fn account(&self) -> &AccountId {
        &self.account
    }

    /// Wait for the next insert event.
    ///
    /// Returns `None` once the channel has closed (listener ended or released).
    pub async fn recv(&mut self) -> Option<NotificationRecord> {
        self.events.recv().await
    }

    /// Take the next already-delivered event without waiting.
    ///
    /// Returns `Ok(None)` when no event is pending and `Err(())` once the
    /// channel has closed.
    #[allow(clippy::result_unit_err)]
    pub fn try_recv(&mut self) -> Result<Option<NotificationRecord>, ()> {
        match self.events.try_recv() {
            Ok(record) => Ok(Some(record)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(()),
        }
    }

    /// Returns true until the subscription has been released.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.listener.is_some()
    }

    /// Tear down the listener and wait for it to stop.
    pub async fn release(mut self) {
        self.shutdown();
        if let Some(listener) = self.listener.take() {
            // Cancelled is the expected outcome here
            let _ = listener.await;
        }
    }

    fn shutdown(&mut self) {
        self.events.close();
        if let Some(listener) = &self.listener {
            listener.abort();
            tracing::debug!(account = %self.account, "Released notification feed subscription");
        }
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        if self.listener.is_some() {
            self.shutdown();
            self.listener = None;
        }
    }
}
