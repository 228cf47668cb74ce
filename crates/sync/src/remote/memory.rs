//! In-process remote backend.
//!
//! [`MemoryBackend`] implements every remote contract over shared in-memory
//! tables. It mirrors the `PostgreSQL` backend's semantics (identity-key
//! uniqueness, newest-first ordering, inserts published to feed subscribers)
//! and adds hooks for tests: failure injection, queued per-call latency, and a
//! log of applied writes.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use cartsync_core::{
    AccountId, CartLine, LineKey, NotificationDraft, NotificationId, NotificationRecord, ProductId,
};

use super::{
    FeedSubscription, NotificationFeed, RemoteCartStore, RemoteNotificationStore, StoreError,
};

const FEED_CAPACITY: usize = 256;

/// Shared in-memory implementation of every remote store.
///
/// Cloning is cheap; clones share the same tables.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryBackendInner>,
}

struct MemoryBackendInner {
    tables: Mutex<Tables>,
    inserts: broadcast::Sender<NotificationRecord>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_subscribe: AtomicBool,
    next_id: AtomicU64,
}

#[derive(Default)]
struct Tables {
    carts: HashMap<AccountId, Vec<CartLine>>,
    notifications: HashMap<AccountId, Vec<NotificationRecord>>,
    write_log: Vec<String>,
    delays: VecDeque<Duration>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        let (inserts, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            inner: Arc::new(MemoryBackendInner {
                tables: Mutex::new(Tables::default()),
                inserts,
                fail_reads: AtomicBool::new(false),
                fail_writes: AtomicBool::new(false),
                fail_subscribe: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.inner
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // -------------------------------------------------------------------------
    // Test hooks
    // -------------------------------------------------------------------------

    /// Make every subsequent fetch fail.
    pub fn fail_reads(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent feed subscription fail.
    pub fn fail_subscribe(&self, fail: bool) {
        self.inner.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Queue latencies consumed, in call order, by subsequent writes.
    pub fn queue_delays(&self, delays: impl IntoIterator<Item = Duration>) {
        self.tables().delays.extend(delays);
    }

    /// Writes applied so far, in completion order.
    #[must_use]
    pub fn write_log(&self) -> Vec<String> {
        self.tables().write_log.clone()
    }

    /// Current remote cart for an account.
    #[must_use]
    pub fn cart_lines(&self, account: &AccountId) -> Vec<CartLine> {
        self.tables().carts.get(account).cloned().unwrap_or_default()
    }

    /// Replace an account's remote cart without logging writes.
    pub fn seed_cart(&self, account: &AccountId, lines: Vec<CartLine>) {
        self.tables().carts.insert(account.clone(), lines);
    }

    /// Current inbox for an account, newest first.
    #[must_use]
    pub fn notifications(&self, account: &AccountId) -> Vec<NotificationRecord> {
        self.tables()
            .notifications
            .get(account)
            .cloned()
            .unwrap_or_default()
    }

    /// Insert a record the way a server-side trigger would, publishing it to
    /// feed subscribers.
    pub fn publish(&self, account: &AccountId, draft: NotificationDraft) -> NotificationRecord {
        let record = {
            let mut tables = self.tables();
            let created_at = tables.next_timestamp();
            let record = draft.into_record(self.next_notification_id(), account.clone(), created_at);
            tables
                .notifications
                .entry(account.clone())
                .or_default()
                .insert(0, record.clone());
            record
        };
        // No subscribers is fine
        let _ = self.inner.inserts.send(record.clone());
        record
    }

    /// Number of live feed listeners.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.inserts.receiver_count()
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn next_notification_id(&self) -> NotificationId {
        let n = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        NotificationId::new(format!("ntf_{n:06}"))
    }

    fn check_read(&self) -> Result<(), StoreError> {
        if self.inner.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected read failure".to_string()));
        }
        Ok(())
    }

    async fn before_write(&self) -> Result<(), StoreError> {
        let delay = self.tables().delays.pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        Ok(())
    }

    fn log(tables: &mut Tables, entry: String) {
        tables.write_log.push(entry);
    }
}

impl Tables {
    /// Strictly increasing timestamps so newest-first ordering is total.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.last_timestamp {
            Some(last) if now <= last => last + TimeDelta::milliseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(next);
        next
    }
}

fn describe(key: &LineKey) -> String {
    format!(
        "{}[{}/{}]",
        key.product_id,
        key.size().unwrap_or("-"),
        key.color().unwrap_or("-")
    )
}

#[async_trait]
impl RemoteCartStore for MemoryBackend {
    async fn fetch_lines(&self, account: &AccountId) -> Result<Vec<CartLine>, StoreError> {
        self.check_read()?;
        Ok(self.cart_lines(account))
    }

    async fn insert_line(&self, account: &AccountId, line: &CartLine) -> Result<(), StoreError> {
        self.before_write().await?;
        let key = line.key();
        let mut tables = self.tables();
        let cart = tables.carts.entry(account.clone()).or_default();
        if cart.iter().any(|l| l.has_key(&key)) {
            return Ok(());
        }
        cart.push(line.clone());
        Self::log(&mut tables, format!("insert {} qty={}", describe(&key), line.quantity));
        Ok(())
    }

    async fn upsert_line(
        &self,
        account: &AccountId,
        key: &LineKey,
        quantity: u32,
    ) -> Result<(), StoreError> {
        self.before_write().await?;
        let mut tables = self.tables();
        let cart = tables.carts.entry(account.clone()).or_default();
        if let Some(line) = cart.iter_mut().find(|l| l.has_key(key)) {
            line.quantity = quantity;
        } else {
            cart.push(CartLine::new(
                key.product_id.clone(),
                quantity,
                key.variant.clone(),
                Utc::now(),
            ));
        }
        Self::log(&mut tables, format!("upsert {} qty={quantity}", describe(key)));
        Ok(())
    }

    async fn delete_line(&self, account: &AccountId, key: &LineKey) -> Result<(), StoreError> {
        self.before_write().await?;
        let mut tables = self.tables();
        if let Some(cart) = tables.carts.get_mut(account) {
            cart.retain(|l| !l.has_key(key));
        }
        Self::log(&mut tables, format!("delete {}", describe(key)));
        Ok(())
    }

    async fn delete_product(
        &self,
        account: &AccountId,
        product_id: &ProductId,
    ) -> Result<(), StoreError> {
        self.before_write().await?;
        let mut tables = self.tables();
        if let Some(cart) = tables.carts.get_mut(account) {
            cart.retain(|l| &l.product_id != product_id);
        }
        Self::log(&mut tables, format!("delete_product {product_id}"));
        Ok(())
    }

    async fn delete_all(&self, account: &AccountId) -> Result<(), StoreError> {
        self.before_write().await?;
        let mut tables = self.tables();
        tables.carts.remove(account);
        Self::log(&mut tables, format!("delete_all {account}"));
        Ok(())
    }
}

#[async_trait]
impl RemoteNotificationStore for MemoryBackend {
    async fn fetch_notifications(
        &self,
        account: &AccountId,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        self.check_read()?;
        let mut records = self.notifications(account);
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn insert_notification(
        &self,
        account: &AccountId,
        draft: &NotificationDraft,
    ) -> Result<NotificationRecord, StoreError> {
        self.before_write().await?;
        let record = self.publish(account, draft.clone());
        Self::log(&mut self.tables(), format!("notify {}", record.id));
        Ok(record)
    }

    async fn mark_read(&self, account: &AccountId, id: &NotificationId) -> Result<(), StoreError> {
        self.before_write().await?;
        let mut tables = self.tables();
        if let Some(record) = tables
            .notifications
            .get_mut(account)
            .and_then(|records| records.iter_mut().find(|r| &r.id == id))
        {
            record.read = true;
        }
        Self::log(&mut tables, format!("mark_read {id}"));
        Ok(())
    }

    async fn mark_all_read(&self, account: &AccountId) -> Result<(), StoreError> {
        self.before_write().await?;
        let mut tables = self.tables();
        if let Some(records) = tables.notifications.get_mut(account) {
            for record in records.iter_mut() {
                record.read = true;
            }
        }
        Self::log(&mut tables, format!("mark_all_read {account}"));
        Ok(())
    }

    async fn delete_notification(
        &self,
        account: &AccountId,
        id: &NotificationId,
    ) -> Result<(), StoreError> {
        self.before_write().await?;
        let mut tables = self.tables();
        if let Some(records) = tables.notifications.get_mut(account) {
            records.retain(|r| &r.id != id);
        }
        Self::log(&mut tables, format!("delete_notification {id}"));
        Ok(())
    }

    async fn delete_all_notifications(&self, account: &AccountId) -> Result<(), StoreError> {
        self.before_write().await?;
        let mut tables = self.tables();
        tables.notifications.remove(account);
        Self::log(&mut tables, format!("delete_all_notifications {account}"));
        Ok(())
    }
}

#[async_trait]
impl NotificationFeed for MemoryBackend {
    async fn subscribe(&self, account: &AccountId) -> Result<FeedSubscription, StoreError> {
        if self.inner.fail_subscribe.load(Ordering::SeqCst) {
            return Err(StoreError::Subscription(
                "injected subscribe failure".to_string(),
            ));
        }

        let mut inserts = self.inner.inserts.subscribe();
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let scope = account.clone();

        let listener = tokio::spawn(async move {
            loop {
                match inserts.recv().await {
                    Ok(record) if record.account_id == scope => {
                        if tx.send(record).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(account = %scope, skipped, "Notification feed lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(FeedSubscription::new(account.clone(), rx, listener))
    }
}
