//! Notification inbox for the active account.
//!
//! [`NotificationCenter`] keeps a newest-first list of [`NotificationRecord`]s
//! consistent with the remote notification store and the realtime insert feed:
//!
//! - `attach` acquires a feed subscription and then fetches the inbox snapshot
//! - inserts arriving on the feed are merged into the list and surfaced through
//!   the [`SystemNotifier`] when permission is granted
//! - read flags and deletions are applied locally first and mirrored
//!   best-effort through a [`RemoteMirror`]
//! - `detach` releases the subscription exactly once
//!
//! Locally scheduled notifications live in an owned [`ScheduledQueue`].

mod schedule;
mod system;

pub use schedule::{ScheduleId, ScheduledQueue};
pub use system::{LogNotifier, NotifierError, Permission, SystemNotifier, UnsupportedNotifier};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use cartsync_core::{AccountId, NotificationDraft, NotificationId, NotificationRecord};

use crate::error::{Advisory, Result, SyncError, add_breadcrumb, report_failure};
use crate::mirror::{Lane, RemoteMirror, WriteFuture, WriteIntent, WriteOrdering, boxed_write};
use crate::remote::{FeedSubscription, NotificationFeed, RemoteNotificationStore};

/// Result of attaching an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboxStatus {
    /// The snapshot fetch succeeded.
    pub fetched: bool,
    /// A realtime subscription is open.
    pub live: bool,
}

/// Owns the in-memory inbox of one account at a time.
pub struct NotificationCenter {
    store: Arc<dyn RemoteNotificationStore>,
    feed: Arc<dyn NotificationFeed>,
    notifier: Arc<dyn SystemNotifier>,
    mirror: RemoteMirror,
    account: Option<AccountId>,
    records: Vec<NotificationRecord>,
    subscription: Option<FeedSubscription>,
    scheduled: ScheduledQueue,
}

impl NotificationCenter {
    #[must_use]
    pub fn new(
        store: Arc<dyn RemoteNotificationStore>,
        feed: Arc<dyn NotificationFeed>,
        notifier: Arc<dyn SystemNotifier>,
        ordering: WriteOrdering,
    ) -> Self {
        Self {
            store,
            feed,
            notifier,
            mirror: RemoteMirror::new(ordering),
            account: None,
            records: Vec::new(),
            subscription: None,
            scheduled: ScheduledQueue::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Load the inbox for `account` and start listening for inserts.
    ///
    /// Any previously attached account is detached first. Failures degrade
    /// (empty list, or snapshot without live updates) and are published as
    /// advisories.
    #[instrument(skip(self), fields(account = %account))]
    pub async fn attach(&mut self, account: AccountId) -> InboxStatus {
        if self.account.is_some() {
            self.detach().await;
        }

        // Subscribe before the snapshot so no insert falls between the two;
        // overlapping events are deduplicated by id.
        let live = match self.feed.subscribe(&account).await {
            Ok(subscription) => {
                self.subscription = Some(subscription);
                true
            }
            Err(e) => {
                self.mirror.advise(report_failure("notifications.subscribe", &e));
                false
            }
        };

        let fetched = match self.store.fetch_notifications(&account).await {
            Ok(mut records) => {
                records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                records.dedup_by(|a, b| a.id == b.id);
                self.records = records;
                true
            }
            Err(e) => {
                self.mirror.advise(report_failure("notifications.fetch", &e));
                false
            }
        };

        info!(
            records = self.records.len(),
            unread = self.unread_count(),
            live,
            "Notification inbox attached"
        );
        self.account = Some(account);

        InboxStatus { fetched, live }
    }

    /// Release the subscription, wait for pending writes, and forget the
    /// account's inbox and scheduled notifications.
    pub async fn detach(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.release().await;
        }
        self.mirror.flush().await;
        self.records.clear();
        self.scheduled.clear();
        if let Some(account) = self.account.take() {
            debug!(account = %account, "Notification inbox detached");
        }
    }

    pub async fn dispose(mut self) {
        self.detach().await;
    }

    /// Wait for every pending remote write.
    pub async fn flush(&mut self) {
        self.mirror.flush().await;
    }

    // -------------------------------------------------------------------------
    // Realtime events
    // -------------------------------------------------------------------------

    /// Apply every insert already delivered by the feed without waiting.
    ///
    /// Returns how many new records were added.
    pub fn drain_events(&mut self) -> usize {
        let mut applied = 0;
        loop {
            let Some(subscription) = self.subscription.as_mut() else {
                break;
            };
            match subscription.try_recv() {
                Ok(Some(record)) => {
                    if self.apply_insert(record) {
                        applied += 1;
                    }
                }
                Ok(None) => break,
                Err(()) => {
                    self.feed_closed();
                    break;
                }
            }
        }
        applied
    }

    /// Wait for the next new insert and apply it.
    ///
    /// Returns `None` when not subscribed or once the feed has closed.
    pub async fn next_event(&mut self) -> Option<NotificationRecord> {
        loop {
            let subscription = self.subscription.as_mut()?;
            if let Some(record) = subscription.recv().await {
                if self.apply_insert(record.clone()) {
                    return Some(record);
                }
            } else {
                self.feed_closed();
                return None;
            }
        }
    }

    fn feed_closed(&mut self) {
        warn!("Notification feed closed; keeping last snapshot");
        self.subscription = None;
    }

    /// Insert keeping newest-first order. Records for other accounts and ids
    /// already present are ignored.
    fn apply_insert(&mut self, record: NotificationRecord) -> bool {
        if self.account.as_ref() != Some(&record.account_id) {
            debug!(id = %record.id, "Ignoring notification for another account");
            return false;
        }
        if self.records.iter().any(|r| r.id == record.id) {
            debug!(id = %record.id, "Ignoring duplicate notification");
            return false;
        }

        self.surface(&record.title, &record.body);
        let position = self
            .records
            .partition_point(|r| r.created_at > record.created_at);
        self.records.insert(position, record);
        true
    }

    fn surface(&self, title: &str, body: &str) {
        if !self.notifier.permission().is_granted() {
            return;
        }
        if let Err(e) = self.notifier.show(title, body) {
            warn!(error = %e, "Failed to surface system notification");
        }
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    pub fn mark_as_read(&mut self, id: &NotificationId) {
        let Some(record) = self.records.iter_mut().find(|r| &r.id == id) else {
            return;
        };
        record.read = true;

        let id = id.clone();
        self.mirror_write(
            WriteIntent::new("notifications.mark_read", id_lane(&id), format!("read:{id}")),
            move |store, account| boxed_write(async move { store.mark_read(&account, &id).await }),
        );
    }

    pub fn mark_all_as_read(&mut self) {
        for record in &mut self.records {
            record.read = true;
        }
        self.mirror_write(
            WriteIntent::new("notifications.mark_all_read", Lane::All, "read:*"),
            |store, account| boxed_write(async move { store.mark_all_read(&account).await }),
        );
    }

    pub fn clear_notification(&mut self, id: &NotificationId) {
        let before = self.records.len();
        self.records.retain(|r| &r.id != id);
        if self.records.len() == before {
            return;
        }

        let id = id.clone();
        self.mirror_write(
            WriteIntent::new("notifications.delete", id_lane(&id), format!("notification:{id}")),
            move |store, account| {
                boxed_write(async move { store.delete_notification(&account, &id).await })
            },
        );
    }

    pub fn clear_all(&mut self) {
        self.records.clear();
        self.mirror_write(
            WriteIntent::new("notifications.delete_all", Lane::All, "notification:*"),
            |store, account| {
                boxed_write(async move { store.delete_all_notifications(&account).await })
            },
        );
    }

    /// Insert a notification for the attached account.
    ///
    /// The stored record is applied locally right away; its realtime echo is
    /// ignored as a duplicate.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::NoAccount` when detached, or the store error.
    #[instrument(skip(self, draft), fields(kind = %draft.kind))]
    pub async fn send(&mut self, draft: NotificationDraft) -> Result<NotificationRecord> {
        let account = self.account.clone().ok_or(SyncError::NoAccount)?;
        let record = self.store.insert_notification(&account, &draft).await?;
        add_breadcrumb("notifications", "Sent notification", Some(&[("id", record.id.as_str())]));
        self.apply_insert(record.clone());
        Ok(record)
    }

    fn mirror_write<F>(&mut self, intent: WriteIntent, write: F)
    where
        F: FnOnce(Arc<dyn RemoteNotificationStore>, AccountId) -> WriteFuture,
    {
        let Some(account) = self.account.clone() else {
            return;
        };
        let future = write(Arc::clone(&self.store), account);
        self.mirror.submit(intent, future);
    }

    // -------------------------------------------------------------------------
    // Scheduled notifications
    // -------------------------------------------------------------------------

    /// Surface `draft` locally once `at` has passed (see [`Self::fire_due`]).
    pub fn schedule(&mut self, draft: NotificationDraft, at: DateTime<Utc>) -> ScheduleId {
        let id = self.scheduled.schedule(draft, at);
        debug!(%id, %at, "Scheduled local notification");
        id
    }

    /// Returns true if the notification was still pending.
    pub fn cancel_scheduled(&mut self, id: ScheduleId) -> bool {
        self.scheduled.cancel(id)
    }

    /// Surface every scheduled draft due at `now`.
    ///
    /// Returns how many drafts came due. They leave the queue whether or not
    /// permission allowed surfacing them.
    pub fn fire_due(&mut self, now: DateTime<Utc>) -> usize {
        let due = self.scheduled.take_due(now);
        for (id, draft) in &due {
            debug!(%id, "Firing scheduled notification");
            self.surface(&draft.title, &draft.body);
        }
        due.len()
    }

    #[must_use]
    pub const fn scheduled(&self) -> &ScheduledQueue {
        &self.scheduled
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Records, newest first.
    #[must_use]
    pub fn notifications(&self) -> &[NotificationRecord] {
        &self.records
    }

    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.records.iter().filter(|r| !r.read).count()
    }

    #[must_use]
    pub const fn account(&self) -> Option<&AccountId> {
        self.account.as_ref()
    }

    /// Returns true while a realtime subscription is open.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.subscription.is_some()
    }

    #[must_use]
    pub fn permission(&self) -> Permission {
        self.notifier.permission()
    }

    pub async fn request_permission(&self) -> Permission {
        self.notifier.request_permission().await
    }

    /// Receive advisories for failed background operations.
    #[must_use]
    pub fn advisories(&self) -> broadcast::Receiver<Advisory> {
        self.mirror.subscribe()
    }
}

fn id_lane(id: &NotificationId) -> Lane {
    Lane::Key(format!("notification:{id}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cartsync_core::NotificationKind;

    use super::*;
    use crate::remote::StoreError;
    use crate::remote::memory::MemoryBackend;

    fn center(backend: &MemoryBackend, permission: Permission) -> NotificationCenter {
        NotificationCenter::new(
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
            Arc::new(LogNotifier::new(permission)),
            WriteOrdering::PerKey,
        )
    }

    fn account() -> AccountId {
        AccountId::new("acct_1")
    }

    fn draft(title: &str) -> NotificationDraft {
        NotificationDraft::new(NotificationKind::General, title, "body")
    }

    #[tokio::test]
    async fn test_attach_loads_newest_first() {
        let backend = MemoryBackend::new();
        backend.publish(&account(), draft("old"));
        backend.publish(&account(), draft("new"));

        let mut center = center(&backend, Permission::Granted);
        let status = center.attach(account()).await;

        assert_eq!(status, InboxStatus { fetched: true, live: true });
        let titles: Vec<_> = center.notifications().iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, ["new", "old"]);
    }

    /// Store whose snapshot misses an insert committed right after it.
    struct InsertAfterSnapshot {
        backend: MemoryBackend,
    }

    #[async_trait::async_trait]
    impl RemoteNotificationStore for InsertAfterSnapshot {
        async fn fetch_notifications(
            &self,
            account: &AccountId,
        ) -> std::result::Result<Vec<NotificationRecord>, StoreError> {
            let snapshot = self.backend.fetch_notifications(account).await?;
            self.backend.publish(account, draft("Order Confirmed"));
            Ok(snapshot)
        }

        async fn insert_notification(
            &self,
            account: &AccountId,
            draft: &NotificationDraft,
        ) -> std::result::Result<NotificationRecord, StoreError> {
            self.backend.insert_notification(account, draft).await
        }

        async fn mark_read(
            &self,
            account: &AccountId,
            id: &NotificationId,
        ) -> std::result::Result<(), StoreError> {
            self.backend.mark_read(account, id).await
        }

        async fn mark_all_read(&self, account: &AccountId) -> std::result::Result<(), StoreError> {
            self.backend.mark_all_read(account).await
        }

        async fn delete_notification(
            &self,
            account: &AccountId,
            id: &NotificationId,
        ) -> std::result::Result<(), StoreError> {
            self.backend.delete_notification(account, id).await
        }

        async fn delete_all_notifications(
            &self,
            account: &AccountId,
        ) -> std::result::Result<(), StoreError> {
            self.backend.delete_all_notifications(account).await
        }
    }

    #[tokio::test]
    async fn test_insert_during_snapshot_is_not_lost() {
        let backend = MemoryBackend::new();
        backend.publish(&account(), draft("Welcome"));
        let mut center = NotificationCenter::new(
            Arc::new(InsertAfterSnapshot { backend: backend.clone() }),
            Arc::new(backend.clone()),
            Arc::new(LogNotifier::new(Permission::Granted)),
            WriteOrdering::PerKey,
        );

        center.attach(account()).await;
        assert_eq!(center.notifications().len(), 1);

        let record = tokio::time::timeout(std::time::Duration::from_secs(5), center.next_event())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.title, "Order Confirmed");
        assert_eq!(center.notifications().len(), 2);
        assert_eq!(backend.notifications(&account()).len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_degrades_to_empty() {
        let backend = MemoryBackend::new();
        backend.publish(&account(), draft("hidden"));
        backend.fail_reads(true);

        let mut center = center(&backend, Permission::Granted);
        let mut advisories = center.advisories();
        let status = center.attach(account()).await;

        assert!(!status.fetched);
        assert!(status.live);
        assert!(center.notifications().is_empty());
        assert_eq!(advisories.try_recv().unwrap().operation, "notifications.fetch");
    }

    #[tokio::test]
    async fn test_send_dedupes_realtime_echo() {
        let backend = MemoryBackend::new();
        let mut center = center(&backend, Permission::Granted);
        center.attach(account()).await;

        let record = center.send(draft("hello")).await.unwrap();
        tokio::task::yield_now().await;
        center.drain_events();

        assert_eq!(center.notifications().len(), 1);
        assert_eq!(center.notifications()[0].id, record.id);
        assert_eq!(center.unread_count(), 1);
    }

    #[tokio::test]
    async fn test_send_requires_account() {
        let backend = MemoryBackend::new();
        let mut center = center(&backend, Permission::Granted);
        assert!(matches!(
            center.send(draft("nobody")).await,
            Err(SyncError::NoAccount)
        ));
    }

    #[tokio::test]
    async fn test_clear_notification_mirrors_delete() {
        let backend = MemoryBackend::new();
        let first = backend.publish(&account(), draft("first"));
        backend.publish(&account(), draft("second"));

        let mut center = center(&backend, Permission::Granted);
        center.attach(account()).await;
        center.clear_notification(&first.id);
        center.flush().await;

        assert_eq!(center.notifications().len(), 1);
        assert_eq!(backend.notifications(&account()).len(), 1);
    }

    #[tokio::test]
    async fn test_detach_releases_subscription() {
        let backend = MemoryBackend::new();
        let mut center = center(&backend, Permission::Granted);
        center.attach(account()).await;
        center.schedule(draft("later"), Utc::now());
        assert_eq!(backend.subscriber_count(), 1);

        center.detach().await;

        assert_eq!(backend.subscriber_count(), 0);
        assert!(center.account().is_none());
        assert!(center.scheduled().is_empty());
        assert!(!center.is_live());
    }

    #[tokio::test]
    async fn test_reattach_replaces_subscription() {
        let backend = MemoryBackend::new();
        let mut center = center(&backend, Permission::Granted);
        center.attach(account()).await;
        center.attach(AccountId::new("acct_2")).await;

        assert_eq!(backend.subscriber_count(), 1);
        assert_eq!(center.account(), Some(&AccountId::new("acct_2")));
    }

    #[test]
    fn test_fire_due_drains_queue_without_permission() {
        let backend = MemoryBackend::new();
        let mut center = center(&backend, Permission::Denied);
        let now = Utc::now();
        center.schedule(draft("now"), now);
        let later = center.schedule(draft("later"), now + chrono::TimeDelta::hours(1));

        assert_eq!(center.fire_due(now), 1);
        assert!(center.cancel_scheduled(later));
        assert_eq!(center.fire_due(now + chrono::TimeDelta::hours(2)), 0);
    }
}
