//! Locally scheduled notifications.
//!
//! The queue is owned by a [`super::NotificationCenter`] and dies with it.

use std::fmt;

use chrono::{DateTime, Utc};

use cartsync_core::NotificationDraft;

/// Handle for cancelling a scheduled notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScheduleId(u64);

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sched_{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    id: ScheduleId,
    at: DateTime<Utc>,
    draft: NotificationDraft,
}

/// Drafts waiting for their fire time, ordered by due time then insertion.
#[derive(Debug, Default)]
pub struct ScheduledQueue {
    entries: Vec<Entry>,
    next_id: u64,
}

impl ScheduledQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, draft: NotificationDraft, at: DateTime<Utc>) -> ScheduleId {
        self.next_id += 1;
        let id = ScheduleId(self.next_id);
        let position = self.entries.partition_point(|e| e.at <= at);
        self.entries.insert(position, Entry { id, at, draft });
        id
    }

    /// Returns true if the entry was still pending.
    pub fn cancel(&mut self, id: ScheduleId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    /// Remove and return every draft due at or before `now`, earliest first.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<(ScheduleId, NotificationDraft)> {
        let due = self.entries.partition_point(|e| e.at <= now);
        self.entries
            .drain(..due)
            .map(|e| (e.id, e.draft))
            .collect()
    }

    /// When the earliest pending draft is due.
    #[must_use]
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.entries.first().map(|e| e.at)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
