//! Best-effort mirroring of local mutations to a remote store.
//!
//! Every mutation is applied locally first; the matching remote write is then
//! handed to a [`RemoteMirror`], which runs it in the background and never
//! rolls the local change back. Failures are captured and published as
//! [`Advisory`] values.
//!
//! # Ordering
//!
//! - [`WriteOrdering::Unordered`]: each write is spawned independently, so two
//!   rapid writes to the same line may complete in either order.
//! - [`WriteOrdering::PerKey`]: writes that share a [`Lane`] run one at a time
//!   in issuance order. [`Lane::All`] writes (clear-all style) wait for every
//!   earlier write and hold back every later one. A queued write whose target
//!   has already been superseded by a newer write is skipped, since each write
//!   carries the full desired value for its target.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::{Advisory, report_failure};
use crate::remote::StoreError;

const ADVISORY_CAPACITY: usize = 64;

/// A boxed remote write.
pub type WriteFuture = Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'static>>;

/// Box a remote write for [`RemoteMirror::submit`].
pub fn boxed_write<F>(write: F) -> WriteFuture
where
    F: Future<Output = Result<(), StoreError>> + Send + 'static,
{
    Box::pin(write)
}

/// How concurrent remote writes are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WriteOrdering {
    /// Fire-and-forget; completion order is not guaranteed.
    Unordered,
    /// One in-flight write per lane, in issuance order, with coalescing.
    #[default]
    PerKey,
}

impl FromStr for WriteOrdering {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unordered" => Ok(Self::Unordered),
            "per-key" | "per_key" | "perkey" => Ok(Self::PerKey),
            other => Err(format!("unknown write ordering '{other}' (expected per-key or unordered)")),
        }
    }
}

impl fmt::Display for WriteOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unordered => "unordered",
            Self::PerKey => "per-key",
        })
    }
}

/// Ordering scope of a write.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Lane {
    /// Ordered with other writes in the same named lane.
    Key(String),
    /// Ordered after every earlier write and before every later one.
    All,
}

/// Describes a remote write for ordering, coalescing and reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteIntent {
    /// Operation name used in logs and advisories.
    pub operation: &'static str,
    pub lane: Lane,
    /// Exact remote location the write sets. A later write with the same
    /// target supersedes this one.
    pub target: String,
}

impl WriteIntent {
    #[must_use]
    pub fn new(operation: &'static str, lane: Lane, target: impl Into<String>) -> Self {
        Self {
            operation,
            lane,
            target: target.into(),
        }
    }
}

/// Signalled when the owning write task finishes (its sender is dropped).
#[derive(Clone)]
struct Completion(watch::Receiver<()>);

impl Completion {
    fn new() -> (watch::Sender<()>, Self) {
        let (tx, rx) = watch::channel(());
        (tx, Self(rx))
    }

    async fn wait(mut self) {
        while self.0.changed().await.is_ok() {}
    }

    fn is_done(&self) -> bool {
        self.0.has_changed().is_err()
    }
}

/// Runs remote writes in the background.
pub struct RemoteMirror {
    ordering: WriteOrdering,
    lanes: HashMap<String, Completion>,
    barrier: Option<Completion>,
    generations: HashMap<String, Arc<AtomicU64>>,
    in_flight: JoinSet<()>,
    advisories: broadcast::Sender<Advisory>,
}

impl RemoteMirror {
    #[must_use]
    pub fn new(ordering: WriteOrdering) -> Self {
        let (advisories, _) = broadcast::channel(ADVISORY_CAPACITY);
        Self {
            ordering,
            lanes: HashMap::new(),
            barrier: None,
            generations: HashMap::new(),
            in_flight: JoinSet::new(),
            advisories,
        }
    }

    #[must_use]
    pub const fn ordering(&self) -> WriteOrdering {
        self.ordering
    }

    /// Receive advisories for failed background operations.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Advisory> {
        self.advisories.subscribe()
    }

    /// Publish an advisory that did not come from a mirrored write.
    pub fn advise(&self, advisory: Advisory) {
        // No listeners is fine
        let _ = self.advisories.send(advisory);
    }

    /// Number of writes not yet reaped.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Hand a write to the background. Never blocks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(&mut self, intent: WriteIntent, write: WriteFuture) {
        self.reap();
        let advisories = self.advisories.clone();
        let operation = intent.operation;

        match self.ordering {
            WriteOrdering::Unordered => {
                self.in_flight.spawn(run(operation, write, advisories));
            }
            WriteOrdering::PerKey => {
                let generation = Arc::clone(self.generations.entry(intent.target.clone()).or_default());
                let ticket = generation.fetch_add(1, Ordering::SeqCst) + 1;
                let (done, completion) = Completion::new();

                let waits: Vec<Completion> = match intent.lane {
                    Lane::Key(lane) => self
                        .lanes
                        .insert(lane, completion)
                        .or_else(|| self.barrier.clone())
                        .into_iter()
                        .collect(),
                    Lane::All => {
                        let mut waits: Vec<_> = self.lanes.drain().map(|(_, c)| c).collect();
                        waits.extend(self.barrier.replace(completion));
                        waits
                    }
                };

                let target = intent.target;
                self.in_flight.spawn(async move {
                    for wait in waits {
                        wait.wait().await;
                    }
                    if generation.load(Ordering::SeqCst) == ticket {
                        run(operation, write, advisories).await;
                    } else {
                        debug!(operation, target, "Skipping superseded remote write");
                    }
                    drop(done);
                });
            }
        }
    }

    /// Wait for every submitted write to finish.
    pub async fn flush(&mut self) {
        while let Some(result) = self.in_flight.join_next().await {
            log_join_error(result);
        }
        self.prune();
    }

    fn reap(&mut self) {
        while let Some(result) = self.in_flight.try_join_next() {
            log_join_error(result);
        }
        self.prune();
    }

    fn prune(&mut self) {
        self.lanes.retain(|_, completion| !completion.is_done());
        if self.barrier.as_ref().is_some_and(Completion::is_done) {
            self.barrier = None;
        }
        self.generations
            .retain(|_, generation| Arc::strong_count(generation) > 1);
    }
}

impl fmt::Debug for RemoteMirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteMirror")
            .field("ordering", &self.ordering)
            .field("in_flight", &self.in_flight.len())
            .field("lanes", &self.lanes.len())
            .finish_non_exhaustive()
    }
}

impl Drop for RemoteMirror {
    fn drop(&mut self) {
        // In-flight writes are allowed to finish on their own.
        self.in_flight.detach_all();
    }
}

async fn run(operation: &'static str, write: WriteFuture, advisories: broadcast::Sender<Advisory>) {
    match write.await {
        Ok(()) => debug!(operation, "Remote write applied"),
        Err(e) => {
            let advisory = report_failure(operation, &e);
            let _ = advisories.send(advisory);
        }
    }
}

fn log_join_error(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        warn!(error = %e, "Remote write task did not complete");
    }
}
