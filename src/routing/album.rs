//! Album coalescing with a sliding debounce window.
//!
//! Posts sharing a group key are buffered in a [`PendingGroup`]. Every new
//! member cancels the group's timer and schedules a fresh one, so a group
//! completes only after a quiet period of `debounce` since its last member.
//! Completed groups are sent over an unbounded mpsc channel; the receiver
//! decides when and where to process them.
//!
//! A group is removed from the pending map under the same lock that
//! dispatches it, and each timer carries the generation it was scheduled
//! for. A late timer for a group that has since been extended, flushed, or
//! replaced finds a different generation and does nothing, so every group
//! completes exactly once.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{InboundMessage, SourceChannel};

/// Default quiet period before an album is considered complete.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Work run when a timer fires.
pub type TimerTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Source of delayed, cancellable work.
pub trait Scheduler: Send + Sync {
    /// Run `task` after `delay` unless the returned handle is cancelled first.
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle;
}

/// Cancellation token for a scheduled task.
///
/// Dropping the handle does not cancel the task.
pub struct TimerHandle {
    cancel: Box<dyn FnOnce() + Send>,
}

impl TimerHandle {
    /// Wrap a cancellation callback.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Box::new(cancel),
        }
    }

    /// Cancel the scheduled task if it has not run yet.
    pub fn cancel(self) {
        (self.cancel)();
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle").finish_non_exhaustive()
    }
}

/// [`Scheduler`] backed by Tokio tasks and `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        TimerHandle::new(move || handle.abort())
    }
}

/// A finished album, members in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedAlbum {
    /// Group key shared by all members.
    pub group_key: String,
    /// Channel the album was posted in.
    pub source: SourceChannel,
    /// Members in arrival order.
    pub messages: Vec<InboundMessage>,
}

/// Buffered state of one album that has not completed yet.
#[derive(Debug)]
struct PendingGroup {
    source: SourceChannel,
    messages: Vec<InboundMessage>,
    timer: Option<TimerHandle>,
    generation: u64,
}

#[derive(Debug, Default)]
struct PendingSet {
    groups: HashMap<String, PendingGroup>,
    next_generation: u64,
}

impl PendingSet {
    fn bump_generation(&mut self) -> u64 {
        self.next_generation = self.next_generation.wrapping_add(1);
        self.next_generation
    }
}

/// State shared between the aggregator and its timers.
#[derive(Debug)]
struct Shared {
    pending: Mutex<PendingSet>,
    completed_tx: mpsc::UnboundedSender<CompletedAlbum>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PendingSet> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Timer callback: complete `key` if it is still at `generation`.
    fn fire(&self, key: &str, generation: u64) {
        let mut pending = self.lock();
        let current = pending.groups.get(key).map(|g| g.generation);
        if current != Some(generation) {
            debug!(group = key, "stale album timer ignored");
            return;
        }
        if let Some(group) = pending.groups.remove(key) {
            self.dispatch(key.to_owned(), group);
        }
    }

    /// Hand a removed group to the receiver. Called with the lock held.
    fn dispatch(&self, group_key: String, group: PendingGroup) {
        debug!(group = %group_key, members = group.messages.len(), "album complete");
        let album = CompletedAlbum {
            group_key,
            source: group.source,
            messages: group.messages,
        };
        if let Err(e) = self.completed_tx.send(album) {
            warn!(group = %e.0.group_key, "album receiver closed, dropping completed album");
        }
    }
}

/// Buffers album members and emits each album once its window closes.
pub struct AlbumAggregator {
    shared: Arc<Shared>,
    scheduler: Arc<dyn Scheduler>,
    debounce: Duration,
}

impl std::fmt::Debug for AlbumAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlbumAggregator")
            .field("debounce", &self.debounce)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl AlbumAggregator {
    /// Create an aggregator and the receiver completed albums arrive on.
    pub fn new(
        debounce: Duration,
        scheduler: Arc<dyn Scheduler>,
    ) -> (Self, mpsc::UnboundedReceiver<CompletedAlbum>) {
        let (completed_tx, completed_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            pending: Mutex::new(PendingSet::default()),
            completed_tx,
        });
        let aggregator = Self {
            shared,
            scheduler,
            debounce,
        };
        (aggregator, completed_rx)
    }

    /// Aggregator driven by [`TokioScheduler`]. Must be used inside a Tokio runtime.
    pub fn with_tokio(debounce: Duration) -> (Self, mpsc::UnboundedReceiver<CompletedAlbum>) {
        Self::new(debounce, Arc::new(TokioScheduler))
    }

    /// Add a member to the album `group_key`, restarting its window.
    pub fn add(&self, group_key: String, message: InboundMessage) {
        let mut pending = self.shared.lock();
        let generation = pending.bump_generation();
        let timer = self.schedule_completion(group_key.clone(), generation);

        match pending.groups.entry(group_key) {
            Entry::Occupied(mut entry) => {
                let group = entry.get_mut();
                group.messages.push(message);
                group.generation = generation;
                if let Some(previous) = group.timer.replace(timer) {
                    previous.cancel();
                }
                let members = group.messages.len();
                debug!(group = %entry.key(), members, "album extended");
            }
            Entry::Vacant(entry) => {
                debug!(group = %entry.key(), "album started");
                entry.insert(PendingGroup {
                    source: message.source.clone(),
                    messages: vec![message],
                    timer: Some(timer),
                    generation,
                });
            }
        }
    }

    /// Complete every pending album now. Returns how many were flushed.
    pub fn flush_all(&self) -> usize {
        let mut pending = self.shared.lock();
        let groups: Vec<(String, PendingGroup)> = pending.groups.drain().collect();
        let flushed = groups.len();
        for (key, mut group) in groups {
            if let Some(timer) = group.timer.take() {
                timer.cancel();
            }
            self.shared.dispatch(key, group);
        }
        flushed
    }

    /// Number of albums still waiting for their window to close.
    pub fn pending_count(&self) -> usize {
        self.shared.lock().groups.len()
    }

    /// Whether `group_key` has a pending album.
    pub fn is_pending(&self, group_key: &str) -> bool {
        self.shared.lock().groups.contains_key(group_key)
    }

    fn schedule_completion(&self, group_key: String, generation: u64) -> TimerHandle {
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        self.scheduler.schedule(
            self.debounce,
            Box::pin(async move {
                if let Some(shared) = shared.upgrade() {
                    shared.fire(&group_key, generation);
                }
            }),
        )
    }
}

impl Drop for AlbumAggregator {
    fn drop(&mut self) {
        let remaining = self.flush_all();
        if remaining > 0 {
            warn!(remaining, "album aggregator dropped with pending albums, flushed them");
        }
    }
}
