//! Test helpers for sync clients.
//!
//! ## Features
//!
//! - **Event recording**: [`RecordingDelegate`] records every delegate
//!   callback of a client or queued client
//! - **Write failures**: [`FlakyRemote`] fails a configurable number of
//!   appends before letting them through
//!
//! ## Example
//!
//! ```ignore
//! use windowed_sync::testing::{FlakyRemote, RecordingDelegate};
//!
//! let remote = FlakyRemote::new(LocalRemote::new(server), 2, Error::Transport("down".into()));
//! let delegate = RecordingDelegate::new();
//! let client = QueuedClient::new(remote, delegate.clone(), SyncConfig::default())?;
//! ```

use std::{
    ops::Range,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

use crate::{
    client::SyncDelegate,
    collections::Indexed,
    error::{Error, Result},
    message::{LoadNewRequest, LoadNewResponse, LoadPreviousRequest, LoadPreviousResponse},
    queued_client::QueueDelegate,
    remote::SyncRemote,
};

/// A delegate callback, as recorded by [`RecordingDelegate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent<T> {
    /// `SyncDelegate::on_added`.
    Added(Indexed<Vec<T>>),
    /// `on_updated` of either delegate trait.
    Updated {
        /// Values after the change.
        new: Indexed<Vec<T>>,
        /// Values before the change.
        old: Indexed<Vec<T>>,
    },
    /// `on_reset` of either delegate trait.
    Reset,
    /// `QueueDelegate::on_new_added`.
    NewAdded(Indexed<Vec<T>>),
    /// `QueueDelegate::on_append_sent`.
    Sent(Indexed<Vec<T>>),
    /// `QueueDelegate::on_append_dropped`.
    Dropped {
        /// Number of dropped items.
        count: usize,
        /// The failure that caused the drop.
        error: Error,
    },
}

/// Delegate that records every callback.
///
/// Clones share the same log, so keep one clone for assertions and hand the
/// other to the client.
pub struct RecordingDelegate<T> {
    events: Arc<Mutex<Vec<SyncEvent<T>>>>,
    retry: Option<bool>,
}

impl<T> Clone for RecordingDelegate<T> {
    fn clone(&self) -> Self {
        Self {
            events: self.events.clone(),
            retry: self.retry,
        }
    }
}

impl<T> Default for RecordingDelegate<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RecordingDelegate<T> {
    /// Create a delegate with an empty log.
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            retry: None,
        }
    }

    /// Answer every `process_error` with `retry` instead of the default.
    pub fn with_retry(mut self, retry: bool) -> Self {
        self.retry = Some(retry);
        self
    }

    fn push(&self, event: SyncEvent<T>) {
        self.events.lock().push(event);
    }

    /// Forget all recorded events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Number of resets seen.
    pub fn resets(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, SyncEvent::Reset))
            .count()
    }

    fn ranges(&self, pick: impl Fn(&SyncEvent<T>) -> Option<Range<u64>>) -> Vec<Range<u64>> {
        self.events.lock().iter().filter_map(pick).collect()
    }

    /// Ranges reported by `on_added`.
    pub fn added_ranges(&self) -> Vec<Range<u64>> {
        self.ranges(|e| match e {
            SyncEvent::Added(items) => Some(items.range()),
            _ => None,
        })
    }

    /// Ranges reported by `on_new_added`.
    pub fn new_added_ranges(&self) -> Vec<Range<u64>> {
        self.ranges(|e| match e {
            SyncEvent::NewAdded(items) => Some(items.range()),
            _ => None,
        })
    }

    /// Ranges reported by `on_append_sent`.
    pub fn sent_ranges(&self) -> Vec<Range<u64>> {
        self.ranges(|e| match e {
            SyncEvent::Sent(items) => Some(items.range()),
            _ => None,
        })
    }

    /// Ranges reported by `on_updated`.
    pub fn updated_ranges(&self) -> Vec<Range<u64>> {
        self.ranges(|e| match e {
            SyncEvent::Updated { new, .. } => Some(new.range()),
            _ => None,
        })
    }

    /// Dropped batches as `(item count, error)`.
    pub fn dropped(&self) -> Vec<(usize, Error)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SyncEvent::Dropped { count, error } => Some((*count, error.clone())),
                _ => None,
            })
            .collect()
    }
}

impl<T: Clone> RecordingDelegate<T> {
    /// All recorded events, oldest first.
    pub fn events(&self) -> Vec<SyncEvent<T>> {
        self.events.lock().clone()
    }
}

impl<T> SyncDelegate<T> for RecordingDelegate<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn on_added(&self, items: &Indexed<Vec<T>>) {
        self.push(SyncEvent::Added(items.clone()));
    }

    fn on_updated(&self, new: &Indexed<Vec<T>>, old: &Indexed<Vec<T>>) {
        self.push(SyncEvent::Updated {
            new: new.clone(),
            old: old.clone(),
        });
    }

    fn on_reset(&self) {
        self.push(SyncEvent::Reset);
    }
}

impl<T> QueueDelegate<T> for RecordingDelegate<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn on_new_added(&self, items: &Indexed<Vec<T>>) {
        self.push(SyncEvent::NewAdded(items.clone()));
    }

    fn on_append_sent(&self, items: &Indexed<Vec<T>>) {
        self.push(SyncEvent::Sent(items.clone()));
    }

    fn on_updated(&self, new: &Indexed<Vec<T>>, old: &Indexed<Vec<T>>) {
        self.push(SyncEvent::Updated {
            new: new.clone(),
            old: old.clone(),
        });
    }

    fn on_reset(&self) {
        self.push(SyncEvent::Reset);
    }

    fn process_error(&self, error: &Error) -> bool {
        self.retry.unwrap_or_else(|| error.is_transient())
    }

    fn on_append_dropped(&self, items: &[T], error: &Error) {
        self.push(SyncEvent::Dropped {
            count: items.len(),
            error: error.clone(),
        });
    }
}

/// Statistics collected by a [`FlakyRemote`].
#[derive(Debug, Default)]
pub struct FlakyStats {
    /// Append requests issued.
    pub adds_total: AtomicU64,
    /// Append requests failed on purpose.
    pub adds_failed: AtomicU64,
}

impl FlakyStats {
    /// Appends that reached the wrapped remote.
    pub fn adds_delivered(&self) -> u64 {
        self.adds_total.load(Ordering::Relaxed) - self.adds_failed.load(Ordering::Relaxed)
    }
}

/// Remote that fails the first `failures` appends with a fixed error.
///
/// Every other request passes straight through.
pub struct FlakyRemote<R> {
    inner: R,
    remaining: AtomicU64,
    error: Error,
    stats: FlakyStats,
}

impl<R> FlakyRemote<R> {
    /// Wrap `inner`, failing its next `failures` appends with `error`.
    pub fn new(inner: R, failures: u64, error: Error) -> Self {
        Self {
            inner,
            remaining: AtomicU64::new(failures),
            error,
            stats: FlakyStats::default(),
        }
    }

    /// Fail `failures` more appends.
    pub fn fail_next(&self, failures: u64) {
        self.remaining.store(failures, Ordering::Relaxed);
    }

    /// Collected statistics.
    pub fn stats(&self) -> &FlakyStats {
        &self.stats
    }

    /// The wrapped remote.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    fn take_failure(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl<T, R> SyncRemote<T> for FlakyRemote<R>
where
    T: Send + 'static,
    R: SyncRemote<T>,
{
    async fn load_new(&self, request: LoadNewRequest) -> Result<LoadNewResponse<T>> {
        self.inner.load_new(request).await
    }

    async fn load_previous(&self, request: LoadPreviousRequest) -> Result<LoadPreviousResponse<T>> {
        self.inner.load_previous(request).await
    }

    async fn add(&self, items: Vec<T>) -> Result<u64> {
        self.stats.adds_total.fetch_add(1, Ordering::Relaxed);
        if self.take_failure() {
            self.stats.adds_failed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(error = %self.error, "failing append on purpose");
            return Err(self.error.clone());
        }
        self.inner.add(items).await
    }

    async fn update(&self, edit: Indexed<Vec<T>>) -> Result<()> {
        self.inner.update(edit).await
    }

    async fn clear(&self) -> Result<()> {
        self.inner.clear().await
    }
}
