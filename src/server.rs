//! Authoritative side of the sync protocol.
//!
//! [`ArraySyncServer`] owns the full sequence and the edit log. It answers
//! load requests, applies writes and fans out a [`Notification`] for every
//! write to all subscribers, the writer included. It does no locking of its
//! own: callers serialize access, typically through [`SharedServer`].

use async_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::{
    collections::Indexed,
    config::SyncConfig,
    error::{Error, Result},
    message::{
        Cleared, Header, ItemsAdded, ItemsUpdated, LoadNewRequest, LoadNewResponse,
        LoadPreviousRequest, LoadPreviousResponse, Notification, Request, Response, WriteAck,
    },
};

#[cfg(feature = "metrics")]
use crate::metrics;

/// Server-side item policy.
///
/// Decides how an edit is folded into the stored item, which items are
/// accepted, and lets the server stamp items with their final position.
#[auto_impl::auto_impl(Box, Arc)]
pub trait ItemPolicy<T>: Send + Sync + 'static {
    /// Combine the stored item with an incoming edit.
    ///
    /// The default replaces the stored item.
    fn merge(&self, _old: &T, new: T) -> T {
        new
    }

    /// Check an incoming item before any state changes.
    ///
    /// Returning `Err(reason)` rejects the whole write.
    fn validate(&self, _item: &T) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Called for every item right before it is stored at `index`.
    fn will_add(&self, _index: u64, _item: &mut T) {}
}

/// Policy that accepts everything and keeps the newest edit.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriteWins;

impl<T> ItemPolicy<T> for LastWriteWins {}

/// Policy built from a merge function.
///
/// ```ignore
/// let policy = MergeWith(|old: &Message, mut new: Message| {
///     new.time = old.time;
///     new
/// });
/// ```
#[derive(Debug, Clone, Copy)]
pub struct MergeWith<F>(pub F);

impl<T, F> ItemPolicy<T> for MergeWith<F>
where
    F: Fn(&T, T) -> T + Send + Sync + 'static,
{
    fn merge(&self, old: &T, new: T) -> T {
        (self.0)(old, new)
    }
}

/// A server shared between connections.
pub type SharedServer<T, P = LastWriteWins> = Arc<Mutex<ArraySyncServer<T, P>>>;

/// Authoritative sequence with an edit log.
pub struct ArraySyncServer<T, P = LastWriteWins> {
    config: SyncConfig,
    policy: P,
    version: u64,
    items: Vec<T>,
    updates: Vec<u64>,
    subscribers: Vec<Sender<Notification<T>>>,
}

impl<T> ArraySyncServer<T, LastWriteWins>
where
    T: Clone + Send + 'static,
{
    /// Create a server that keeps the newest edit of every item.
    pub fn with_config(config: SyncConfig) -> Result<Self> {
        Self::new(config, LastWriteWins)
    }
}

impl<T, P> ArraySyncServer<T, P>
where
    T: Clone + Send + 'static,
    P: ItemPolicy<T>,
{
    /// Create an empty server at version 0.
    pub fn new(config: SyncConfig, policy: P) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            policy,
            version: 0,
            items: Vec::new(),
            updates: Vec::new(),
            subscribers: Vec::new(),
        })
    }

    /// Wrap the server for sharing between connections.
    pub fn into_shared(self) -> SharedServer<T, P> {
        Arc::new(Mutex::new(self))
    }

    /// Current server header.
    pub fn header(&self) -> Header {
        Header::new(self.version, self.len(), self.updates.len() as u64)
    }

    /// Number of stored items.
    pub fn len(&self) -> u64 {
        self.items.len() as u64
    }

    /// Whether the sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The full sequence.
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Positions edited since the last clear, in edit order.
    pub fn edit_log(&self) -> &[u64] {
        &self.updates
    }

    /// The configuration in use.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.iter().filter(|tx| !tx.is_closed()).count()
    }

    /// Register a subscriber for write notifications.
    pub fn subscribe(&mut self) -> Receiver<Notification<T>> {
        let (tx, rx) = async_channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    fn broadcast(&mut self, notification: Notification<T>) {
        tracing::trace!(
            kind = notification.type_name(),
            subscribers = self.subscribers.len(),
            "broadcasting notification"
        );
        // Unbounded senders only fail once the receiver is gone.
        self.subscribers
            .retain(|tx| tx.try_send(notification.clone()).is_ok());
    }

    fn tail(&self) -> Indexed<Vec<T>> {
        let start = self.items.len().saturating_sub(self.config.block_size);
        Indexed::new(start as u64, self.items[start..].to_vec())
    }

    /// Current values of entries edited since `since.updates_size` that lie
    /// below `since.items_count`, each position once.
    fn updates_since(&self, since: &Header) -> Vec<Indexed<T>> {
        let mut positions: Vec<u64> = self.updates[since.updates_size as usize..]
            .iter()
            .copied()
            .filter(|&index| index < since.items_count)
            .collect();
        positions.sort_unstable();
        positions.dedup();
        positions
            .into_iter()
            .map(|index| Indexed::new(index, self.items[index as usize].clone()))
            .collect()
    }

    fn reset_reason(&self, client: &Header) -> Option<&'static str> {
        let server = self.header();
        if client.version != server.version {
            Some("version mismatch")
        } else if client.items_count > server.items_count {
            Some("client ahead of item count")
        } else if client.updates_size > server.updates_size {
            Some("client ahead of edit log")
        } else if self.config.max_updates > 0
            && server.updates_size - client.updates_size > self.config.max_updates as u64
        {
            Some("edit backlog too large")
        } else {
            None
        }
    }

    /// Answer a load-new request.
    ///
    /// A diverged client gets `should_reset` with the last page. Otherwise
    /// the response holds up to one page starting at the client's item count
    /// plus the current value of every already-known item edited since.
    pub fn load_new(&self, request: &LoadNewRequest) -> LoadNewResponse<T> {
        #[cfg(feature = "metrics")]
        metrics::record_load_new();

        let header = self.header();
        if let Some(reason) = self.reset_reason(&request.header) {
            tracing::debug!(
                reason,
                client = ?request.header,
                server = ?header,
                "load_new: forcing client reset"
            );
            #[cfg(feature = "metrics")]
            metrics::record_reset();
            return LoadNewResponse {
                header,
                should_reset: true,
                data: self.tail(),
                updates: Vec::new(),
            };
        }

        let start = request.header.items_count as usize;
        let end = self.items.len().min(start + self.config.block_size);
        let data = Indexed::new(start as u64, self.items[start..end].to_vec());
        let updates = self.updates_since(&request.header);

        tracing::trace!(
            data = ?data.range(),
            updates = updates.len(),
            remaining = self.items.len() - end,
            "load_new"
        );

        LoadNewResponse {
            header,
            should_reset: false,
            data,
            updates,
        }
    }

    /// Answer a load-previous request.
    ///
    /// The gap `start..end` is valid when `start <= end <= len`; the response
    /// then holds at most one page ending at `end`. Anything else resets.
    pub fn load_previous(&self, request: &LoadPreviousRequest) -> LoadPreviousResponse<T> {
        #[cfg(feature = "metrics")]
        metrics::record_load_previous();

        let header = self.header();
        let gap = &request.unloaded;
        let valid = request.version == self.version && gap.start <= gap.end && gap.end <= self.len();
        if !valid {
            tracing::debug!(
                version = request.version,
                gap = ?gap,
                server = ?header,
                "load_previous: forcing client reset"
            );
            #[cfg(feature = "metrics")]
            metrics::record_reset();
            return LoadPreviousResponse {
                header,
                should_reset: true,
                data: self.tail(),
            };
        }

        let start = gap
            .start
            .max(gap.end.saturating_sub(self.config.block_size as u64));
        let data = Indexed::new(start, self.items[start as usize..gap.end as usize].to_vec());
        tracing::trace!(data = ?data.range(), "load_previous");

        LoadPreviousResponse {
            header,
            should_reset: false,
            data,
        }
    }

    /// Append items, returning the position of the first one.
    ///
    /// Every item is validated before anything is stored. Appending nothing
    /// changes nothing and broadcasts nothing.
    pub fn add(&mut self, mut items: Vec<T>) -> Result<u64> {
        for item in &items {
            self.policy.validate(item).map_err(Error::Rejected)?;
        }

        let first = self.len();
        if items.is_empty() {
            return Ok(first);
        }

        for (offset, item) in items.iter_mut().enumerate() {
            self.policy.will_add(first + offset as u64, item);
        }
        self.items.extend(items.iter().cloned());

        #[cfg(feature = "metrics")]
        metrics::record_items_added(items.len());
        tracing::debug!(first, count = items.len(), "items added");

        let header = self.header();
        self.broadcast(Notification::Added(ItemsAdded {
            header,
            data: Indexed::new(first, items),
        }));
        Ok(first)
    }

    /// Merge `edit` into the stored items at its positions.
    ///
    /// Fails without changes if the range leaves the sequence or an item is
    /// rejected.
    pub fn update(&mut self, edit: Indexed<Vec<T>>) -> Result<()> {
        // An overflowing run reports `u64::MAX`, which no sequence reaches.
        let end = edit.checked_end().unwrap_or(u64::MAX);
        if end > self.len() {
            return Err(Error::OutOfRange {
                start: edit.index,
                end,
                len: self.len(),
            });
        }
        let range = edit.index..end;
        for item in &edit.value {
            self.policy.validate(item).map_err(Error::Rejected)?;
        }
        if edit.is_empty() {
            return Ok(());
        }

        let mut merged = Vec::with_capacity(edit.value.len());
        for (offset, new) in edit.value.into_iter().enumerate() {
            let index = range.start + offset as u64;
            let slot = &mut self.items[index as usize];
            let mut item = self.policy.merge(slot, new);
            self.policy.will_add(index, &mut item);
            *slot = item.clone();
            merged.push(item);
            self.updates.push(index);
        }

        #[cfg(feature = "metrics")]
        metrics::record_items_updated(merged.len());
        tracing::debug!(range = ?range, "items updated");

        let header = self.header();
        self.broadcast(Notification::Updated(ItemsUpdated {
            header,
            data: Indexed::new(range.start, merged),
        }));
        Ok(())
    }

    /// Wipe the sequence and the edit log, bumping the version.
    pub fn clear(&mut self) {
        self.version += 1;
        self.items.clear();
        self.updates.clear();

        #[cfg(feature = "metrics")]
        metrics::record_clear();
        tracing::debug!(version = self.version, "sequence cleared");

        let version = self.version;
        self.broadcast(Notification::Cleared(Cleared { version }));
    }

    /// Execute one RPC request.
    pub fn handle(&mut self, request: Request<T>) -> Response<T> {
        match request {
            Request::Add(items) => Response::Add(WriteAck::from_result(self.add(items))),
            Request::Edit(edit) => Response::Edit(WriteAck::from_result(self.update(edit))),
            Request::Clear => {
                self.clear();
                Response::Clear(WriteAck::Ok(()))
            }
            Request::LoadNewItems(request) => Response::LoadNewItems(self.load_new(&request)),
            Request::LoadPreviousItems(request) => {
                Response::LoadPreviousItems(self.load_previous(&request))
            }
        }
    }
}

impl<T, P> std::fmt::Debug for ArraySyncServer<T, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArraySyncServer")
            .field("version", &self.version)
            .field("items", &self.items.len())
            .field("updates", &self.updates.len())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
