//! Client side of the sync protocol.
//!
//! [`ArraySyncClient`] keeps a partial view of the server sequence in a
//! [`PartialSet`] and folds responses and notifications into it, reporting
//! only the net change to its [`SyncDelegate`].
//!
//! The client tracks two headers:
//!
//! - `header`, the sync cursor sent with `load_new`. Its `items_count` is the
//!   end of the data paged through so far; `updates_size` only moves with
//!   `load_new` responses.
//! - `remote_header`, the latest totals reported by the server.
//!
//! State changes only once a complete response is in hand, so dropping a
//! pending `load_new` or `load_previous` leaves the client untouched.

use bytes::Bytes;
use smallvec::SmallVec;
use std::ops::Range;

use crate::{
    collections::{Indexed, InsertResult, PartialSet},
    error::{Error, Result},
    message::{
        Header, ItemsAdded, ItemsUpdated, LoadNewRequest, LoadNewResponse, LoadPreviousRequest,
        LoadPreviousResponse, Notification, WireItem,
    },
    remote::SyncRemote,
};

/// Delegate trait for observing changes to a client's view.
///
/// Callbacks run synchronously inside the client call that caused them.
#[auto_impl::auto_impl(Box, Arc)]
pub trait SyncDelegate<T>: Send + Sync + 'static {
    /// Called with every run of positions loaded for the first time.
    fn on_added(&self, _items: &Indexed<Vec<T>>) {}

    /// Called when loaded items changed value.
    ///
    /// This also fires for data arriving through an add or a page load when
    /// it overwrites different local values.
    fn on_updated(&self, _new: &Indexed<Vec<T>>, _old: &Indexed<Vec<T>>) {}

    /// Called when the local view was thrown away; rebuild from scratch.
    fn on_reset(&self) {}
}

/// No-op delegate for when no handler is needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDelegate;

impl<T> SyncDelegate<T> for NoopDelegate {}

/// Summary of what one client operation changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientChanges {
    /// The view was discarded first.
    pub reset: bool,
    /// Ranges loaded for the first time.
    pub added: SmallVec<[Range<u64>; 2]>,
    /// Ranges whose loaded values changed.
    pub updated: Vec<Range<u64>>,
}

impl ClientChanges {
    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        !self.reset && self.added.is_empty() && self.updated.is_empty()
    }

    /// Total number of newly loaded positions.
    pub fn added_count(&self) -> u64 {
        self.added.iter().map(|r| r.end - r.start).sum()
    }
}

/// A header no server state matches: its version `u64::MAX` is never
/// reached, so loading with it always yields the latest page with
/// `should_reset`.
const UNSYNCED: Header = Header::new(u64::MAX, 0, 0);

/// Partial replica of a server sequence.
pub struct ArraySyncClient<T, R, D> {
    remote: R,
    delegate: D,
    header: Header,
    remote_header: Header,
    items: PartialSet<T>,
    reset_pending: bool,
}

impl<T, R, D> ArraySyncClient<T, R, D>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    R: SyncRemote<T>,
    D: SyncDelegate<T>,
{
    /// Create an empty client with an all-zero header.
    pub fn new(remote: R, delegate: D) -> Self {
        Self {
            remote,
            delegate,
            header: Header::default(),
            remote_header: Header::default(),
            items: PartialSet::new(),
            reset_pending: false,
        }
    }

    /// The sync cursor.
    pub fn header(&self) -> Header {
        self.header
    }

    /// Latest server totals seen in any response or notification.
    pub fn remote_header(&self) -> Header {
        self.remote_header
    }

    /// The loaded windows.
    pub fn items(&self) -> &PartialSet<T> {
        &self.items
    }

    /// The network layer.
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// The delegate.
    pub fn delegate(&self) -> &D {
        &self.delegate
    }

    /// Whether older items remain to be paged in with `load_previous`.
    pub fn has_more_previous(&self) -> bool {
        !self.items.last_unloaded_gap().is_empty()
    }

    /// Fetch new items and edits since the cursor.
    pub async fn load_new(&mut self) -> Result<ClientChanges> {
        let request = LoadNewRequest {
            header: self.header,
        };
        let response = self.remote.load_new(request).await?;
        Ok(self.apply_load_new(response))
    }

    /// Fetch the page right before the last unloaded gap.
    ///
    /// Does nothing if no gap is left.
    pub async fn load_previous(&mut self) -> Result<ClientChanges> {
        let unloaded = self.items.last_unloaded_gap();
        if unloaded.is_empty() {
            return Ok(ClientChanges::default());
        }
        let request = LoadPreviousRequest {
            version: self.header.version,
            unloaded,
        };
        let response = self.remote.load_previous(request).await?;
        Ok(self.apply_load_previous(response))
    }

    /// Drop the local view and reload the latest page.
    pub async fn clear_cache(&mut self) -> Result<ClientChanges> {
        let response = self
            .remote
            .load_new(LoadNewRequest { header: UNSYNCED })
            .await?;

        let mut changes = ClientChanges::default();
        self.reset_pending = false;
        self.reset_view("cache cleared", &mut changes);
        // The response resets too; the delegate already heard about it.
        self.reset_pending = true;
        let mut applied = self.apply_load_new(response);
        applied.reset = true;
        Ok(applied)
    }

    /// Ask the server to append `items`.
    ///
    /// Resolves to the position of the first item once the server accepted
    /// the write. The view changes when the echo arrives.
    pub async fn add(&self, items: Vec<T>) -> Result<u64> {
        self.remote.add(items).await
    }

    /// Ask the server to append one item.
    pub async fn add_item(&self, item: T) -> Result<u64> {
        self.add(vec![item]).await
    }

    /// Ask the server to edit a run of items.
    pub async fn update(&self, edit: Indexed<Vec<T>>) -> Result<()> {
        self.remote.update(edit).await
    }

    /// Ask the server to edit one item.
    pub async fn update_item(&self, item: Indexed<T>) -> Result<()> {
        self.update(item.into_run()).await
    }

    /// Ask the server to wipe the sequence.
    pub async fn clear(&self) -> Result<()> {
        self.remote.clear().await
    }

    fn reset_view(&mut self, reason: &str, changes: &mut ClientChanges) {
        tracing::debug!(reason, header = ?self.header, "client view reset");
        self.items.clear();
        changes.reset = true;
        if !self.reset_pending {
            self.delegate.on_reset();
        }
    }

    fn observe_remote(&mut self, header: Header) {
        if header.version != self.remote_header.version {
            self.remote_header = header;
        } else {
            self.remote_header.items_count = self.remote_header.items_count.max(header.items_count);
            self.remote_header.updates_size =
                self.remote_header.updates_size.max(header.updates_size);
        }
    }

    /// Insert loaded data, reporting overwritten and new positions.
    fn insert(&mut self, data: Indexed<Vec<T>>, changes: &mut ClientChanges) {
        if data.is_empty() {
            return;
        }
        let InsertResult {
            changed, new_spans, ..
        } = self.items.insert(data);

        for pair in &changed {
            self.delegate.on_updated(&pair.new, &pair.old);
            changes.updated.push(pair.new.range());
        }
        for span in new_spans {
            if let Some(added) = self.items.slice(span.clone()) {
                self.delegate.on_added(&added);
            }
            changes.added.push(span);
        }
    }

    /// Apply edits to the loaded parts of `data` only.
    fn apply_update(&mut self, data: Indexed<Vec<T>>, changes: &mut ClientChanges) {
        for part in self.items.covered(&data.range()) {
            self.insert(data.slice(part), changes);
        }
    }

    /// Fold a load-new response into the view.
    pub fn apply_load_new(&mut self, response: LoadNewResponse<T>) -> ClientChanges {
        let mut changes = ClientChanges::default();
        if response.should_reset {
            self.reset_view("server requested reset", &mut changes);
        } else if response.header.version != self.header.version {
            self.reset_view("version changed", &mut changes);
        }
        self.reset_pending = false;

        let header = response.header;
        let end = response.data.end();
        self.observe_remote(header);
        self.insert(response.data, &mut changes);
        for update in response.updates {
            self.apply_update(update.into_run(), &mut changes);
        }
        self.header = Header::new(header.version, end, header.updates_size);

        tracing::trace!(
            cursor = ?self.header,
            windows = %self.items,
            added = changes.added_count(),
            "load_new applied"
        );
        changes
    }

    /// Fold a load-previous response into the view.
    pub fn apply_load_previous(&mut self, response: LoadPreviousResponse<T>) -> ClientChanges {
        let mut changes = ClientChanges::default();
        let header = response.header;
        let reset = response.should_reset || header.version != self.header.version;
        if reset {
            let reason = if response.should_reset {
                "server requested reset"
            } else {
                "version changed"
            };
            self.reset_view(reason, &mut changes);
            self.reset_pending = false;
            self.header = Header::new(header.version, response.data.end(), header.updates_size);
        }

        self.observe_remote(header);
        self.insert(response.data, &mut changes);
        tracing::trace!(windows = %self.items, "load_previous applied");
        changes
    }

    /// Fold a server notification into the view.
    pub fn handle_notification(&mut self, notification: Notification<T>) -> ClientChanges {
        let mut changes = ClientChanges::default();
        match notification {
            Notification::Added(ItemsAdded { header, data }) => {
                if data.checked_end().is_none() {
                    tracing::warn!(index = data.index, "ignoring unaddressable added run");
                    return changes;
                }
                if !self.accept_version(header.version, &mut changes) {
                    return changes;
                }
                self.observe_remote(header);
                if data.index == self.header.items_count {
                    self.header.items_count = data.end();
                }
                self.insert(data, &mut changes);
            }
            Notification::Updated(ItemsUpdated { header, data }) => {
                if data.checked_end().is_none() {
                    tracing::warn!(index = data.index, "ignoring unaddressable updated run");
                    return changes;
                }
                if !self.accept_version(header.version, &mut changes) {
                    return changes;
                }
                self.observe_remote(header);
                self.apply_update(data, &mut changes);
            }
            Notification::Cleared(cleared) => {
                if cleared.version > self.header.version {
                    self.reset_pending = false;
                    self.reset_view("sequence cleared", &mut changes);
                    self.header = Header::new(cleared.version, 0, 0);
                    self.remote_header = self.header;
                }
            }
        }
        changes
    }

    /// Whether a notification of `version` applies to the current view.
    ///
    /// A newer version throws the view away; the next `load_new` then
    /// resets from the server.
    fn accept_version(&mut self, version: u64, changes: &mut ClientChanges) -> bool {
        if self.reset_pending || version < self.header.version {
            return false;
        }
        if version > self.header.version {
            self.reset_view("notification from newer version", changes);
            self.reset_pending = true;
            return false;
        }
        true
    }
}

impl<T, R, D> ArraySyncClient<T, R, D>
where
    T: WireItem + Clone + PartialEq + Send + Sync + 'static,
    R: SyncRemote<T>,
    D: SyncDelegate<T>,
{
    /// Decode and apply a notification frame.
    pub fn handle_notification_frame(&mut self, frame: &[u8]) -> Result<ClientChanges> {
        let notification = Notification::decode_from_slice(frame).ok_or_else(|| {
            Error::Decode(format!("malformed notification frame ({} bytes)", frame.len()))
        })?;
        Ok(self.handle_notification(notification))
    }

    /// Encode the cursor, the server totals and the loaded windows.
    pub fn snapshot(&self) -> Bytes {
        let ranges = self.items.ranges().to_vec();
        let mut buf = bytes::BytesMut::with_capacity(2 * Header::ENCODED_SIZE + ranges.encoded_len());
        self.header.encode(&mut buf);
        self.remote_header.encode(&mut buf);
        ranges.encode(&mut buf);
        buf.freeze()
    }

    /// Replace the view with a snapshot.
    ///
    /// The delegate sees a reset followed by every restored window. On error
    /// the client is left untouched.
    pub fn restore(&mut self, snapshot: &[u8]) -> Result<ClientChanges> {
        let malformed = || Error::Decode("malformed client snapshot".to_string());
        let mut cursor = std::io::Cursor::new(snapshot);
        let header = Header::decode(&mut cursor).ok_or_else(malformed)?;
        let remote_header = Header::decode(&mut cursor).ok_or_else(malformed)?;
        let ranges = Vec::<Indexed<Vec<T>>>::decode(&mut cursor).ok_or_else(malformed)?;
        let items = PartialSet::from_ranges(ranges).ok_or_else(malformed)?;

        let mut changes = ClientChanges::default();
        self.reset_pending = false;
        self.reset_view("restored from snapshot", &mut changes);
        self.header = header;
        self.remote_header = remote_header;
        self.items = items;
        for window in self.items.ranges() {
            self.delegate.on_added(window);
            changes.added.push(window.range());
        }
        Ok(changes)
    }
}

impl<T, R, D> std::fmt::Debug for ArraySyncClient<T, R, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArraySyncClient")
            .field("header", &self.header)
            .field("remote_header", &self.remote_header)
            .field("windows", &self.items.to_string())
            .field("reset_pending", &self.reset_pending)
            .finish()
    }
}
