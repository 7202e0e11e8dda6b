//! Optimistic write queue.
//!
//! Locally created items are stamped with a 64-bit hash, queued, and sent in
//! batches. Hashes of sent items wait in a sorted list until the server's
//! echo brings them back, which is how a client tells its own appends apart
//! from everybody else's.
//!
//! ```text
//! push ──▶ queued ──begin_send──▶ sending ──complete_send──▶ (done)
//!                                    │
//!                                    └─ hashes ──▶ waiting ──take_waiting──▶ echo
//! ```

use bytes::{Buf, BufMut, Bytes};

use crate::message::WireItem;

/// An item that carries the hash the write queue matches echoes with.
pub trait HashedItem {
    /// The stored hash.
    fn sync_hash(&self) -> u64;

    /// Stamp the item with `hash`.
    fn set_sync_hash(&mut self, hash: u64);
}

/// Pending appends of one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArraySyncQueue<T> {
    sending: Vec<T>,
    queued: Vec<T>,
    waiting: Vec<u64>,
    next_hash: u64,
}

impl<T> Default for ArraySyncQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ArraySyncQueue<T> {
    /// Create an empty queue with a random hash seed.
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    /// Create an empty queue whose first hash is `seed + 1`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            sending: Vec::new(),
            queued: Vec::new(),
            waiting: Vec::new(),
            next_hash: seed,
        }
    }

    /// The batch taken for sending and not yet acknowledged.
    pub fn sending(&self) -> &[T] {
        &self.sending
    }

    /// Items not sent yet.
    pub fn queued(&self) -> &[T] {
        &self.queued
    }

    /// Hashes of sent items whose echo has not arrived, ascending.
    pub fn waiting(&self) -> &[u64] {
        &self.waiting
    }

    /// Items queued or in flight.
    pub fn len(&self) -> usize {
        self.sending.len() + self.queued.len()
    }

    /// Whether nothing is queued or in flight.
    pub fn is_empty(&self) -> bool {
        self.sending.is_empty() && self.queued.is_empty()
    }

    /// Whether a batch is waiting for its acknowledgement.
    pub fn is_sending(&self) -> bool {
        !self.sending.is_empty()
    }

    fn next_hash(&mut self) -> u64 {
        self.next_hash = self.next_hash.wrapping_add(1);
        self.next_hash
    }

    fn insert_waiting(&mut self, hash: u64) {
        if let Err(pos) = self.waiting.binary_search(&hash) {
            self.waiting.insert(pos, hash);
        }
    }

    /// Remove `hash` from the waiting list, reporting whether it was there.
    pub fn take_waiting(&mut self, hash: u64) -> bool {
        match self.waiting.binary_search(&hash) {
            Ok(pos) => {
                self.waiting.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    /// Forget the acknowledged batch.
    pub fn complete_send(&mut self) -> Vec<T> {
        std::mem::take(&mut self.sending)
    }
}

impl<T: HashedItem + Clone> ArraySyncQueue<T> {
    /// Stamp `items` with fresh hashes and queue them.
    pub fn push(&mut self, items: Vec<T>) -> Vec<u64> {
        let mut hashes = Vec::with_capacity(items.len());
        for mut item in items {
            let hash = self.next_hash();
            item.set_sync_hash(hash);
            hashes.push(hash);
            self.queued.push(item);
        }
        hashes
    }

    /// Take the next batch to send.
    ///
    /// An unacknowledged batch is handed out again as is; otherwise up to
    /// `max` queued items (all of them for `0`) become the new batch. Their
    /// hashes start waiting for the echo right away, since the echo may beat
    /// the acknowledgement.
    pub fn begin_send(&mut self, max: usize) -> Option<Vec<T>> {
        if self.sending.is_empty() {
            if self.queued.is_empty() {
                return None;
            }
            let take = if max == 0 {
                self.queued.len()
            } else {
                max.min(self.queued.len())
            };
            self.sending = self.queued.drain(..take).collect();
        }
        let hashes: Vec<u64> = self.sending.iter().map(HashedItem::sync_hash).collect();
        for hash in hashes {
            self.insert_waiting(hash);
        }
        Some(self.sending.clone())
    }

    /// Forget the waiting hashes of acknowledged batches.
    ///
    /// Only the in-flight batch keeps waiting. Used when the view is reset
    /// and echoes of earlier batches can no longer arrive as notifications.
    pub fn forget_settled(&mut self) {
        let in_flight: Vec<u64> = self.sending.iter().map(HashedItem::sync_hash).collect();
        self.waiting.retain(|hash| in_flight.contains(hash));
    }

    /// Give up on the in-flight batch, returning its items.
    pub fn drop_sending(&mut self) -> Vec<T> {
        let dropped = std::mem::take(&mut self.sending);
        for item in &dropped {
            self.take_waiting(item.sync_hash());
        }
        dropped
    }
}

impl<T: WireItem> WireItem for ArraySyncQueue<T> {
    fn encode(&self, buf: &mut impl BufMut) {
        self.sending.encode(buf);
        self.queued.encode(buf);
        self.waiting.encode(buf);
        buf.put_u64(self.next_hash);
    }

    fn decode(buf: &mut impl Buf) -> Option<Self> {
        let sending = Vec::decode(buf)?;
        let queued = Vec::decode(buf)?;
        let mut waiting: Vec<u64> = Vec::decode(buf)?;
        let next_hash = u64::decode(buf)?;
        waiting.sort_unstable();
        waiting.dedup();
        Some(Self {
            sending,
            queued,
            waiting,
            next_hash,
        })
    }

    fn encoded_len(&self) -> usize {
        self.sending.encoded_len() + self.queued.encoded_len() + self.waiting.encoded_len() + 8
    }
}

impl<T: WireItem> ArraySyncQueue<T> {
    /// Encode the queue for persistence.
    pub fn save(&self) -> Bytes {
        self.encode_to_bytes()
    }

    /// Restore a saved queue. A restored in-flight batch is sent first.
    pub fn load(data: &[u8]) -> Option<Self> {
        Self::decode_from_slice(data)
    }
}
