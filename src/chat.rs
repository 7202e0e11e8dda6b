//! Chat messages, read cursors and unread counting on top of the queued
//! client.
//!
//! A chat is a synced sequence of [`ChatMessage`]s. Every participant has a
//! read cursor (`last_read`, the number of messages they have read). The
//! unread count of a participant is exact because it comes from server
//! totals; the preview message is only exact when the whole unread span is
//! loaded.

use bytes::{Buf, BufMut};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{
    collections::{Indexed, PartialSet},
    error::Result,
    message::WireItem,
    queue::HashedItem,
    queued_client::{QueueDelegate, QueuedClient, SendOutcome},
    remote::SyncRemote,
};

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatMessage<C> {
    /// Id of the author.
    pub from: u64,
    /// Send time in milliseconds since the Unix epoch.
    pub time: u64,
    /// Write queue hash.
    pub hash: u64,
    /// Application content.
    pub content: C,
}

impl<C> ChatMessage<C> {
    /// Create a message.
    pub fn new(from: u64, time: u64, content: C) -> Self {
        Self {
            from,
            time,
            hash: 0,
            content,
        }
    }
}

impl<C> HashedItem for ChatMessage<C> {
    fn sync_hash(&self) -> u64 {
        self.hash
    }

    fn set_sync_hash(&mut self, hash: u64) {
        self.hash = hash;
    }
}

impl<C: WireItem> WireItem for ChatMessage<C> {
    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.from);
        buf.put_u64(self.time);
        buf.put_u64(self.hash);
        self.content.encode(buf);
    }

    fn decode(buf: &mut impl Buf) -> Option<Self> {
        Some(Self {
            from: u64::decode(buf)?,
            time: u64::decode(buf)?,
            hash: u64::decode(buf)?,
            content: C::decode(buf)?,
        })
    }

    fn encoded_len(&self) -> usize {
        24 + self.content.encoded_len()
    }
}

/// A chat member and their read cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Participant {
    /// Member id, matching [`ChatMessage::from`].
    pub id: u64,
    /// Number of messages read.
    pub last_read: u64,
}

impl Participant {
    /// A participant who has read nothing.
    pub const fn new(id: u64) -> Self {
        Self { id, last_read: 0 }
    }
}

/// Unread state of one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadSummary<T> {
    /// Number of unread messages.
    pub count: u64,
    /// Latest loaded message after the read cursor that was discounted from
    /// `count`, such as the reader's own last reply.
    pub last_message: Option<Indexed<T>>,
    /// Whether the whole unread span was loaded, making `last_message` exact.
    pub exact_preview: bool,
}

/// Count unread items after `last_read`.
///
/// Starts from `items_count - last_read`, then walks the newest loaded window
/// from the read cursor and discounts every item `counts` rejects. The last
/// discounted item becomes the preview. Items outside that window cannot be
/// checked and count as unread.
pub fn count_unread<T: Clone>(
    items: &PartialSet<T>,
    items_count: u64,
    last_read: u64,
    counts: impl Fn(&T) -> bool,
) -> UnreadSummary<T> {
    let mut count = items_count.saturating_sub(last_read);
    if count == 0 {
        return UnreadSummary {
            count,
            last_message: None,
            exact_preview: true,
        };
    }
    let Some(tail) = items.last() else {
        return UnreadSummary {
            count,
            last_message: None,
            exact_preview: false,
        };
    };

    let mut last_message = None;
    for item in tail.iter_from(last_read) {
        if !counts(item.value) {
            count = count.saturating_sub(1);
            last_message = Some(Indexed::new(item.index, item.value.clone()));
        }
    }

    UnreadSummary {
        count,
        last_message,
        exact_preview: last_read >= tail.index && tail.end() >= items_count,
    }
}

/// Decides which messages count as unread for a reader.
#[auto_impl::auto_impl(Box, Arc)]
pub trait UnreadPolicy<C>: Send + Sync + 'static {
    /// Whether `message` counts as unread for `reader`.
    fn counts_as_unread(&self, message: &ChatMessage<C>, reader: &Participant) -> bool;
}

/// Counts every message not written by the reader.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotFromReader;

impl<C> UnreadPolicy<C> for NotFromReader {
    fn counts_as_unread(&self, message: &ChatMessage<C>, reader: &Participant) -> bool {
        message.from != reader.id
    }
}

/// A read cursor change reported by [`ChatSession::update_participants`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEvent<C> {
    /// The local sender read further; their unread state was recomputed.
    SenderRead {
        /// The sender after the change.
        participant: Participant,
        /// Fresh unread state of the sender.
        unread: UnreadSummary<ChatMessage<C>>,
    },
    /// Another participant read further.
    ParticipantRead(Participant),
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A chat seen by one sender.
pub struct ChatSession<C, R, D, U = NotFromReader> {
    client: QueuedClient<ChatMessage<C>, R, D>,
    sender_id: u64,
    participants: Vec<Participant>,
    policy: U,
}

impl<C, R, D, U> ChatSession<C, R, D, U>
where
    C: Clone + PartialEq + Send + Sync + 'static,
    R: SyncRemote<ChatMessage<C>>,
    D: QueueDelegate<ChatMessage<C>>,
    U: UnreadPolicy<C>,
{
    /// Create a session for `sender_id`.
    pub fn new(client: QueuedClient<ChatMessage<C>, R, D>, sender_id: u64, policy: U) -> Self {
        Self {
            client,
            sender_id,
            participants: vec![Participant::new(sender_id)],
            policy,
        }
    }

    /// The queued client.
    pub fn client(&self) -> &QueuedClient<ChatMessage<C>, R, D> {
        &self.client
    }

    /// The queued client, mutably.
    pub fn client_mut(&mut self) -> &mut QueuedClient<ChatMessage<C>, R, D> {
        &mut self.client
    }

    /// Id of the local sender.
    pub fn sender_id(&self) -> u64 {
        self.sender_id
    }

    /// Known participants, ordered by id.
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    /// Participant with `id`.
    pub fn participant(&self, id: u64) -> Option<&Participant> {
        self.participants
            .binary_search_by_key(&id, |p| p.id)
            .ok()
            .map(|pos| &self.participants[pos])
    }

    /// The local sender.
    pub fn sender(&self) -> Participant {
        self.participant(self.sender_id)
            .copied()
            .unwrap_or(Participant::new(self.sender_id))
    }

    fn upsert(&mut self, participant: Participant) -> Option<Participant> {
        match self
            .participants
            .binary_search_by_key(&participant.id, |p| p.id)
        {
            Ok(pos) => Some(std::mem::replace(&mut self.participants[pos], participant)),
            Err(pos) => {
                self.participants.insert(pos, participant);
                None
            }
        }
    }

    /// Queue `contents` as messages from the sender and send them.
    pub async fn send(&mut self, contents: Vec<C>) -> SendOutcome {
        let from = self.sender_id;
        let time = now_millis();
        let messages = contents
            .into_iter()
            .map(|content| ChatMessage::new(from, time, content))
            .collect();
        self.client.append(messages).await
    }

    /// Replace the content of the loaded message at `index`.
    ///
    /// Returns `Ok(false)` without asking the server if the message is not
    /// loaded.
    pub async fn edit(&self, index: u64, content: C) -> Result<bool> {
        let Some(message) = self.client.client().items().get(index) else {
            return Ok(false);
        };
        let mut message = message.clone();
        message.content = content;
        self.client
            .client()
            .update_item(Indexed::new(index, message))
            .await?;
        Ok(true)
    }

    /// Move the sender's read cursor forward to `index`.
    ///
    /// The cursor is clamped to the server item count and never moves back.
    /// Returns the updated sender for publishing, or `None` if nothing moved.
    pub fn mark_read(&mut self, index: u64) -> Option<Participant> {
        let index = index.min(self.client.client().remote_header().items_count);
        let mut sender = self.sender();
        if index <= sender.last_read {
            return None;
        }
        sender.last_read = index;
        self.upsert(sender);
        tracing::trace!(last_read = index, "read cursor advanced");
        Some(sender)
    }

    /// Unread state of `reader`.
    pub fn unread_for(&self, reader: &Participant) -> UnreadSummary<ChatMessage<C>> {
        let client = self.client.client();
        count_unread(
            client.items(),
            client.remote_header().items_count,
            reader.last_read,
            |message| self.policy.counts_as_unread(message, reader),
        )
    }

    /// Unread state of the sender.
    pub fn unread(&self) -> UnreadSummary<ChatMessage<C>> {
        self.unread_for(&self.sender())
    }

    /// Apply participant state from the server.
    ///
    /// Reports every participant whose read cursor changed.
    pub fn update_participants(
        &mut self,
        participants: impl IntoIterator<Item = Participant>,
    ) -> Vec<ReadEvent<C>> {
        let mut events = Vec::new();
        for participant in participants {
            let old = self.upsert(participant);
            if old.map(|p| p.last_read) == Some(participant.last_read) {
                continue;
            }
            if participant.id == self.sender_id {
                events.push(ReadEvent::SenderRead {
                    participant,
                    unread: self.unread_for(&participant),
                });
            } else {
                events.push(ReadEvent::ParticipantRead(participant));
            }
        }
        events
    }
}
