//! Sync protocol message types.
//!
//! Requests flow client → server, responses back, and notifications are fanned
//! out by the server to every subscriber (the originator included). All of
//! them carry the server [`Header`] so a client can tell whether its view is
//! still compatible.

use bytes::{Buf, BufMut};
use std::ops::Range;

use super::codec::WireItem;
use crate::collections::Indexed;

/// Fingerprint of server state.
///
/// `version` changes only when the sequence is cleared; `items_count` and
/// `updates_size` never decrease between clears. A client header is
/// compatible with the server only while `version` matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Header {
    /// Generation of the sequence, bumped by every clear.
    pub version: u64,
    /// Number of items in the sequence.
    pub items_count: u64,
    /// Length of the edit log.
    pub updates_size: u64,
}

impl Header {
    /// Size of the header in bytes when encoded.
    pub const ENCODED_SIZE: usize = 24;

    /// Create a header from its three counters.
    pub const fn new(version: u64, items_count: u64, updates_size: u64) -> Self {
        Self {
            version,
            items_count,
            updates_size,
        }
    }
}

/// Ask for items appended (and edits made) since `header`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadNewRequest {
    /// The client's sync cursor.
    pub header: Header,
}

/// Answer to [`LoadNewRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadNewResponse<T> {
    /// Current server header.
    pub header: Header,
    /// The client must discard its view before applying `data`.
    pub should_reset: bool,
    /// Next page of items.
    pub data: Indexed<Vec<T>>,
    /// Current values of already-known items edited since the request.
    pub updates: Vec<Indexed<T>>,
}

/// Ask for the page right before the end of `unloaded`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoadPreviousRequest {
    /// Version the client's view belongs to.
    pub version: u64,
    /// Gap the client wants filled, newest part first.
    pub unloaded: Range<u64>,
}

/// Answer to [`LoadPreviousRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadPreviousResponse<T> {
    /// Current server header.
    pub header: Header,
    /// The client must discard its view before applying `data`.
    pub should_reset: bool,
    /// Items preceding the gap's upper bound.
    pub data: Indexed<Vec<T>>,
}

/// Items were appended to the server sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemsAdded<T> {
    /// Server header after the append.
    pub header: Header,
    /// The appended items at their assigned positions.
    pub data: Indexed<Vec<T>>,
}

/// Items were edited in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemsUpdated<T> {
    /// Server header after the edit.
    pub header: Header,
    /// The merged values now stored at those positions.
    pub data: Indexed<Vec<T>>,
}

/// The sequence was wiped and its version bumped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cleared {
    /// The new version.
    pub version: u64,
}

/// Server → client push message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification<T> {
    /// Items were appended.
    Added(ItemsAdded<T>),
    /// Items were edited.
    Updated(ItemsUpdated<T>),
    /// The sequence was cleared.
    Cleared(Cleared),
}

/// Notification type tags for encoding.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationTag {
    /// Items added.
    Added = 0,
    /// Items edited.
    Edited = 1,
    /// Sequence cleared.
    Cleared = 2,
}

impl TryFrom<u8> for NotificationTag {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(NotificationTag::Added),
            1 => Ok(NotificationTag::Edited),
            2 => Ok(NotificationTag::Cleared),
            _ => Err(value),
        }
    }
}

impl<T> Notification<T> {
    /// Get the notification tag.
    pub const fn tag(&self) -> NotificationTag {
        match self {
            Notification::Added(_) => NotificationTag::Added,
            Notification::Updated(_) => NotificationTag::Edited,
            Notification::Cleared(_) => NotificationTag::Cleared,
        }
    }

    /// Get a human-readable type name for tracing/logging.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Notification::Added(_) => "ItemsAdded",
            Notification::Updated(_) => "ItemsUpdated",
            Notification::Cleared(_) => "Cleared",
        }
    }
}

impl WireItem for Header {
    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.version);
        buf.put_u64(self.items_count);
        buf.put_u64(self.updates_size);
    }

    fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < Self::ENCODED_SIZE {
            return None;
        }
        Some(Header {
            version: buf.get_u64(),
            items_count: buf.get_u64(),
            updates_size: buf.get_u64(),
        })
    }

    fn encoded_len(&self) -> usize {
        Self::ENCODED_SIZE
    }
}

impl WireItem for LoadNewRequest {
    fn encode(&self, buf: &mut impl BufMut) {
        self.header.encode(buf);
    }

    fn decode(buf: &mut impl Buf) -> Option<Self> {
        Header::decode(buf).map(|header| LoadNewRequest { header })
    }

    fn encoded_len(&self) -> usize {
        Header::ENCODED_SIZE
    }
}

impl<T: WireItem> WireItem for LoadNewResponse<T> {
    fn encode(&self, buf: &mut impl BufMut) {
        self.header.encode(buf);
        self.should_reset.encode(buf);
        self.data.encode(buf);
        self.updates.encode(buf);
    }

    fn decode(buf: &mut impl Buf) -> Option<Self> {
        Some(LoadNewResponse {
            header: Header::decode(buf)?,
            should_reset: bool::decode(buf)?,
            data: Indexed::decode(buf)?,
            updates: Vec::decode(buf)?,
        })
    }

    fn encoded_len(&self) -> usize {
        Header::ENCODED_SIZE + 1 + self.data.encoded_len() + self.updates.encoded_len()
    }
}

impl WireItem for LoadPreviousRequest {
    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.version);
        self.unloaded.encode(buf);
    }

    fn decode(buf: &mut impl Buf) -> Option<Self> {
        Some(LoadPreviousRequest {
            version: u64::decode(buf)?,
            unloaded: Range::decode(buf)?,
        })
    }

    fn encoded_len(&self) -> usize {
        8 + 16
    }
}

impl<T: WireItem> WireItem for LoadPreviousResponse<T> {
    fn encode(&self, buf: &mut impl BufMut) {
        self.header.encode(buf);
        self.should_reset.encode(buf);
        self.data.encode(buf);
    }

    fn decode(buf: &mut impl Buf) -> Option<Self> {
        Some(LoadPreviousResponse {
            header: Header::decode(buf)?,
            should_reset: bool::decode(buf)?,
            data: Indexed::decode(buf)?,
        })
    }

    fn encoded_len(&self) -> usize {
        Header::ENCODED_SIZE + 1 + self.data.encoded_len()
    }
}

impl<T: WireItem> WireItem for ItemsAdded<T> {
    fn encode(&self, buf: &mut impl BufMut) {
        self.header.encode(buf);
        self.data.encode(buf);
    }

    fn decode(buf: &mut impl Buf) -> Option<Self> {
        Some(ItemsAdded {
            header: Header::decode(buf)?,
            data: Indexed::decode(buf)?,
        })
    }

    fn encoded_len(&self) -> usize {
        Header::ENCODED_SIZE + self.data.encoded_len()
    }
}

impl<T: WireItem> WireItem for ItemsUpdated<T> {
    fn encode(&self, buf: &mut impl BufMut) {
        self.header.encode(buf);
        self.data.encode(buf);
    }

    fn decode(buf: &mut impl Buf) -> Option<Self> {
        Some(ItemsUpdated {
            header: Header::decode(buf)?,
            data: Indexed::decode(buf)?,
        })
    }

    fn encoded_len(&self) -> usize {
        Header::ENCODED_SIZE + self.data.encoded_len()
    }
}

impl WireItem for Cleared {
    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.version);
    }

    fn decode(buf: &mut impl Buf) -> Option<Self> {
        u64::decode(buf).map(|version| Cleared { version })
    }

    fn encoded_len(&self) -> usize {
        8
    }
}

impl<T: WireItem> WireItem for Notification<T> {
    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.tag() as u8);
        match self {
            Notification::Added(added) => added.encode(buf),
            Notification::Updated(updated) => updated.encode(buf),
            Notification::Cleared(cleared) => cleared.encode(buf),
        }
    }

    fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < 1 {
            return None;
        }
        let tag = NotificationTag::try_from(buf.get_u8()).ok()?;
        match tag {
            NotificationTag::Added => ItemsAdded::decode(buf).map(Notification::Added),
            NotificationTag::Edited => ItemsUpdated::decode(buf).map(Notification::Updated),
            NotificationTag::Cleared => Cleared::decode(buf).map(Notification::Cleared),
        }
    }

    fn encoded_len(&self) -> usize {
        1 + match self {
            Notification::Added(added) => added.encoded_len(),
            Notification::Updated(updated) => updated.encoded_len(),
            Notification::Cleared(cleared) => cleared.encoded_len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn header() -> Header {
        Header::new(2, 10, 3)
    }

    #[test]
    fn test_header_layout() {
        let encoded = header().encode_to_bytes();
        assert_eq!(encoded.len(), Header::ENCODED_SIZE);
        assert_eq!(&encoded[..8], &2u64.to_be_bytes());
        assert_eq!(&encoded[8..16], &10u64.to_be_bytes());
        assert_eq!(&encoded[16..], &3u64.to_be_bytes());
    }

    #[test]
    fn test_load_new_response_encoding() {
        let msg = LoadNewResponse {
            header: header(),
            should_reset: false,
            data: Indexed::new(4, vec![Bytes::from_static(b"e"), Bytes::from_static(b"f")]),
            updates: vec![Indexed::new(1, Bytes::from_static(b"b'"))],
        };

        let encoded = msg.encode_to_bytes();
        assert_eq!(msg.encoded_len(), encoded.len());
        assert_eq!(LoadNewResponse::decode_from_slice(&encoded), Some(msg));
    }

    #[test]
    fn test_load_previous_request_encoding() {
        let msg = LoadPreviousRequest {
            version: 1,
            unloaded: 20..30,
        };
        let encoded = msg.encode_to_bytes();
        assert_eq!(msg.encoded_len(), encoded.len());
        assert_eq!(LoadPreviousRequest::decode_from_slice(&encoded), Some(msg));
    }

    #[test]
    fn test_notification_tags() {
        let cleared: Notification<u64> = Notification::Cleared(Cleared { version: 7 });
        let encoded = cleared.encode_to_bytes();
        assert_eq!(encoded[0], NotificationTag::Cleared as u8);
        assert_eq!(cleared.type_name(), "Cleared");
        assert_eq!(Notification::<u64>::decode_from_slice(&encoded), Some(cleared));

        let added = Notification::Added(ItemsAdded {
            header: header(),
            data: Indexed::new(9, vec![1u64]),
        });
        let encoded = added.encode_to_bytes();
        assert_eq!(added.encoded_len(), encoded.len());
        assert_eq!(encoded[0], NotificationTag::Added as u8);
        assert_eq!(Notification::decode_from_slice(&encoded), Some(added));
    }

    #[test]
    fn test_unknown_notification_tag() {
        assert!(Notification::<u64>::decode_from_slice(&[9, 0, 0]).is_none());
        assert!(Notification::<u64>::decode_from_slice(&[]).is_none());
    }
}
