//! RPC envelopes exchanged between a client's remote and the server runner.
//!
//! Every frame starts with a [`CommandTag`] byte. Responses echo the tag of
//! the request they answer. Write acknowledgements follow the tag with a
//! status byte:
//!
//! | status | meaning      | payload                       |
//! |--------|--------------|-------------------------------|
//! | 0      | ok           | first index (add only)        |
//! | 1      | rejected     | UTF-8 reason                  |
//! | 2      | out of range | `start`, `end`, `len` as u64  |

use bytes::{Buf, BufMut, Bytes};

use super::codec::WireItem;
use super::types::{LoadNewRequest, LoadNewResponse, LoadPreviousRequest, LoadPreviousResponse};
use crate::collections::Indexed;
use crate::error::{Error, Result};

/// Command type tags for encoding.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTag {
    /// Append items.
    Add = 0,
    /// Edit items in place.
    Edit = 1,
    /// Wipe the sequence.
    Clear = 2,
    /// Load new items and catch up on edits.
    LoadNewItems = 3,
    /// Load a page of history.
    LoadPreviousItems = 4,
}

impl TryFrom<u8> for CommandTag {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(CommandTag::Add),
            1 => Ok(CommandTag::Edit),
            2 => Ok(CommandTag::Clear),
            3 => Ok(CommandTag::LoadNewItems),
            4 => Ok(CommandTag::LoadPreviousItems),
            _ => Err(value),
        }
    }
}

const STATUS_OK: u8 = 0;
const STATUS_REJECTED: u8 = 1;
const STATUS_OUT_OF_RANGE: u8 = 2;

/// Outcome of a write as carried back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteAck<V> {
    /// The write was applied.
    Ok(V),
    /// The server refused the write.
    Rejected(String),
    /// The edit addressed positions outside the sequence.
    OutOfRange {
        /// First addressed position.
        start: u64,
        /// One past the last addressed position.
        end: u64,
        /// Server sequence length at the time.
        len: u64,
    },
}

impl<V> WriteAck<V> {
    /// Build an acknowledgement from a server-side result.
    ///
    /// Errors that have no wire status are reported as rejections.
    pub fn from_result(result: Result<V>) -> Self {
        match result {
            Ok(value) => WriteAck::Ok(value),
            Err(Error::Rejected(reason)) => WriteAck::Rejected(reason),
            Err(Error::OutOfRange { start, end, len }) => WriteAck::OutOfRange { start, end, len },
            Err(other) => WriteAck::Rejected(other.to_string()),
        }
    }

    /// Convert back into a crate result.
    pub fn into_result(self) -> Result<V> {
        match self {
            WriteAck::Ok(value) => Ok(value),
            WriteAck::Rejected(reason) => Err(Error::Rejected(reason)),
            WriteAck::OutOfRange { start, end, len } => Err(Error::OutOfRange { start, end, len }),
        }
    }

    fn encode_failure(&self, buf: &mut impl BufMut) {
        match self {
            WriteAck::Ok(_) => buf.put_u8(STATUS_OK),
            WriteAck::Rejected(reason) => {
                buf.put_u8(STATUS_REJECTED);
                reason.encode(buf);
            }
            WriteAck::OutOfRange { start, end, len } => {
                buf.put_u8(STATUS_OUT_OF_RANGE);
                buf.put_u64(*start);
                buf.put_u64(*end);
                buf.put_u64(*len);
            }
        }
    }

    fn failure_len(&self) -> usize {
        1 + match self {
            WriteAck::Ok(_) => 0,
            WriteAck::Rejected(reason) => reason.encoded_len(),
            WriteAck::OutOfRange { .. } => 24,
        }
    }

    /// Decode the status byte; yields `Ok(None)` for status ok.
    fn decode_failure(buf: &mut impl Buf) -> Option<std::result::Result<(), Self>> {
        if buf.remaining() < 1 {
            return None;
        }
        match buf.get_u8() {
            STATUS_OK => Some(Ok(())),
            STATUS_REJECTED => String::decode(buf).map(|reason| Err(WriteAck::Rejected(reason))),
            STATUS_OUT_OF_RANGE => {
                let start = u64::decode(buf)?;
                let end = u64::decode(buf)?;
                let len = u64::decode(buf)?;
                Some(Err(WriteAck::OutOfRange { start, end, len }))
            }
            _ => None,
        }
    }
}

impl WireItem for WriteAck<u64> {
    fn encode(&self, buf: &mut impl BufMut) {
        self.encode_failure(buf);
        if let WriteAck::Ok(index) = self {
            buf.put_u64(*index);
        }
    }

    fn decode(buf: &mut impl Buf) -> Option<Self> {
        match Self::decode_failure(buf)? {
            Ok(()) => u64::decode(buf).map(WriteAck::Ok),
            Err(failure) => Some(failure),
        }
    }

    fn encoded_len(&self) -> usize {
        self.failure_len() + if matches!(self, WriteAck::Ok(_)) { 8 } else { 0 }
    }
}

impl WireItem for WriteAck<()> {
    fn encode(&self, buf: &mut impl BufMut) {
        self.encode_failure(buf);
    }

    fn decode(buf: &mut impl Buf) -> Option<Self> {
        match Self::decode_failure(buf)? {
            Ok(()) => Some(WriteAck::Ok(())),
            Err(failure) => Some(failure),
        }
    }

    fn encoded_len(&self) -> usize {
        self.failure_len()
    }
}

/// Client → server command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request<T> {
    /// Append `items` at the end of the sequence.
    Add(Vec<T>),
    /// Merge `data` into the items at its positions.
    Edit(Indexed<Vec<T>>),
    /// Wipe the sequence.
    Clear,
    /// Load new items.
    LoadNewItems(LoadNewRequest),
    /// Load a page of history.
    LoadPreviousItems(LoadPreviousRequest),
}

impl<T> Request<T> {
    /// Get the command tag.
    pub const fn tag(&self) -> CommandTag {
        match self {
            Request::Add(_) => CommandTag::Add,
            Request::Edit(_) => CommandTag::Edit,
            Request::Clear => CommandTag::Clear,
            Request::LoadNewItems(_) => CommandTag::LoadNewItems,
            Request::LoadPreviousItems(_) => CommandTag::LoadPreviousItems,
        }
    }
}

impl<T: WireItem> Request<T> {
    /// Decode a full request frame.
    pub fn decode_frame(frame: &[u8]) -> Result<Self> {
        Self::decode_from_slice(frame)
            .ok_or_else(|| Error::Decode(format!("malformed request frame ({} bytes)", frame.len())))
    }
}

impl<T: WireItem> WireItem for Request<T> {
    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.tag() as u8);
        match self {
            Request::Add(items) => items.encode(buf),
            Request::Edit(data) => data.encode(buf),
            Request::Clear => {}
            Request::LoadNewItems(request) => request.encode(buf),
            Request::LoadPreviousItems(request) => request.encode(buf),
        }
    }

    fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < 1 {
            return None;
        }
        let tag = CommandTag::try_from(buf.get_u8()).ok()?;
        match tag {
            CommandTag::Add => Vec::decode(buf).map(Request::Add),
            CommandTag::Edit => Indexed::decode(buf).map(Request::Edit),
            CommandTag::Clear => Some(Request::Clear),
            CommandTag::LoadNewItems => LoadNewRequest::decode(buf).map(Request::LoadNewItems),
            CommandTag::LoadPreviousItems => {
                LoadPreviousRequest::decode(buf).map(Request::LoadPreviousItems)
            }
        }
    }

    fn encoded_len(&self) -> usize {
        1 + match self {
            Request::Add(items) => items.encoded_len(),
            Request::Edit(data) => data.encoded_len(),
            Request::Clear => 0,
            Request::LoadNewItems(request) => request.encoded_len(),
            Request::LoadPreviousItems(request) => request.encoded_len(),
        }
    }
}

/// Server → client answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response<T> {
    /// Add acknowledgement carrying the first assigned index.
    Add(WriteAck<u64>),
    /// Edit acknowledgement.
    Edit(WriteAck<()>),
    /// Clear acknowledgement.
    Clear(WriteAck<()>),
    /// Load-new answer.
    LoadNewItems(LoadNewResponse<T>),
    /// Load-previous answer.
    LoadPreviousItems(LoadPreviousResponse<T>),
}

impl<T> Response<T> {
    /// Get the command tag this response answers.
    pub const fn tag(&self) -> CommandTag {
        match self {
            Response::Add(_) => CommandTag::Add,
            Response::Edit(_) => CommandTag::Edit,
            Response::Clear(_) => CommandTag::Clear,
            Response::LoadNewItems(_) => CommandTag::LoadNewItems,
            Response::LoadPreviousItems(_) => CommandTag::LoadPreviousItems,
        }
    }
}

impl<T: WireItem> Response<T> {
    /// Decode a full response frame.
    pub fn decode_frame(frame: &Bytes) -> Result<Self> {
        Self::decode_from_slice(frame)
            .ok_or_else(|| Error::Decode(format!("malformed response frame ({} bytes)", frame.len())))
    }
}

impl<T: WireItem> WireItem for Response<T> {
    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.tag() as u8);
        match self {
            Response::Add(ack) => ack.encode(buf),
            Response::Edit(ack) | Response::Clear(ack) => ack.encode(buf),
            Response::LoadNewItems(response) => response.encode(buf),
            Response::LoadPreviousItems(response) => response.encode(buf),
        }
    }

    fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < 1 {
            return None;
        }
        let tag = CommandTag::try_from(buf.get_u8()).ok()?;
        match tag {
            CommandTag::Add => WriteAck::decode(buf).map(Response::Add),
            CommandTag::Edit => WriteAck::decode(buf).map(Response::Edit),
            CommandTag::Clear => WriteAck::decode(buf).map(Response::Clear),
            CommandTag::LoadNewItems => LoadNewResponse::decode(buf).map(Response::LoadNewItems),
            CommandTag::LoadPreviousItems => {
                LoadPreviousResponse::decode(buf).map(Response::LoadPreviousItems)
            }
        }
    }

    fn encoded_len(&self) -> usize {
        1 + match self {
            Response::Add(ack) => ack.encoded_len(),
            Response::Edit(ack) | Response::Clear(ack) => ack.encoded_len(),
            Response::LoadNewItems(response) => response.encoded_len(),
            Response::LoadPreviousItems(response) => response.encoded_len(),
        }
    }
}
