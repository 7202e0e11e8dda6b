//! Binary encoding shared by every protocol message.
//!
//! The format is deliberately plain:
//!
//! - integers are fixed-width big-endian (`u64` for positions and counts)
//! - `bool` is one byte (`0` or `1`)
//! - sequences are a `u64` element count followed by the elements
//! - composite messages encode their fields in declaration order
//!
//! Decoding never panics on malformed input; it returns `None`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::ops::Range;

use crate::collections::Indexed;

/// A value that can travel inside sync frames.
///
/// Implemented for the primitives below, for [`Indexed`] and `Vec` of any
/// wire item, and for every protocol message. Application item types
/// implement it to become syncable. Every encoding must take at least one
/// byte; sequence decoding relies on it to reject impossible counts early.
pub trait WireItem: Sized {
    /// Append the encoding of `self` to `buf`.
    fn encode(&self, buf: &mut impl BufMut);

    /// Read one value from `buf`.
    fn decode(buf: &mut impl Buf) -> Option<Self>;

    /// Exact number of bytes [`encode`](WireItem::encode) writes.
    fn encoded_len(&self) -> usize;

    /// Number of sequence positions the value covers when tagged by an
    /// [`Indexed`]: one for a plain item, one per element for a `Vec` run.
    fn span(&self) -> u64 {
        1
    }

    /// Encode into a new `Bytes` buffer.
    fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decode a value from a byte slice.
    fn decode_from_slice(data: &[u8]) -> Option<Self> {
        let mut cursor = std::io::Cursor::new(data);
        Self::decode(&mut cursor)
    }
}

impl WireItem for u64 {
    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64(*self);
    }

    fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < 8 {
            return None;
        }
        Some(buf.get_u64())
    }

    fn encoded_len(&self) -> usize {
        8
    }
}

impl WireItem for u32 {
    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32(*self);
    }

    fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < 4 {
            return None;
        }
        Some(buf.get_u32())
    }

    fn encoded_len(&self) -> usize {
        4
    }
}

impl WireItem for bool {
    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(u8::from(*self));
    }

    fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < 1 {
            return None;
        }
        match buf.get_u8() {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        }
    }

    fn encoded_len(&self) -> usize {
        1
    }
}

impl WireItem for Bytes {
    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.len() as u64);
        buf.put_slice(self);
    }

    fn decode(buf: &mut impl Buf) -> Option<Self> {
        let len = usize::try_from(u64::decode(buf)?).ok()?;
        if buf.remaining() < len {
            return None;
        }
        Some(buf.copy_to_bytes(len))
    }

    fn encoded_len(&self) -> usize {
        8 + self.len()
    }
}

impl WireItem for String {
    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.len() as u64);
        buf.put_slice(self.as_bytes());
    }

    fn decode(buf: &mut impl Buf) -> Option<Self> {
        let bytes = Bytes::decode(buf)?;
        String::from_utf8(bytes.to_vec()).ok()
    }

    fn encoded_len(&self) -> usize {
        8 + self.len()
    }
}

impl WireItem for Range<u64> {
    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.start);
        buf.put_u64(self.end);
    }

    fn decode(buf: &mut impl Buf) -> Option<Self> {
        let start = u64::decode(buf)?;
        let end = u64::decode(buf)?;
        Some(start..end)
    }

    fn encoded_len(&self) -> usize {
        16
    }
}

impl<T: WireItem> WireItem for Vec<T> {
    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.len() as u64);
        for item in self {
            item.encode(buf);
        }
    }

    fn decode(buf: &mut impl Buf) -> Option<Self> {
        let count = usize::try_from(u64::decode(buf)?).ok()?;
        if count > buf.remaining() {
            return None;
        }
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(T::decode(buf)?);
        }
        Some(items)
    }

    fn encoded_len(&self) -> usize {
        8 + self.iter().map(WireItem::encoded_len).sum::<usize>()
    }

    fn span(&self) -> u64 {
        self.len() as u64
    }
}

impl<V: WireItem> WireItem for Indexed<V> {
    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.index);
        self.value.encode(buf);
    }

    fn decode(buf: &mut impl Buf) -> Option<Self> {
        let index = u64::decode(buf)?;
        let value = V::decode(buf)?;
        // Every covered position must be addressable.
        index.checked_add(value.span())?;
        Some(Indexed::new(index, value))
    }

    fn encoded_len(&self) -> usize {
        8 + self.value.encoded_len()
    }
}
