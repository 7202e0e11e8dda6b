//! Values tagged with their absolute position in the server sequence.

use std::ops::Range;

/// A value placed at absolute position `index` of the full sequence.
///
/// For a run of items (`Indexed<Vec<T>>`) the value covers
/// `index..index + len`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Indexed<V> {
    /// Absolute position of the (first) value.
    pub index: u64,
    /// The value itself.
    pub value: V,
}

impl<V> Indexed<V> {
    /// Tag `value` with `index`.
    pub const fn new(index: u64, value: V) -> Self {
        Self { index, value }
    }

    /// Transform the value, keeping the position.
    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> Indexed<U> {
        Indexed {
            index: self.index,
            value: f(self.value),
        }
    }

    /// Borrow the value, keeping the position.
    pub fn as_ref(&self) -> Indexed<&V> {
        Indexed {
            index: self.index,
            value: &self.value,
        }
    }

    /// Wrap a single item into a one-element run.
    pub fn into_run(self) -> Indexed<Vec<V>> {
        Indexed {
            index: self.index,
            value: vec![self.value],
        }
    }
}

impl<T> Indexed<Vec<T>> {
    /// An empty run positioned at `index`.
    pub const fn empty(index: u64) -> Self {
        Self {
            index,
            value: Vec::new(),
        }
    }

    /// Number of items in the run.
    pub fn len(&self) -> u64 {
        self.value.len() as u64
    }

    /// Whether the run holds no items.
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// One past the last covered position.
    pub fn end(&self) -> u64 {
        self.index + self.len()
    }

    /// One past the last covered position, or `None` if that is not a
    /// valid `u64` position.
    pub fn checked_end(&self) -> Option<u64> {
        self.index.checked_add(self.len())
    }

    /// Absolute range covered by the run.
    pub fn range(&self) -> Range<u64> {
        self.index..self.end()
    }

    /// Whether the absolute position `index` lies in the run.
    pub fn contains(&self, index: u64) -> bool {
        self.range().contains(&index)
    }

    /// Item at absolute position `index`.
    pub fn get(&self, index: u64) -> Option<&T> {
        if self.contains(index) {
            self.value.get((index - self.index) as usize)
        } else {
            None
        }
    }

    /// Mutable item at absolute position `index`.
    pub fn get_mut(&mut self, index: u64) -> Option<&mut T> {
        if self.contains(index) {
            self.value.get_mut((index - self.index) as usize)
        } else {
            None
        }
    }

    /// Iterate items together with their absolute positions.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = Indexed<&T>> + '_ {
        let base = self.index;
        self.value
            .iter()
            .enumerate()
            .map(move |(i, item)| Indexed::new(base + i as u64, item))
    }

    /// Iterate from absolute position `from` (clamped to the run) to the end.
    pub fn iter_from(&self, from: u64) -> impl Iterator<Item = Indexed<&T>> + '_ {
        let skip = from.saturating_sub(self.index) as usize;
        self.iter().skip(skip)
    }
}

impl<T: Clone> Indexed<Vec<T>> {
    /// Copy out the absolute sub-range `range`, clamped to the run.
    pub fn slice(&self, range: Range<u64>) -> Indexed<Vec<T>> {
        let start = range.start.clamp(self.index, self.end());
        let end = range.end.clamp(start, self.end());
        let lo = (start - self.index) as usize;
        let hi = (end - self.index) as usize;
        Indexed::new(start, self.value[lo..hi].to_vec())
    }
}

/// Intersection of two absolute ranges (empty when they do not overlap).
pub fn clamp_range(a: &Range<u64>, b: &Range<u64>) -> Range<u64> {
    let start = a.start.max(b.start);
    let end = a.end.min(b.end).max(start);
    start..end
}
