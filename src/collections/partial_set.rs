//! Interval set of loaded windows.
//!
//! A client never holds the whole server sequence, only the windows it has
//! paged in. [`PartialSet`] keeps those windows sorted, disjoint and
//! non-adjacent: every insert that touches an existing window is folded into
//! it, cascading into right neighbours the merged window now reaches.
//!
//! ```text
//! before:   [0 . . 4)        [6 . . . 10)     [14 . . 16)
//! insert:            [3 . . . . 7)
//! after:    [0 . . . . . . . . . . . 10)      [14 . . 16)
//!              changed: 3..4 (vs [0,4)), 6..7 (vs [6,10))
//! ```

use smallvec::SmallVec;
use std::fmt;
use std::ops::Range;

use super::indexed::{clamp_range, Indexed};

/// Values of one overlapped span before and after an insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedPair<T> {
    /// Values that were stored before the insert.
    pub old: Indexed<Vec<T>>,
    /// Values that replaced them.
    pub new: Indexed<Vec<T>>,
}

/// Outcome of [`PartialSet::insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertResult<T> {
    /// Range of the window that now holds the inserted values.
    pub combined: Range<u64>,
    /// Overlapped spans whose stored values changed, in merge order.
    pub changed: Vec<ChangedPair<T>>,
    /// Number of combined elements before the inserted range.
    pub merged_prefix: u64,
    /// Number of combined elements after the inserted range.
    pub merged_suffix: u64,
    /// Position of the combined window in the set.
    pub index: usize,
    /// Parts of the inserted range that were not loaded before.
    pub new_spans: SmallVec<[Range<u64>; 2]>,
}

impl<T> InsertResult<T> {
    fn untouched(range: Range<u64>, index: usize) -> Self {
        Self {
            combined: range,
            changed: Vec::new(),
            merged_prefix: 0,
            merged_suffix: 0,
            index,
            new_spans: SmallVec::new(),
        }
    }

    /// Whether the insert loaded any position for the first time.
    pub fn has_new(&self) -> bool {
        !self.new_spans.is_empty()
    }
}

/// Sorted set of disjoint, non-touching windows of the server sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialSet<T> {
    ranges: Vec<Indexed<Vec<T>>>,
}

impl<T> Default for PartialSet<T> {
    fn default() -> Self {
        Self { ranges: Vec::new() }
    }
}

/// Whether two ranges overlap or are adjacent.
fn touches(a: &Range<u64>, b: &Range<u64>) -> bool {
    if a.start == b.start {
        true
    } else if a.start < b.start {
        a.end >= b.start
    } else {
        a.start <= b.end
    }
}

/// Merge two touching windows; `incoming` wins on every overlapped position.
fn merge<T: Clone + PartialEq>(
    existing: Indexed<Vec<T>>,
    incoming: Indexed<Vec<T>>,
) -> (Indexed<Vec<T>>, Option<ChangedPair<T>>) {
    let overlap = clamp_range(&existing.range(), &incoming.range());
    let pair = if overlap.is_empty() {
        None
    } else {
        let old = existing.slice(overlap.clone());
        let new = incoming.slice(overlap);
        (old.value != new.value).then_some(ChangedPair { old, new })
    };

    let existing_start = existing.index;
    let existing_end = existing.end();
    let incoming_start = incoming.index;
    let incoming_end = incoming.end();

    let combined = if existing_start < incoming_start {
        let mut value = existing.value;
        let tail = if existing_end > incoming_end {
            value.split_off((incoming_end - existing_start) as usize)
        } else {
            Vec::new()
        };
        value.truncate((incoming_start - existing_start) as usize);
        value.extend(incoming.value);
        value.extend(tail);
        Indexed::new(existing_start, value)
    } else {
        let mut value = incoming.value;
        if existing_end > incoming_end {
            let skip = (incoming_end - existing_start) as usize;
            value.extend(existing.value.into_iter().skip(skip));
        }
        Indexed::new(incoming_start, value)
    };

    (combined, pair)
}

impl<T> PartialSet<T> {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from windows that already satisfy the ordering invariant.
    ///
    /// Returns `None` if the windows are unsorted, empty, or touch.
    pub fn from_ranges(ranges: Vec<Indexed<Vec<T>>>) -> Option<Self> {
        let valid = ranges.iter().all(|r| !r.is_empty())
            && ranges.windows(2).all(|w| w[0].end() < w[1].index);
        valid.then_some(Self { ranges })
    }

    /// Loaded windows in ascending order.
    pub fn ranges(&self) -> &[Indexed<Vec<T>>] {
        &self.ranges
    }

    /// Consume the set, returning its windows.
    pub fn into_ranges(self) -> Vec<Indexed<Vec<T>>> {
        self.ranges
    }

    /// Number of windows.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Whether nothing is loaded.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Total number of loaded items across all windows.
    pub fn count(&self) -> u64 {
        self.ranges.iter().map(|r| r.len()).sum()
    }

    /// First (oldest) window.
    pub fn first(&self) -> Option<&Indexed<Vec<T>>> {
        self.ranges.first()
    }

    /// Last (newest) window.
    pub fn last(&self) -> Option<&Indexed<Vec<T>>> {
        self.ranges.last()
    }

    /// Window holding absolute position `index`.
    pub fn range_containing(&self, index: u64) -> Option<&Indexed<Vec<T>>> {
        let pos = self.ranges.partition_point(|r| r.end() <= index);
        self.ranges.get(pos).filter(|r| r.contains(index))
    }

    /// Item at absolute position `index`, if loaded.
    pub fn get(&self, index: u64) -> Option<&T> {
        self.range_containing(index).and_then(|r| r.get(index))
    }

    /// Whether absolute position `index` is loaded.
    pub fn contains(&self, index: u64) -> bool {
        self.range_containing(index).is_some()
    }

    /// Drop every window.
    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    /// The unloaded gap nearest to the newest data.
    ///
    /// This is the span between the last two windows, or `0..first.start`
    /// when only one window is loaded. An empty set yields `0..0`.
    pub fn last_unloaded_gap(&self) -> Range<u64> {
        match self.ranges.as_slice() {
            [] => 0..0,
            [only] => 0..only.index,
            [.., prev, last] => prev.end()..last.index,
        }
    }

    /// Sub-ranges of `range` that no window covers.
    pub fn uncovered(&self, range: &Range<u64>) -> SmallVec<[Range<u64>; 2]> {
        let mut gaps = SmallVec::new();
        let mut cursor = range.start;
        for window in &self.ranges {
            if window.end() <= cursor {
                continue;
            }
            if window.index >= range.end {
                break;
            }
            if window.index > cursor {
                gaps.push(cursor..window.index);
            }
            cursor = cursor.max(window.end());
        }
        if cursor < range.end {
            gaps.push(cursor..range.end);
        }
        gaps
    }

    /// Sub-ranges of `range` that some window covers.
    pub fn covered(&self, range: &Range<u64>) -> SmallVec<[Range<u64>; 2]> {
        self.ranges
            .iter()
            .map(|window| clamp_range(&window.range(), range))
            .filter(|part| !part.is_empty())
            .collect()
    }
}

impl<T: Clone + PartialEq> PartialSet<T> {
    /// Insert a window, merging it with every window it touches.
    ///
    /// Overlapped positions take the inserted values. Inserting an empty
    /// window is a no-op.
    pub fn insert(&mut self, incoming: Indexed<Vec<T>>) -> InsertResult<T> {
        let incoming_range = incoming.range();
        if incoming.is_empty() {
            let pos = self.ranges.partition_point(|r| r.end() < incoming_range.start);
            return InsertResult::untouched(incoming_range, pos);
        }

        let new_spans = self.uncovered(&incoming_range);

        for i in 0..self.ranges.len() {
            let existing_range = self.ranges[i].range();

            if touches(&existing_range, &incoming_range) {
                let existing = std::mem::take(&mut self.ranges[i]);
                let (mut combined, pair) = merge(existing, incoming);
                let mut changed: Vec<ChangedPair<T>> = pair.into_iter().collect();

                while i + 1 < self.ranges.len()
                    && touches(&combined.range(), &self.ranges[i + 1].range())
                {
                    let next = self.ranges.remove(i + 1);
                    let (merged, pair) = merge(next, combined);
                    combined = merged;
                    changed.extend(pair);
                }

                let combined_range = combined.range();
                self.ranges[i] = combined;
                return InsertResult {
                    merged_prefix: incoming_range.start - combined_range.start,
                    merged_suffix: combined_range.end - incoming_range.end,
                    combined: combined_range,
                    changed,
                    index: i,
                    new_spans,
                };
            }

            if incoming_range.end < existing_range.start {
                self.ranges.insert(i, incoming);
                let mut result = InsertResult::untouched(incoming_range, i);
                result.new_spans = new_spans;
                return result;
            }
        }

        let index = self.ranges.len();
        self.ranges.push(incoming);
        let mut result = InsertResult::untouched(incoming_range, index);
        result.new_spans = new_spans;
        result
    }

    /// Copy out the loaded items of absolute sub-range `range`.
    ///
    /// Returns `None` unless a single window covers the whole range.
    pub fn slice(&self, range: Range<u64>) -> Option<Indexed<Vec<T>>> {
        if range.is_empty() {
            return Some(Indexed::empty(range.start));
        }
        let window = self.range_containing(range.start)?;
        (range.end <= window.end()).then(|| window.slice(range))
    }
}

impl<T> fmt::Display for PartialSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, window) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}..{}", window.index, window.end())?;
        }
        Ok(())
    }
}
