//! Growable record vector
//!
//! `RecordVec<T>` is the storage primitive behind per-partition message
//! history and per-test report entries. It wraps a `Vec<T>` with an explicit
//! growth policy: the first growth reserves a fixed batch, every later growth
//! doubles the capacity. Message vectors start at a batch of
//! [`RECORD_BATCH`] records, report vectors at [`REPORT_BATCH`] entries.
//!
//! `sort_by` leaves the vector sorted. Callers that need arrival order after
//! a check should use `sorted_by`, which sorts a copy.

use std::cmp::Ordering;

/// Initial batch for message-record vectors
pub const RECORD_BATCH: usize = 10_000;

/// Initial batch for report-entry vectors
pub const REPORT_BATCH: usize = 8;

/// Resizable array of fixed-size records with batch-then-double growth
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordVec<T> {
    items: Vec<T>,
    initial_batch: usize,
}

impl<T> Default for RecordVec<T> {
    fn default() -> Self {
        Self::with_initial_batch(RECORD_BATCH)
    }
}

impl<T> RecordVec<T> {
    /// Create an empty vector; no storage is allocated until the first append
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty vector whose first growth reserves `batch` records
    pub fn with_initial_batch(batch: usize) -> Self {
        RecordVec {
            items: Vec::new(),
            initial_batch: batch.max(1),
        }
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True if no records are stored
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Current backing capacity in records
    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }

    /// Grow backing storage to hold at least `n` records
    pub fn ensure_capacity(&mut self, n: usize) {
        if n > self.items.capacity() {
            self.items.reserve_exact(n - self.items.len());
        }
    }

    /// Make room for `additional` more records
    pub fn reserve(&mut self, additional: usize) {
        self.ensure_capacity(self.items.len() + additional);
    }

    fn grow_if_full(&mut self) {
        if self.items.len() == self.items.capacity() {
            let target = if self.items.capacity() == 0 {
                self.initial_batch
            } else {
                self.items.capacity() * 2
            };
            self.ensure_capacity(target);
        }
    }

    /// Append `value`, growing if full, and return a handle to the new slot
    pub fn push(&mut self, value: T) -> &mut T {
        self.grow_if_full();
        self.items.push(value);
        let last = self.items.len() - 1;
        &mut self.items[last]
    }

    /// Record at index `i`
    ///
    /// # Panics
    /// Panics if `i >= len()`.
    pub fn get(&self, i: usize) -> &T {
        debug_assert!(i < self.items.len(), "index {} out of {}", i, self.items.len());
        &self.items[i]
    }

    /// Sort in place; the vector stays sorted afterwards
    pub fn sort_by<F>(&mut self, compare: F)
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        self.items.sort_by(compare);
    }

    /// Iterate in stored order
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// Stored records as a slice
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    /// Release storage and reset count and capacity to zero
    pub fn clear(&mut self) {
        self.items = Vec::new();
    }
}

impl<T: Default> RecordVec<T> {
    /// Reserve a new default-initialized slot and return a handle to it
    pub fn append(&mut self) -> &mut T {
        self.push(T::default())
    }
}

impl<T: Clone> RecordVec<T> {
    /// Sorted copy; `self` keeps its order
    pub fn sorted_by<F>(&self, compare: F) -> RecordVec<T>
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        let mut copy = RecordVec::with_initial_batch(self.initial_batch);
        copy.ensure_capacity(self.items.len());
        copy.items.extend_from_slice(&self.items);
        copy.sort_by(compare);
        copy
    }

    /// Append a copy of every record in `other`
    pub fn extend_from(&mut self, other: &RecordVec<T>) {
        self.reserve(other.len());
        for item in other.iter() {
            self.push(item.clone());
        }
    }
}

impl<'a, T> IntoIterator for &'a RecordVec<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
