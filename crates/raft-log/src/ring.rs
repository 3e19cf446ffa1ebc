//! # ring
//!
//! why: hold the outstanding suffix of the log with O(1) append and lookup
//! relations: owned by store.rs, records are keyed into refs.rs by serial
//! what: Record, EntryRing with absolute-index-to-slot mapping and doubling growth

use std::collections::vec_deque::{Drain, Iter};
use std::collections::{TryReserveError, VecDeque};

use raft_core::{Entry, Index};
use tracing::debug;

/// Smallest capacity the buffer grows to
pub(crate) const MIN_CAPACITY: usize = 2;

/// An entry stored in the buffer.
///
/// `serial` is unique for the lifetime of the store, so it still identifies
/// the entry after it leaves the buffer.
#[derive(Debug, Clone)]
pub(crate) struct Record {
    pub serial: u64,
    pub entry: Entry,
}

/// Circular buffer of records addressed by absolute index.
///
/// Absolute index `i` lives in slot `i - offset - 1`. Growth and removal only
/// ever change slots, never the absolute index of a surviving record.
#[derive(Debug, Default)]
pub(crate) struct EntryRing {
    records: VecDeque<Record>,
    offset: Index,
}

impl EntryRing {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            offset: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.records.capacity()
    }

    /// Absolute index of the slot before the first record
    pub fn offset(&self) -> Index {
        self.offset
    }

    pub fn set_offset(&mut self, offset: Index) {
        self.offset = offset;
    }

    pub fn first_index(&self) -> Option<Index> {
        if self.records.is_empty() {
            None
        } else {
            Some(self.offset + 1)
        }
    }

    /// Index of the last record, or the offset when empty
    pub fn last_index(&self) -> Index {
        self.offset + self.records.len() as Index
    }

    /// Index the next pushed record will get
    pub fn next_index(&self) -> Index {
        self.last_index() + 1
    }

    fn slot(&self, index: Index) -> Option<usize> {
        if index <= self.offset {
            return None;
        }
        let slot = usize::try_from(index - self.offset - 1).ok()?;
        (slot < self.records.len()).then_some(slot)
    }

    pub fn get(&self, index: Index) -> Option<&Record> {
        self.slot(index).map(|slot| &self.records[slot])
    }

    /// Make room for `additional` more records, doubling the capacity when it
    /// is exceeded. On failure the buffer is untouched.
    pub fn reserve(&mut self, additional: usize) -> Result<(), TryReserveError> {
        let len = self.records.len();
        let capacity = self.records.capacity();
        let needed = len.saturating_add(additional);
        if needed <= capacity {
            return Ok(());
        }
        let target = needed.max(capacity.saturating_mul(2)).max(MIN_CAPACITY);
        self.records.try_reserve_exact(target - len)?;
        debug!(
            from = capacity,
            to = self.records.capacity(),
            "grew log buffer"
        );
        Ok(())
    }

    /// Append a record at `next_index()`. Capacity must have been reserved.
    pub fn push(&mut self, record: Record) {
        debug_assert!(self.records.len() < self.records.capacity());
        self.records.push_back(record);
    }

    /// Records from `index` (included) to the end
    pub fn iter_from(&self, index: Index) -> Iter<'_, Record> {
        let start = match self.slot(index) {
            Some(slot) => slot,
            None if index <= self.offset => 0,
            None => self.records.len(),
        };
        self.records.range(start..)
    }

    /// Remove every record from `index` (included) to the end
    pub fn drain_suffix(&mut self, index: Index) -> Drain<'_, Record> {
        let start = match self.slot(index) {
            Some(slot) => slot,
            None if index <= self.offset => 0,
            None => self.records.len(),
        };
        self.records.drain(start..)
    }

    /// Remove every record up to `index` (included), advancing the offset
    pub fn drain_prefix(&mut self, index: Index) -> Drain<'_, Record> {
        let end = match self.slot(index) {
            Some(slot) => slot + 1,
            None if index <= self.offset => 0,
            None => self.records.len(),
        };
        self.offset += end as Index;
        self.records.drain(..end)
    }
}
