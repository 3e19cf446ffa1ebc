//! # refs
//!
//! why: know when an entry, and the batch memory behind it, is no longer referenced
//! relations: shared by store.rs and every outstanding acquired.rs view
//! what: RefTable with per-entry and per-batch counters

use std::collections::{HashMap, TryReserveError};

use bytes::Bytes;
use raft_core::{Batch, BatchId};
use tracing::{trace, warn};

#[derive(Debug)]
struct EntryRef {
    count: usize,
    batch: Option<BatchId>,
}

#[derive(Debug)]
struct BatchSlot {
    memory: Bytes,
    refs: usize,
}

/// Reference counters for entries and their batches.
///
/// An entry starts with one reference held by the log itself, and gains one
/// per outstanding acquisition. A batch's `refs` is the sum of the counts of
/// the entries pointing into it.
#[derive(Debug, Default)]
pub(crate) struct RefTable {
    entries: HashMap<u64, EntryRef>,
    batches: HashMap<BatchId, BatchSlot>,
    released: u64,
}

impl RefTable {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            batches: HashMap::new(),
            released: 0,
        }
    }

    /// Make room for `entries` new entries belonging to at most `batches` new batches
    pub fn reserve(&mut self, entries: usize, batches: usize) -> Result<(), TryReserveError> {
        self.entries.try_reserve(entries)?;
        self.batches.try_reserve(batches)?;
        Ok(())
    }

    /// Track a freshly appended entry
    pub fn insert(&mut self, serial: u64, batch: Option<&Batch>) {
        debug_assert!(!self.entries.contains_key(&serial));
        self.entries.insert(
            serial,
            EntryRef {
                count: 1,
                batch: batch.map(Batch::id),
            },
        );
        if let Some(batch) = batch {
            self.batches
                .entry(batch.id())
                .and_modify(|slot| {
                    debug_assert!(
                        slot.memory.as_ptr() == batch.memory().as_ptr()
                            && slot.memory.len() == batch.len(),
                        "{} reused for a different allocation",
                        batch.id()
                    );
                    slot.refs += 1;
                })
                .or_insert_with(|| BatchSlot {
                    memory: batch.memory().clone(),
                    refs: 1,
                });
        }
    }

    pub fn acquire(&mut self, serial: u64) {
        let Some(entry) = self.entries.get_mut(&serial) else {
            warn!(serial, "acquiring untracked entry");
            return;
        };
        entry.count += 1;
        if let Some(slot) = entry.batch.and_then(|id| self.batches.get_mut(&id)) {
            slot.refs += 1;
        }
    }

    /// Drop one reference to an entry.
    ///
    /// Returns the batch memory when this was the last reference into it. The
    /// table no longer tracks the batch after that.
    pub fn release(&mut self, serial: u64) -> Option<Bytes> {
        let Some(entry) = self.entries.get_mut(&serial) else {
            warn!(serial, "releasing untracked entry");
            return None;
        };
        entry.count -= 1;
        let batch = entry.batch;
        if entry.count == 0 {
            self.entries.remove(&serial);
        }

        let id = batch?;
        let slot = self.batches.get_mut(&id)?;
        slot.refs -= 1;
        if slot.refs > 0 {
            return None;
        }
        let slot = self.batches.remove(&id)?;
        self.released += 1;
        trace!(batch = %id, bytes = slot.memory.len(), "batch no longer referenced");
        Some(slot.memory)
    }

    pub fn count(&self, serial: u64) -> usize {
        self.entries.get(&serial).map_or(0, |e| e.count)
    }

    pub fn batch_refs(&self, id: BatchId) -> usize {
        self.batches.get(&id).map_or(0, |slot| slot.refs)
    }

    /// Entries still referenced by the log or by an acquisition
    pub fn tracked_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn live_batches(&self) -> usize {
        self.batches.len()
    }

    /// Batches relinquished since the table was created
    pub fn released_batches(&self) -> u64 {
        self.released
    }
}
