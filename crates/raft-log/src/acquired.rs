//! # acquired
//!
//! why: let persistence and replication hold entries across an await point
//! relations: produced by LogStore::acquire, decrements refs.rs when dropped
//! what: Acquired guard over a read-only run of entries

use std::sync::Arc;

use parking_lot::Mutex;
use raft_core::{Entry, Index};
use tracing::trace;

use crate::refs::RefTable;

/// Read-only view of the entries from `start_index()` to the last index at
/// the time of the acquisition.
///
/// The payload memory of every entry stays valid for as long as the view
/// exists, even if the log truncates, discards or compacts those entries in
/// the meantime. Dropping the view releases it.
#[derive(Debug)]
pub struct Acquired {
    start: Index,
    entries: Vec<Entry>,
    serials: Vec<u64>,
    refs: Arc<Mutex<RefTable>>,
}

impl Acquired {
    pub(crate) fn new(
        start: Index,
        entries: Vec<Entry>,
        serials: Vec<u64>,
        refs: Arc<Mutex<RefTable>>,
    ) -> Self {
        debug_assert_eq!(entries.len(), serials.len());
        Self {
            start,
            entries,
            serials,
            refs,
        }
    }

    pub(crate) fn shares(&self, refs: &Arc<Mutex<RefTable>>) -> bool {
        Arc::ptr_eq(&self.refs, refs)
    }

    /// Index of the first entry in the view
    pub fn start_index(&self) -> Index {
        self.start
    }

    /// Index of the last entry in the view, `start_index() - 1` when empty
    pub fn last_index(&self) -> Index {
        (self.start + self.entries.len() as Index).saturating_sub(1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn get(&self, index: Index) -> Option<&Entry> {
        let i = usize::try_from(index.checked_sub(self.start)?).ok()?;
        self.entries.get(i)
    }

    /// Entries paired with their absolute index
    pub fn iter(&self) -> impl Iterator<Item = (Index, &Entry)> + '_ {
        (self.start..).zip(self.entries.iter())
    }
}

impl Drop for Acquired {
    fn drop(&mut self) {
        if self.serials.is_empty() {
            return;
        }
        let mut refs = self.refs.lock();
        let released: Vec<_> = self
            .serials
            .drain(..)
            .filter_map(|serial| refs.release(serial))
            .collect();
        drop(refs);
        trace!(
            start = self.start,
            n = self.entries.len(),
            batches = released.len(),
            "released acquired entries"
        );
    }
}
