//! # store
//!
//! why: in-memory cache of the raft log that has not been covered by a snapshot
//! relations: composes ring.rs, refs.rs and acquired.rs; driven by the raft loop
//! what: LogStore with append, acquire/release, truncate/discard, snapshot/restore/seek

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use raft_core::{Batch, BatchId, Configuration, Entry, EntryType, Index, Term};
use tracing::{debug, trace, warn};

use crate::acquired::Acquired;
use crate::config::LogConfig;
use crate::error::LogResult;
use crate::refs::RefTable;
use crate::ring::{EntryRing, Record};

/// Last index and term covered by the most recent snapshot, 0/0 if none
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotBoundary {
    pub last_index: Index,
    pub last_term: Term,
}

/// Point-in-time counters describing the log's memory usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogStats {
    /// Entries not covered by a snapshot
    pub outstanding: usize,
    /// Entry slots currently allocated
    pub capacity: usize,
    /// Entries referenced by the log or by an acquired view
    pub tracked_entries: usize,
    /// Batches still tracked by the log or by an acquired view
    pub live_batches: usize,
    /// Batches the log stopped tracking so far.
    ///
    /// Counts batches handed over by [`LogStore::discard`] too, whose memory
    /// lives on for as long as the returned entries do.
    pub released_batches: u64,
}

/// In-memory log of raft entries.
///
/// Holds the contiguous run of entries after the last snapshot (minus any
/// trailing entries kept on purpose). Entries are addressed by absolute index.
/// All methods run to completion without blocking; entries that must outlive a
/// removal are pinned with [`LogStore::acquire`].
#[derive(Debug)]
pub struct LogStore {
    ring: EntryRing,
    snapshot: SnapshotBoundary,
    refs: Arc<Mutex<RefTable>>,
    next_serial: u64,
    next_batch: u64,
}

impl Default for LogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LogStore {
    /// Create an empty log with the default configuration
    pub fn new() -> Self {
        Self::with_config(&LogConfig::default())
    }

    pub fn with_config(config: &LogConfig) -> Self {
        Self {
            ring: EntryRing::with_capacity(config.initial_capacity),
            snapshot: SnapshotBoundary::default(),
            refs: Arc::new(Mutex::new(RefTable::with_capacity(
                config.refs_initial_capacity,
            ))),
            next_serial: 1,
            next_batch: 1,
        }
    }

    /// Tear the log down, releasing its references to every entry.
    ///
    /// Entries still pinned by an acquired view stay valid until the view is
    /// dropped.
    pub fn close(self) {
        debug!(
            outstanding = self.ring.len(),
            last_index = self.last_index(),
            "closing log"
        );
    }

    /// Number of entries not included in the most recent snapshot
    pub fn n_outstanding(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Index of the first outstanding entry
    pub fn first_index(&self) -> Option<Index> {
        self.ring.first_index()
    }

    /// Index of the last entry, or of the last snapshotted entry when there are
    /// no outstanding entries. Zero if the log is empty.
    pub fn last_index(&self) -> Index {
        if self.ring.is_empty() && self.snapshot.last_index != 0 {
            return self.snapshot.last_index;
        }
        self.ring.last_index()
    }

    pub fn last_term(&self) -> Term {
        self.term_of(self.last_index())
    }

    /// Term of the entry at `index`.
    ///
    /// Known for outstanding entries and for the last entry of the most recent
    /// snapshot, zero for anything else.
    pub fn term_of(&self, index: Index) -> Term {
        if let Some(record) = self.ring.get(index) {
            return record.entry.term;
        }
        if index != 0 && index == self.snapshot.last_index {
            return self.snapshot.last_term;
        }
        0
    }

    pub fn snapshot_index(&self) -> Index {
        self.snapshot.last_index
    }

    pub fn snapshot_term(&self) -> Term {
        self.snapshot.last_term
    }

    pub fn snapshot_boundary(&self) -> SnapshotBoundary {
        self.snapshot
    }

    /// Entry at `index`, if outstanding.
    ///
    /// The reference cannot outlive the next mutation; acquire the entry to
    /// keep it across one.
    pub fn get(&self, index: Index) -> Option<&Entry> {
        self.ring.get(index).map(|record| &record.entry)
    }

    /// Allocate an identity for a batch decoded by the caller
    pub fn next_batch_id(&mut self) -> BatchId {
        let id = BatchId::new(self.next_batch);
        self.next_batch += 1;
        id
    }

    /// Append an entry at `last_index() + 1` and return its index.
    ///
    /// When `batch` is given, `payload` must point into its memory and the
    /// batch stays alive for as long as any of its entries is referenced.
    pub fn append(
        &mut self,
        term: Term,
        entry_type: EntryType,
        payload: Bytes,
        batch: Option<&Batch>,
    ) -> LogResult<Index> {
        self.check_term(term);
        self.reserve(1, usize::from(batch.is_some()))?;
        Ok(self.push(term, entry_type, payload, batch))
    }

    /// Append one command entry per buffer, all sharing a single new batch.
    ///
    /// Either every entry is appended or none is. Returns the index of the
    /// last appended entry.
    pub fn append_commands(&mut self, term: Term, bufs: &[Bytes]) -> LogResult<Index> {
        if bufs.is_empty() {
            return Ok(self.last_index());
        }
        self.check_term(term);

        let id = self.next_batch_id();
        let (batch, payloads) = Batch::concat(id, bufs)?;
        self.reserve(payloads.len(), 1)?;

        let first = self.ring.next_index();
        let mut last = first;
        for payload in payloads {
            last = self.push(term, EntryType::Command, payload, Some(&batch));
        }
        debug!(first, last, term, batch = %id, "appended commands");
        Ok(last)
    }

    /// Encode `configuration` and append it as a configuration-change entry
    pub fn append_configuration(
        &mut self,
        term: Term,
        configuration: &Configuration,
    ) -> LogResult<Index> {
        let payload = configuration.encode()?;
        self.append(term, EntryType::Change, payload, None)
    }

    /// Pin every entry from `index` to the last index.
    ///
    /// An `index` past the last entry yields an empty view. Acquiring from an
    /// index that is no longer outstanding is a caller bug and panics.
    pub fn acquire(&mut self, index: Index) -> LogResult<Acquired> {
        assert!(
            index > self.ring.offset(),
            "acquire from index {index} which is not outstanding (offset {})",
            self.ring.offset()
        );

        let n = self.ring.iter_from(index).len();
        let mut entries = Vec::new();
        entries.try_reserve_exact(n)?;
        let mut serials = Vec::new();
        serials.try_reserve_exact(n)?;

        let mut refs = self.refs.lock();
        for record in self.ring.iter_from(index) {
            refs.acquire(record.serial);
            entries.push(record.entry.clone());
            serials.push(record.serial);
        }
        drop(refs);

        trace!(index, n, "acquired entries");
        Ok(Acquired::new(index, entries, serials, Arc::clone(&self.refs)))
    }

    /// Release a view obtained from [`LogStore::acquire`].
    ///
    /// Equivalent to dropping it. Batches whose entries were removed from the
    /// log in the meantime are relinquished here.
    pub fn release(&mut self, acquired: Acquired) {
        debug_assert!(acquired.shares(&self.refs), "view acquired from another log");
        drop(acquired);
    }

    /// Delete every entry from `index` (included) onwards.
    ///
    /// Memory of entries nobody else references is relinquished immediately,
    /// pinned entries are disposed of when their last view is released. If
    /// `index` is at or before the first outstanding entry the log becomes
    /// empty and the next entry will be appended at `index`. No-op on an
    /// empty log.
    pub fn truncate(&mut self, index: Index) {
        if self.ring.is_empty() {
            return;
        }
        let (removed, batches) = self.remove_suffix(index, drop);
        debug!(index, removed, batches, "truncated log");
    }

    /// Remove every entry from `index` (included) onwards and hand them over.
    ///
    /// Same as [`LogStore::truncate`], except the log gives up its bookkeeping
    /// without disposing of anything: the payload memory now belongs to the
    /// returned entries.
    pub fn discard(&mut self, index: Index) -> Vec<Entry> {
        let mut entries = Vec::new();
        if self.ring.is_empty() {
            return entries;
        }
        let (removed, batches) = self.remove_suffix(index, |entry| entries.push(entry));
        debug!(index, removed, batches, "discarded log suffix");
        entries
    }

    /// Record a snapshot that includes every entry up to `last_index`.
    ///
    /// Entries up to `last_index - trailing` are deleted, keeping `trailing`
    /// entries around so slightly lagging followers can be caught up without
    /// a snapshot transfer. Nothing is deleted if there is no entry at exactly
    /// `last_index - trailing`.
    ///
    /// # Panics
    ///
    /// If the log has no entry at `last_index`.
    pub fn snapshot(&mut self, last_index: Index, trailing: u64) {
        let Some(record) = self.ring.get(last_index) else {
            panic!("snapshot at index {last_index} which is not in the log");
        };
        self.snapshot = SnapshotBoundary {
            last_index,
            last_term: record.entry.term,
        };

        let (removed, batches) = match last_index.checked_sub(trailing) {
            Some(cutoff) if cutoff > 0 && self.ring.get(cutoff).is_some() => {
                self.remove_prefix(cutoff)
            }
            _ => (0, 0),
        };
        debug!(
            last_index,
            last_term = self.snapshot.last_term,
            trailing,
            removed,
            batches,
            "took snapshot"
        );
    }

    /// Install a snapshot received from another node.
    ///
    /// Every outstanding entry is discarded, and afterwards `last_index()` is
    /// `last_index` with no outstanding entries.
    pub fn restore(&mut self, last_index: Index, last_term: Term) {
        let discarded = match self.ring.first_index() {
            Some(first) => self.discard(first).len(),
            None => 0,
        };
        self.snapshot = SnapshotBoundary {
            last_index,
            last_term,
        };
        self.ring.set_offset(last_index);
        debug!(last_index, last_term, discarded, "restored snapshot");
    }

    /// Align absolute indexing so that the first stored entry, or the next
    /// appended one if the log is empty, gets `start_index`.
    ///
    /// Called once at startup when loading entries from disk.
    pub fn seek(&mut self, start_index: Index) {
        debug_assert!(start_index > 0, "seek to index 0");
        self.ring.set_offset(start_index.saturating_sub(1));
        debug!(start_index, outstanding = self.ring.len(), "seeked log");
    }

    /// Outstanding references to the entry at `index`, counting the log's own
    pub fn refcount(&self, index: Index) -> usize {
        self.ring
            .get(index)
            .map_or(0, |record| self.refs.lock().count(record.serial))
    }

    /// Outstanding references into `batch`
    pub fn batch_refs(&self, batch: BatchId) -> usize {
        self.refs.lock().batch_refs(batch)
    }

    pub fn stats(&self) -> LogStats {
        let refs = self.refs.lock();
        LogStats {
            outstanding: self.ring.len(),
            capacity: self.ring.capacity(),
            tracked_entries: refs.tracked_entries(),
            live_batches: refs.live_batches(),
            released_batches: refs.released_batches(),
        }
    }

    // -- internals --

    // entries reloaded below a restored snapshot may carry lower terms than
    // the snapshot, so only stored entries are compared
    fn check_term(&self, term: Term) {
        let Some(last) = self.ring.get(self.ring.last_index()) else {
            return;
        };
        let last_term = last.entry.term;
        if term < last_term {
            warn!(term, last_term, "appending entry with a lower term");
            debug_assert!(term >= last_term, "term {term} lower than last term {last_term}");
        }
    }

    fn reserve(&mut self, entries: usize, batches: usize) -> LogResult<()> {
        self.ring.reserve(entries)?;
        self.refs.lock().reserve(entries, batches)?;
        Ok(())
    }

    // capacity must have been reserved
    fn push(
        &mut self,
        term: Term,
        entry_type: EntryType,
        payload: Bytes,
        batch: Option<&Batch>,
    ) -> Index {
        let index = self.ring.next_index();
        let serial = self.next_serial;
        self.next_serial += 1;

        let entry = match batch {
            Some(batch) => Entry::in_batch(term, entry_type, payload, batch),
            None => Entry::new(term, entry_type, payload),
        };
        self.refs.lock().insert(serial, batch);
        self.ring.push(Record { serial, entry });

        trace!(index, term, ?entry_type, "appended entry");
        index
    }

    fn remove_suffix(&mut self, index: Index, mut dispose: impl FnMut(Entry)) -> (usize, usize) {
        let Some(first) = self.ring.first_index() else {
            return (0, 0);
        };
        let records: Vec<Record> = self.ring.drain_suffix(index).collect();
        if index <= first {
            self.ring.set_offset(index.saturating_sub(1));
        }

        let released = self.release_records(&records);
        let counts = (records.len(), released.len());
        for record in records {
            dispose(record.entry);
        }
        counts
    }

    fn remove_prefix(&mut self, index: Index) -> (usize, usize) {
        let records: Vec<Record> = self.ring.drain_prefix(index).collect();
        let released = self.release_records(&records);
        (records.len(), released.len())
    }

    // memory comes back unlocked so owner destructors never run under the lock
    fn release_records(&self, records: &[Record]) -> Vec<Bytes> {
        let mut refs = self.refs.lock();
        records
            .iter()
            .filter_map(|record| refs.release(record.serial))
            .collect()
    }
}

impl Drop for LogStore {
    fn drop(&mut self) {
        if let Some(first) = self.ring.first_index() {
            self.truncate(first);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::error::LogError;

    fn log_with_terms(terms: &[Term]) -> LogStore {
        let mut log = LogStore::new();
        for (i, term) in terms.iter().enumerate() {
            let payload = Bytes::from(format!("cmd{}", i + 1));
            log.append(*term, EntryType::Command, payload, None).unwrap();
        }
        log
    }

    #[test]
    fn empty_log() {
        let log = LogStore::new();
        assert_eq!(log.n_outstanding(), 0);
        assert_eq!(log.last_index(), 0);
        assert_eq!(log.last_term(), 0);
        assert_eq!(log.term_of(1), 0);
        assert_eq!(log.snapshot_index(), 0);
        assert!(log.get(1).is_none());
        assert!(log.first_index().is_none());
    }

    #[test]
    fn append_assigns_contiguous_indices() {
        let log = log_with_terms(&[1, 1, 1, 2, 2]);
        assert_eq!(log.n_outstanding(), 5);
        assert_eq!(log.last_index(), 5);
        assert_eq!(log.last_term(), 2);
        assert_eq!(log.term_of(3), 1);
        assert_eq!(&log.get(4).unwrap().payload[..], b"cmd4");
        assert_eq!(log.term_of(6), 0);
    }

    #[test]
    fn truncate_below_first_moves_offset() {
        let mut log = log_with_terms(&[1, 1, 1, 1, 1]);
        log.snapshot(5, 2);
        assert_eq!(log.first_index(), Some(4));

        log.truncate(2);
        assert!(log.is_empty());
        assert_eq!(log.append(2, EntryType::Command, Bytes::new(), None).unwrap(), 2);
    }

    #[test]
    fn snapshot_without_trailing_empties_log() {
        let mut log = log_with_terms(&[1, 2, 3]);
        log.snapshot(3, 0);

        assert_eq!(log.n_outstanding(), 0);
        assert_eq!(log.last_index(), 3);
        assert_eq!(log.last_term(), 3);
        assert_eq!(log.append(3, EntryType::Barrier, Bytes::new(), None).unwrap(), 4);
    }

    #[test]
    #[should_panic(expected = "not in the log")]
    fn snapshot_requires_entry_at_last_index() {
        let mut log = log_with_terms(&[1, 1]);
        log.snapshot(3, 0);
    }

    #[test]
    #[should_panic(expected = "not outstanding")]
    fn acquire_compacted_index_panics() {
        let mut log = log_with_terms(&[1, 1, 1]);
        log.snapshot(3, 1);
        let _ = log.acquire(1);
    }

    #[test]
    fn refcount_counts_log_and_views() {
        let mut log = log_with_terms(&[1, 1]);
        assert_eq!(log.refcount(1), 1);

        let a = log.acquire(1).unwrap();
        let b = log.acquire(2).unwrap();
        assert_eq!(log.refcount(1), 2);
        assert_eq!(log.refcount(2), 3);

        log.release(a);
        drop(b);
        assert_eq!(log.refcount(1), 1);
        assert_eq!(log.refcount(2), 1);
    }

    #[test]
    fn failed_reserve_leaves_log_unchanged() {
        let mut log = log_with_terms(&[1, 1, 2]);
        let before = log.stats();

        let err = log.reserve(usize::MAX, 1).unwrap_err();
        assert!(matches!(err, LogError::OutOfMemory(_)));
        assert!(err.to_string().starts_with("out of memory"));

        assert_eq!(log.last_index(), 3);
        assert_eq!(log.last_term(), 2);
        assert_eq!(log.n_outstanding(), 3);
        assert_eq!(log.stats(), before);
        assert_eq!(log.append(2, EntryType::Command, Bytes::new(), None).unwrap(), 4);
    }

    /// Batch memory that records whether the refs lock was free when it dropped
    struct LockWitness {
        data: Vec<u8>,
        refs: Arc<Mutex<RefTable>>,
        unlocked: Arc<AtomicBool>,
    }

    impl AsRef<[u8]> for LockWitness {
        fn as_ref(&self) -> &[u8] {
            &self.data
        }
    }

    impl Drop for LockWitness {
        fn drop(&mut self) {
            let unlocked = self.refs.try_lock().is_some();
            self.unlocked.store(unlocked, Ordering::SeqCst);
        }
    }

    fn append_witnessed(log: &mut LogStore) -> Arc<AtomicBool> {
        let unlocked = Arc::new(AtomicBool::new(false));
        let memory = Bytes::from_owner(LockWitness {
            data: b"abcd".to_vec(),
            refs: Arc::clone(&log.refs),
            unlocked: Arc::clone(&unlocked),
        });
        let batch = Batch::new(log.next_batch_id(), memory);
        log.append(1, EntryType::Command, batch.slice(0..2), Some(&batch))
            .unwrap();
        log.append(1, EntryType::Command, batch.slice(2..4), Some(&batch))
            .unwrap();
        unlocked
    }

    #[test]
    fn truncate_frees_memory_outside_the_lock() {
        let mut log = LogStore::new();
        let unlocked = append_witnessed(&mut log);

        log.truncate(1);
        assert!(unlocked.load(Ordering::SeqCst));
    }

    #[test]
    fn released_view_frees_memory_outside_the_lock() {
        let mut log = LogStore::new();
        let unlocked = append_witnessed(&mut log);

        let view = log.acquire(1).unwrap();
        log.snapshot(2, 0);
        assert!(!unlocked.load(Ordering::SeqCst));
        log.release(view);
        assert!(unlocked.load(Ordering::SeqCst));
    }

    #[test]
    fn seek_on_empty_log_sets_next_index() {
        let mut log = LogStore::new();
        log.seek(10);
        assert_eq!(log.last_index(), 9);
        assert_eq!(log.append(4, EntryType::Command, Bytes::new(), None).unwrap(), 10);
        assert_eq!(log.term_of(10), 4);
    }
}
