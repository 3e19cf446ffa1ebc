//! # entry
//!
//! why: describe a single replicated log entry and the memory it points into
//! relations: stored by raft-log's LogStore, encoded by persistence and replication
//! what: Term/Index aliases, EntryType tag, BatchId, Batch, Entry

use std::collections::TryReserveError;
use std::fmt;
use std::ops::Range;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A raft term. Zero means "no term" or "unknown".
pub type Term = u64;

/// An absolute, never renumbered position in the replicated log (1-indexed).
pub type Index = u64;

/// Kind of payload carried by an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    /// Command to be applied to the state machine
    Command,
    /// No-op appended by a new leader to commit entries from previous terms
    Barrier,
    /// Encoded cluster configuration
    Change,
}

impl Default for EntryType {
    fn default() -> Self {
        Self::Command
    }
}

/// Identity of a batch, i.e. of one shared payload allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchId(u64);

impl BatchId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch#{}", self.0)
    }
}

/// One allocation holding the payloads of several entries.
///
/// Entries decoded together from one disk read, or appended together in one
/// call, share a batch. Their payloads are slices of `memory` and never own
/// bytes of their own.
#[derive(Debug, Clone)]
pub struct Batch {
    id: BatchId,
    memory: Bytes,
}

impl Batch {
    pub fn new(id: BatchId, memory: impl Into<Bytes>) -> Self {
        Self {
            id,
            memory: memory.into(),
        }
    }

    /// Copy `bufs` into a single fresh allocation.
    ///
    /// Returns the batch and one payload per input buffer, in order. Fails
    /// without side effects if the allocation cannot be obtained.
    pub fn concat(id: BatchId, bufs: &[Bytes]) -> Result<(Self, Vec<Bytes>), TryReserveError> {
        let total: usize = bufs.iter().map(Bytes::len).sum();

        let mut memory = Vec::new();
        memory.try_reserve_exact(total)?;
        let mut ranges = Vec::new();
        ranges.try_reserve_exact(bufs.len())?;

        for buf in bufs {
            let start = memory.len();
            memory.extend_from_slice(buf);
            ranges.push(start..memory.len());
        }

        let batch = Self::new(id, memory);
        let mut payloads = Vec::new();
        payloads.try_reserve_exact(ranges.len())?;
        payloads.extend(ranges.into_iter().map(|range| batch.slice(range)));

        Ok((batch, payloads))
    }

    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn memory(&self) -> &Bytes {
        &self.memory
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    /// Payload handle into the batch memory. Panics if `range` is out of bounds.
    pub fn slice(&self, range: Range<usize>) -> Bytes {
        self.memory.slice(range)
    }

    /// Whether `payload` points into this batch's memory.
    pub fn contains(&self, payload: &Bytes) -> bool {
        if payload.is_empty() {
            return true;
        }
        let base = self.memory.as_ptr() as usize;
        let end = base + self.memory.len();
        let start = payload.as_ptr() as usize;
        start >= base && start + payload.len() <= end
    }
}

/// A single entry in the replicated log
///
/// The absolute index is not stored: it is implied by the entry's position in
/// the log that holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The term when this entry was created
    pub term: Term,
    /// What the payload encodes
    pub entry_type: EntryType,
    /// Opaque payload bytes, possibly a slice of a batch
    pub payload: Bytes,
    /// Batch owning the payload memory, if any
    pub batch: Option<BatchId>,
}

impl Entry {
    /// Create an entry whose payload is its own allocation
    pub fn new(term: Term, entry_type: EntryType, payload: impl Into<Bytes>) -> Self {
        Self {
            term,
            entry_type,
            payload: payload.into(),
            batch: None,
        }
    }

    /// Create an entry whose payload lives inside `batch`
    pub fn in_batch(term: Term, entry_type: EntryType, payload: Bytes, batch: &Batch) -> Self {
        debug_assert!(batch.contains(&payload), "payload outside of {}", batch.id());
        Self {
            term,
            entry_type,
            payload,
            batch: Some(batch.id()),
        }
    }

    pub fn is_command(&self) -> bool {
        self.entry_type == EntryType::Command
    }

    pub fn is_change(&self) -> bool {
        self.entry_type == EntryType::Change
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_shares_one_allocation() {
        let bufs = vec![Bytes::from_static(b"set a 1"), Bytes::from_static(b"set b 2")];
        let (batch, payloads) = Batch::concat(BatchId::new(7), &bufs).unwrap();

        assert_eq!(batch.len(), 14);
        assert_eq!(payloads.len(), 2);
        assert_eq!(&payloads[0][..], b"set a 1");
        assert_eq!(&payloads[1][..], b"set b 2");
        assert!(payloads.iter().all(|p| batch.contains(p)));
    }

    #[test]
    fn foreign_payload_is_not_contained() {
        let batch = Batch::new(BatchId::new(1), b"abc".to_vec());
        let other = Bytes::from(b"abc".to_vec());
        assert!(!batch.contains(&other));
        assert!(batch.contains(&batch.slice(1..3)));
    }

    #[test]
    fn entry_in_batch_records_owner() {
        let batch = Batch::new(BatchId::new(3), b"payload".to_vec());
        let entry = Entry::in_batch(2, EntryType::Command, batch.slice(0..3), &batch);
        assert_eq!(entry.batch, Some(BatchId::new(3)));
        assert_eq!(&entry.payload[..], b"pay");
        assert!(entry.is_command());
    }
}
