//! # test harness
//!
//! why: observe exactly when batch memory is freed
//! relations: shared by the raft-log integration tests
//! what: drop-counting batch allocations, tracing setup

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use raft_log::{Batch, EntryType, Index, LogStore, Term};

/// Batch memory that counts its own drop
struct Tracked {
    data: Vec<u8>,
    freed: Arc<AtomicUsize>,
}

impl AsRef<[u8]> for Tracked {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.freed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Counts allocations handed to a log and how many of them were freed
#[derive(Clone, Default)]
pub struct Allocations {
    created: Arc<AtomicUsize>,
    freed: Arc<AtomicUsize>,
}

impl Allocations {
    pub fn new() -> Self {
        Self::default()
    }

    /// One batch holding `parts`, plus one payload slice per part
    pub fn batch(&self, log: &mut LogStore, parts: &[&[u8]]) -> (Batch, Vec<Bytes>) {
        let mut data = Vec::new();
        let mut ranges = Vec::new();
        for part in parts {
            let start = data.len();
            data.extend_from_slice(part);
            ranges.push(start..data.len());
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let memory = Bytes::from_owner(Tracked {
            data,
            freed: Arc::clone(&self.freed),
        });
        let batch = Batch::new(log.next_batch_id(), memory);
        let payloads = ranges.into_iter().map(|r| batch.slice(r)).collect();
        (batch, payloads)
    }

    /// Append one command per part, all from a single tracked batch
    pub fn append_batch(&self, log: &mut LogStore, term: Term, parts: &[&[u8]]) -> Index {
        let (batch, payloads) = self.batch(log, parts);
        let mut last = log.last_index();
        for payload in payloads {
            last = log
                .append(term, EntryType::Command, payload, Some(&batch))
                .unwrap();
        }
        last
    }

    /// Append one command per term, each in its own tracked batch
    pub fn append_terms(&self, log: &mut LogStore, terms: &[Term]) {
        for term in terms {
            let index = log.last_index() + 1;
            let cmd = format!("cmd{index}");
            self.append_batch(log, *term, &[cmd.as_bytes()]);
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn freed(&self) -> usize {
        self.freed.load(Ordering::SeqCst)
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}
