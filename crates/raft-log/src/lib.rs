//! # raft-log
//!
//! why: cache the outstanding suffix of the raft log in memory
//! relations: built on raft-core types, driven by the raft loop, read by persistence and replication
//! what: LogStore, Acquired views, LogConfig, LogError

mod acquired;
pub mod config;
pub mod error;
mod refs;
mod ring;
pub mod store;

pub use acquired::Acquired;
pub use config::LogConfig;
pub use error::{LogError, LogResult};
pub use store::{LogStats, LogStore, SnapshotBoundary};

pub use raft_core::{Batch, BatchId, Configuration, Entry, EntryType, Index, Role, Term};
