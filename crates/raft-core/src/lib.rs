//! # raft-core
//!
//! why: define the raft data model shared by every component of the node
//! relations: used by raft-log for the in-memory log cache
//! what: entry and batch types, cluster configuration, error types

pub mod configuration;
pub mod entry;
pub mod error;

pub use configuration::{Configuration, Role, Server};
pub use entry::{Batch, BatchId, Entry, EntryType, Index, Term};
pub use error::ConfigurationError;
