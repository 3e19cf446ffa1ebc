//! # config
//!
//! why: tune the initial memory footprint of the log cache
//! relations: consumed by store.rs when the log is initialized
//! what: LogConfig with serde defaults and json loading

use serde::{Deserialize, Serialize};

/// Ring slots reserved when the log is created
pub const DEFAULT_INITIAL_CAPACITY: usize = 64;

/// Buckets reserved in the reference table when the log is created
pub const DEFAULT_REFS_INITIAL_CAPACITY: usize = 256;

/// Configuration for a LogStore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Number of entry slots reserved up front
    pub initial_capacity: usize,
    /// Number of reference counters reserved up front
    pub refs_initial_capacity: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            refs_initial_capacity: DEFAULT_REFS_INITIAL_CAPACITY,
        }
    }
}

impl LogConfig {
    /// Parse from json, missing fields take their default
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
