//! # error
//!
//! why: typed failures for the data model shared across raft crates
//! relations: wrapped by raft-log's LogError
//! what: ConfigurationError

use thiserror::Error;

/// Errors raised while editing or encoding a cluster configuration
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("server id must be non-zero")]
    ZeroId,

    #[error("server {0} is already in the configuration")]
    DuplicateId(u64),

    #[error("address {0} is already in use")]
    DuplicateAddress(String),

    #[error("server {0} not found")]
    NotFound(u64),

    #[error("configuration encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}
