//! # error
//!
//! why: typed failures returned by the log cache
//! relations: returned by store.rs operations
//! what: LogError, LogResult

use std::collections::TryReserveError;

use raft_core::ConfigurationError;
use thiserror::Error;

/// Errors returned by LogStore operations
///
/// A failed operation leaves the log exactly as it was before the call.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("out of memory: {0}")]
    OutOfMemory(#[from] TryReserveError),

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

pub type LogResult<T> = Result<T, LogError>;
