//! Error types for store operations.

use flowey_protocol::ProtocolError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The store file is corrupted.
    #[error("store corrupted: {0}")]
    Corrupted(String),

    /// A record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Another process holds the lock on this directory.
    #[error("{} is locked by another process", .0.display())]
    Locked(PathBuf),

    /// An account with this username already exists.
    #[error("account already exists: {0}")]
    DuplicateAccount(String),

    /// A persisted state is not a valid state document.
    #[error("invalid stored state: {0}")]
    InvalidState(#[from] ProtocolError),
}
