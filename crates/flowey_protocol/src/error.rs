//! Error types for protocol parsing.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while parsing protocol payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The payload is not valid JSON.
    #[error("malformed state: {0}")]
    Malformed(String),

    /// The payload is JSON but not an object.
    #[error("state must be a JSON object")]
    NotAnObject,

    /// The `version` field is absent.
    #[error("state is missing the version field")]
    MissingVersion,

    /// The `version` field is not a non-negative integer.
    #[error("state version must be a non-negative integer, got {0}")]
    InvalidVersion(String),

    /// The `version` field is outside `[0, 1_000_000)`.
    #[error("state version {0} is out of range")]
    VersionOutOfRange(u64),
}
