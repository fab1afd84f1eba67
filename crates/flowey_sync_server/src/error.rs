//! Error types for the sync server.

use flowey_protocol::ProtocolError;
use flowey_store::StoreError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The session token or credentials were rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A submitted state could not be accepted as a state document.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// The state or account store failed.
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),

    /// Reading from or writing to a connection failed.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Connection handlers did not exit within the shutdown timeout.
    #[error("shutdown timed out with {pending} connection tasks still running")]
    ShutdownTimeout {
        /// Handler tasks still running.
        pending: usize,
    },

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        ServerError::MalformedInput(err.to_string())
    }
}

impl ServerError {
    /// Returns true if the remote side is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::Unauthorized(_) | ServerError::MalformedInput(_)
        )
    }

    /// Returns true if the server is at fault.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            ServerError::Storage(_)
                | ServerError::Internal(_)
                | ServerError::ShutdownTimeout { .. }
                | ServerError::Io(_)
        )
    }

    /// Returns true if the connection itself failed.
    pub fn is_transport_error(&self) -> bool {
        matches!(self, ServerError::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::Unauthorized("bad token".into()).is_client_error());
        assert!(ServerError::MalformedInput("bad".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(ServerError::Storage(StoreError::Corrupted("x".into())).is_server_error());
        assert!(ServerError::Transport("reset".into()).is_transport_error());
        assert!(!ServerError::MalformedInput("bad".into()).is_server_error());
    }

    #[test]
    fn protocol_errors_are_malformed_input() {
        let err: ServerError = ProtocolError::MissingVersion.into();
        assert!(matches!(err, ServerError::MalformedInput(_)));
    }

    #[test]
    fn error_display() {
        let err = ServerError::ShutdownTimeout { pending: 3 };
        assert!(err.to_string().contains('3'));
    }
}
