//! Reasons the server gives when it closes a connection.

/// Why the server closed a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The server is shutting down (normal closure).
    Shutdown,
    /// The session token was missing or invalid.
    Unauthorized,
    /// The connection could not keep up with outbound updates.
    Lagging,
    /// The server hit an unexpected condition.
    Internal,
}

impl CloseReason {
    /// Websocket close code.
    pub fn code(self) -> u16 {
        match self {
            CloseReason::Shutdown => 1000,
            CloseReason::Unauthorized => 4401,
            CloseReason::Lagging => 1013,
            CloseReason::Internal => 1011,
        }
    }

    /// Human-readable close reason.
    pub fn message(self) -> &'static str {
        match self {
            CloseReason::Shutdown => "server shutting down",
            CloseReason::Unauthorized => "unauthorized",
            CloseReason::Lagging => "too many pending updates",
            CloseReason::Internal => "internal error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_is_normal_closure() {
        assert_eq!(CloseReason::Shutdown.code(), 1000);
        assert_eq!(CloseReason::Shutdown.message(), "server shutting down");
    }

    #[test]
    fn codes_are_distinct() {
        let codes = [
            CloseReason::Shutdown.code(),
            CloseReason::Unauthorized.code(),
            CloseReason::Lagging.code(),
            CloseReason::Internal.code(),
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
