//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Time allowed for connections to drain on shutdown.
    pub shutdown_timeout: Duration,
    /// Pending outbound states per connection before it is closed as lagging.
    pub outbound_buffer: usize,
    /// Largest accepted state message, in bytes.
    pub max_message_bytes: usize,
    /// Origin hosts allowed to connect (empty allows any). Requests without
    /// an `Origin` header are not browser requests and are always allowed.
    pub allowed_origins: Vec<String>,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_connections: 1000,
            shutdown_timeout: Duration::from_secs(10),
            outbound_buffer: 64,
            max_message_bytes: 1024 * 1024,
            allowed_origins: Vec::new(),
        }
    }

    /// Sets the maximum concurrent connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the shutdown drain timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the per-connection outbound buffer size.
    pub fn with_outbound_buffer(mut self, size: usize) -> Self {
        self.outbound_buffer = size.max(1);
        self
    }

    /// Sets the maximum state message size.
    pub fn with_max_message_bytes(mut self, size: usize) -> Self {
        self.max_message_bytes = size;
        self
    }

    /// Adds an allowed origin host.
    pub fn with_allowed_origin(mut self, host: impl Into<String>) -> Self {
        self.allowed_origins.push(host.into());
        self
    }

    /// Returns true if a browser connection from origin `host` may be accepted.
    pub fn origin_allowed(&self, host: &str) -> bool {
        self.allowed_origins.is_empty()
            || self
                .allowed_origins
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(host))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 8080)))
    }
}
