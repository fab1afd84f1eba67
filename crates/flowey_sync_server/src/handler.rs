//! Per-connection handling.

use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::reconciler::{Outcome, Reconciler};
use crate::registry::{CloseSignal, ConnectionHandle, ConnectionId, ConnectionRegistry};
use crate::transport::{Inbound, MessageTransport};
use flowey_protocol::{CloseReason, UserId};
use flowey_store::StateStore;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shared state for all connection handlers.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Live connections.
    pub registry: Arc<ConnectionRegistry>,
    /// State reconciliation.
    pub reconciler: Arc<Reconciler>,
    /// Session token resolution.
    pub authenticator: Arc<dyn Authenticator>,
    /// Fires once the server shuts down.
    shutdown: CancellationToken,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn StateStore>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        Self {
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            reconciler: Arc::new(Reconciler::new(store)),
            authenticator,
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns the server-wide shutdown token.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }
}

/// Lifecycle of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the session token to be resolved.
    Handshaking,
    /// Registered and exchanging states.
    Active,
    /// Unregistered, closing the transport.
    Closing,
    /// Terminal.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Active => "active",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

enum Event {
    Close,
    Outbound(Arc<str>),
    Inbound(Inbound),
}

/// Drives one connection from handshake to close.
pub struct ConnectionHandler {
    context: Arc<HandlerContext>,
    id: ConnectionId,
    peer: String,
    state: ConnectionState,
}

impl ConnectionHandler {
    /// Creates a handler for a connection from `peer`.
    pub fn new(context: Arc<HandlerContext>, peer: impl Into<String>) -> Self {
        let id = context.registry.next_connection_id();
        Self {
            context,
            id,
            peer: peer.into(),
            state: ConnectionState::Handshaking,
        }
    }

    /// Returns the connection ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Resolves the session token presented by the client.
    ///
    /// On failure the handler moves straight to [`ConnectionState::Closed`].
    pub fn authenticate(&mut self, token: Option<&str>) -> ServerResult<UserId> {
        let result = match token {
            Some(token) => self.context.authenticator.authenticate(token),
            None => Err(ServerError::Unauthorized("missing session token".into())),
        };
        match &result {
            Ok(user) => debug!(connection = %self.id, peer = %self.peer, user = %user, "authenticated"),
            Err(e) => {
                warn!(connection = %self.id, peer = %self.peer, error = %e, "authentication failed");
                self.state = ConnectionState::Closed;
            }
        }
        result
    }

    /// Authenticates `token` and then runs the connection.
    ///
    /// An unauthenticated transport is closed with
    /// [`CloseReason::Unauthorized`] and never registered.
    pub async fn serve<T: MessageTransport>(
        &mut self,
        token: Option<&str>,
        mut transport: T,
    ) -> ServerResult<()> {
        match self.authenticate(token) {
            Ok(user) => self.run(user, transport).await,
            Err(e) => {
                transport.close(CloseReason::Unauthorized).await;
                Err(e)
            }
        }
    }

    /// Runs an authenticated connection until it closes.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Transport`] if the connection failed rather than closed
    /// - [`ServerError::Internal`] if a reconciliation task died; the client
    ///   is closed with [`CloseReason::Internal`]
    pub async fn run<T: MessageTransport>(&mut self, user: UserId, mut transport: T) -> ServerResult<()> {
        let (outbound_tx, mut outbound_rx) = mpsc::channel(self.context.config.outbound_buffer);
        let signal = Arc::new(CloseSignal::child_of(&self.context.shutdown));
        self.context.registry.register(
            user,
            ConnectionHandle::new(self.id, outbound_tx, Arc::clone(&signal)),
        );
        self.state = ConnectionState::Active;
        info!(connection = %self.id, peer = %self.peer, user = %user, "connection active");

        let mut failure = None;
        let close_reason = loop {
            let event = tokio::select! {
                biased;
                _ = signal.closed() => Event::Close,
                Some(message) = outbound_rx.recv() => Event::Outbound(message),
                inbound = transport.receive() => Event::Inbound(inbound),
            };

            match event {
                Event::Close => break Some(signal.reason().unwrap_or(CloseReason::Shutdown)),
                Event::Outbound(message) => {
                    let sent = tokio::select! {
                        biased;
                        _ = signal.closed() => continue,
                        sent = transport.send(message.to_string()) => sent,
                    };
                    if let Err(e) = sent {
                        warn!(connection = %self.id, user = %user, error = %e, "send failed");
                        failure = Some(e);
                        break None;
                    }
                }
                Event::Inbound(Inbound::Text(text)) => {
                    if let Err(e) = self.handle_text(user, text).await {
                        error!(connection = %self.id, user = %user, error = %e, "closing connection");
                        failure = Some(e);
                        break Some(CloseReason::Internal);
                    }
                }
                Event::Inbound(Inbound::Ignored) => {}
                Event::Inbound(Inbound::Closed { code, reason }) => {
                    debug!(connection = %self.id, user = %user, ?code, %reason, "peer closed");
                    break None;
                }
                Event::Inbound(Inbound::Failed(e)) => {
                    warn!(connection = %self.id, user = %user, error = %e, "receive failed");
                    failure = Some(ServerError::Transport(e));
                    break None;
                }
            }
        };

        self.state = ConnectionState::Closing;
        self.context.registry.unregister(user, self.id);
        if let Some(reason) = close_reason {
            debug!(connection = %self.id, user = %user, reason = reason.message(), "closing");
            transport.close(reason).await;
        }
        self.state = ConnectionState::Closed;
        info!(connection = %self.id, peer = %self.peer, user = %user, "connection closed");

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Reconciles one submitted state.
    ///
    /// Malformed input and storage failures are logged and the message is
    /// dropped. Only a reconciliation task that died is returned as an
    /// error, and it ends the connection.
    async fn handle_text(&self, user: UserId, text: String) -> ServerResult<()> {
        if text.len() > self.context.config.max_message_bytes {
            warn!(
                connection = %self.id,
                user = %user,
                bytes = text.len(),
                "dropping oversized message"
            );
            return Ok(());
        }

        let reconciler = Arc::clone(&self.context.reconciler);
        let registry = Arc::clone(&self.context.registry);
        let id = self.id;
        let result = tokio::task::spawn_blocking(move || {
            reconciler.reconcile_then(user, &text, |outcome| deliver(&registry, user, id, outcome))
        })
        .await
        .map_err(|e| ServerError::Internal(format!("reconciliation task failed: {}", e)))?;

        match result {
            Ok(_) => {}
            Err(e) if e.is_client_error() => {
                warn!(connection = %self.id, user = %user, error = %e, "dropping malformed message");
            }
            Err(e) => {
                error!(connection = %self.id, user = %user, error = %e, "failed to reconcile state");
            }
        }
        Ok(())
    }
}

/// Queues an outcome for the connections that should see it.
///
/// Runs under the reconciler's per-user lock, so it only uses non-blocking
/// sends.
fn deliver(registry: &ConnectionRegistry, user: UserId, origin: ConnectionId, outcome: &Outcome) {
    match outcome {
        Outcome::NoOp => {
            debug!(connection = %origin, user = %user, "state unchanged");
        }
        Outcome::Accepted(state) => {
            let payload: Arc<str> = Arc::from(state.to_json());
            let delivered = registry.broadcast(user, &payload, None);
            debug!(
                connection = %origin,
                user = %user,
                version = %state.version(),
                delivered,
                "broadcast accepted state"
            );
        }
        Outcome::Rejected(state) => {
            let payload: Arc<str> = Arc::from(state.to_json());
            registry.send_to(user, origin, &payload);
            debug!(
                connection = %origin,
                user = %user,
                version = %state.version(),
                "sent current state to stale client"
            );
        }
    }
}
