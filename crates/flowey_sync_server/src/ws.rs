//! Websocket transport and upgrade.
//!
//! The session token is taken from the `Sec-WebSocket-Protocol` header (see
//! [`flowey_protocol::parse_subprotocol_header`]) and resolved before the
//! upgrade is answered, so an unauthorized client gets a plain HTTP 401 and
//! never reaches the connection loop.

use crate::error::{ServerError, ServerResult};
use crate::handler::{ConnectionHandler, HandlerContext};
use crate::server::AppState;
use crate::transport::{Inbound, MessageTransport};
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::header::{ORIGIN, SEC_WEBSOCKET_PROTOCOL};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use flowey_protocol::{parse_subprotocol_header, CloseReason, UserId, SUBPROTOCOL};
use futures::SinkExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How long to wait for the peer's close reply.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// [`MessageTransport`] over an upgraded websocket.
pub struct WebSocketTransport {
    socket: WebSocket,
}

impl WebSocketTransport {
    /// Wraps an upgraded socket.
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

impl MessageTransport for WebSocketTransport {
    async fn receive(&mut self) -> Inbound {
        match self.socket.recv().await {
            Some(Ok(Message::Text(text))) => Inbound::Text(text.as_str().to_owned()),
            Some(Ok(Message::Close(frame))) => {
                // Pushes out the close reply queued by the protocol layer.
                if let Err(e) = SinkExt::flush(&mut self.socket).await {
                    debug!(error = %e, "failed to answer close frame");
                }
                match frame {
                    Some(frame) => Inbound::Closed {
                        code: Some(frame.code),
                        reason: frame.reason.as_str().to_owned(),
                    },
                    None => Inbound::Closed {
                        code: None,
                        reason: String::new(),
                    },
                }
            }
            Some(Ok(_)) => Inbound::Ignored,
            Some(Err(e)) => Inbound::Failed(e.to_string()),
            None => Inbound::Closed {
                code: None,
                reason: String::new(),
            },
        }
    }

    async fn send(&mut self, text: String) -> ServerResult<()> {
        self.socket
            .send(Message::Text(Utf8Bytes::from(text)))
            .await
            .map_err(|e| ServerError::Transport(e.to_string()))
    }

    async fn close(&mut self, reason: CloseReason) {
        let frame = CloseFrame {
            code: reason.code(),
            reason: Utf8Bytes::from_static(reason.message()),
        };
        if let Err(e) = self.socket.send(Message::Close(Some(frame))).await {
            debug!(error = %e, "failed to send close frame");
            return;
        }

        // Wait for the close reply so the peer sees a clean close.
        let socket = &mut self.socket;
        let drain = async { while let Some(Ok(_)) = socket.recv().await {} };
        if tokio::time::timeout(CLOSE_GRACE, drain).await.is_err() {
            debug!("peer did not answer close frame");
        }
    }
}

/// Extracts the host from an `Origin` header value such as
/// `https://app.example.com:8443`.
pub(crate) fn origin_host(origin: &str) -> &str {
    let rest = origin.split_once("://").map_or(origin, |(_, rest)| rest);
    let authority = rest.split('/').next().unwrap_or(rest);
    if authority.ends_with(']') {
        return authority;
    }
    authority
        .rsplit_once(':')
        .map_or(authority, |(host, _)| host)
}

enum Refusal {
    Forbidden(String),
    Denied(ServerError),
    Unavailable(&'static str),
}

impl IntoResponse for Refusal {
    fn into_response(self) -> Response {
        match self {
            Refusal::Forbidden(message) => (StatusCode::FORBIDDEN, message).into_response(),
            Refusal::Denied(ServerError::Unauthorized(_)) => {
                (StatusCode::UNAUTHORIZED, "unauthorized").into_response()
            }
            Refusal::Denied(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
            }
            Refusal::Unavailable(message) => {
                (StatusCode::SERVICE_UNAVAILABLE, message).into_response()
            }
        }
    }
}

fn authorize(context: &HandlerContext, headers: &HeaderMap) -> Result<UserId, Refusal> {
    if let Some(origin) = headers.get(ORIGIN) {
        let origin = origin.to_str().unwrap_or_default();
        if !context.config.origin_allowed(origin_host(origin)) {
            return Err(Refusal::Forbidden(format!("origin {} not allowed", origin)));
        }
    }

    let protocols = headers
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect::<Vec<_>>()
        .join(", ");
    let token = parse_subprotocol_header(&protocols).ok_or_else(|| {
        Refusal::Denied(ServerError::Unauthorized(
            "missing session token in subprotocol header".into(),
        ))
    })?;

    context.authenticator.authenticate(token).map_err(Refusal::Denied)
}

/// `GET /ws`: authenticates the client and upgrades to a sync connection.
///
/// The connection counts as a server task from here until its handler
/// returns, so shutdown drains it and it counts against the connection
/// limit.
pub(crate) async fn upgrade(
    State(app): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let context = Arc::clone(&app.context);
    if context.shutdown_token().is_cancelled() {
        return Refusal::Unavailable("server shutting down").into_response();
    }
    if app.tracker.len() >= context.config.max_connections {
        warn!(peer = %peer, "connection limit reached, refusing upgrade");
        return Refusal::Unavailable("connection limit reached").into_response();
    }

    let user = match authorize(&context, &headers) {
        Ok(user) => user,
        Err(refusal) => {
            match &refusal {
                Refusal::Denied(e) if !e.is_client_error() => {
                    warn!(peer = %peer, error = %e, "failed to authenticate")
                }
                Refusal::Forbidden(message) => warn!(peer = %peer, %message, "refused connection"),
                _ => warn!(peer = %peer, "refused connection"),
            }
            return refusal.into_response();
        }
    };

    let slot = app.tracker.token();
    ws.protocols([SUBPROTOCOL])
        .on_failed_upgrade(move |e| debug!(peer = %peer, error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| async move {
            let _slot = slot;
            let mut handler = ConnectionHandler::new(context, peer.to_string());
            if let Err(e) = handler.run(user, WebSocketTransport::new(socket)).await {
                debug!(peer = %peer, connection = %handler.id(), error = %e, "connection ended with error");
            }
        })
}
