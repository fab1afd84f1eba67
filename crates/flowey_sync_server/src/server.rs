//! Main sync server.
//!
//! Routes, all on one listener:
//! - `GET /ws` upgrades to a sync connection
//! - `POST`, `DELETE` and `OPTIONS /session` manage session tokens

use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{ConnectionHandler, HandlerContext};
use crate::registry::ConnectionRegistry;
use crate::transport::MessageTransport;
use crate::{session, ws};
use axum::routing::{get, post};
use axum::{middleware, Router};
use flowey_store::StateStore;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// State shared by the HTTP routes.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) context: Arc<HandlerContext>,
    /// Counts live connections; shutdown waits on it.
    pub(crate) tracker: TaskTracker,
}

/// The sync server.
///
/// Serves websocket upgrades and the session endpoint, runs one task per
/// connection and drains all of them on shutdown.
///
/// # Example
///
/// ```no_run
/// use flowey_store::{AccountStore, InMemoryStateStore};
/// use flowey_sync_server::{ServerConfig, SessionAuthenticator, SyncServer};
/// use std::sync::Arc;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let authenticator = SessionAuthenticator::new(Arc::new(AccountStore::in_memory()));
/// let server = SyncServer::new(
///     ServerConfig::default(),
///     Arc::new(InMemoryStateStore::new()),
///     Arc::new(authenticator),
/// );
///
/// let listener = server.bind().await?;
/// server.serve(listener, async { let _ = tokio::signal::ctrl_c().await; }).await?;
/// # Ok(())
/// # }
/// ```
pub struct SyncServer {
    context: Arc<HandlerContext>,
    tracker: TaskTracker,
}

impl SyncServer {
    /// Creates a new sync server.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn StateStore>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        Self {
            context: Arc::new(HandlerContext::new(config, store, authenticator)),
            tracker: TaskTracker::new(),
        }
    }

    /// Returns the shared handler context.
    pub fn context(&self) -> &Arc<HandlerContext> {
        &self.context
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Returns the live connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.context.registry
    }

    /// Returns the number of connection tasks still running.
    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Binds the configured address.
    pub async fn bind(&self) -> ServerResult<TcpListener> {
        Ok(TcpListener::bind(self.context.config.bind_addr).await?)
    }

    fn router(&self) -> Router {
        let state = AppState {
            context: Arc::clone(&self.context),
            tracker: self.tracker.clone(),
        };
        let sessions = Router::new()
            .route(
                "/session",
                post(session::create)
                    .delete(session::delete)
                    .options(session::preflight),
            )
            .layer(middleware::from_fn_with_state(state.clone(), session::cors));

        Router::new()
            .route("/ws", get(ws::upgrade))
            .merge(sessions)
            .with_state(state)
    }

    /// Serves until `shutdown` resolves, then drains.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::ShutdownTimeout`] if connections did not drain
    /// within the configured shutdown timeout.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> ServerResult<()> {
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "sync server listening");

        let stopped = self.context.shutdown_token().clone();
        let app = self.router();
        let mut http = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(stopped.cancelled_owned())
            .await
        });

        tokio::select! {
            _ = shutdown => {}
            _ = self.context.shutdown_token().cancelled() => {}
            finished = &mut http => {
                // The listener only stops by itself if it failed.
                let message = match finished {
                    Ok(Ok(())) => "http server stopped".to_string(),
                    Ok(Err(e)) => e.to_string(),
                    Err(e) => e.to_string(),
                };
                error!(error = %message, "http server failed");
                self.shutdown().await?;
                return Err(ServerError::Internal(message));
            }
        }

        let drained = self.shutdown().await;
        // Upgraded connections are tracked separately, so this only waits
        // on plain requests still in flight.
        if tokio::time::timeout(self.context.config.shutdown_timeout, &mut http)
            .await
            .is_err()
        {
            warn!("http requests still in flight at shutdown");
            http.abort();
        }
        drained
    }

    /// Runs a connection over an arbitrary transport, authenticating `token`.
    ///
    /// The task is tracked like socket connections and drained on shutdown.
    pub fn spawn_transport<T>(&self, token: String, transport: T) -> JoinHandle<ServerResult<()>>
    where
        T: MessageTransport + 'static,
    {
        let context = Arc::clone(&self.context);
        self.tracker.spawn(async move {
            let mut handler = ConnectionHandler::new(context, "local");
            handler.serve(Some(&token), transport).await
        })
    }

    /// Closes every connection and waits for their tasks to exit.
    ///
    /// New connections are refused from this point on.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::ShutdownTimeout`] if tasks are still running
    /// after the configured shutdown timeout.
    pub async fn shutdown(&self) -> ServerResult<()> {
        let closing = self.context.registry.close_all();
        self.context.shutdown_token().cancel();
        self.tracker.close();
        info!(connections = closing, "shutting down sync server");

        let timeout = self.context.config.shutdown_timeout;
        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => {
                info!("all connections drained");
                Ok(())
            }
            Err(_) => {
                let pending = self.tracker.len();
                warn!(pending, "shutdown timed out with connections still open");
                Err(ServerError::ShutdownTimeout { pending })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthConfig, Credentials, SessionAuthenticator};
    use crate::transport::ChannelTransport;
    use flowey_protocol::{CloseReason, State};
    use flowey_store::{AccountStore, InMemoryStateStore};
    use std::time::Duration;

    fn server() -> (SyncServer, String) {
        let accounts = Arc::new(AccountStore::in_memory());
        let authenticator = SessionAuthenticator::with_config(
            accounts,
            AuthConfig::default().with_hash_rounds(4),
        );
        authenticator.register_account("alice", "pw").unwrap();
        let token = authenticator
            .create_session(&Credentials::new("alice", "pw"))
            .unwrap();

        let server = SyncServer::new(
            ServerConfig::default().with_shutdown_timeout(Duration::from_secs(5)),
            Arc::new(InMemoryStateStore::new()),
            Arc::new(authenticator),
        );
        (server, token.to_string())
    }

    #[tokio::test]
    async fn transports_share_state() {
        let (server, token) = server();
        let (ta, mut a) = ChannelTransport::pair(8);
        let (tb, mut b) = ChannelTransport::pair(8);
        server.spawn_transport(token.clone(), ta);
        server.spawn_transport(token, tb);

        while server.registry().connection_count() < 2 {
            tokio::task::yield_now().await;
        }
        a.send(r#"{"version":0,"n":1}"#).await;

        let expected = State::parse(r#"{"version":1,"n":1}"#).unwrap();
        assert_eq!(State::parse(&a.recv().await.unwrap()).unwrap(), expected);
        assert_eq!(State::parse(&b.recv().await.unwrap()).unwrap(), expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shutdown_drains_every_connection() {
        let (server, token) = server();
        let mut peers = Vec::new();
        for _ in 0..20 {
            let (transport, peer) = ChannelTransport::pair(8);
            server.spawn_transport(token.clone(), transport);
            peers.push(peer);
        }
        while server.registry().connection_count() < 20 {
            tokio::task::yield_now().await;
        }

        server.shutdown().await.unwrap();

        assert_eq!(server.registry().connection_count(), 0);
        assert_eq!(server.active_tasks(), 0);
        for peer in &mut peers {
            assert_eq!(peer.closed().await, Some(CloseReason::Shutdown));
        }
    }

    #[tokio::test]
    async fn unauthorized_transport_is_refused() {
        let (server, _) = server();
        let (transport, mut peer) = ChannelTransport::pair(8);
        let task = server.spawn_transport("bogus".into(), transport);

        assert!(matches!(task.await.unwrap(), Err(ServerError::Unauthorized(_))));
        assert_eq!(peer.closed().await, Some(CloseReason::Unauthorized));
        assert_eq!(server.registry().connection_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_without_connections() {
        let (server, _) = server();
        server.shutdown().await.unwrap();
        assert_eq!(server.active_tasks(), 0);
    }
}
