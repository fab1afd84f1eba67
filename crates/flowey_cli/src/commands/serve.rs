//! Serve command implementation.

use super::DataDir;
use flowey_store::FileStateStore;
use flowey_sync_server::{ServerConfig, SyncServer};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Options for `flowey serve`.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// Address to listen on.
    pub ip: IpAddr,
    /// Port to listen on.
    pub port: u16,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Drain timeout on shutdown.
    pub shutdown_timeout: Duration,
    /// Allowed browser origin hosts.
    pub allowed_origins: Vec<String>,
}

impl ServeOptions {
    /// Builds the server configuration.
    pub fn config(&self) -> ServerConfig {
        self.allowed_origins.iter().fold(
            ServerConfig::new(SocketAddr::new(self.ip, self.port))
                .with_max_connections(self.max_connections)
                .with_shutdown_timeout(self.shutdown_timeout),
            |config, origin| config.with_allowed_origin(origin.clone()),
        )
    }
}

/// Runs the server until Ctrl-C or SIGTERM, then drains connections.
pub fn run(data_dir: &DataDir, options: ServeOptions) -> Result<(), Box<dyn std::error::Error>> {
    data_dir.create()?;
    let lock = data_dir.lock()?;
    info!(lock = %lock.path().display(), "opening stores");

    let store = Arc::new(FileStateStore::open(&data_dir.states_path())?);
    info!(users = store.len(), "loaded states");
    let authenticator = Arc::new(data_dir.authenticator()?);
    let server = SyncServer::new(options.config(), store, authenticator);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let listener = server.bind().await?;
        server.serve(listener, shutdown_signal()).await
    })?;

    drop(lock);
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
