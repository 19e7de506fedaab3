//! TCP Accept Loop
//!
//! Binds the listener, starts the expiry sweeper and spawns one session
//! task per accepted connection. A single watch channel carries the
//! shutdown signal to every session; the sweeper is stopped alongside.

use crate::commands::CommandHandler;
use crate::connection::handle_connection;
use crate::stats::ServerStats;
use crate::storage::{ExpiryConfig, ExpirySweeper, StorageEngine};
use crate::{DEFAULT_HOST, DEFAULT_PORT};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Expiry sweeper settings
    pub expiry: ExpiryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            expiry: ExpiryConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A bound server, ready to accept connections.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    storage: Arc<StorageEngine>,
    stats: Arc<ServerStats>,
    expiry: ExpiryConfig,
}

impl Server {
    /// Binds the listening socket. A failure here is fatal to the process.
    pub async fn bind(config: &ServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(config.bind_address()).await?;

        Ok(Self {
            listener,
            storage: Arc::new(StorageEngine::new()),
            stats: Arc::new(ServerStats::new()),
            expiry: config.expiry.clone(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn storage(&self) -> Arc<StorageEngine> {
        Arc::clone(&self.storage)
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.stats)
    }

    /// Serves clients until `shutdown` completes.
    ///
    /// On shutdown the accept loop stops, every session is told to close,
    /// the sweeper is stopped and the listener is released.
    pub async fn run(self, shutdown: impl Future) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = ExpirySweeper::start(Arc::clone(&self.storage), self.expiry.clone());
        let handler = CommandHandler::new(Arc::clone(&self.storage), Arc::clone(&self.stats));

        if let Ok(addr) = self.local_addr() {
            info!(addr = %addr, "Listening for connections");
        }

        tokio::select! {
            _ = accept_loop(&self.listener, handler, shutdown_rx) => {}
            _ = shutdown => {
                info!("Shutdown signal received, stopping server...");
            }
        }

        let _ = shutdown_tx.send(true);
        sweeper.stop();
        info!("Server shutdown complete");
    }
}

/// Main loop that accepts incoming connections
async fn accept_loop(
    listener: &TcpListener,
    handler: CommandHandler,
    shutdown: watch::Receiver<bool>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(handle_connection(
                    stream,
                    addr,
                    handler.clone(),
                    shutdown.clone(),
                ));
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}
