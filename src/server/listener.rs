//! Relay HTTP server
//!
//! Binds one listener and routes every camera by path.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::registry::SessionRegistry;
use crate::server::config::ServerConfig;
use crate::server::handler::{self, AppState};

/// MJPEG relay server
pub struct RelayServer {
    config: Arc<ServerConfig>,
    registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
    start_time: Instant,
}

impl RelayServer {
    /// Create a new server over an existing registry
    pub fn new(config: ServerConfig, registry: Arc<SessionRegistry>) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            shutdown: CancellationToken::new(),
            start_time: Instant::now(),
        }
    }

    /// Get a reference to the session registry
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Build the router served by this server
    pub fn router(&self) -> Router {
        handler::router(AppState {
            registry: Arc::clone(&self.registry),
            shutdown: self.shutdown.clone(),
            config: Arc::clone(&self.config),
            start_time: self.start_time,
        })
    }

    /// Run the server
    ///
    /// This method blocks until the server fails.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    ///
    /// Open streams are ended and every session's upstream is closed before
    /// this returns.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(
            addr = %addr,
            cameras = self.registry.sources().len(),
            "MJPEG relay listening"
        );

        let token = self.shutdown.clone();
        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.await;
                tracing::info!("Shutdown signal received");
                token.cancel();
            })
            .await;

        self.registry.shutdown().await;
        tracing::info!("Relay stopped");

        Ok(result?)
    }
}
