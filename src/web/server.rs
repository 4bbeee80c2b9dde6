//! Web server for the connector.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;

use crate::config::ServerConfig;
use crate::connector::Connector;
use crate::{ConnectorError, Result};

use super::handlers::AppState;
use super::router::{create_health_router, create_router};

/// Web server for the connector.
pub struct WebServer {
    /// Server address.
    addr: SocketAddr,
    /// Application state.
    app_state: Arc<AppState>,
    /// Server configuration.
    config: ServerConfig,
}

impl WebServer {
    /// Create a new web server.
    pub fn new(config: &ServerConfig, connector: Arc<Connector>) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| ConnectorError::Config(format!("invalid server address: {e}")))?;

        Ok(Self {
            addr,
            app_state: Arc::new(AppState::new(connector)),
            config: config.clone(),
        })
    }

    /// Get the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bind the listener and start the manager sweeps.
    async fn bind(self) -> Result<(TcpListener, axum::Router)> {
        let router = create_router(self.app_state.clone(), &self.config)
            .merge(create_health_router())
            .layer(CompressionLayer::new());

        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;

        self.app_state.connector.manager().start_sweepers();
        tracing::info!("Web server listening on http://{}", local_addr);

        Ok((listener, router))
    }

    /// Run the web server.
    pub async fn run(self) -> Result<()> {
        let (listener, router) = self.bind().await?;
        axum::serve(listener, router).await?;
        Ok(())
    }

    /// Run the server and return the actual bound address.
    ///
    /// This is useful for testing when binding to port 0.
    pub async fn run_with_addr(self) -> Result<SocketAddr> {
        let (listener, router) = self.bind().await?;
        let local_addr = listener.local_addr()?;

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!("Web server error: {}", e);
            }
        });

        Ok(local_addr)
    }
}
