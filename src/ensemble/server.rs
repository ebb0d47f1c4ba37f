//! Ensemble server

use crate::common::{Result, ServerConfig};
use crate::ensemble::http::create_router;
use crate::ensemble::memory::MemEnsemble;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub struct EnsembleServer {
    config: ServerConfig,
    ensemble: MemEnsemble,
}

impl EnsembleServer {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_ensemble(config, MemEnsemble::new())
    }

    pub fn with_ensemble(config: ServerConfig, ensemble: MemEnsemble) -> Self {
        Self { config, ensemble }
    }

    pub fn ensemble(&self) -> &MemEnsemble {
        &self.ensemble
    }

    /// Serve until Ctrl-C
    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting ensemble server");
        tracing::info!("  HTTP API: {}", self.config.bind_addr);

        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let router = create_router(self.ensemble);

        tracing::info!("✓ Ensemble ready");

        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for shutdown signal: {}", e);
                }
            })
            .await?;

        tracing::info!("Ensemble server stopped");
        Ok(())
    }

    /// Bind and serve in the background; returns the bound address
    pub async fn spawn(self) -> Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let addr = listener.local_addr()?;
        let router = create_router(self.ensemble);

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!("HTTP server error: {}", e);
            }
        });

        tracing::info!(%addr, "Ensemble server spawned");
        Ok((addr, handle))
    }
}
