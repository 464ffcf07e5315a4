//! Service runner: opens the stores, binds the listener and serves HTTP
//! until shutdown.

use crate::config::VerifierConfig;
use crate::error::Result;
use crate::http;
use crate::verification::VerificationEngine;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

/// Builder for constructing the verification service.
pub struct ServiceBuilder {
    config: VerifierConfig,
}

impl ServiceBuilder {
    /// Create a new service builder with the given configuration.
    #[must_use]
    pub fn new(config: VerifierConfig) -> Self {
        Self { config }
    }

    /// Open the stores and bind the listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the local store
    /// cannot be opened, or the listen address cannot be bound.
    pub async fn build(self) -> Result<RunningService> {
        info!("Building credential-verifier with config: {:?}", self.config);

        std::fs::create_dir_all(&self.config.root_dir)?;

        let engine = Arc::new(VerificationEngine::from_config(&self.config)?);
        match engine.stored_decisions().await {
            Ok(count) => info!("Local store holds {count} decisions"),
            Err(e) => warn!("Could not count stored decisions: {e}"),
        }

        let listener = TcpListener::bind(self.config.server.listen).await?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(RunningService {
            config: self.config,
            engine,
            listener: Some(listener),
            local_addr,
            shutdown_tx,
            shutdown_rx,
        })
    }
}

/// A bound verification service.
pub struct RunningService {
    config: VerifierConfig,
    engine: Arc<VerificationEngine>,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl RunningService {
    /// Address the service is listening on.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared verification engine.
    #[must_use]
    pub fn engine(&self) -> Arc<VerificationEngine> {
        Arc::clone(&self.engine)
    }

    /// Handle that can request shutdown from another task.
    #[must_use]
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    /// Serve requests until shutdown is requested or Ctrl-C is received.
    ///
    /// # Errors
    ///
    /// Returns an error if the router cannot be built or serving fails.
    /// Calling `run` a second time is a no-op.
    pub async fn run(&mut self) -> Result<()> {
        let Some(listener) = self.listener.take() else {
            warn!("Service already ran");
            return Ok(());
        };

        let app = http::router(Arc::clone(&self.engine), &self.config.server.cors_origin)?;
        info!(
            "[{}] Verification service running on {}",
            self.config.worker_id, self.local_addr
        );

        let mut shutdown_rx = self.shutdown_rx.clone();
        let shutdown_tx = self.shutdown_tx.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    () = wait_for_shutdown(&mut shutdown_rx) => {
                        info!("Shutdown signal received");
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("Ctrl-C received, initiating shutdown");
                        let _ = shutdown_tx.send(true);
                    }
                }
            })
            .await?;

        info!("Service shutdown complete");
        Ok(())
    }

    /// Request the service to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            break;
        }
    }
}
