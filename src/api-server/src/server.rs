//! Listener lifecycle
//!
//! A [`Server`] owns a bound listener and the application state. Binding
//! happens up front so callers learn about an occupied port (and the actual
//! port when asking for `:0`) before serving starts.

use crate::{routes, state::AppState};
use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use will_iam_authz::IamConfig;

/// Bound Will.IAM HTTP server
pub struct Server {
    listener: TcpListener,
    state: Arc<AppState>,
}

impl Server {
    /// Wires the stores described by `config` and binds `addr`
    pub async fn bind(addr: &str, config: &IamConfig) -> Result<Self> {
        let state = AppState::from_config(config)
            .await
            .context("Failed to initialize application state")?;
        Self::with_state(addr, Arc::new(state)).await
    }

    /// Binds `addr` serving already wired state
    pub async fn with_state(addr: &str, state: Arc<AppState>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;
        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Listener has no local address")
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Serves until SIGINT or SIGTERM
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Serves until `shutdown` resolves, then drains in-flight requests
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr()?;
        info!(version = %self.state.version, "Will.IAM listening on http://{}", addr);

        let app = routes::create_router(self.state.clone());
        axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .context("Server error")?;

        info!(uptime_seconds = self.state.uptime_seconds(), "Will.IAM stopped");
        Ok(())
    }
}

/// Resolves on the first SIGINT or SIGTERM
///
/// A handler that cannot be installed never fires, leaving the other one in
/// charge.
async fn shutdown_signal() {
    let interrupt = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, shutting down"),
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGINT");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, shutting down");
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_serves_until_shutdown() {
        let server = Server::bind("127.0.0.1:0", &IamConfig::default())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run_until(async {
            let _ = stopped.await;
        }));

        let response = reqwest::get(format!("http://{}/healthcheck", addr))
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["healthy"], true);

        stop.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_occupied_port_fails_to_bind() {
        let state = Arc::new(AppState::in_memory(&IamConfig::default()).unwrap());
        let first = Server::with_state("127.0.0.1:0", state.clone()).await.unwrap();
        let addr = first.local_addr().unwrap().to_string();

        let err = Server::with_state(&addr, state).await.err().unwrap();
        assert!(err.to_string().contains(&addr));
    }

    #[tokio::test]
    async fn test_from_config_without_database_is_in_memory() {
        let state = AppState::from_config(&IamConfig::default()).await.unwrap();
        assert!(state.stores.health.ping().await.is_ok());
    }
}
