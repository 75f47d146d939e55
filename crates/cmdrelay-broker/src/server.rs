//! Broker Server
//!
//! Binds the HTTP/WebSocket listener, spawns the background tasks and runs
//! until a shutdown signal arrives.

use cmdrelay_common::auth::AuthConfig;
use cmdrelay_common::RelayError;
use cmdrelay_metrics::{BrokerMetricsCollector, MetricsCollector};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::broker::{Broker, SharedBroker};
use crate::config::{BrokerConfig, ConfigError};
use crate::liveness::LivenessMonitor;
use crate::routes::{self, AppState};
use crate::sweeper::TimeoutSweeper;

/// Sent to every client when the broker stops.
pub const SHUTDOWN_MESSAGE: &str = "Server is shutting down";

/// The broker server.
///
/// This server:
/// - Accepts WebSocket connections at `/` and `/ws`
/// - Serves JSON views at `/health`, `/status`, `/clients`, `/metrics` and `/history`
/// - Probes connection liveness and sweeps expired commands in the background
pub struct BrokerServer {
    config: BrokerConfig,
    auth: Arc<AuthConfig>,
    broker: SharedBroker,
}

impl BrokerServer {
    /// Creates a new broker server with the default metrics collector.
    ///
    /// # Errors
    /// `InvalidValue` for a zero interval or timeout, `MissingApiKey` if auth
    /// is enabled without a key.
    pub fn new(config: BrokerConfig) -> Result<Self, ConfigError> {
        Self::with_metrics(config, Arc::new(BrokerMetricsCollector::new()))
    }

    pub fn with_metrics(
        config: BrokerConfig,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let auth = Arc::new(config.auth()?);
        let broker = Broker::new(&config, metrics).into_shared();
        Ok(Self {
            config,
            auth,
            broker,
        })
    }

    /// Handle to the broker state, e.g. for inspection in tests.
    pub fn broker(&self) -> SharedBroker {
        self.broker.clone()
    }

    /// Binds the configured address and runs until SIGINT or SIGTERM.
    ///
    /// # Returns
    /// - `Ok(())` - Server shut down cleanly
    /// - `Err(RelayError)` - Server failed to bind or run
    pub async fn run(self) -> Result<(), RelayError> {
        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| RelayError::Transport(format!("Failed to bind to {}: {}", addr, e)))?;

        self.serve(listener, shutdown_signal()).await
    }

    /// Serves on an already bound listener until `shutdown` completes.
    ///
    /// On shutdown every client receives `server_shutdown` followed by a
    /// close frame.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), RelayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener
            .local_addr()
            .map_err(|e| RelayError::Transport(format!("Failed to get local addr: {}", e)))?;

        let liveness =
            LivenessMonitor::new(self.broker.clone(), self.config.heartbeat_interval()).spawn();
        let sweeper =
            TimeoutSweeper::new(self.broker.clone(), self.config.sweep_interval()).spawn();

        let app = routes::router(AppState {
            broker: self.broker.clone(),
            auth: self.auth.clone(),
            max_payload: self.config.max_payload,
        });

        info!(
            "Broker listening on {} (auth: {}, rate limit: {}/{}ms)",
            local_addr,
            self.auth,
            self.config.max_requests_per_minute,
            self.config.rate_limit_window
        );

        let broker = self.broker.clone();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                broker.lock().await.shutdown(SHUTDOWN_MESSAGE);
            })
            .await
            .map_err(|e| RelayError::Transport(format!("Server error: {}", e)));

        liveness.abort();
        sweeper.abort();
        info!("Broker stopped");
        result
    }
}

/// Completes on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_creation() {
        let server = BrokerServer::new(BrokerConfig::default()).unwrap();
        assert!(Arc::strong_count(&server.broker) >= 1);
        assert!(!server.auth.requires_auth());
    }

    #[test]
    fn test_auth_without_key_rejected() {
        let config = BrokerConfig {
            auth_enabled: true,
            api_key: None,
            ..Default::default()
        };
        assert!(matches!(
            BrokerServer::new(config),
            Err(ConfigError::MissingApiKey)
        ));
    }

    #[test]
    fn test_zero_heartbeat_rejected_before_spawning() {
        let config = BrokerConfig {
            heartbeat_interval: 0,
            ..Default::default()
        };
        assert!(matches!(
            BrokerServer::new(config),
            Err(ConfigError::InvalidValue { name: "heartbeatInterval" })
        ));
    }
}
