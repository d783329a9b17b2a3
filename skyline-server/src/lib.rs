//! skyline-server - HTTP and WebSocket front end for the skyline event logs
//!
//! This crate owns the application alarm log and the cluster registry, serves
//! the REST endpoints that raise and acknowledge records, and streams logs to
//! WebSocket clients. Background consumers (notifications, retention sweep)
//! run alongside the listener and stop with it.

pub mod consumers;
mod error;
pub mod http;
mod state;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use consumers::ConsumerManager;
use consumers::notification::{Notifier, TracingNotifier, start_notification_consumer};
use consumers::retention::start_retention_sweeper;

pub use error::ServerError;
pub use http::create_router;
pub use state::{AppState, StateConfig};

/// The main skyline server
pub struct SkylineServer {
    config: ServerConfig,
    state: Arc<AppState>,
    notifier: Arc<dyn Notifier>,
    shutdown: CancellationToken,
}

impl SkylineServer {
    /// Open the configured storage and build a server over it
    pub async fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let state = AppState::open(config.state.clone()).await?;
        Ok(Self::with_state(config, Arc::new(state)))
    }

    /// Create a server with custom state (for testing)
    pub fn with_state(config: ServerConfig, state: Arc<AppState>) -> Self {
        Self {
            config,
            state,
            notifier: Arc::new(TracingNotifier),
            shutdown: CancellationToken::new(),
        }
    }

    /// Replace the alarm notifier
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the shared application state
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Token that stops the server when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the server, binding to the configured address
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.config.addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.clone(),
                source: e,
            })?;

        self.run_with_listener(listener).await
    }

    /// Run the server on an already bound listener
    pub async fn run_with_listener(self, listener: TcpListener) -> Result<(), ServerError> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!("skyline server listening on {}", addr);
        }

        let manager = ConsumerManager::new();
        start_notification_consumer(&manager, &self.state.alarms, Arc::clone(&self.notifier))
            .await?;
        tracing::info!("Notification consumer started");
        start_retention_sweeper(
            &manager,
            self.state.as_ref().clone(),
            self.config.sweep_interval,
        );

        // Closing the logs on shutdown ends every open stream so graceful
        // shutdown can drain its connections.
        let closer = {
            let state = Arc::clone(&self.state);
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                shutdown.cancelled().await;
                state.close().await;
            })
        };

        let router = create_router(Arc::clone(&self.state));
        let shutdown = self.shutdown.clone();
        let served = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| ServerError::Internal(e.to_string()));

        tracing::info!("skyline server shutting down");
        self.shutdown.cancel();
        manager.shutdown();
        if let Err(e) = closer.await {
            tracing::error!("Failed to close event logs: {}", e);
        }
        manager.wait_for_shutdown().await;

        served
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// How often the retention sweeper runs
    pub sweep_interval: Duration,
    /// Log and storage settings
    pub state: StateConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7480,
            sweep_interval: Duration::from_secs(60),
            state: StateConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Socket address string for binding
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
