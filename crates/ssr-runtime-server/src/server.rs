//! HTTP server implementation.
//!
//! This module provides the main [`SsrServer`] struct for serving rendered
//! pages over HTTP.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};

use ssr_runtime_common::{ServerConfigFile, StartupError, ValidatedConfig};

use crate::router::build_router;
use crate::state::AppState;

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server.
    pub bind_addr: SocketAddr,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Enable graceful shutdown on SIGTERM/SIGINT.
    pub graceful_shutdown: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            request_timeout_secs: 30,
            graceful_shutdown: true,
        }
    }
}

impl ServerConfig {
    /// Build from the `[server]` section of a config file.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError::Bind`] if `bind_addr` is not a socket address.
    pub fn from_file(file: &ServerConfigFile) -> Result<Self, StartupError> {
        let bind_addr = file.bind_addr.parse().map_err(|e| StartupError::Bind {
            addr: file.bind_addr.clone(),
            source: io::Error::new(io::ErrorKind::InvalidInput, e),
        })?;

        Ok(Self {
            bind_addr,
            request_timeout_secs: file.request_timeout_secs,
            graceful_shutdown: file.graceful_shutdown,
        })
    }

    /// Create a new server config with custom bind address.
    #[must_use]
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Create a new server config with custom timeout.
    #[must_use]
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Get the request timeout as Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// SSR HTTP server.
///
/// This is the main entry point for running the HTTP server.
///
/// # Example
///
/// ```ignore
/// use ssr_runtime_common::ConfigFile;
/// use ssr_runtime_server::{ServerConfig, SsrServer};
///
/// let file = ConfigFile::from_file("ssr.toml")?;
/// let validated = file.ssr.validate()?;
///
/// let server = SsrServer::new(&validated, ServerConfig::from_file(&file.server)?)?;
/// server.run().await?;
/// ```
pub struct SsrServer {
    /// Application state.
    state: AppState,
    /// Server configuration.
    config: ServerConfig,
}

impl SsrServer {
    /// Create a new server instance.
    ///
    /// Builds the runtime pool up front; every runtime is initialized before
    /// this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the bundle cannot be loaded or a runtime fails to
    /// initialize.
    pub fn new(validated: &ValidatedConfig, server_config: ServerConfig) -> Result<Self, StartupError> {
        let state = AppState::new(validated)?;

        Ok(Self {
            state,
            config: server_config,
        })
    }

    /// Create a server over existing state.
    pub fn with_state(state: AppState, server_config: ServerConfig) -> Self {
        Self {
            state,
            config: server_config,
        }
    }

    /// Get a reference to the application state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run the server until shutdown.
    ///
    /// This will block until the server is shut down via signal
    /// (SIGTERM/SIGINT) if graceful shutdown is enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot bind to the address.
    pub async fn run(self) -> Result<(), StartupError> {
        let app = build_router(self.state, self.config.request_timeout());

        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|e| StartupError::Bind {
                addr: self.config.bind_addr.to_string(),
                source: e,
            })?;

        info!(addr = %self.config.bind_addr, "Starting HTTP server");

        if self.config.graceful_shutdown {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        } else {
            axum::serve(listener, app).await?;
        }

        info!("Server shutdown complete");
        Ok(())
    }

    /// Start the server and return a handle for testing.
    ///
    /// The server binds to an ephemeral port (127.0.0.1:0) and
    /// returns a handle that can be used to get the actual address
    /// and shut down the server.
    pub async fn start_test(validated: &ValidatedConfig) -> Result<TestHandle, StartupError> {
        let state = AppState::new(validated)?;
        Self::start_test_with_state(state).await
    }

    /// Like [`SsrServer::start_test`], over existing state.
    pub async fn start_test_with_state(state: AppState) -> Result<TestHandle, StartupError> {
        let app = build_router(state.clone(), Duration::from_secs(30));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        Ok(TestHandle {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle,
        })
    }
}

/// Handle for a test server instance.
///
/// Use this to interact with and shut down a test server.
pub struct TestHandle {
    /// The address the server is bound to.
    addr: SocketAddr,
    /// Application state.
    state: AppState,
    /// Shutdown signal sender.
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    /// Server task handle.
    handle: tokio::task::JoinHandle<Result<(), io::Error>>,
}

impl TestHandle {
    /// Get the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the server URL.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the application state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Shutdown the server gracefully.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.handle.await;
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.request_timeout_secs, 30);
        assert!(config.graceful_shutdown);
    }

    #[test]
    fn test_server_config_builder() {
        let addr: SocketAddr = "127.0.0.1:3000".parse().unwrap();
        let config = ServerConfig::default()
            .with_bind_addr(addr)
            .with_timeout(60);

        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.request_timeout_secs, 60);
    }

    #[test]
    fn test_server_config_from_file() {
        let file = ServerConfigFile {
            bind_addr: "127.0.0.1:9000".to_string(),
            request_timeout_secs: 5,
            graceful_shutdown: false,
        };
        let config = ServerConfig::from_file(&file).unwrap();
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert!(!config.graceful_shutdown);

        let bad = ServerConfigFile {
            bind_addr: "localhost".to_string(),
            ..ServerConfigFile::default()
        };
        let err = ServerConfig::from_file(&bad).unwrap_err();
        assert!(matches!(err, StartupError::Bind { .. }));
        assert!(err.to_string().contains("localhost"));
    }
}
