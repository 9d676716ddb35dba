//! HTTP/WebSocket API layer.
//!
//! This module contains thin handlers that delegate to services. It
//! provides the router construction and server startup functionality.

use std::sync::Arc;

use thiserror::Error;

use crate::bootstrap::BootstrappedServices;
use crate::services::{Gateway, SessionConnectionStore, TranslationWorkerPool};
use crate::state::Config;

pub mod http;
pub mod response;
pub mod ws;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),

    /// No available ports in the specified range.
    #[error("No available ports in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },
}

/// Shared application state for the API layer.
///
/// A thin wrapper that holds references to services; all business logic
/// lives in the services themselves (`Gateway`, `TranslationWorkerPool`,
/// `SessionConnectionStore`).
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub store: Arc<SessionConnectionStore>,
    pub worker_pool: Arc<TranslationWorkerPool>,
    pub config: Arc<Config>,
}

/// Builder for constructing an `AppState`.
#[derive(Default)]
pub struct AppStateBuilder {
    gateway: Option<Arc<Gateway>>,
    store: Option<Arc<SessionConnectionStore>>,
    worker_pool: Option<Arc<TranslationWorkerPool>>,
    config: Option<Arc<Config>>,
}

impl AppStateBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Populates all fields from a `BootstrappedServices` container.
    #[must_use]
    pub fn from_services(mut self, services: &BootstrappedServices) -> Self {
        self.gateway = Some(Arc::clone(&services.gateway));
        self.store = Some(Arc::clone(&services.store));
        self.worker_pool = Some(Arc::clone(&services.worker_pool));
        self.config = Some(Arc::clone(&services.config));
        self
    }

    #[must_use]
    pub fn gateway(mut self, gateway: Arc<Gateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    #[must_use]
    pub fn store(mut self, store: Arc<SessionConnectionStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn worker_pool(mut self, worker_pool: Arc<TranslationWorkerPool>) -> Self {
        self.worker_pool = Some(worker_pool);
        self
    }

    #[must_use]
    pub fn config(mut self, config: Arc<Config>) -> Self {
        self.config = Some(config);
        self
    }

    /// Builds the `AppState`, panicking if a required field is missing.
    #[must_use]
    pub fn build(self) -> AppState {
        AppState {
            gateway: self.gateway.expect("gateway is required"),
            store: self.store.expect("store is required"),
            worker_pool: self.worker_pool.expect("worker_pool is required"),
            config: self.config.expect("config is required"),
        }
    }
}

impl AppState {
    #[must_use]
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }
}

async fn find_available_port(
    start: u16,
    end: u16,
) -> Result<(u16, tokio::net::TcpListener), ServerError> {
    for port in start..=end {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => return Ok((port, listener)),
            Err(_) => continue,
        }
    }
    Err(ServerError::NoAvailablePort { start, end })
}

/// Starts the HTTP/WebSocket server on the configured or auto-discovered port.
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let preferred_port = state.config.preferred_port;
    let (port, listener) = if preferred_port > 0 {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], preferred_port));
        (preferred_port, tokio::net::TcpListener::bind(&addr).await?)
    } else {
        find_available_port(49400, 49410).await?
    };

    tracing::info!("Server listening on http://0.0.0.0:{}", port);
    let app = http::create_router(state);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;
    Ok(())
}
