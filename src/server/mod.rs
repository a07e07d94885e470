//! HTTP server components for api-guard
//!
//! This module provides the HTTP server infrastructure including:
//! - Router configuration and route handlers
//! - API gate, admin session gate and request span middleware
//! - Server lifecycle management

pub mod middleware;
pub mod router;

pub use middleware::{
    api_auth_middleware, api_identity, context_user, extract_api_token, session_admin_middleware,
    ApiIdentity, AuthResponse, API_VIRTUAL_USER_ID_OFFSET,
};
pub use router::{build_router, AppState, HealthResponse};

use std::future::Future;
use std::net::SocketAddr;

use axum::extract::Request;
use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::database::Database;

/// HTTP Server for api-guard
///
/// Manages the axum server lifecycle, including:
/// - Binding to configured address
/// - Applying middleware layers
/// - Graceful shutdown handling
pub struct Server<D: Database + 'static> {
    config: ServerConfig,
    state: AppState<D>,
}

impl<D: Database + 'static> Server<D> {
    /// Create a new server instance
    pub fn new(config: ServerConfig, state: AppState<D>) -> Self {
        Self { config, state }
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(
            self.config.host.parse().unwrap_or([0, 0, 0, 0].into()),
            self.config.port,
        )
    }

    /// Build the router with all middleware layers applied
    pub fn app(&self) -> axum::Router {
        // Spans record the path only; the query may carry a token
        let trace = tower_http::trace::TraceLayer::new_for_http().make_span_with(
            |request: &Request| {
                tracing::debug_span!(
                    "request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            },
        );

        build_router(self.state.clone())
            .layer(axum::middleware::from_fn(
                middleware::request_span_middleware,
            ))
            .layer(trace)
    }

    /// Run the server until shutdown signal is received
    ///
    /// # Arguments
    ///
    /// * `shutdown` - Future that resolves when the server should shut down
    pub async fn run(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let addr = self.bind_addr();
        let app = self.app();

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(e.to_string()))?;

        tracing::info!(%addr, "Server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Serve(e.to_string()))?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

/// Server error types
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to address
    #[error("Failed to bind to address: {0}")]
    Bind(String),

    /// Failed to serve requests
    #[error("Server error: {0}")]
    Serve(String),
}
