//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::errors::MeshError;
use crate::server::handlers::{health_handler, query_handler, routes_handler, version_handler};
use crate::server::state::ServerState;

/// Server bind options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Build the router application
pub fn app(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Routing
        .route("/routes", get(routes_handler))
        .route("/query", post(query_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), MeshError>>, MeshError> {
    let app = app(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting router server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| MeshError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| MeshError::ServerError(e.to_string()))
    });

    Ok(handle)
}
