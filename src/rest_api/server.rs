//! Axum HTTP server for metrics and health

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use chrono::Utc;
use tower_http::timeout::{RequestBodyTimeoutLayer, TimeoutLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::options::GeneratorOptions;
use crate::topology::Topology;
use crate::{Error, Result};

use super::handlers::{self, ApiState};

/// Routes served by the metrics server.
///
/// A request whose body is not read within `read_timeout`, or whose response
/// is not ready within `write_timeout`, is cut off.
pub fn router(topology: Arc<Topology>, opts: &GeneratorOptions) -> Router {
    let state = ApiState {
        topology,
        started_at: Utc::now(),
    };

    Router::new()
        .route("/health", get(handlers::health))
        .route("/topology", get(handlers::topology))
        .route(&opts.metrics_endpoint, get(handlers::metrics_handler))
        .layer(TimeoutLayer::new(opts.write_timeout))
        .layer(RequestBodyTimeoutLayer::new(opts.read_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the metrics server until it fails
pub async fn run_server(opts: &GeneratorOptions, topology: Arc<Topology>) -> Result<()> {
    let app = router(topology, opts);
    let addr = SocketAddr::from(([0, 0, 0, 0], opts.metrics_port));

    info!(
        "Metrics server listening on {}{}",
        addr, opts.metrics_endpoint
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ServerError(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::ServerError(e.to_string()))?;

    Ok(())
}
