//! HTTP handlers for the metrics server

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use tracing::{error, instrument};

use crate::controller::metrics;
use crate::topology::{Topology, TopologySnapshot};

use super::dto::HealthResponse;

#[derive(Clone)]
pub struct ApiState {
    pub topology: Arc<Topology>,
    pub started_at: DateTime<Utc>,
}

/// Health check endpoint
#[instrument(skip(state))]
pub async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        started_at: state.started_at,
    })
}

/// Prometheus text exposition
pub async fn metrics_handler() -> Result<String, StatusCode> {
    metrics::encode().map_err(|e| {
        error!("Failed to encode metrics: {:?}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// The snapshot the next apply would render
#[instrument(skip(state))]
pub async fn topology(State(state): State<ApiState>) -> Json<TopologySnapshot> {
    Json(state.topology.snapshot().await)
}
