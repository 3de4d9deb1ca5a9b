//! Health probe endpoints

use crate::AppState;
use axum::{extract::State, Json};
use serde_json::json;
use tracing::debug;

/// GET /health - service health with basic diagnostics
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let uptime_seconds = (chrono::Utc::now() - state.startup_time).num_seconds();
    let connections = state.registry.connection_count().await;

    Json(json!({
        "status": "ok",
        "service": "sift-ip",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": uptime_seconds,
        "subscriber_connections": connections,
    }))
}

/// GET /ping - liveness probe for browser-extension health checks
pub async fn ping() -> Json<serde_json::Value> {
    debug!("Received ping");
    Json(json!({ "status": "ok" }))
}
