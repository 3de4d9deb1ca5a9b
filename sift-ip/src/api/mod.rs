//! HTTP/WS API for sift-ip
//!
//! Routes:
//! - `POST /process` - job submission
//! - `GET /result` - polling fallback (read-through to the cache)
//! - `GET /events` - SSE feed of pipeline events
//! - `GET /ws/:subscriber_id` - subscriber WebSocket
//! - `GET /health`, `GET /ping` - service probes
//! - `GET /media/...` - stored artifacts (static)

pub mod health;
pub mod jobs;
pub mod results;
pub mod sse;
pub mod ws;

use crate::AppState;
use axum::routing::{get, post};
use axum::Router;

/// Job submission routes
pub fn job_routes() -> Router<AppState> {
    Router::new().route("/process", post(jobs::submit_job))
}

/// Polling fallback routes
pub fn result_routes() -> Router<AppState> {
    Router::new().route("/result", get(results::get_result))
}

/// Health probe routes
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/ping", get(health::ping))
}
