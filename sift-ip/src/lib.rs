//! sift-ip library interface
//!
//! Exposes the pipeline, cache, and registry for the binary and for
//! integration testing.

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod event_bridge;
pub mod interventions;
pub mod pipeline;
pub mod providers;
pub mod registry;
pub mod signature;
pub mod storage;
pub mod types;

pub use crate::error::{ApiError, ApiResult};

use crate::cache::ResultCache;
use crate::pipeline::Orchestrator;
use crate::registry::SubscriptionRegistry;
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use sift_common::events::EventBus;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::ServeDir;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting and registry delivery
    pub event_bus: EventBus,
    /// Result cache (single source of truth for completed work)
    pub cache: ResultCache,
    /// Subscription registry for connected subscribers
    pub registry: Arc<SubscriptionRegistry>,
    /// Pipeline coordinator
    pub orchestrator: Orchestrator,
    /// Media directory served under /media
    pub media_dir: PathBuf,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        cache: ResultCache,
        registry: Arc<SubscriptionRegistry>,
        orchestrator: Orchestrator,
        media_dir: PathBuf,
    ) -> Self {
        Self {
            db,
            event_bus,
            cache,
            registry,
            orchestrator,
            media_dir,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let media_service = ServeDir::new(&state.media_dir);

    Router::new()
        .merge(api::job_routes())
        .merge(api::result_routes())
        .merge(api::health_routes())
        .route("/events", get(api::sse::event_stream))
        .route("/ws/:subscriber_id", get(api::ws::ws_endpoint))
        .nest_service(crate::storage::MEDIA_ROUTE, media_service)
        .with_state(state)
}
