//! Polling fallback endpoint
//!
//! Stateless read-through to the Result Cache for clients that cannot
//! hold an open WebSocket.

use crate::error::ApiResult;
use crate::AppState;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

/// Query parameters for GET /result
#[derive(Debug, Deserialize)]
pub struct ResultQuery {
    /// Source image reference
    pub image_url: String,
    /// Comma-separated filter descriptors
    #[serde(default)]
    pub filters: Option<String>,
}

/// GET /result - look up a processed value
///
/// Responds `{ status: "COMPLETED", value }` on a hit (exact or fuzzy)
/// and `{ status: "NOT_FOUND" }` otherwise.
pub async fn get_result(
    State(state): State<AppState>,
    Query(query): Query<ResultQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let filters: Vec<String> = query
        .filters
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .collect();

    match state.cache.get(&query.image_url, &filters).await? {
        Some(value) => Ok(Json(json!({
            "status": "COMPLETED",
            "value": value,
        }))),
        None => Ok(Json(json!({
            "status": "NOT_FOUND",
        }))),
    }
}
