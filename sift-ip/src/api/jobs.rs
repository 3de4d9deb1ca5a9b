//! Job submission endpoint

use crate::error::ApiResult;
use crate::pipeline::Submission;
use crate::types::JobRequest;
use crate::AppState;
use axum::{extract::State, Json};
use serde_json::json;
use tracing::info;

/// POST /process - submit an intervention job
///
/// Returns the cached value synchronously on a cache hit; otherwise the
/// job is dispatched and the response carries its handle. Completion is
/// observed via the subscriber WebSocket or by polling `GET /result`.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<JobRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    info!(image_url = %request.url, mode = ?request.mode, "Job submission received");

    match state.orchestrator.submit(request).await? {
        Submission::CacheHit(value) => Ok(Json(json!({
            "status": "COMPLETED",
            "result": value,
        }))),
        Submission::Dispatched(handle) => Ok(Json(json!({
            "status": "Workflow started",
            "job_id": handle.job_id,
        }))),
    }
}
