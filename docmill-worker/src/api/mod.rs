//! HTTP endpoints
//!
//! The worker exposes a deliberately small surface: a health check for
//! monitoring and read access to finished documents by storage key.

use axum::{
    extract::{Path, State},
    response::Html,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub jobs_in_flight: usize,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "docmill-worker".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime.num_seconds().max(0) as u64,
        jobs_in_flight: state.in_flight.len(),
    })
}

/// GET /documents/:filename
///
/// Serves a finished document by its storage-key filename, e.g.
/// `GET /documents/{job_id}.html` for key `documents/{job_id}.html`.
pub async fn get_document(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<Html<String>> {
    // Storage keys are flat under the documents/ prefix
    if filename.contains('/') || filename.contains("..") {
        return Err(ApiError::BadRequest("Invalid document name".to_string()));
    }

    let storage_key = format!("documents/{}", filename);
    let artifact =
        docmill_common::db::artifacts::get_by_storage_key(&state.db, &storage_key).await?;

    match artifact {
        Some(artifact) => Ok(Html(artifact.content)),
        None => Err(ApiError::NotFound(format!(
            "No document stored under {}",
            storage_key
        ))),
    }
}

/// Build API routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/documents/:filename", get(get_document))
}
