//! Health check endpoint

use axum::{routing::get, Json, Router};
use chrono::Utc;
use tavern_common::api::HealthResponse;

use crate::AppState;

/// GET /api/health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/api/health", get(health_check))
}
