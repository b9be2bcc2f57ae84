//! Processing trigger

use axum::{extract::State, routing::post, Json, Router};
use serde::Serialize;
use tavern_common::api::TriggerLambdaRequest;

use super::{require_fields, ApiJson};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerLambdaResponse {
    pub success: bool,
    pub status_code: i32,
}

/// POST /api/trigger-lambda
pub async fn trigger_lambda(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<TriggerLambdaRequest>,
) -> ApiResult<Json<TriggerLambdaResponse>> {
    require_fields(&[
        ("sessionId", request.session_id.as_str()),
        ("campaignId", request.campaign_id.as_str()),
        ("audio_filename", request.audio_filename.as_str()),
    ])?;

    let payload = serde_json::to_vec(&request)
        .map_err(|e| ApiError::Internal(format!("Failed to encode payload: {}", e)))?;

    let status_code = state
        .functions
        .invoke_event(payload)
        .await
        .map_err(|e| ApiError::Lambda(e.to_string()))?;

    tracing::info!(
        session_id = %request.session_id,
        campaign_id = %request.campaign_id,
        status_code,
        "Triggered session processing"
    );

    Ok(Json(TriggerLambdaResponse {
        success: true,
        status_code,
    }))
}

pub fn lambda_routes() -> Router<AppState> {
    Router::new().route("/api/trigger-lambda", post(trigger_lambda))
}
