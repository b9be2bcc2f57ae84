//! Stored images and public session sharing

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue},
    response::Response,
    routing::get,
    Json, Router,
};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use tavern_common::models::SharedSession;

use crate::error::{ApiError, ApiResult};
use crate::storage::StoredObject;
use crate::AppState;

/// Object key from a path segment; accepts standard and URL-safe base64
pub fn decode_key(encoded: &str) -> ApiResult<String> {
    let bytes = [&STANDARD, &URL_SAFE, &STANDARD_NO_PAD, &URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(encoded).ok())
        .ok_or_else(|| ApiError::BadRequest("Image key is not valid base64".to_string()))?;

    let key = String::from_utf8(bytes)
        .map_err(|_| ApiError::BadRequest("Image key is not valid UTF-8".to_string()))?;
    if key.trim().is_empty() {
        return Err(ApiError::BadRequest("Image key is empty".to_string()));
    }
    Ok(key)
}

fn object_response(object: StoredObject, cache_control: &'static str) -> ApiResult<Response> {
    let content_type = object
        .content_type
        .unwrap_or_else(|| "application/octet-stream".to_string());

    Response::builder()
        .header(
            header::CONTENT_TYPE,
            HeaderValue::from_str(&content_type)
                .unwrap_or(HeaderValue::from_static("application/octet-stream")),
        )
        .header(header::CACHE_CONTROL, cache_control)
        .body(Body::from(object.bytes))
        .map_err(|e| ApiError::Internal(format!("Failed to build response: {}", e)))
}

/// GET /api/image/:base64Key (bearer token required)
pub async fn get_image(
    State(state): State<AppState>,
    Path(encoded): Path<String>,
) -> ApiResult<Response> {
    let key = decode_key(&encoded)?;
    let object = state
        .storage
        .get_object(&state.config.storage.bucket, &key)
        .await?;
    object_response(object, "private, max-age=300")
}

/// GET /api/share-image/:base64Key
///
/// Unauthenticated, so only keys under the public image prefix are served.
pub async fn get_shared_image(
    State(state): State<AppState>,
    Path(encoded): Path<String>,
) -> ApiResult<Response> {
    let key = decode_key(&encoded)?;
    let prefix = &state.config.storage.public_image_prefix;
    if !key.starts_with(prefix.as_str()) || key.contains("..") {
        tracing::debug!(key = %key, "Refusing to share non-public image");
        return Err(ApiError::NotFound(format!("Image not found: {}", key)));
    }

    let object = state
        .storage
        .get_object(&state.config.storage.bucket, &key)
        .await?;
    object_response(object, "public, max-age=3600")
}

/// GET /api/share/:sessionId
pub async fn get_shared_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SharedSession>> {
    let directory = state
        .sessions
        .as_ref()
        .ok_or_else(|| ApiError::Internal("Session lookup is not configured".to_string()))?;

    let session = directory
        .get_session(&session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Session not found: {}", session_id)))?;

    Ok(Json(session.into()))
}

/// Routes that sit behind the bearer-token middleware
pub fn image_routes() -> Router<AppState> {
    Router::new().route("/api/image/:key", get(get_image))
}

pub fn public_image_routes() -> Router<AppState> {
    Router::new()
        .route("/api/share/:session_id", get(get_shared_session))
        .route("/api/share-image/:key", get(get_shared_image))
}
