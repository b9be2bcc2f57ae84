//! Global request-size guard
//!
//! Runs before any extractor so oversized uploads are refused from the
//! `Content-Length` header without reading the body. Bodies without the
//! header are still capped by each route's `DefaultBodyLimit`.

use axum::{extract::Request, http::header, middleware::Next, response::Response};
use tavern_common::limits::{MAX_FILE_SIZE, MAX_REQUEST_SIZE, MIB};

use crate::error::ApiError;

pub const SINGLE_SHOT_UPLOAD_PATH: &str = "/api/upload-server-side";

/// Largest `Content-Length` accepted for a path
pub fn request_limit(path: &str) -> u64 {
    if path == SINGLE_SHOT_UPLOAD_PATH {
        MAX_FILE_SIZE
    } else {
        MAX_REQUEST_SIZE
    }
}

pub async fn content_length_guard(request: Request, next: Next) -> Result<Response, ApiError> {
    let declared = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    if let Some(length) = declared {
        let limit = request_limit(request.uri().path());
        if length > limit {
            tracing::warn!(
                path = %request.uri().path(),
                length,
                limit,
                "Rejecting oversized request"
            );
            return Err(ApiError::RequestTooLarge(format!(
                "Request body of {} bytes exceeds the {}MB limit",
                length,
                limit / MIB
            )));
        }
    }

    Ok(next.run(request).await)
}
