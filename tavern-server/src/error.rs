//! Error types for tavern-server
//!
//! Every handler returns [`ApiResult`]; failures become a JSON body of the
//! form `{"error": {"code", "message"}}` with a matching status code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tavern_common::api::ErrorBody;
use tavern_common::limits::{CODE_FILE_TOO_LARGE, CODE_REQUEST_TOO_LARGE};
use thiserror::Error;

use crate::auth::AuthError;
use crate::referral::ReferralError;
use crate::storage::StorageError;
use crate::stripe::GatewayError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Required fields absent (400)
    #[error("Missing required fields: {0}")]
    MissingFields(String),

    /// Multipart completion list does not match the uploaded parts (400)
    #[error("Part list mismatch: {0}")]
    PartListMismatch(String),

    /// Missing or rejected bearer token (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Feature switched off by configuration (403)
    #[error("Feature disabled: {0}")]
    FeatureDisabled(String),

    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A file or chunk above its per-route limit (413)
    #[error("File too large: {0}")]
    FileTooLarge(String),

    /// Request rejected by the global size guard (413)
    #[error("Request too large: {0}")]
    RequestTooLarge(String),

    /// Object storage failure (500)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Processing function invocation failure (500)
    #[error("Lambda error: {0}")]
    Lambda(String),

    /// Payment provider failure (500)
    #[error("Payment provider error: {0}")]
    Payment(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// tavern-common error
    #[error("Common error: {0}")]
    Common(#[from] tavern_common::Error),
}

impl ApiError {
    /// Status code and machine-readable error code
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::MissingFields(_) => (StatusCode::BAD_REQUEST, "MISSING_FIELDS"),
            ApiError::PartListMismatch(_) => (StatusCode::BAD_REQUEST, "PART_LIST_MISMATCH"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::FeatureDisabled(_) => (StatusCode::FORBIDDEN, "FEATURE_DISABLED"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::FileTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, CODE_FILE_TOO_LARGE),
            ApiError::RequestTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, CODE_REQUEST_TOO_LARGE),
            ApiError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            ApiError::Lambda(_) => (StatusCode::INTERNAL_SERVER_ERROR, "LAMBDA_ERROR"),
            ApiError::Payment(_) => (StatusCode::INTERNAL_SERVER_ERROR, "PAYMENT_ERROR"),
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Common(tavern_common::Error::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND")
            }
            ApiError::Common(tavern_common::Error::InvalidInput(_)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST")
            }
            ApiError::Common(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    /// Message passed through to the client
    fn message(&self) -> String {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::MissingFields(msg)
            | ApiError::PartListMismatch(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::FeatureDisabled(msg)
            | ApiError::NotFound(msg)
            | ApiError::FileTooLarge(msg)
            | ApiError::RequestTooLarge(msg)
            | ApiError::Storage(msg)
            | ApiError::Lambda(msg)
            | ApiError::Payment(msg)
            | ApiError::Internal(msg) => msg.clone(),
            ApiError::Database(err) => err.to_string(),
            ApiError::Common(err) => err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if status.is_server_error() {
            tracing::error!(code, error = %self, "Request failed");
        } else {
            tracing::debug!(code, error = %self, "Request rejected");
        }

        let body = Json(ErrorBody::new(code, self.message()));
        (status, body).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => ApiError::NotFound(format!("Object not found: {}", key)),
            StorageError::NoSuchUpload(id) => {
                ApiError::NotFound(format!("Multipart upload not found: {}", id))
            }
            StorageError::Backend(msg) => ApiError::Storage(msg),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Keys(msg) => ApiError::Internal(format!("Token key lookup failed: {}", msg)),
            other => ApiError::Unauthorized(other.to_string()),
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        ApiError::Payment(err.to_string())
    }
}

impl From<ReferralError> for ApiError {
    fn from(err: ReferralError) -> Self {
        match err {
            ReferralError::Disabled => {
                ApiError::FeatureDisabled("Referral system is disabled".to_string())
            }
            ReferralError::Gateway(e) => e.into(),
            ReferralError::Database(e) => ApiError::Database(e),
            ReferralError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
