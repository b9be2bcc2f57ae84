//! HTTP API handlers

pub mod health;
pub mod images;
pub mod lambda;
pub mod limits;
pub mod referrals;
pub mod uploads;
pub mod webhook;

pub use health::health_routes;
pub use images::{image_routes, public_image_routes};
pub use lambda::lambda_routes;
pub use limits::content_length_guard;
pub use referrals::{protected_referral_routes, referral_routes};
pub use uploads::upload_routes;
pub use webhook::webhook_routes;

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;

use crate::error::ApiError;

/// JSON body extractor whose rejections use the API error envelope
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(JsonRejection::JsonDataError(e)) if e.body_text().contains("missing field") => {
                Err(ApiError::MissingFields(e.body_text()))
            }
            Err(rejection) => Err(ApiError::BadRequest(rejection.body_text())),
        }
    }
}

/// Fail with `MISSING_FIELDS` naming every blank entry
pub(crate) fn require_fields(fields: &[(&str, &str)]) -> Result<(), ApiError> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ApiError::MissingFields(missing.join(", ")))
    }
}
