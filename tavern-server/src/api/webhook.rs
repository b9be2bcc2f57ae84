//! Stripe webhook endpoint and publishable configuration

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::referral::CheckoutResult;
use crate::stripe::webhook::{self, Event, DEFAULT_TOLERANCE_SECS, EVENT_CHECKOUT_COMPLETED};
use crate::AppState;

const SIGNATURE_HEADER: &str = "stripe-signature";

/// Stripe payloads are small; anything bigger is not a real delivery
const MAX_WEBHOOK_BODY: usize = 1024 * 1024;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StripeConfigResponse {
    pub publishable_key: Option<String>,
}

/// GET /api/stripe/config
pub async fn stripe_config(State(state): State<AppState>) -> Json<StripeConfigResponse> {
    Json(StripeConfigResponse {
        publishable_key: state.config.stripe.publishable_key.clone(),
    })
}

/// POST /api/stripe/webhook/:uuid
///
/// Errors after signature verification return 500 so Stripe redelivers;
/// checkout processing is idempotent.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    Path(path_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let stripe = &state.config.stripe;
    if stripe.webhook_uuid.as_deref() != Some(path_id.as_str()) {
        return Err(ApiError::NotFound("Unknown webhook endpoint".to_string()));
    }

    let secret = stripe
        .webhook_secret
        .as_deref()
        .ok_or_else(|| ApiError::Internal("STRIPE_WEBHOOK_SECRET is not set".to_string()))?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing Stripe-Signature header".to_string()))?;

    webhook::verify_signature(&body, signature, secret, Utc::now().timestamp(), DEFAULT_TOLERANCE_SECS)
        .map_err(|e| {
            tracing::warn!("Webhook signature rejected: {}", e);
            ApiError::BadRequest(format!("Invalid signature: {}", e))
        })?;

    let event: Event = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid event payload: {}", e)))?;

    tracing::info!(event_id = %event.id, event_type = %event.event_type, "Stripe webhook received");

    if event.event_type != EVENT_CHECKOUT_COMPLETED {
        return Ok(Json(json!({ "received": true })));
    }

    if !state.referrals.enabled() {
        tracing::debug!(event_id = %event.id, "Referral system disabled; skipping checkout");
        return Ok(Json(json!({ "received": true })));
    }

    let checkout_id = event
        .object_id()
        .ok_or_else(|| ApiError::BadRequest("Checkout event without session id".to_string()))?;

    let session = state.referrals.gateway().checkout_session(checkout_id).await?;
    let result = state
        .referrals
        .handle_checkout_completed(&session, Utc::now())
        .await?;

    let outcome = match result {
        CheckoutResult::AlreadyProcessed => "already_processed",
        CheckoutResult::BelowMinimum => "below_minimum",
        CheckoutResult::NoReferralCode => "no_referral_code",
        CheckoutResult::Evaluated(outcome) => outcome.as_str(),
    };

    Ok(Json(json!({ "received": true, "referral": outcome })))
}

pub fn webhook_routes() -> Router<AppState> {
    Router::new()
        .route("/api/stripe/config", get(stripe_config))
        .route(
            "/api/stripe/webhook/:uuid",
            post(stripe_webhook).layer(DefaultBodyLimit::max(MAX_WEBHOOK_BODY)),
        )
}
