//! Referral endpoints

use axum::{extract::State, routing::get, routing::post, Extension, Json, Router};
use chrono::Utc;

use crate::auth::AuthUser;
use crate::db::referrals::ReferralCode;
use crate::error::ApiResult;
use crate::referral::{ReferralStatus, ReferralSummary};
use crate::AppState;

/// GET /api/referrals/status
pub async fn referral_status(State(state): State<AppState>) -> Json<ReferralStatus> {
    Json(state.referrals.status())
}

/// POST /api/referrals/code
pub async fn create_referral_code(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<ReferralCode>> {
    let code = state.referrals.get_or_create_code(&user, Utc::now()).await?;
    Ok(Json(code))
}

/// GET /api/referrals
pub async fn referral_summary(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<ReferralSummary>> {
    let summary = state.referrals.summary(&user, Utc::now()).await?;
    Ok(Json(summary))
}

pub fn referral_routes() -> Router<AppState> {
    Router::new().route("/api/referrals/status", get(referral_status))
}

/// Routes that sit behind the bearer-token middleware
pub fn protected_referral_routes() -> Router<AppState> {
    Router::new()
        .route("/api/referrals", get(referral_summary))
        .route("/api/referrals/code", post(create_referral_code))
}
