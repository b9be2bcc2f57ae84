//! Referral codes and rewards
//!
//! A referrer shares a promotion code worth a one-time discount. When a
//! purchase with that code completes, [`ReferralService::process_checkout`]
//! decides whether the referrer earns a reward coupon.

mod webhook;

pub use webhook::CheckoutResult;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rand::Rng;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::auth::AuthUser;
use crate::config::ReferralConfig;
use crate::db::{self, referrals::ReferralCode, referrals::ReferralReward};
use crate::stripe::{
    GatewayError, NewCoupon, NewPromotionCode, PaymentGateway, METADATA_TYPE_REFERRAL,
};

const CODE_LENGTH: usize = 8;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_ATTEMPTS: usize = 5;

#[derive(Debug, Error)]
pub enum ReferralError {
    #[error("referral system is disabled")]
    Disabled,

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Internal(String),
}

pub type ReferralResult<T> = Result<T, ReferralError>;

/// GET /api/referrals/status
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralStatus {
    pub enabled: bool,
    pub discount_percent: u32,
    pub reward_percent_off: u32,
    pub monthly_cap: u32,
    pub minimum_purchase_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralStats {
    pub total_rewards: u32,
    pub rewards_this_month: u32,
    pub monthly_cap: u32,
    pub redeemed_rewards: u32,
    pub remaining_this_month: u32,
}

/// GET /api/referrals
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralSummary {
    pub code: Option<ReferralCode>,
    pub rewards: Vec<ReferralReward>,
    pub stats: ReferralStats,
}

/// `[start, end)` of the UTC calendar month containing `now`
pub fn month_window(now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)?;
    let end = if now.month() == 12 {
        NaiveDate::from_ymd_opt(now.year() + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(now.year(), now.month() + 1, 1)?
    };
    Some((
        start.and_hms_opt(0, 0, 0)?.and_utc(),
        end.and_hms_opt(0, 0, 0)?.and_utc(),
    ))
}

fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

fn referral_metadata(kind: &str, referrer_user_id: &str) -> HashMap<String, String> {
    HashMap::from([
        ("type".to_string(), kind.to_string()),
        ("referrer_user_id".to_string(), referrer_user_id.to_string()),
    ])
}

#[derive(Clone)]
pub struct ReferralService {
    db: SqlitePool,
    gateway: Arc<dyn PaymentGateway>,
    config: ReferralConfig,
}

impl ReferralService {
    pub fn new(db: SqlitePool, gateway: Arc<dyn PaymentGateway>, config: ReferralConfig) -> Self {
        Self { db, gateway, config }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn gateway(&self) -> &Arc<dyn PaymentGateway> {
        &self.gateway
    }

    pub fn status(&self) -> ReferralStatus {
        ReferralStatus {
            enabled: self.config.enabled,
            discount_percent: self.config.discount_percent,
            reward_percent_off: self.config.reward_percent_off,
            monthly_cap: self.config.monthly_cap,
            minimum_purchase_cents: self.config.min_purchase_cents,
        }
    }

    fn ensure_enabled(&self) -> ReferralResult<()> {
        if self.config.enabled {
            Ok(())
        } else {
            Err(ReferralError::Disabled)
        }
    }

    fn current_month(&self, now: DateTime<Utc>) -> ReferralResult<(DateTime<Utc>, DateTime<Utc>)> {
        month_window(now).ok_or_else(|| ReferralError::Internal(format!("no month for {}", now)))
    }

    async fn unused_code(&self) -> ReferralResult<String> {
        for _ in 0..CODE_ATTEMPTS {
            let code = generate_code();
            if !db::referrals::code_taken(&self.db, &code).await? {
                return Ok(code);
            }
        }
        Err(ReferralError::Internal(
            "could not generate an unused referral code".to_string(),
        ))
    }

    /// The caller's referral code, created on first request
    pub async fn get_or_create_code(
        &self,
        user: &AuthUser,
        now: DateTime<Utc>,
    ) -> ReferralResult<ReferralCode> {
        self.ensure_enabled()?;
        db::users::upsert_user(&self.db, &user.user_id, user.email.as_deref(), now).await?;

        if let Some(existing) = db::referrals::find_code_by_user(&self.db, &user.user_id).await? {
            return Ok(existing);
        }

        let code = self.unused_code().await?;
        let metadata = referral_metadata(METADATA_TYPE_REFERRAL, &user.user_id);

        let coupon_id = self
            .gateway
            .create_coupon(&NewCoupon {
                name: format!("Referral {}% off", self.config.discount_percent),
                percent_off: self.config.discount_percent,
                metadata: metadata.clone(),
            })
            .await?;

        let promotion = self
            .gateway
            .create_promotion_code(&NewPromotionCode {
                coupon_id: coupon_id.clone(),
                code: Some(code.clone()),
                customer: None,
                max_redemptions: None,
                metadata,
            })
            .await?;

        let record = ReferralCode {
            user_id: user.user_id.clone(),
            code: promotion.code,
            stripe_promotion_code_id: promotion.id,
            stripe_coupon_id: coupon_id,
            created_at: now,
        };

        if db::referrals::insert_code(&self.db, &record).await? {
            tracing::info!(user_id = %user.user_id, code = %record.code, "Created referral code");
            return Ok(record);
        }

        // Lost a race with a concurrent request for the same user
        tracing::warn!(
            user_id = %user.user_id,
            promotion_code = %record.stripe_promotion_code_id,
            "Referral code already existed; discarding the new promotion code"
        );
        db::referrals::find_code_by_user(&self.db, &user.user_id)
            .await?
            .ok_or_else(|| ReferralError::Internal("referral code vanished".to_string()))
    }

    /// Code, rewards and monthly counters for a user
    pub async fn summary(&self, user: &AuthUser, now: DateTime<Utc>) -> ReferralResult<ReferralSummary> {
        self.ensure_enabled()?;
        db::users::upsert_user(&self.db, &user.user_id, user.email.as_deref(), now).await?;

        let code = db::referrals::find_code_by_user(&self.db, &user.user_id).await?;
        let rewards = db::referrals::list_rewards(&self.db, &user.user_id).await?;

        let (start, end) = self.current_month(now)?;
        let rewards_this_month =
            db::referrals::count_rewards_between(&self.db, &user.user_id, start, end).await?;
        let redeemed_rewards = rewards.iter().filter(|r| r.redeemed).count() as u32;

        Ok(ReferralSummary {
            code,
            stats: ReferralStats {
                total_rewards: rewards.len() as u32,
                rewards_this_month,
                monthly_cap: self.config.monthly_cap,
                redeemed_rewards,
                remaining_this_month: self.config.monthly_cap.saturating_sub(rewards_this_month),
            },
            rewards,
        })
    }
}
