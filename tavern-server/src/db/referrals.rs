//! Referral codes, rewards, checkout tracking and card fingerprints

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::fmt;

use super::{parse_timestamp, timestamp};

/// A user's shareable referral code. Serializes as `{code, createdAt}`;
/// the owner and Stripe ids stay server-side.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralCode {
    #[serde(skip_serializing)]
    pub user_id: String,
    pub code: String,
    #[serde(skip_serializing)]
    pub stripe_promotion_code_id: String,
    #[serde(skip_serializing)]
    pub stripe_coupon_id: String,
    pub created_at: DateTime<Utc>,
}

/// Reward issued to a referrer for one qualifying checkout
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralReward {
    pub id: String,
    pub referrer_user_id: String,
    pub referred_user_id: String,
    pub stripe_checkout_session_id: String,
    pub stripe_coupon_id: String,
    pub stripe_promotion_code_id: String,
    pub promotion_code: String,
    pub redeemed: bool,
    pub created_at: DateTime<Utc>,
}

/// Result of evaluating a checkout that used a referral code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageOutcome {
    RewardIssued,
    SelfReferral,
    CardReuse,
    MonthlyCap,
    UnknownUser,
}

impl UsageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageOutcome::RewardIssued => "reward_issued",
            UsageOutcome::SelfReferral => "self_referral",
            UsageOutcome::CardReuse => "card_reuse",
            UsageOutcome::MonthlyCap => "monthly_cap",
            UsageOutcome::UnknownUser => "unknown_user",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "reward_issued" => Some(UsageOutcome::RewardIssued),
            "self_referral" => Some(UsageOutcome::SelfReferral),
            "card_reuse" => Some(UsageOutcome::CardReuse),
            "monthly_cap" => Some(UsageOutcome::MonthlyCap),
            "unknown_user" => Some(UsageOutcome::UnknownUser),
            _ => None,
        }
    }

    pub fn reward_issued(&self) -> bool {
        matches!(self, UsageOutcome::RewardIssued)
    }
}

impl fmt::Display for UsageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracking row; exists once a checkout has been evaluated
#[derive(Debug, Clone, PartialEq)]
pub struct UsageRecord {
    pub stripe_checkout_session_id: String,
    pub referrer_user_id: Option<String>,
    pub referred_user_id: Option<String>,
    pub outcome: UsageOutcome,
    pub processed_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn reward_issued(&self) -> bool {
        self.outcome.reward_issued()
    }
}

// ========================================
// Referral codes
// ========================================

fn code_from_row(row: &sqlx::sqlite::SqliteRow) -> ReferralCode {
    let created_at: String = row.get("created_at");
    ReferralCode {
        user_id: row.get("user_id"),
        code: row.get("code"),
        stripe_promotion_code_id: row.get("stripe_promotion_code_id"),
        stripe_coupon_id: row.get("stripe_coupon_id"),
        created_at: parse_timestamp(&created_at),
    }
}

const CODE_COLUMNS: &str =
    "user_id, code, stripe_promotion_code_id, stripe_coupon_id, created_at";

pub async fn find_code_by_user(
    pool: &SqlitePool,
    user_id: &str,
) -> Result<Option<ReferralCode>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM referral_codes WHERE user_id = ?",
        CODE_COLUMNS
    ))
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(code_from_row))
}

pub async fn find_code_by_promotion_code(
    pool: &SqlitePool,
    promotion_code_id: &str,
) -> Result<Option<ReferralCode>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM referral_codes WHERE stripe_promotion_code_id = ?",
        CODE_COLUMNS
    ))
    .bind(promotion_code_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(code_from_row))
}

pub async fn code_taken(pool: &SqlitePool, code: &str) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM referral_codes WHERE code = ?")
        .bind(code)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

/// Insert a code; false when the user already has one
pub async fn insert_code(pool: &SqlitePool, code: &ReferralCode) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO referral_codes
            (user_id, code, stripe_promotion_code_id, stripe_coupon_id, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(user_id) DO NOTHING
        "#,
    )
    .bind(&code.user_id)
    .bind(&code.code)
    .bind(&code.stripe_promotion_code_id)
    .bind(&code.stripe_coupon_id)
    .bind(timestamp(code.created_at))
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

// ========================================
// Rewards
// ========================================

const REWARD_COLUMNS: &str = "id, referrer_user_id, referred_user_id, stripe_checkout_session_id, \
     stripe_coupon_id, stripe_promotion_code_id, promotion_code, redeemed, created_at";

fn reward_from_row(row: &sqlx::sqlite::SqliteRow) -> ReferralReward {
    let created_at: String = row.get("created_at");
    let redeemed: i64 = row.get("redeemed");
    ReferralReward {
        id: row.get("id"),
        referrer_user_id: row.get("referrer_user_id"),
        referred_user_id: row.get("referred_user_id"),
        stripe_checkout_session_id: row.get("stripe_checkout_session_id"),
        stripe_coupon_id: row.get("stripe_coupon_id"),
        stripe_promotion_code_id: row.get("stripe_promotion_code_id"),
        promotion_code: row.get("promotion_code"),
        redeemed: redeemed != 0,
        created_at: parse_timestamp(&created_at),
    }
}

/// Insert a reward; false when the checkout already produced one
pub async fn insert_reward(pool: &SqlitePool, reward: &ReferralReward) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO referral_rewards (
            id, referrer_user_id, referred_user_id, stripe_checkout_session_id,
            stripe_coupon_id, stripe_promotion_code_id, promotion_code, redeemed, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(stripe_checkout_session_id) DO NOTHING
        "#,
    )
    .bind(&reward.id)
    .bind(&reward.referrer_user_id)
    .bind(&reward.referred_user_id)
    .bind(&reward.stripe_checkout_session_id)
    .bind(&reward.stripe_coupon_id)
    .bind(&reward.stripe_promotion_code_id)
    .bind(&reward.promotion_code)
    .bind(reward.redeemed as i64)
    .bind(timestamp(reward.created_at))
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Rewards for a referrer, newest first
pub async fn list_rewards(
    pool: &SqlitePool,
    referrer_user_id: &str,
) -> Result<Vec<ReferralReward>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM referral_rewards WHERE referrer_user_id = ? ORDER BY created_at DESC",
        REWARD_COLUMNS
    ))
    .bind(referrer_user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(reward_from_row).collect())
}

/// Rewards created in `[start, end)`
pub async fn count_rewards_between(
    pool: &SqlitePool,
    referrer_user_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<u32, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM referral_rewards \
         WHERE referrer_user_id = ? AND created_at >= ? AND created_at < ?",
    )
    .bind(referrer_user_id)
    .bind(timestamp(start))
    .bind(timestamp(end))
    .fetch_one(pool)
    .await?;
    Ok(count.max(0) as u32)
}

/// Mark the reward behind a promotion code as used; false if none matched
pub async fn mark_reward_redeemed(
    pool: &SqlitePool,
    promotion_code_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE referral_rewards SET redeemed = 1 \
         WHERE stripe_promotion_code_id = ? AND redeemed = 0",
    )
    .bind(promotion_code_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

// ========================================
// Checkout tracking
// ========================================

pub async fn is_tracked(pool: &SqlitePool, checkout_session_id: &str) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM referral_usage_tracking WHERE stripe_checkout_session_id = ?",
    )
    .bind(checkout_session_id)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// Insert a tracking row; false when the checkout was already tracked
pub async fn track_usage(pool: &SqlitePool, record: &UsageRecord) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO referral_usage_tracking (
            stripe_checkout_session_id, referrer_user_id, referred_user_id,
            reward_issued, outcome, processed_at
        ) VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(stripe_checkout_session_id) DO NOTHING
        "#,
    )
    .bind(&record.stripe_checkout_session_id)
    .bind(&record.referrer_user_id)
    .bind(&record.referred_user_id)
    .bind(record.reward_issued() as i64)
    .bind(record.outcome.as_str())
    .bind(timestamp(record.processed_at))
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn find_usage(
    pool: &SqlitePool,
    checkout_session_id: &str,
) -> Result<Option<UsageRecord>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT stripe_checkout_session_id, referrer_user_id, referred_user_id, outcome, processed_at \
         FROM referral_usage_tracking WHERE stripe_checkout_session_id = ?",
    )
    .bind(checkout_session_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.and_then(|row| {
        let outcome: String = row.get("outcome");
        let processed_at: String = row.get("processed_at");
        Some(UsageRecord {
            stripe_checkout_session_id: row.get("stripe_checkout_session_id"),
            referrer_user_id: row.get("referrer_user_id"),
            referred_user_id: row.get("referred_user_id"),
            outcome: UsageOutcome::parse(&outcome)?,
            processed_at: parse_timestamp(&processed_at),
        })
    }))
}

// ========================================
// Card fingerprints
// ========================================

pub async fn record_fingerprint(
    pool: &SqlitePool,
    user_id: &str,
    fingerprint: &str,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO card_fingerprints (user_id, fingerprint, first_seen_at) VALUES (?, ?, ?) \
         ON CONFLICT(user_id, fingerprint) DO NOTHING",
    )
    .bind(user_id)
    .bind(fingerprint)
    .bind(timestamp(now))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fingerprint_known(
    pool: &SqlitePool,
    user_id: &str,
    fingerprint: &str,
) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM card_fingerprints WHERE user_id = ? AND fingerprint = ?",
    )
    .bind(user_id)
    .bind(fingerprint)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}
