//! SQLite persistence for users and the referral ledger

pub mod referrals;
pub mod users;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;

/// Open the database named by `database_url` and create missing tables
pub async fn init_database_pool(database_url: &str) -> Result<SqlitePool> {
    tracing::debug!("Connecting to database: {}", database_url);

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));

    // Every connection to an in-memory database is a separate database
    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create tables and indexes if they don't exist
async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT,
            stripe_customer_id TEXT UNIQUE,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS referral_codes (
            user_id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            stripe_promotion_code_id TEXT NOT NULL UNIQUE,
            stripe_coupon_id TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS referral_rewards (
            id TEXT PRIMARY KEY,
            referrer_user_id TEXT NOT NULL,
            referred_user_id TEXT NOT NULL,
            stripe_checkout_session_id TEXT NOT NULL UNIQUE,
            stripe_coupon_id TEXT NOT NULL,
            stripe_promotion_code_id TEXT NOT NULL,
            promotion_code TEXT NOT NULL,
            redeemed INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_referral_rewards_referrer \
         ON referral_rewards (referrer_user_id, created_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS referral_usage_tracking (
            stripe_checkout_session_id TEXT PRIMARY KEY,
            referrer_user_id TEXT,
            referred_user_id TEXT,
            reward_issued INTEGER NOT NULL,
            outcome TEXT NOT NULL,
            processed_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS card_fingerprints (
            user_id TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            first_seen_at TEXT NOT NULL,
            PRIMARY KEY (user_id, fingerprint)
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!(
        "Database tables initialized (users, referral_codes, referral_rewards, \
         referral_usage_tracking, card_fingerprints)"
    );

    Ok(())
}

/// Stored timestamp format; fixed width so string comparison orders correctly
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("t.db").display());

        let pool = init_database_pool(&url).await.unwrap();
        init_tables(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name LIKE 'referral_%'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_timestamp_format_orders_lexically() {
        let a = timestamp(Utc.with_ymd_and_hms(2026, 1, 31, 23, 59, 59).unwrap());
        let b = timestamp(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap());
        assert_eq!(a, "2026-01-31T23:59:59.000Z");
        assert!(a < b);
        assert_eq!(parse_timestamp(&b), Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap());
    }
}
