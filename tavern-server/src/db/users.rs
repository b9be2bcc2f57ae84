//! Local mirror of users who have touched the referral feature

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use super::{parse_timestamp, timestamp};

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Insert the user or refresh their email
pub async fn upsert_user(
    pool: &SqlitePool,
    id: &str,
    email: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO users (id, email, created_at) VALUES (?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET email = COALESCE(excluded.email, users.email)
        "#,
    )
    .bind(id)
    .bind(email)
    .bind(timestamp(now))
    .execute(pool)
    .await?;
    Ok(())
}

/// Record which Stripe customer belongs to a user
pub async fn link_customer(
    pool: &SqlitePool,
    id: &str,
    customer_id: &str,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    // A customer id moves to the most recent user that paid with it
    sqlx::query("UPDATE users SET stripe_customer_id = NULL WHERE stripe_customer_id = ? AND id != ?")
        .bind(customer_id)
        .bind(id)
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO users (id, stripe_customer_id, created_at) VALUES (?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET stripe_customer_id = excluded.stripe_customer_id
        "#,
    )
    .bind(id)
    .bind(customer_id)
    .bind(timestamp(now))
    .execute(pool)
    .await?;
    Ok(())
}

fn user_from_row(row: &sqlx::sqlite::SqliteRow) -> User {
    let created_at: String = row.get("created_at");
    User {
        id: row.get("id"),
        email: row.get("email"),
        stripe_customer_id: row.get("stripe_customer_id"),
        created_at: parse_timestamp(&created_at),
    }
}

pub async fn find_by_id(pool: &SqlitePool, id: &str) -> Result<Option<User>, sqlx::Error> {
    let row = sqlx::query("SELECT id, email, stripe_customer_id, created_at FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(user_from_row))
}

pub async fn find_by_customer(
    pool: &SqlitePool,
    customer_id: &str,
) -> Result<Option<User>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT id, email, stripe_customer_id, created_at FROM users WHERE stripe_customer_id = ?",
    )
    .bind(customer_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(user_from_row))
}
