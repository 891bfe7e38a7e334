//! User table operations
//!
//! `credit_balance` here is a denormalized convenience; the credit ledger is
//! the source of truth and the only code allowed to change the balance.

use crate::{Error, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Create a user with a starting balance of zero
pub async fn create_user(pool: &SqlitePool) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO users (id, credit_balance, created_at) VALUES (?, 0, ?)")
        .bind(id.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await?;
    Ok(id)
}

/// Read a user's current balance
pub async fn get_balance(pool: &SqlitePool, user_id: Uuid) -> Result<i64> {
    let row = sqlx::query("SELECT credit_balance FROM users WHERE id = ?")
        .bind(user_id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("User {}", user_id)))?;
    Ok(row.get("credit_balance"))
}
