//! Credit ledger
//!
//! The only code that mutates `users.credit_balance`. Every operation is one
//! sqlite transaction containing both the balance change and the append-only
//! `credit_ledger` entry, so the two commit together or not at all.
//!
//! Idempotency rests on ledger rows, never on the current balance:
//! - a grant with an `order_ref` is skipped when an entry with that
//!   `order_ref` + reason already exists;
//! - a refund is skipped when a REFUND entry for the job already exists.

use crate::db::models::{CreditLedgerEntry, LedgerReason};
use crate::{Error, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};
use uuid::Uuid;

/// Debit `cost` credits from a user for a job.
///
/// No-op when `cost <= 0`. Fails with [`Error::InsufficientCredits`] when the
/// balance cannot cover the cost; the check and the decrement happen in the
/// same transaction, and the decrement itself is conditional on the balance,
/// so two concurrent deductions can never drive the balance negative.
pub async fn deduct(
    pool: &SqlitePool,
    user_id: Uuid,
    cost: i64,
    reason: LedgerReason,
    job_id: Option<Uuid>,
) -> Result<()> {
    if cost <= 0 {
        return Ok(());
    }

    let mut tx = begin_write(pool).await?;

    let balance: i64 = sqlx::query("SELECT credit_balance FROM users WHERE id = ?")
        .bind(user_id.to_string())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::NotFound(format!("User {}", user_id)))?
        .get("credit_balance");

    if balance < cost {
        return Err(Error::InsufficientCredits {
            required: cost,
            available: balance,
        });
    }

    // Conditional decrement closes the read-check-write race
    let updated = sqlx::query(
        "UPDATE users SET credit_balance = credit_balance - ? WHERE id = ? AND credit_balance >= ?",
    )
    .bind(cost)
    .bind(user_id.to_string())
    .bind(cost)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(Error::InsufficientCredits {
            required: cost,
            available: balance,
        });
    }

    append_entry(&mut tx, user_id, -cost, reason, job_id, None).await?;
    tx.commit().await?;

    info!(
        user_id = %user_id,
        cost,
        reason = reason.as_str(),
        "Deducted credits"
    );
    Ok(())
}

/// Credit `amount` to a user.
///
/// No-op when `amount <= 0`. When `order_ref` is supplied, a replayed payment
/// confirmation for the same order is skipped entirely. Returns `true` when
/// credits were actually granted.
pub async fn grant(
    pool: &SqlitePool,
    user_id: Uuid,
    amount: i64,
    reason: LedgerReason,
    order_ref: Option<&str>,
) -> Result<bool> {
    if amount <= 0 {
        return Ok(false);
    }

    let mut tx = begin_write(pool).await?;

    if let Some(order_ref) = order_ref {
        let existing: i64 = sqlx::query(
            "SELECT COUNT(*) AS n FROM credit_ledger WHERE order_ref = ? AND reason = ?",
        )
        .bind(order_ref)
        .bind(reason.as_str())
        .fetch_one(&mut *tx)
        .await?
        .get("n");

        if existing > 0 {
            warn!(
                user_id = %user_id,
                order_ref,
                "Duplicate grant for order, skipping"
            );
            return Ok(false);
        }
    }

    sqlx::query("UPDATE users SET credit_balance = credit_balance + ? WHERE id = ?")
        .bind(amount)
        .bind(user_id.to_string())
        .execute(&mut *tx)
        .await?;

    append_entry(&mut tx, user_id, amount, reason, None, order_ref).await?;
    tx.commit().await?;

    info!(
        user_id = %user_id,
        amount,
        reason = reason.as_str(),
        "Granted credits"
    );
    Ok(true)
}

/// Return the cost of a failed job to its user, exactly once.
///
/// No-op when the job never had a JOB_COST deduction (free tier) or when a
/// REFUND entry for the job already exists. Returns `true` when credits were
/// actually returned.
pub async fn refund(pool: &SqlitePool, job_id: Uuid) -> Result<bool> {
    let mut tx = begin_write(pool).await?;

    let deduction = sqlx::query(
        r#"
        SELECT user_id, delta FROM credit_ledger
        WHERE job_id = ? AND reason = 'JOB_COST'
        LIMIT 1
        "#,
    )
    .bind(job_id.to_string())
    .fetch_optional(&mut *tx)
    .await?;

    let Some(deduction) = deduction else {
        // Nothing was ever deducted for this job
        return Ok(false);
    };

    let already_refunded: i64 = sqlx::query(
        "SELECT COUNT(*) AS n FROM credit_ledger WHERE job_id = ? AND reason = 'REFUND'",
    )
    .bind(job_id.to_string())
    .fetch_one(&mut *tx)
    .await?
    .get("n");

    if already_refunded > 0 {
        warn!(job_id = %job_id, "Refund already recorded, skipping");
        return Ok(false);
    }

    let user_id_str: String = deduction.get("user_id");
    let user_id = crate::db::jobs::parse_uuid(&user_id_str)?;
    let delta: i64 = deduction.get("delta");
    let amount = -delta; // deduction delta is negative

    sqlx::query("UPDATE users SET credit_balance = credit_balance + ? WHERE id = ?")
        .bind(amount)
        .bind(user_id.to_string())
        .execute(&mut *tx)
        .await?;

    append_entry(
        &mut tx,
        user_id,
        amount,
        LedgerReason::Refund,
        Some(job_id),
        None,
    )
    .await?;
    tx.commit().await?;

    info!(job_id = %job_id, user_id = %user_id, amount, "Refunded job cost");
    Ok(true)
}

/// Open an immediate write transaction.
///
/// A deferred transaction that reads first and writes later can hit
/// SQLITE_BUSY_SNAPSHOT when another writer commits in between, which would
/// surface a contended `deduct` as a database error instead of
/// `InsufficientCredits` and could drop a contended `refund`. Taking the
/// write lock up front makes concurrent ledger operations queue on the
/// busy timeout instead.
async fn begin_write(pool: &SqlitePool) -> Result<sqlx::Transaction<'static, sqlx::Sqlite>> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}

async fn append_entry(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    user_id: Uuid,
    delta: i64,
    reason: LedgerReason,
    job_id: Option<Uuid>,
    order_ref: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO credit_ledger (id, user_id, delta, reason, job_id, order_ref, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id.to_string())
    .bind(delta)
    .bind(reason.as_str())
    .bind(job_id.map(|j| j.to_string()))
    .bind(order_ref)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// All ledger entries for a user, oldest first (audit/reconciliation)
pub async fn list_entries(pool: &SqlitePool, user_id: Uuid) -> Result<Vec<CreditLedgerEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT id, user_id, delta, reason, job_id, order_ref, created_at
        FROM credit_ledger
        WHERE user_id = ?
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let id: String = row.get("id");
        let user_id: String = row.get("user_id");
        let reason: String = row.get("reason");
        let job_id: Option<String> = row.get("job_id");
        let created_at: String = row.get("created_at");

        entries.push(CreditLedgerEntry {
            id: crate::db::jobs::parse_uuid(&id)?,
            user_id: crate::db::jobs::parse_uuid(&user_id)?,
            delta: row.get("delta"),
            reason: LedgerReason::parse_str(&reason)?,
            job_id: job_id.as_deref().map(crate::db::jobs::parse_uuid).transpose()?,
            order_ref: row.get("order_ref"),
            created_at: crate::db::jobs::parse_timestamp(&created_at)?,
        });
    }
    Ok(entries)
}

/// Sum of a user's ledger deltas. Must always equal the denormalized balance.
pub async fn ledger_sum(pool: &SqlitePool, user_id: Uuid) -> Result<i64> {
    let row = sqlx::query(
        "SELECT COALESCE(SUM(delta), 0) AS total FROM credit_ledger WHERE user_id = ?",
    )
    .bind(user_id.to_string())
    .fetch_one(pool)
    .await?;
    Ok(row.get("total"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::init_memory_database;
    use crate::db::users::{create_user, get_balance};

    #[tokio::test]
    async fn deduct_requires_sufficient_balance() {
        let pool = init_memory_database().await.unwrap();
        let user = create_user(&pool).await.unwrap();
        grant(&pool, user, 40, LedgerReason::Purchase, None)
            .await
            .unwrap();

        let err = deduct(&pool, user, 50, LedgerReason::JobCost, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientCredits {
                required: 50,
                available: 40
            }
        ));

        // Nothing changed
        assert_eq!(get_balance(&pool, user).await.unwrap(), 40);
        assert_eq!(ledger_sum(&pool, user).await.unwrap(), 40);
    }

    #[tokio::test]
    async fn zero_and_negative_amounts_are_noops() {
        let pool = init_memory_database().await.unwrap();
        let user = create_user(&pool).await.unwrap();

        deduct(&pool, user, 0, LedgerReason::JobCost, None)
            .await
            .unwrap();
        deduct(&pool, user, -5, LedgerReason::JobCost, None)
            .await
            .unwrap();
        assert!(!grant(&pool, user, 0, LedgerReason::Purchase, None)
            .await
            .unwrap());

        assert_eq!(get_balance(&pool, user).await.unwrap(), 0);
        assert!(list_entries(&pool, user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn grant_is_idempotent_per_order_ref() {
        let pool = init_memory_database().await.unwrap();
        let user = create_user(&pool).await.unwrap();

        assert!(grant(&pool, user, 100, LedgerReason::Purchase, Some("order-1"))
            .await
            .unwrap());
        // Replayed payment confirmation
        assert!(!grant(&pool, user, 100, LedgerReason::Purchase, Some("order-1"))
            .await
            .unwrap());

        assert_eq!(get_balance(&pool, user).await.unwrap(), 100);
        assert_eq!(list_entries(&pool, user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn refund_is_idempotent_per_job() {
        let pool = init_memory_database().await.unwrap();
        let user = create_user(&pool).await.unwrap();
        let job_id = Uuid::new_v4();

        grant(&pool, user, 200, LedgerReason::Purchase, None)
            .await
            .unwrap();
        deduct(&pool, user, 150, LedgerReason::JobCost, Some(job_id))
            .await
            .unwrap();
        assert_eq!(get_balance(&pool, user).await.unwrap(), 50);

        assert!(refund(&pool, job_id).await.unwrap());
        assert_eq!(get_balance(&pool, user).await.unwrap(), 200);

        // Second refund changes nothing
        assert!(!refund(&pool, job_id).await.unwrap());
        assert_eq!(get_balance(&pool, user).await.unwrap(), 200);

        let refunds: Vec<_> = list_entries(&pool, user)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.reason == LedgerReason::Refund)
            .collect();
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].job_id, Some(job_id));
        assert_eq!(refunds[0].delta, 150);
    }

    #[tokio::test]
    async fn refund_without_deduction_is_noop() {
        let pool = init_memory_database().await.unwrap();
        create_user(&pool).await.unwrap();
        // Free-tier job: no JOB_COST entry exists
        assert!(!refund(&pool, Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn balance_always_equals_ledger_sum() {
        let pool = init_memory_database().await.unwrap();
        let user = create_user(&pool).await.unwrap();
        let job_a = Uuid::new_v4();
        let job_b = Uuid::new_v4();

        grant(&pool, user, 300, LedgerReason::Purchase, Some("o1"))
            .await
            .unwrap();
        deduct(&pool, user, 50, LedgerReason::JobCost, Some(job_a))
            .await
            .unwrap();
        deduct(&pool, user, 150, LedgerReason::JobCost, Some(job_b))
            .await
            .unwrap();
        refund(&pool, job_a).await.unwrap();
        refund(&pool, job_a).await.unwrap(); // duplicate
        grant(&pool, user, 300, LedgerReason::Purchase, Some("o1"))
            .await
            .unwrap(); // duplicate

        let balance = get_balance(&pool, user).await.unwrap();
        assert_eq!(balance, 300 - 50 - 150 + 50);
        assert_eq!(balance, ledger_sum(&pool, user).await.unwrap());
    }
}
