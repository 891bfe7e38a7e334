//! Contention tests for the credit ledger and the job claim.
//!
//! Tasks run concurrently; a single-connection pool serializes the underlying
//! sqlite transactions, so the ordering between the competing operations is
//! decided by pool checkout. What these tests pin down is that whichever
//! order wins, the transactional guards keep the numbers right.

use docmill_common::db::init::create_schema;
use docmill_common::db::jobs::{claim_job, get_job, insert_job};
use docmill_common::db::models::{JobStatus, Language, LedgerReason, Tier};
use docmill_common::db::users::{create_user, get_balance};
use docmill_common::ledger;
use docmill_common::Error;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

async fn test_pool(dir: &tempfile::TempDir) -> SqlitePool {
    let db_path = dir.path().join("test.db");
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&format!("sqlite://{}?mode=rwc", db_path.display()))
        .await
        .unwrap();
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .unwrap();
    create_schema(&pool).await.unwrap();
    pool
}

#[tokio::test]
async fn concurrent_deducts_never_overdraw() {
    let dir = tempfile::tempdir().unwrap();
    let pool = test_pool(&dir).await;

    let user = create_user(&pool).await.unwrap();
    ledger::grant(&pool, user, 5, LedgerReason::Purchase, None)
        .await
        .unwrap();

    // Two cost-3 deductions against a balance of 5: exactly one must win.
    let a = ledger::deduct(&pool, user, 3, LedgerReason::JobCost, None);
    let b = ledger::deduct(&pool, user, 3, LedgerReason::JobCost, None);
    let (ra, rb) = tokio::join!(a, b);

    let successes = [&ra, &rb].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one deduction may succeed");

    let failure = if ra.is_err() { ra } else { rb };
    assert!(matches!(
        failure.unwrap_err(),
        Error::InsufficientCredits { .. }
    ));

    let balance = get_balance(&pool, user).await.unwrap();
    assert_eq!(balance, 2);
    assert!(balance >= 0, "balance must never go negative");
    assert_eq!(balance, ledger::ledger_sum(&pool, user).await.unwrap());
}

#[tokio::test]
async fn concurrent_claims_yield_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let pool = test_pool(&dir).await;

    let job_id = insert_job(&pool, "topic", Language::En, Tier::Free, None)
        .await
        .unwrap();

    let (ra, rb) = tokio::join!(claim_job(&pool, job_id), claim_job(&pool, job_id));
    let wins = [ra.unwrap(), rb.unwrap()].iter().filter(|w| **w).count();
    assert_eq!(wins, 1, "exactly one claim may transition the job");

    let job = get_job(&pool, job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Processing);
}

#[tokio::test]
async fn interleaved_ledger_history_reconciles() {
    let dir = tempfile::tempdir().unwrap();
    let pool = test_pool(&dir).await;

    let user = create_user(&pool).await.unwrap();
    ledger::grant(&pool, user, 1_000, LedgerReason::Signup, None)
        .await
        .unwrap();

    // A burst of concurrent jobs deducting, then half refunded twice over
    let mut job_ids = Vec::new();
    let mut handles = Vec::new();
    for _ in 0..8 {
        let job_id = uuid::Uuid::new_v4();
        job_ids.push(job_id);
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            ledger::deduct(&pool, user, 50, LedgerReason::JobCost, Some(job_id)).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for job_id in job_ids.iter().take(4) {
        assert!(ledger::refund(&pool, *job_id).await.unwrap());
        assert!(!ledger::refund(&pool, *job_id).await.unwrap());
    }

    let balance = get_balance(&pool, user).await.unwrap();
    assert_eq!(balance, 1_000 - 8 * 50 + 4 * 50);
    assert_eq!(balance, ledger::ledger_sum(&pool, user).await.unwrap());
}

/// Pool sized like production, so competing ledger writes really run on
/// separate connections
async fn contended_pool(dir: &tempfile::TempDir) -> SqlitePool {
    let db_path = dir.path().join("contended.db");
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect(&format!("sqlite://{}?mode=rwc", db_path.display()))
        .await
        .unwrap();
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .unwrap();
    create_schema(&pool).await.unwrap();
    pool
}

#[tokio::test]
async fn contended_deduct_loses_on_balance_not_on_busy() {
    let dir = tempfile::tempdir().unwrap();
    let pool = contended_pool(&dir).await;

    let user = create_user(&pool).await.unwrap();
    ledger::grant(&pool, user, 5, LedgerReason::Purchase, None)
        .await
        .unwrap();

    // On a multi-connection pool the transactions genuinely overlap. The
    // loser must see InsufficientCredits, never a busy/snapshot error.
    let a = tokio::spawn({
        let pool = pool.clone();
        async move { ledger::deduct(&pool, user, 3, LedgerReason::JobCost, None).await }
    });
    let b = tokio::spawn({
        let pool = pool.clone();
        async move { ledger::deduct(&pool, user, 3, LedgerReason::JobCost, None).await }
    });
    let (ra, rb) = (a.await.unwrap(), b.await.unwrap());

    let successes = [&ra, &rb].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    let failure = if ra.is_err() { ra } else { rb };
    assert!(matches!(
        failure.unwrap_err(),
        Error::InsufficientCredits { .. }
    ));

    let balance = get_balance(&pool, user).await.unwrap();
    assert_eq!(balance, 2);
    assert_eq!(balance, ledger::ledger_sum(&pool, user).await.unwrap());
}

#[tokio::test]
async fn contended_refunds_all_land() {
    let dir = tempfile::tempdir().unwrap();
    let pool = contended_pool(&dir).await;

    let user = create_user(&pool).await.unwrap();
    ledger::grant(&pool, user, 400, LedgerReason::Purchase, None)
        .await
        .unwrap();

    let mut job_ids = Vec::new();
    for _ in 0..4 {
        let job_id = uuid::Uuid::new_v4();
        ledger::deduct(&pool, user, 100, LedgerReason::JobCost, Some(job_id))
            .await
            .unwrap();
        job_ids.push(job_id);
    }
    assert_eq!(get_balance(&pool, user).await.unwrap(), 0);

    // All four refunds fire at once; none may be lost to write contention
    let mut handles = Vec::new();
    for job_id in job_ids {
        let pool = pool.clone();
        handles.push(tokio::spawn(
            async move { ledger::refund(&pool, job_id).await },
        ));
    }
    for handle in handles {
        assert!(handle.await.unwrap().unwrap());
    }

    let balance = get_balance(&pool, user).await.unwrap();
    assert_eq!(balance, 400);
    assert_eq!(balance, ledger::ledger_sum(&pool, user).await.unwrap());
}
