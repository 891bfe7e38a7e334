//! Database initialization
//!
//! Opens (creating if needed) the sqlite database and applies the schema.
//! All DDL is idempotent (`CREATE TABLE IF NOT EXISTS`), so init is safe to
//! run on every startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection pool and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    configure_pragmas(&pool).await?;
    create_schema(&pool).await?;

    Ok(pool)
}

/// Initialize an in-memory database (tests)
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    configure_pragmas(&pool).await?;
    create_schema(&pool).await?;
    Ok(pool)
}

async fn configure_pragmas(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;
    // WAL allows concurrent readers while the ledger writes
    sqlx::query("PRAGMA journal_mode = WAL").execute(pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;
    Ok(())
}

/// Create all tables (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_users_table(pool).await?;
    create_jobs_table(pool).await?;
    create_sources_table(pool).await?;
    create_artifacts_table(pool).await?;
    create_credit_ledger_table(pool).await?;
    Ok(())
}

async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY,
            credit_balance  INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_jobs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id             TEXT PRIMARY KEY,
            topic          TEXT NOT NULL,
            language       TEXT NOT NULL DEFAULT 'en',
            tier           TEXT NOT NULL DEFAULT 'FREE',
            status         TEXT NOT NULL DEFAULT 'PENDING',
            stage          TEXT NOT NULL DEFAULT 'IDLE',
            progress_pct   INTEGER NOT NULL DEFAULT 0,
            user_id        TEXT,
            error_message  TEXT,
            result_key     TEXT,
            created_at     TEXT NOT NULL,
            updated_at     TEXT NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Poll path lists oldest PENDING jobs; keep that scan off the main table
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_jobs_status_created ON jobs(status, created_at)",
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_sources_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            job_id    TEXT NOT NULL,
            position  INTEGER NOT NULL,
            title     TEXT NOT NULL,
            url       TEXT NOT NULL,
            excerpt   TEXT NOT NULL,
            PRIMARY KEY (job_id, position),
            FOREIGN KEY (job_id) REFERENCES jobs(id)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_artifacts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS artifacts (
            id           TEXT PRIMARY KEY,
            job_id       TEXT NOT NULL,
            kind         TEXT NOT NULL,
            storage_key  TEXT NOT NULL UNIQUE,
            content      TEXT NOT NULL,
            created_at   TEXT NOT NULL,
            FOREIGN KEY (job_id) REFERENCES jobs(id)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_credit_ledger_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS credit_ledger (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL,
            delta       INTEGER NOT NULL,
            reason      TEXT NOT NULL,
            job_id      TEXT,
            order_ref   TEXT,
            created_at  TEXT NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Idempotency lookups: refund-by-job and grant-by-order
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_ledger_job_reason ON credit_ledger(job_id, reason)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_ledger_order_reason ON credit_ledger(order_ref, reason)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_ledger_user ON credit_ledger(user_id)")
        .execute(pool)
        .await?;
    Ok(())
}
