//! Job table operations
//!
//! The conditional PENDING→PROCESSING update in [`claim_job`] is the sole
//! concurrency guard against a job being processed twice across workers.

use crate::db::models::{Job, JobStage, JobStatus, Language, Tier};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Insert a new PENDING job (intake layer / tests)
pub async fn insert_job(
    pool: &SqlitePool,
    topic: &str,
    language: Language,
    tier: Tier,
    user_id: Option<Uuid>,
) -> Result<Uuid> {
    let job_id = Uuid::new_v4();
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO jobs (id, topic, language, tier, status, stage, progress_pct,
                          user_id, created_at, updated_at)
        VALUES (?, ?, ?, ?, 'PENDING', 'IDLE', 0, ?, ?, ?)
        "#,
    )
    .bind(job_id.to_string())
    .bind(topic)
    .bind(language.as_str())
    .bind(tier.as_str())
    .bind(user_id.map(|u| u.to_string()))
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(job_id)
}

/// Load a job by id
pub async fn get_job(pool: &SqlitePool, job_id: Uuid) -> Result<Job> {
    let row = sqlx::query(
        r#"
        SELECT id, topic, language, tier, status, stage, progress_pct,
               user_id, error_message, result_key, created_at, updated_at
        FROM jobs
        WHERE id = ?
        "#,
    )
    .bind(job_id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("Job {}", job_id)))?;

    job_from_row(&row)
}

/// List the oldest PENDING jobs, capped at `limit` (poll intake)
pub async fn list_pending_jobs(pool: &SqlitePool, limit: u32) -> Result<Vec<Uuid>> {
    let rows = sqlx::query(
        "SELECT id FROM jobs WHERE status = 'PENDING' ORDER BY created_at ASC LIMIT ?",
    )
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    let mut ids = Vec::with_capacity(rows.len());
    for row in rows {
        let id: String = row.get("id");
        ids.push(parse_uuid(&id)?);
    }
    Ok(ids)
}

/// Atomically claim a PENDING job for processing.
///
/// Returns `true` if this caller won the claim. A `false` return means
/// another worker (or an earlier attempt) already moved the job out of
/// PENDING; the caller must abort silently.
pub async fn claim_job(pool: &SqlitePool, job_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'PROCESSING', updated_at = ?
        WHERE id = ? AND status = 'PENDING'
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .bind(job_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Persist the stage a processing run is entering and its progress percentage
pub async fn set_stage(pool: &SqlitePool, job_id: Uuid, stage: JobStage) -> Result<()> {
    sqlx::query(
        "UPDATE jobs SET stage = ?, progress_pct = ?, updated_at = ? WHERE id = ?",
    )
    .bind(stage.as_str())
    .bind(stage.entry_progress_pct())
    .bind(Utc::now().to_rfc3339())
    .bind(job_id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Mark a job COMPLETED with its result key
pub async fn mark_completed(pool: &SqlitePool, job_id: Uuid, result_key: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'COMPLETED', stage = 'DONE', progress_pct = 100,
            result_key = ?, updated_at = ?
        WHERE id = ? AND status = 'PROCESSING'
        "#,
    )
    .bind(result_key)
    .bind(Utc::now().to_rfc3339())
    .bind(job_id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Mark a job FAILED, resetting progress to 0
///
/// The message is truncated so an upstream stack dump cannot bloat the row.
pub async fn mark_failed(pool: &SqlitePool, job_id: Uuid, message: &str) -> Result<()> {
    let message = truncate_message(message, 500);

    sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'FAILED', progress_pct = 0, error_message = ?, updated_at = ?
        WHERE id = ? AND status = 'PROCESSING'
        "#,
    )
    .bind(message)
    .bind(Utc::now().to_rfc3339())
    .bind(job_id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

fn truncate_message(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        message.to_string()
    } else {
        let truncated: String = message.chars().take(max_chars).collect();
        format!("{}…", truncated)
    }
}

fn job_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Job> {
    let id: String = row.get("id");
    let language: String = row.get("language");
    let tier: String = row.get("tier");
    let status: String = row.get("status");
    let stage: String = row.get("stage");
    let user_id: Option<String> = row.get("user_id");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Job {
        id: parse_uuid(&id)?,
        topic: row.get("topic"),
        language: Language::parse_str(&language)?,
        tier: Tier::parse_str(&tier)?,
        status: JobStatus::parse_str(&status)?,
        stage: JobStage::parse_str(&stage)?,
        progress_pct: row.get("progress_pct"),
        user_id: user_id.as_deref().map(parse_uuid).transpose()?,
        error_message: row.get("error_message"),
        result_key: row.get("result_key"),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::Internal(format!("Invalid UUID '{}': {}", s, e)))
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid timestamp '{}': {}", s, e)))
}
