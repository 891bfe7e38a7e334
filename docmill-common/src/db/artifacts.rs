//! Artifact table operations
//!
//! Artifacts are append-only: each stage inserts a new row rather than
//! mutating a prior one, preserving the audit trail from raw draft to final
//! document.

use crate::db::models::{Artifact, ArtifactKind};
use crate::Result;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Store a stage output; returns the storage key
pub async fn insert_artifact(
    pool: &SqlitePool,
    job_id: Uuid,
    kind: ArtifactKind,
    content: &str,
) -> Result<String> {
    let id = Uuid::new_v4();
    let storage_key = storage_key_for(job_id, kind);

    sqlx::query(
        r#"
        INSERT INTO artifacts (id, job_id, kind, storage_key, content, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(job_id.to_string())
    .bind(kind.as_str())
    .bind(&storage_key)
    .bind(content)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(storage_key)
}

/// Storage key layout, also used as the retrieval URL path
pub fn storage_key_for(job_id: Uuid, kind: ArtifactKind) -> String {
    match kind {
        ArtifactKind::RawDraft => format!("drafts/{}-raw.md", job_id),
        ArtifactKind::SafeDraft => format!("drafts/{}-safe.md", job_id),
        ArtifactKind::QaReport => format!("reports/{}-qa.json", job_id),
        ArtifactKind::FinalDocument => format!("documents/{}.html", job_id),
    }
}

/// Fetch an artifact by its storage key (document retrieval endpoint)
pub async fn get_by_storage_key(pool: &SqlitePool, storage_key: &str) -> Result<Option<Artifact>> {
    let row = sqlx::query(
        r#"
        SELECT id, job_id, kind, storage_key, content, created_at
        FROM artifacts
        WHERE storage_key = ?
        "#,
    )
    .bind(storage_key)
    .fetch_optional(pool)
    .await?;

    row.map(|row| artifact_from_row(&row)).transpose()
}

/// Fetch the most recent artifact of a kind for a job
pub async fn get_latest(
    pool: &SqlitePool,
    job_id: Uuid,
    kind: ArtifactKind,
) -> Result<Option<Artifact>> {
    let row = sqlx::query(
        r#"
        SELECT id, job_id, kind, storage_key, content, created_at
        FROM artifacts
        WHERE job_id = ? AND kind = ?
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(job_id.to_string())
    .bind(kind.as_str())
    .fetch_optional(pool)
    .await?;

    row.map(|row| artifact_from_row(&row)).transpose()
}

fn artifact_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Artifact> {
    let id: String = row.get("id");
    let job_id: String = row.get("job_id");
    let kind: String = row.get("kind");
    let created_at: String = row.get("created_at");

    Ok(Artifact {
        id: super::jobs::parse_uuid(&id)?,
        job_id: super::jobs::parse_uuid(&job_id)?,
        kind: ArtifactKind::parse_str(&kind)?,
        storage_key: row.get("storage_key"),
        content: row.get("content"),
        created_at: super::jobs::parse_timestamp(&created_at)?,
    })
}
