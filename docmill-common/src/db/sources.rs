//! Source table operations
//!
//! Sources are written once by the research stage and read-only afterwards.
//! `position` is the 1-based citation index in retrieval order; downstream
//! stages rely on it being stable for the job's lifetime.

use crate::db::models::Source;
use crate::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Persist a job's sources in one transaction, positions assigned 1..=n
pub async fn insert_sources(pool: &SqlitePool, job_id: Uuid, sources: &[Source]) -> Result<()> {
    let mut tx = pool.begin().await?;

    for source in sources {
        sqlx::query(
            r#"
            INSERT INTO sources (job_id, position, title, url, excerpt)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(job_id.to_string())
        .bind(source.position)
        .bind(&source.title)
        .bind(&source.url)
        .bind(&source.excerpt)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Load a job's sources ordered by citation index
pub async fn list_sources(pool: &SqlitePool, job_id: Uuid) -> Result<Vec<Source>> {
    let rows = sqlx::query(
        r#"
        SELECT job_id, position, title, url, excerpt
        FROM sources
        WHERE job_id = ?
        ORDER BY position ASC
        "#,
    )
    .bind(job_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut sources = Vec::with_capacity(rows.len());
    for row in rows {
        let job_id_str: String = row.get("job_id");
        sources.push(Source {
            job_id: super::jobs::parse_uuid(&job_id_str)?,
            position: row.get("position"),
            title: row.get("title"),
            url: row.get("url"),
            excerpt: row.get("excerpt"),
        });
    }
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::init_memory_database;
    use crate::db::jobs::insert_job;
    use crate::db::models::{Language, Tier};

    #[tokio::test]
    async fn positions_survive_roundtrip_in_order() {
        let pool = init_memory_database().await.unwrap();
        let job_id = insert_job(&pool, "t", Language::En, Tier::Free, None)
            .await
            .unwrap();

        let sources: Vec<Source> = (1..=3)
            .map(|i| Source {
                job_id,
                position: i,
                title: format!("Source {}", i),
                url: format!("https://example.org/{}", i),
                excerpt: "text".to_string(),
            })
            .collect();

        insert_sources(&pool, job_id, &sources).await.unwrap();
        let loaded = list_sources(&pool, job_id).await.unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].position, 1);
        assert_eq!(loaded[0].title, "Source 1");
        assert_eq!(loaded[2].url, "https://example.org/3");
    }
}
