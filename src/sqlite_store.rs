//! SQLite-backed [`SnapshotStore`] and [`ProjectCatalog`].
//!
//! Wraps a [`SqlitePool`] and maps each trait operation onto the schema
//! created by [`crate::migrate`] (repositories, project_summaries, snapshots).

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{ProjectSummary, Repository, Snapshot};
use crate::store::SnapshotStore;
use crate::traits::ProjectCatalog;

const SNAPSHOT_COLUMNS: &str = "id, repository_id, analysis_id, user_id, file_path, start_line, \
    end_line, function_name, language, line_count, selection_score, selection_reason, image_url, \
    image_size_bytes, image_width, image_height, theme, show_line_numbers, font_size, is_stale, \
    last_commit_sha, created_at";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Register a repository (or update its description and language).
    pub async fn upsert_repository(&self, repository: &Repository) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO repositories (id, owner, name, user_id, description, language, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                description = excluded.description,
                language = excluded.language
            "#,
        )
        .bind(&repository.id)
        .bind(&repository.owner)
        .bind(&repository.name)
        .bind(&repository.user_id)
        .bind(&repository.description)
        .bind(&repository.language)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a new project analysis; it becomes the latest one.
    pub async fn add_summary(&self, repository_id: &str, summary: &str) -> Result<ProjectSummary> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO project_summaries (id, repository_id, summary, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(repository_id)
        .bind(summary)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(ProjectSummary {
            id,
            repository_id: repository_id.to_string(),
            summary: summary.to_string(),
        })
    }
}

fn row_to_snapshot(row: &SqliteRow) -> Result<Snapshot> {
    let created_at: i64 = row.try_get("created_at")?;
    Ok(Snapshot {
        id: row.try_get("id")?,
        repository_id: row.try_get("repository_id")?,
        analysis_id: row.try_get("analysis_id")?,
        user_id: row.try_get("user_id")?,
        file_path: row.try_get("file_path")?,
        start_line: row.try_get::<i64, _>("start_line")? as u32,
        end_line: row.try_get::<i64, _>("end_line")? as u32,
        function_name: row.try_get("function_name")?,
        language: row.try_get("language")?,
        line_count: row.try_get::<i64, _>("line_count")? as u32,
        selection_score: row.try_get::<i64, _>("selection_score")?.clamp(0, 100) as u8,
        selection_reason: row.try_get("selection_reason")?,
        image_url: row.try_get("image_url")?,
        image_size_bytes: row.try_get::<i64, _>("image_size_bytes")? as u64,
        image_width: row.try_get::<i64, _>("image_width")? as u32,
        image_height: row.try_get::<i64, _>("image_height")? as u32,
        theme: row.try_get("theme")?,
        show_line_numbers: row.try_get("show_line_numbers")?,
        font_size: row.try_get::<i64, _>("font_size")? as u32,
        is_stale: row.try_get("is_stale")?,
        last_commit_sha: row.try_get("last_commit_sha")?,
        created_at: DateTime::from_timestamp_millis(created_at).unwrap_or_default(),
    })
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    async fn insert(&self, snapshot: &Snapshot) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO snapshots ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            SNAPSHOT_COLUMNS
        ))
        .bind(&snapshot.id)
        .bind(&snapshot.repository_id)
        .bind(&snapshot.analysis_id)
        .bind(&snapshot.user_id)
        .bind(&snapshot.file_path)
        .bind(snapshot.start_line as i64)
        .bind(snapshot.end_line as i64)
        .bind(&snapshot.function_name)
        .bind(&snapshot.language)
        .bind(snapshot.line_count as i64)
        .bind(snapshot.selection_score as i64)
        .bind(&snapshot.selection_reason)
        .bind(&snapshot.image_url)
        .bind(snapshot.image_size_bytes as i64)
        .bind(snapshot.image_width as i64)
        .bind(snapshot.image_height as i64)
        .bind(&snapshot.theme)
        .bind(snapshot.show_line_numbers)
        .bind(snapshot.font_size as i64)
        .bind(snapshot.is_stale)
        .bind(&snapshot.last_commit_sha)
        .bind(snapshot.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Snapshot>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM snapshots WHERE id = ?",
            SNAPSHOT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_snapshot).transpose()
    }

    async fn find_fresh(&self, repository_id: &str, user_id: &str) -> Result<Vec<Snapshot>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM snapshots
            WHERE repository_id = ? AND user_id = ? AND is_stale = 0
            ORDER BY selection_score DESC, created_at ASC, rowid ASC
            "#,
            SNAPSHOT_COLUMNS
        ))
        .bind(repository_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_snapshot).collect()
    }

    async fn find_by_repository(&self, repository_id: &str) -> Result<Vec<Snapshot>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM snapshots WHERE repository_id = ? ORDER BY rowid ASC",
            SNAPSHOT_COLUMNS
        ))
        .bind(repository_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_snapshot).collect()
    }

    async fn mark_stale(&self, repository_id: &str, current_sha: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE snapshots SET is_stale = 1
            WHERE repository_id = ? AND is_stale = 0 AND last_commit_sha != ?
            "#,
        )
        .bind(repository_id)
        .bind(current_sha)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM snapshots WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ProjectCatalog for SqliteStore {
    async fn find_repository(&self, repository_id: &str) -> Result<Option<Repository>> {
        let row = sqlx::query(
            "SELECT id, owner, name, user_id, description, language FROM repositories WHERE id = ?",
        )
        .bind(repository_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Repository {
            id: row.get("id"),
            owner: row.get("owner"),
            name: row.get("name"),
            user_id: row.get("user_id"),
            description: row.get("description"),
            language: row.get("language"),
        }))
    }

    async fn latest_summary(&self, repository_id: &str) -> Result<Option<ProjectSummary>> {
        let row = sqlx::query(
            r#"
            SELECT id, repository_id, summary FROM project_summaries
            WHERE repository_id = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(repository_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| ProjectSummary {
            id: row.get("id"),
            repository_id: row.get("repository_id"),
            summary: row.get("summary"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("test.sqlite")).await.unwrap();
        migrate::apply(&pool).await.unwrap();
        (tmp, SqliteStore::new(pool))
    }

    fn snapshot(id: &str, repo: &str, sha: &str, score: u8) -> Snapshot {
        Snapshot {
            id: id.to_string(),
            repository_id: repo.to_string(),
            analysis_id: "analysis-1".to_string(),
            user_id: "user-1".to_string(),
            file_path: "src/lib.rs".to_string(),
            start_line: 3,
            end_line: 20,
            function_name: Some("run".to_string()),
            language: "rust".to_string(),
            line_count: 18,
            selection_score: score,
            selection_reason: "neat".to_string(),
            image_url: format!("file:///tmp/{}.png", id),
            image_size_bytes: 2048,
            image_width: 1200,
            image_height: 630,
            theme: "dracula".to_string(),
            show_line_numbers: true,
            font_size: 14,
            is_stale: false,
            last_commit_sha: sha.to_string(),
            created_at: DateTime::from_timestamp_millis(1_700_000_000_123).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip_and_ordering() {
        let (_tmp, store) = setup().await;
        store.insert(&snapshot("a", "r1", "abc", 40)).await.unwrap();
        store.insert(&snapshot("b", "r1", "abc", 90)).await.unwrap();

        let loaded = store.get("a").await.unwrap().unwrap();
        assert_eq!(loaded, snapshot("a", "r1", "abc", 40));

        let fresh = store.find_fresh("r1", "user-1").await.unwrap();
        let ids: Vec<&str> = fresh.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert!(store.find_fresh("r1", "someone-else").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_stale_filters() {
        let (_tmp, store) = setup().await;
        store.insert(&snapshot("old", "r1", "abc", 50)).await.unwrap();
        store.insert(&snapshot("cur", "r1", "def", 50)).await.unwrap();
        store.insert(&snapshot("other", "r2", "abc", 50)).await.unwrap();

        assert_eq!(store.mark_stale("r1", "def").await.unwrap(), 1);
        assert_eq!(store.mark_stale("r1", "def").await.unwrap(), 0);

        assert!(store.get("old").await.unwrap().unwrap().is_stale);
        assert!(!store.get("cur").await.unwrap().unwrap().is_stale);
        assert!(!store.get("other").await.unwrap().unwrap().is_stale);
    }

    #[tokio::test]
    async fn test_catalog_latest_summary() {
        let (_tmp, store) = setup().await;
        let repo = Repository {
            id: "r1".to_string(),
            owner: "octo".to_string(),
            name: "widgets".to_string(),
            user_id: "user-1".to_string(),
            description: None,
            language: Some("rust".to_string()),
        };
        store.upsert_repository(&repo).await.unwrap();
        assert!(store.latest_summary("r1").await.unwrap().is_none());

        store.add_summary("r1", "first").await.unwrap();
        let second = store.add_summary("r1", "second").await.unwrap();

        let latest = store.latest_summary("r1").await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);
        assert_eq!(latest.summary, "second");

        let found = store.find_repository("r1").await.unwrap().unwrap();
        assert_eq!(found.full_name(), "octo/widgets");
        assert!(store.find_repository("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let (_tmp, store) = setup().await;
        store.insert(&snapshot("a", "r1", "abc", 40)).await.unwrap();
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert!(store.get("a").await.unwrap().is_none());
    }
}
