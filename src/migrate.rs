use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Repositories registered by their owners
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repositories (
            id TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            name TEXT NOT NULL,
            user_id TEXT NOT NULL,
            description TEXT,
            language TEXT,
            created_at INTEGER NOT NULL,
            UNIQUE(owner, name, user_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Project analyses; the newest row per repository is the current one
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS project_summaries (
            id TEXT PRIMARY KEY,
            repository_id TEXT NOT NULL,
            summary TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (repository_id) REFERENCES repositories(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS snapshots (
            id TEXT PRIMARY KEY,
            repository_id TEXT NOT NULL,
            analysis_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            file_path TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            function_name TEXT,
            language TEXT NOT NULL,
            line_count INTEGER NOT NULL,
            selection_score INTEGER NOT NULL,
            selection_reason TEXT NOT NULL,
            image_url TEXT NOT NULL,
            image_size_bytes INTEGER NOT NULL,
            image_width INTEGER NOT NULL,
            image_height INTEGER NOT NULL,
            theme TEXT NOT NULL,
            show_line_numbers INTEGER NOT NULL,
            font_size INTEGER NOT NULL,
            is_stale INTEGER NOT NULL DEFAULT 0,
            last_commit_sha TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cache_entries (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            expires_at INTEGER,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_summaries_repository ON project_summaries(repository_id, created_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_snapshots_repository ON snapshots(repository_id, user_id, is_stale)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_snapshots_score ON snapshots(selection_score DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
