//! Key-value cache shared by the selection and per-candidate analysis caches.
//!
//! Both caches live in one [`CacheStore`] under distinct key namespaces so
//! eviction is a uniform prefix delete:
//!
//! | Namespace | Key | Value | TTL |
//! |-----------|-----|-------|-----|
//! | selection | `selection:{repository_id}:{head_sha}` | ranked `Vec<ScoredSnippet>` | configurable |
//! | analysis | `analysis:{owner/name}:{content_hash}` | `AnalysisFields` | none |
//!
//! Analysis entries are content-addressed: the same excerpt reuses its
//! judgment regardless of which commit or run produced it.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

/// Generic string cache with optional per-entry TTL.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Remove every entry whose key starts with `prefix`.
    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64>;
}

pub fn selection_key(repository_id: &str, head_sha: &str) -> String {
    format!("{}{}", selection_prefix(repository_id), head_sha)
}

pub fn selection_prefix(repository_id: &str) -> String {
    format!("selection:{}:", repository_id)
}

pub fn analysis_key(repository_name: &str, content_hash: &str) -> String {
    format!("{}{}", analysis_prefix(repository_name), content_hash)
}

pub fn analysis_prefix(repository_name: &str) -> String {
    format!("analysis:{}:", repository_name)
}

/// SHA-256 over a candidate's cache identity.
///
/// Fields are length-prefixed so no two distinct tuples share an encoding.
pub fn content_hash(file_path: &str, start_line: u32, end_line: u32, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update((file_path.len() as u64).to_le_bytes());
    hasher.update(file_path.as_bytes());
    hasher.update(start_line.to_le_bytes());
    hasher.update(end_line.to_le_bytes());
    hasher.update((content.len() as u64).to_le_bytes());
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub async fn get_json<T: DeserializeOwned>(cache: &dyn CacheStore, key: &str) -> Result<Option<T>> {
    match cache.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize + ?Sized>(
    cache: &dyn CacheStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    cache.set(key, &raw, ttl).await
}

// ============ In-memory cache ============

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

/// Process-local cache for tests and single-run CLI use.
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().unwrap();
        Ok(entries.get(key).and_then(|e| match e.expires_at {
            Some(at) if at <= Instant::now() => None,
            _ => Some(e.value.clone()),
        }))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64> {
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }
}

// ============ SQLite cache ============

/// Cache backed by the `cache_entries` table.
pub struct SqliteCache {
    pool: SqlitePool,
}

impl SqliteCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CacheStore for SqliteCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = chrono::Utc::now().timestamp();
        let value: Option<String> = sqlx::query_scalar(
            "SELECT value FROM cache_entries WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let expires_at = ttl.map(|d| now + d.as_secs() as i64);

        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, value, expires_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE substr(key, 1, length(?)) = ?")
            .bind(prefix)
            .bind(prefix)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
