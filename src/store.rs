//! Snapshot storage abstraction.
//!
//! The [`SnapshotStore`] trait covers every persistence operation the
//! pipeline and invalidator need. [`crate::sqlite_store`] backs it with
//! SQLite; [`InMemorySnapshotStore`] and [`InMemoryCatalog`] keep state in
//! `RwLock`-guarded collections for tests and embedding.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ProjectSummary, Repository, Snapshot};
use crate::traits::ProjectCatalog;

/// Persistent snapshot records.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert`](SnapshotStore::insert) | Persist a newly rendered snapshot |
/// | [`get`](SnapshotStore::get) | Fetch one snapshot by id |
/// | [`find_fresh`](SnapshotStore::find_fresh) | Non-stale snapshots for a repository/user, best first |
/// | [`find_by_repository`](SnapshotStore::find_by_repository) | Every snapshot of a repository |
/// | [`mark_stale`](SnapshotStore::mark_stale) | Filtered update-many flipping `is_stale` |
/// | [`delete`](SnapshotStore::delete) | Remove one snapshot |
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn insert(&self, snapshot: &Snapshot) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Snapshot>>;

    /// Non-stale snapshots, highest score first; ties keep creation order.
    async fn find_fresh(&self, repository_id: &str, user_id: &str) -> Result<Vec<Snapshot>>;

    async fn find_by_repository(&self, repository_id: &str) -> Result<Vec<Snapshot>>;

    /// Set `is_stale` on every fresh snapshot of the repository whose
    /// `last_commit_sha` differs from `current_sha`. No other field changes.
    /// Returns the number of snapshots marked.
    async fn mark_stale(&self, repository_id: &str, current_sha: &str) -> Result<u64>;

    /// Returns whether a snapshot was removed.
    async fn delete(&self, id: &str) -> Result<bool>;
}

/// In-memory snapshot store.
pub struct InMemorySnapshotStore {
    snapshots: RwLock<Vec<Snapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self {
            snapshots: RwLock::new(Vec::new()),
        }
    }

    /// Every stored snapshot in insertion order.
    pub fn all(&self) -> Vec<Snapshot> {
        self.snapshots.read().unwrap().clone()
    }
}

impl Default for InMemorySnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn insert(&self, snapshot: &Snapshot) -> Result<()> {
        let mut snapshots = self.snapshots.write().unwrap();
        if snapshots.iter().any(|s| s.id == snapshot.id) {
            anyhow::bail!("snapshot {} already exists", snapshot.id);
        }
        snapshots.push(snapshot.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Snapshot>> {
        let snapshots = self.snapshots.read().unwrap();
        Ok(snapshots.iter().find(|s| s.id == id).cloned())
    }

    async fn find_fresh(&self, repository_id: &str, user_id: &str) -> Result<Vec<Snapshot>> {
        let snapshots = self.snapshots.read().unwrap();
        let mut fresh: Vec<Snapshot> = snapshots
            .iter()
            .filter(|s| s.repository_id == repository_id && s.user_id == user_id && !s.is_stale)
            .cloned()
            .collect();
        fresh.sort_by(|a, b| b.selection_score.cmp(&a.selection_score));
        Ok(fresh)
    }

    async fn find_by_repository(&self, repository_id: &str) -> Result<Vec<Snapshot>> {
        let snapshots = self.snapshots.read().unwrap();
        Ok(snapshots
            .iter()
            .filter(|s| s.repository_id == repository_id)
            .cloned()
            .collect())
    }

    async fn mark_stale(&self, repository_id: &str, current_sha: &str) -> Result<u64> {
        let mut snapshots = self.snapshots.write().unwrap();
        let mut marked = 0;
        for snapshot in snapshots.iter_mut().filter(|s| {
            s.repository_id == repository_id && !s.is_stale && s.last_commit_sha != current_sha
        }) {
            snapshot.is_stale = true;
            marked += 1;
        }
        Ok(marked)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut snapshots = self.snapshots.write().unwrap();
        let before = snapshots.len();
        snapshots.retain(|s| s.id != id);
        Ok(snapshots.len() != before)
    }
}

/// In-memory repository and summary catalog.
pub struct InMemoryCatalog {
    repositories: RwLock<HashMap<String, Repository>>,
    summaries: RwLock<HashMap<String, ProjectSummary>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            repositories: RwLock::new(HashMap::new()),
            summaries: RwLock::new(HashMap::new()),
        }
    }

    pub fn add_repository(&self, repository: Repository) {
        self.repositories
            .write()
            .unwrap()
            .insert(repository.id.clone(), repository);
    }

    /// Record a summary; it replaces any earlier one for the repository.
    pub fn add_summary(&self, summary: ProjectSummary) {
        self.summaries
            .write()
            .unwrap()
            .insert(summary.repository_id.clone(), summary);
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProjectCatalog for InMemoryCatalog {
    async fn find_repository(&self, repository_id: &str) -> Result<Option<Repository>> {
        Ok(self.repositories.read().unwrap().get(repository_id).cloned())
    }

    async fn latest_summary(&self, repository_id: &str) -> Result<Option<ProjectSummary>> {
        Ok(self.summaries.read().unwrap().get(repository_id).cloned())
    }
}
