//! Staleness invalidation on a new head commit.
//!
//! Snapshots are never rewritten in place. When a repository moves to a new
//! head, every fresh snapshot recorded against a different commit is marked
//! stale, and both cache namespaces for the repository are evicted. Eviction
//! is best effort: readers always re-check `is_stale`, so a cache that
//! outlives its commit only costs a re-score.

use crate::cache::{analysis_prefix, selection_prefix, CacheStore};
use crate::error::Result;
use crate::store::SnapshotStore;
use crate::traits::ProjectCatalog;

/// Mark snapshots of `repository_id` stale unless they were taken at
/// `new_head_sha`, then evict cached selections and analyses.
///
/// Returns the number of snapshots newly marked stale. Calling this twice
/// with the same SHA marks nothing the second time.
pub async fn invalidate_on_new_commit(
    store: &dyn SnapshotStore,
    cache: &dyn CacheStore,
    catalog: &dyn ProjectCatalog,
    repository_id: &str,
    new_head_sha: &str,
) -> Result<u64> {
    let marked = store.mark_stale(repository_id, new_head_sha).await?;
    tracing::info!(repository_id, new_head_sha, marked, "invalidated snapshots");

    evict(cache, &selection_prefix(repository_id)).await;

    match catalog.find_repository(repository_id).await {
        Ok(Some(repository)) => evict(cache, &analysis_prefix(&repository.full_name())).await,
        Ok(None) => tracing::debug!(repository_id, "repository unknown, analysis cache left as is"),
        Err(e) => tracing::warn!(repository_id, error = %e, "repository lookup failed during eviction"),
    }

    Ok(marked)
}

async fn evict(cache: &dyn CacheStore, prefix: &str) {
    match cache.delete_by_prefix(prefix).await {
        Ok(removed) => tracing::debug!(prefix, removed, "evicted cache entries"),
        Err(e) => tracing::warn!(prefix, error = %e, "cache eviction failed"),
    }
}
