//! Contracts for the external collaborators the pipeline drives.
//!
//! The snapshot pipeline never talks to a network service directly. Each
//! collaborator sits behind one of these traits so the binary can wire in
//! real clients ([`crate::github`], [`crate::openai`], [`crate::render`])
//! while tests plug in in-memory fakes.
//!
//! ```text
//! ┌──────────────────┐  ┌───────────┐  ┌──────────┐  ┌───────────────┐
//! │ RepositorySource │  │ AiScorer  │  │ Renderer │  │ ObjectStorage │
//! └────────┬─────────┘  └─────┬─────┘  └────┬─────┘  └───────┬───────┘
//!          └──────────────────┴──────┬──────┴────────────────┘
//!                                    ▼
//!                            SnapshotPipeline
//! ```
//!
//! The cache and snapshot store contracts live next to their
//! implementations in [`crate::cache`] and [`crate::store`].

use anyhow::Result;
use async_trait::async_trait;

use crate::error::{ScorerError, SourceError};
use crate::models::{CommitInfo, ProjectSummary, RenderOptions, Repository, TreeEntry};

/// Read access to a hosted repository (commits, tree, file content).
///
/// Every call carries the caller's access token. Implementations must map
/// failures onto [`SourceError`] so the fetcher can retry transient ones
/// and the pipeline can classify the rest.
#[async_trait]
pub trait RepositorySource: Send + Sync {
    /// Most recent commits first, at most `limit`.
    async fn fetch_commit_history(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        limit: usize,
    ) -> std::result::Result<Vec<CommitInfo>, SourceError>;

    /// File tree of the default branch, entries no deeper than `depth`.
    async fn fetch_file_tree(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        depth: usize,
    ) -> std::result::Result<Vec<TreeEntry>, SourceError>;

    /// Raw text of `path` at `git_ref`.
    async fn fetch_file_content(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> std::result::Result<String, SourceError>;
}

/// Lookup of registered repositories and their latest project analysis.
#[async_trait]
pub trait ProjectCatalog: Send + Sync {
    async fn find_repository(&self, repository_id: &str) -> Result<Option<Repository>>;

    async fn latest_summary(&self, repository_id: &str) -> Result<Option<ProjectSummary>>;
}

/// A language model that answers a scoring prompt with free text.
#[async_trait]
pub trait AiScorer: Send + Sync {
    /// Short identifier for logs (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    async fn score(&self, prompt: &str) -> std::result::Result<String, ScorerError>;
}

/// Turns a code excerpt into image bytes.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(
        &self,
        code: &str,
        language: &str,
        file_path: &str,
        options: &RenderOptions,
    ) -> Result<Vec<u8>>;
}

/// Where a rendered image is uploaded on behalf of a user.
#[derive(Debug, Clone)]
pub struct UploadTarget {
    pub user_id: String,
    pub repository_id: String,
}

/// Durable storage for rendered images.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `bytes` and return a durable URL.
    async fn upload(&self, bytes: &[u8], target: &UploadTarget) -> Result<String>;

    async fn delete(&self, url: &str) -> Result<()>;
}

/// Scorer used when no AI provider is configured; every call fails so the
/// pipeline falls back to heuristic scoring.
pub struct DisabledScorer;

#[async_trait]
impl AiScorer for DisabledScorer {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn score(&self, _prompt: &str) -> std::result::Result<String, ScorerError> {
        Err(ScorerError::Rejected("AI scorer is disabled".to_string()))
    }
}
