//! Error kinds surfaced by the snapshot pipeline and its collaborators.
//!
//! Plumbing (config, database, HTTP clients) reports `anyhow::Error`.
//! The pipeline classifies everything a caller needs to act on into
//! [`SnapshotError`], and collaborators report their own narrow kinds
//! ([`SourceError`], [`ScorerError`]) so retry layers can tell transient
//! failures from permanent ones.

use thiserror::Error;

/// Result alias for pipeline-level operations.
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Domain errors returned by [`crate::pipeline`] and [`crate::invalidate`].
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// Repository, project analysis, or snapshot does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller does not own the repository or snapshot.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Not enough repository data to produce snapshots.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// The repository host or AI backend is down and no fallback applies.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Rendering, uploading, or persisting a single snapshot failed.
    #[error("render or storage failure: {0}")]
    RenderOrStorageFailure(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Failure kinds reported by a [`crate::traits::RepositorySource`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("transient failure: {0}")]
    Transient(String),

    /// Credentials rejected or request refused (401/403 without rate limiting).
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl SourceError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::RateLimited(_) | SourceError::Transient(_))
    }
}

impl From<SourceError> for SnapshotError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::NotFound(msg) => SnapshotError::NotFound(msg),
            SourceError::Rejected(msg) => SnapshotError::Unauthorized(msg),
            SourceError::RateLimited(msg) | SourceError::Transient(msg) => {
                SnapshotError::UpstreamUnavailable(msg)
            }
        }
    }
}

/// Failure kinds reported by a [`crate::traits::AiScorer`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScorerError {
    #[error("scorer rate limited: {0}")]
    RateLimited(String),

    #[error("scorer timed out")]
    Timeout,

    #[error("scorer transient failure: {0}")]
    Transient(String),

    #[error("scorer rejected request: {0}")]
    Rejected(String),

    #[error("malformed scorer output: {0}")]
    Malformed(String),
}

impl ScorerError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScorerError::RateLimited(_) | ScorerError::Timeout | ScorerError::Transient(_)
        )
    }
}
