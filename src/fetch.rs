//! Retrying content fetcher.
//!
//! Populates `Candidate::content` for a capped list of candidates. All
//! fetches are issued concurrently on the calling task and recombined in
//! the original candidate order. Each fetch is isolated: one candidate
//! exhausting its retries only drops that candidate.
//!
//! Skip rules:
//! - file larger than `max_file_bytes` → skipped before any request
//! - `NotFound` → dropped, not retried
//! - empty or whitespace-only content → dropped

use futures::future::join_all;

use crate::error::{SnapshotError, SourceError};
use crate::models::Candidate;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::traits::RepositorySource;

/// Repository coordinates for content fetches.
#[derive(Debug, Clone)]
pub struct FetchRequest<'a> {
    pub token: &'a str,
    pub owner: &'a str,
    pub repo: &'a str,
    pub git_ref: &'a str,
}

/// Per-run fetch limits.
#[derive(Debug, Clone)]
pub struct FetchLimits {
    pub max_candidates_to_fetch: usize,
    pub max_file_bytes: u64,
}

/// What happened to each candidate handed to the fetcher.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Candidates with content, in original order.
    pub fetched: Vec<Candidate>,
    pub skipped_oversize: usize,
    pub empty: usize,
    pub failed: usize,
}

enum Fetched {
    Ok(Candidate),
    Oversize,
    Empty,
    Failed,
}

/// Fetch content for up to `limits.max_candidates_to_fetch` candidates.
pub async fn fetch_candidates(
    source: &dyn RepositorySource,
    request: &FetchRequest<'_>,
    candidates: Vec<Candidate>,
    limits: &FetchLimits,
    policy: &RetryPolicy,
) -> FetchOutcome {
    let capped: Vec<Candidate> = candidates
        .into_iter()
        .take(limits.max_candidates_to_fetch)
        .collect();

    let results = join_all(
        capped
            .into_iter()
            .map(|candidate| fetch_one(source, request, candidate, limits, policy)),
    )
    .await;

    let mut outcome = FetchOutcome::default();
    for result in results {
        match result {
            Fetched::Ok(candidate) => outcome.fetched.push(candidate),
            Fetched::Oversize => outcome.skipped_oversize += 1,
            Fetched::Empty => outcome.empty += 1,
            Fetched::Failed => outcome.failed += 1,
        }
    }

    tracing::info!(
        owner = request.owner,
        repo = request.repo,
        fetched = outcome.fetched.len(),
        skipped_oversize = outcome.skipped_oversize,
        empty = outcome.empty,
        failed = outcome.failed,
        "fetched candidate content"
    );
    outcome
}

async fn fetch_one(
    source: &dyn RepositorySource,
    request: &FetchRequest<'_>,
    candidate: Candidate,
    limits: &FetchLimits,
    policy: &RetryPolicy,
) -> Fetched {
    if candidate.file_size > limits.max_file_bytes {
        tracing::info!(
            file_path = %candidate.file_path,
            size = candidate.file_size,
            limit = limits.max_file_bytes,
            "skipping oversize file"
        );
        return Fetched::Oversize;
    }

    let result = retry_with_backoff(policy, SourceError::is_retryable, |_| {
        source.fetch_file_content(
            request.token,
            request.owner,
            request.repo,
            &candidate.file_path,
            request.git_ref,
        )
    })
    .await;

    match result {
        Ok(content) if content.trim().is_empty() => {
            tracing::debug!(file_path = %candidate.file_path, "discarding empty file");
            Fetched::Empty
        }
        Ok(content) => Fetched::Ok(Candidate {
            content: Some(content),
            ..candidate
        }),
        Err(e) => {
            tracing::warn!(file_path = %candidate.file_path, error = %e, "fetch failed");
            Fetched::Failed
        }
    }
}

/// Fail the run when fewer than `minimum` candidates were fetched.
pub fn ensure_minimum_fetched(
    outcome: FetchOutcome,
    minimum: usize,
) -> Result<Vec<Candidate>, SnapshotError> {
    if outcome.fetched.len() < minimum {
        return Err(SnapshotError::InsufficientData(format!(
            "only {} of the selected files could be fetched (need at least {}; {} failed, {} empty, {} too large)",
            outcome.fetched.len(),
            minimum,
            outcome.failed,
            outcome.empty,
            outcome.skipped_oversize
        )));
    }
    Ok(outcome.fetched)
}
