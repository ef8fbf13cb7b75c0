//! Snapshot pipeline orchestrator.
//!
//! One call to [`SnapshotPipeline::generate_snapshots`] walks a fixed
//! sequence of stages:
//!
//! ```text
//! LoadContext → CheckCachedSnapshots ─┬─ ReturnCached
//!                                     └─ FetchRepoData → IdentifyCandidates
//!     → FetchCode → CheckSelectionCache ─┬─ UseCached ──────┐
//!                                        └─ ScoreCandidates ┴→ RankAndTruncate → RenderEach
//! ```
//!
//! Precondition failures (missing repository, foreign owner, no project
//! summary, no commits, too few fetchable files) abort the run before any
//! snapshot is written. Everything after that point degrades per item:
//! AI failures fall back to heuristic scores, and render, upload or
//! persist failures skip the affected snippet only.

use std::sync::Arc;
use std::time::Duration;

use chrono::{SubsecRound, Utc};
use uuid::Uuid;

use crate::cache::{get_json, selection_key, set_json, CacheStore};
use crate::config::{Config, PipelineConfig, RendererConfig, RetryConfig};
use crate::error::{Result, SnapshotError, SourceError};
use crate::fetch::{ensure_minimum_fetched, fetch_candidates, FetchLimits, FetchRequest};
use crate::identify::{detect_primary_language, extract_lines, refine_excerpt, CandidateIdentifier};
use crate::models::{
    Candidate, GenerateOptions, RenderOptions, Repository, RepositoryContext, ScoredSnippet,
    Snapshot,
};
use crate::render::image_dimensions;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::scoring::{ScoreOutcome, SnippetScorer};
use crate::store::SnapshotStore;
use crate::traits::{AiScorer, ObjectStorage, ProjectCatalog, Renderer, RepositorySource, UploadTarget};

/// External collaborators wired into a [`SnapshotPipeline`].
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn ProjectCatalog>,
    pub source: Arc<dyn RepositorySource>,
    pub scorer: Arc<dyn AiScorer>,
    pub cache: Arc<dyn CacheStore>,
    pub store: Arc<dyn SnapshotStore>,
    pub renderer: Arc<dyn Renderer>,
    pub storage: Arc<dyn ObjectStorage>,
}

pub struct SnapshotPipeline {
    deps: Collaborators,
    pipeline: PipelineConfig,
    retry: RetryConfig,
    renderer: RendererConfig,
    identifier: CandidateIdentifier,
}

/// Per-run values shared by every rendered snippet.
struct RenderRun<'a> {
    repository: &'a Repository,
    user_id: &'a str,
    analysis_id: &'a str,
    head_sha: &'a str,
    options: RenderOptions,
}

impl SnapshotPipeline {
    pub fn new(config: &Config, deps: Collaborators) -> anyhow::Result<Self> {
        Ok(Self {
            identifier: CandidateIdentifier::new(&config.pipeline)?,
            deps,
            pipeline: config.pipeline.clone(),
            retry: config.retry.clone(),
            renderer: config.renderer.clone(),
        })
    }

    /// Produce (or return existing) snapshots for a repository owned by `user_id`.
    ///
    /// # Errors
    ///
    /// - [`SnapshotError::NotFound`]: unknown repository, no project summary,
    ///   or the repository host does not know the repository
    /// - [`SnapshotError::Unauthorized`]: `user_id` does not own the repository,
    ///   or the host rejected `access_token`
    /// - [`SnapshotError::InsufficientData`]: no commits, or fewer than
    ///   `min_successful_fetches` files could be fetched
    /// - [`SnapshotError::UpstreamUnavailable`]: commit history or tree
    ///   could not be read after retries
    ///
    /// An empty `Ok` is a valid outcome: every file was boilerplate, or
    /// every render failed.
    pub async fn generate_snapshots(
        &self,
        repository_id: &str,
        user_id: &str,
        access_token: &str,
        options: &GenerateOptions,
    ) -> Result<Vec<Snapshot>> {
        let repository = self.load_repository(repository_id, user_id).await?;

        if !options.force_regenerate {
            let existing = self.deps.store.find_fresh(repository_id, user_id).await?;
            if !existing.is_empty() {
                tracing::info!(
                    repository_id,
                    count = existing.len(),
                    "returning existing fresh snapshots"
                );
                return Ok(existing);
            }
        }

        let summary = self
            .deps
            .catalog
            .latest_summary(repository_id)
            .await?
            .ok_or_else(|| {
                SnapshotError::NotFound(format!(
                    "no project analysis exists for {}",
                    repository.full_name()
                ))
            })?;

        let fetch_policy = RetryPolicy::fetch(&self.retry);
        let owner = repository.owner.as_str();
        let name = repository.name.as_str();

        let commits = retry_with_backoff(&fetch_policy, SourceError::is_retryable, |_| {
            self.deps.source.fetch_commit_history(
                access_token,
                owner,
                name,
                self.pipeline.commit_history_limit,
            )
        })
        .await?;
        let head_sha = match commits.first() {
            Some(head) => head.sha.clone(),
            None => {
                return Err(SnapshotError::InsufficientData(format!(
                    "{} has no commits",
                    repository.full_name()
                )))
            }
        };

        let tree = retry_with_backoff(&fetch_policy, SourceError::is_retryable, |_| {
            self.deps
                .source
                .fetch_file_tree(access_token, owner, name, self.pipeline.tree_depth)
        })
        .await?;

        let candidates = self.identifier.identify(&tree, &commits, &summary.summary);
        if candidates.is_empty() {
            tracing::info!(repository_id, tree_entries = tree.len(), "no candidates after filtering");
            return Ok(Vec::new());
        }

        let context = RepositoryContext {
            name: repository.full_name(),
            description: repository.description.clone(),
            primary_language: repository
                .language
                .clone()
                .or_else(|| detect_primary_language(&tree))
                .unwrap_or_else(|| "unknown".to_string()),
            recent_commits: commits.iter().map(|c| c.message.clone()).collect(),
            file_tree: tree,
            summary: summary.summary.clone(),
        };

        let request = FetchRequest {
            token: access_token,
            owner,
            repo: name,
            git_ref: &head_sha,
        };
        let limits = FetchLimits {
            max_candidates_to_fetch: self.pipeline.max_candidates_to_fetch,
            max_file_bytes: self.pipeline.max_file_bytes,
        };
        let outcome =
            fetch_candidates(self.deps.source.as_ref(), &request, candidates, &limits, &fetch_policy)
                .await;
        let fetched: Vec<Candidate> =
            ensure_minimum_fetched(outcome, self.pipeline.min_successful_fetches)?
                .into_iter()
                .map(|c| refine_excerpt(c, self.pipeline.max_snippet_lines))
                .collect();

        let mut ranked = self
            .select_snippets(repository_id, &head_sha, &fetched, &context)
            .await;
        ranked.truncate(options.max_snippets.unwrap_or(self.pipeline.max_snippets));

        let previous: Vec<Snapshot> = if options.force_regenerate {
            self.deps
                .store
                .find_by_repository(repository_id)
                .await?
                .into_iter()
                .filter(|s| s.user_id == user_id)
                .collect()
        } else {
            Vec::new()
        };

        let run = RenderRun {
            repository: &repository,
            user_id,
            analysis_id: &summary.id,
            head_sha: &head_sha,
            options: self.render_options(options),
        };
        let mut created = Vec::with_capacity(ranked.len());
        for snippet in &ranked {
            match self.render_snippet(snippet, &run).await {
                Ok(snapshot) => created.push(snapshot),
                Err(e) => tracing::warn!(
                    repository_id,
                    file_path = %snippet.candidate.file_path,
                    error = %e,
                    "skipping snippet"
                ),
            }
        }

        if !created.is_empty() {
            self.discard(&previous).await;
        }

        tracing::info!(
            repository_id,
            head_sha = %head_sha,
            selected = ranked.len(),
            created = created.len(),
            "snapshot run complete"
        );
        Ok(created)
    }

    /// Fresh snapshots for a repository/user, highest score first.
    pub async fn list_fresh_snapshots(
        &self,
        repository_id: &str,
        user_id: &str,
    ) -> Result<Vec<Snapshot>> {
        Ok(self.deps.store.find_fresh(repository_id, user_id).await?)
    }

    /// Delete one snapshot and its stored image. Only the owner may delete.
    pub async fn delete_snapshot(&self, snapshot_id: &str, user_id: &str) -> Result<()> {
        let snapshot = self
            .deps
            .store
            .get(snapshot_id)
            .await?
            .ok_or_else(|| SnapshotError::NotFound(format!("snapshot {}", snapshot_id)))?;
        if snapshot.user_id != user_id {
            return Err(SnapshotError::Unauthorized(format!(
                "snapshot {} belongs to another user",
                snapshot_id
            )));
        }
        self.deps.store.delete(&snapshot.id).await?;
        if let Err(e) = self.deps.storage.delete(&snapshot.image_url).await {
            tracing::warn!(snapshot_id, error = %e, "image delete failed");
        }
        Ok(())
    }

    async fn load_repository(&self, repository_id: &str, user_id: &str) -> Result<Repository> {
        let repository = self
            .deps
            .catalog
            .find_repository(repository_id)
            .await?
            .ok_or_else(|| SnapshotError::NotFound(format!("repository {}", repository_id)))?;
        if repository.user_id != user_id {
            return Err(SnapshotError::Unauthorized(format!(
                "repository {} belongs to another user",
                repository_id
            )));
        }
        Ok(repository)
    }

    /// Ranked snippets for `(repository_id, head_sha)`, from the selection
    /// cache when present. Only all-AI rankings are cached. Cache failures
    /// only cost a re-score.
    async fn select_snippets(
        &self,
        repository_id: &str,
        head_sha: &str,
        fetched: &[Candidate],
        context: &RepositoryContext,
    ) -> Vec<ScoredSnippet> {
        let cache = self.deps.cache.as_ref();
        let key = selection_key(repository_id, head_sha);

        match get_json::<Vec<ScoredSnippet>>(cache, &key).await {
            Ok(Some(cached)) => {
                tracing::debug!(repository_id, head_sha, "selection cache hit");
                return cached;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(repository_id, error = %e, "selection cache read failed"),
        }

        let scorer = SnippetScorer::new(
            self.deps.scorer.as_ref(),
            cache,
            RetryPolicy::scoring(&self.retry),
        );
        let outcomes = scorer
            .score_candidates(fetched, context, self.pipeline.parallel_batch_size)
            .await;
        let any_heuristic = outcomes.iter().any(ScoreOutcome::is_heuristic);
        let mut ranked: Vec<ScoredSnippet> = outcomes
            .into_iter()
            .map(ScoreOutcome::into_snippet)
            .collect();
        // stable: ties keep candidate order
        ranked.sort_by(|a, b| b.score().cmp(&a.score()));

        // a fallback ranking must not outlive the outage that caused it
        if any_heuristic {
            tracing::debug!(repository_id, head_sha, "heuristic scores present, selection not cached");
            return ranked;
        }
        let ttl = Duration::from_secs(self.pipeline.selection_cache_ttl_secs);
        if let Err(e) = set_json(cache, &key, &ranked, Some(ttl)).await {
            tracing::warn!(repository_id, error = %e, "selection cache write failed");
        }
        ranked
    }

    fn render_options(&self, options: &GenerateOptions) -> RenderOptions {
        RenderOptions {
            theme: options
                .theme
                .clone()
                .unwrap_or_else(|| self.renderer.theme.clone()),
            show_line_numbers: options
                .show_line_numbers
                .unwrap_or(self.renderer.show_line_numbers),
            font_size: options.font_size.unwrap_or(self.renderer.font_size),
        }
    }

    async fn render_snippet(&self, snippet: &ScoredSnippet, run: &RenderRun<'_>) -> Result<Snapshot> {
        let candidate = &snippet.candidate;
        let failure = |stage: &str, detail: String| {
            SnapshotError::RenderOrStorageFailure(format!(
                "{} {}: {}",
                stage, candidate.file_path, detail
            ))
        };

        let code = candidate
            .content
            .as_deref()
            .map(|content| extract_lines(content, candidate.start_line, candidate.end_line))
            .unwrap_or_default();
        if code.trim().is_empty() {
            return Err(failure("extract", "empty line range".to_string()));
        }

        let image = self
            .deps
            .renderer
            .render(&code, &candidate.language, &candidate.file_path, &run.options)
            .await
            .map_err(|e| failure("render", format!("{:#}", e)))?;

        let target = UploadTarget {
            user_id: run.user_id.to_string(),
            repository_id: run.repository.id.clone(),
        };
        let image_url = self
            .deps
            .storage
            .upload(&image, &target)
            .await
            .map_err(|e| failure("upload", format!("{:#}", e)))?;

        let (image_width, image_height) = image_dimensions(&image)
            .unwrap_or((self.renderer.default_width, self.renderer.default_height));

        let snapshot = Snapshot {
            id: Uuid::new_v4().to_string(),
            repository_id: run.repository.id.clone(),
            analysis_id: run.analysis_id.to_string(),
            user_id: run.user_id.to_string(),
            file_path: candidate.file_path.clone(),
            start_line: candidate.start_line,
            end_line: candidate.end_line,
            function_name: candidate.function_name.clone(),
            language: candidate.language.clone(),
            line_count: candidate.line_count,
            selection_score: snippet.score(),
            selection_reason: snippet.analysis.reason.clone(),
            image_url,
            image_size_bytes: image.len() as u64,
            image_width,
            image_height,
            theme: run.options.theme.clone(),
            show_line_numbers: run.options.show_line_numbers,
            font_size: run.options.font_size,
            is_stale: false,
            last_commit_sha: run.head_sha.to_string(),
            // stored as epoch millis
            created_at: Utc::now().trunc_subsecs(3),
        };

        if let Err(e) = self.deps.store.insert(&snapshot).await {
            if let Err(cleanup) = self.deps.storage.delete(&snapshot.image_url).await {
                tracing::warn!(image_url = %snapshot.image_url, error = %cleanup, "orphaned image");
            }
            return Err(failure("persist", format!("{:#}", e)));
        }

        tracing::debug!(
            snapshot_id = %snapshot.id,
            file_path = %snapshot.file_path,
            score = snapshot.selection_score,
            "snapshot persisted"
        );
        Ok(snapshot)
    }

    /// Remove snapshot rows and their images. Failures are logged.
    async fn discard(&self, snapshots: &[Snapshot]) {
        for snapshot in snapshots {
            match self.deps.store.delete(&snapshot.id).await {
                Ok(_) => {
                    if let Err(e) = self.deps.storage.delete(&snapshot.image_url).await {
                        tracing::warn!(snapshot_id = %snapshot.id, error = %e, "image delete failed");
                    }
                }
                Err(e) => {
                    tracing::warn!(snapshot_id = %snapshot.id, error = %e, "snapshot delete failed")
                }
            }
        }
    }
}
