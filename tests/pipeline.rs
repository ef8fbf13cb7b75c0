//! End-to-end tests for the snapshot pipeline and invalidator.
//!
//! Every external collaborator (repository host, AI scorer, renderer,
//! object storage) is an in-memory fake, so these tests exercise the real
//! orchestration, caching, and staleness logic without a network.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use codeshot::cache::{selection_prefix, CacheStore, InMemoryCache, SqliteCache};
use codeshot::config::Config;
use codeshot::error::{ScorerError, SnapshotError, SourceError};
use codeshot::invalidate::invalidate_on_new_commit;
use codeshot::models::{
    CommitInfo, GenerateOptions, ProjectSummary, RenderOptions, Repository, Snapshot, TreeEntry,
    TreeEntryKind,
};
use codeshot::pipeline::{Collaborators, SnapshotPipeline};
use codeshot::scoring::HEURISTIC_REASON;
use codeshot::sqlite_store::SqliteStore;
use codeshot::store::{InMemoryCatalog, InMemorySnapshotStore, SnapshotStore};
use codeshot::traits::{
    AiScorer, DisabledScorer, ObjectStorage, Renderer, RepositorySource, UploadTarget,
};
use codeshot::{db, migrate};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const FILES: &[&str] = &[
    "src/engine.rs",
    "src/parser.rs",
    "src/router.rs",
    "src/scheduler.rs",
    "src/planner.rs",
];

// ─── Fakes ──────────────────────────────────────────────────────────

fn source_text(path: &str) -> String {
    let stem = path
        .rsplit('/')
        .next()
        .and_then(|f| f.split('.').next())
        .unwrap_or("item");
    format!(
        "use std::collections::HashMap;\n\
         \n\
         pub fn {stem}_step(input: &str) -> usize {{\n\
         \x20   let mut total = 0;\n\
         \x20   for c in input.chars() {{\n\
         \x20       total += c.len_utf8();\n\
         \x20   }}\n\
         \x20   let extra = input.len();\n\
         \x20   total + extra\n\
         }}\n"
    )
}

/// Repository host serving a fixed tree; paths without content are 404s.
struct FakeSource {
    commits: Mutex<Vec<CommitInfo>>,
    tree: Vec<TreeEntry>,
    files: HashMap<String, String>,
    history_error: Option<SourceError>,
    content_calls: AtomicUsize,
}

impl FakeSource {
    fn new(fetchable: &[&str]) -> Self {
        let mut tree: Vec<TreeEntry> = FILES
            .iter()
            .map(|p| TreeEntry {
                path: p.to_string(),
                kind: TreeEntryKind::File,
                size: 2_000,
            })
            .collect();
        tree.push(TreeEntry {
            path: "src".to_string(),
            kind: TreeEntryKind::Dir,
            size: 0,
        });
        tree.push(TreeEntry {
            path: "Cargo.lock".to_string(),
            kind: TreeEntryKind::File,
            size: 40_000,
        });
        tree.push(TreeEntry {
            path: "node_modules/left-pad/index.js".to_string(),
            kind: TreeEntryKind::File,
            size: 3_000,
        });

        Self {
            commits: Mutex::new(vec![
                CommitInfo {
                    sha: "abc123".to_string(),
                    message: "Tune scheduler fairness".to_string(),
                },
                CommitInfo {
                    sha: "0000aa".to_string(),
                    message: "Initial commit".to_string(),
                },
            ]),
            tree,
            files: fetchable
                .iter()
                .map(|p| (p.to_string(), source_text(p)))
                .collect(),
            history_error: None,
            content_calls: AtomicUsize::new(0),
        }
    }

    fn all_fetchable() -> Self {
        Self::new(FILES)
    }

    fn with_tree(mut self, tree: Vec<TreeEntry>) -> Self {
        self.tree = tree;
        self
    }

    fn with_history_error(mut self, error: SourceError) -> Self {
        self.history_error = Some(error);
        self
    }

    fn without_commits(self) -> Self {
        self.commits.lock().unwrap().clear();
        self
    }

    fn push_commit(&self, sha: &str, message: &str) {
        self.commits.lock().unwrap().insert(
            0,
            CommitInfo {
                sha: sha.to_string(),
                message: message.to_string(),
            },
        );
    }
}

#[async_trait]
impl RepositorySource for FakeSource {
    async fn fetch_commit_history(
        &self,
        _token: &str,
        _owner: &str,
        _repo: &str,
        limit: usize,
    ) -> std::result::Result<Vec<CommitInfo>, SourceError> {
        if let Some(e) = &self.history_error {
            return Err(e.clone());
        }
        Ok(self.commits.lock().unwrap().iter().take(limit).cloned().collect())
    }

    async fn fetch_file_tree(
        &self,
        _token: &str,
        _owner: &str,
        _repo: &str,
        _depth: usize,
    ) -> std::result::Result<Vec<TreeEntry>, SourceError> {
        Ok(self.tree.clone())
    }

    async fn fetch_file_content(
        &self,
        _token: &str,
        _owner: &str,
        _repo: &str,
        path: &str,
        _git_ref: &str,
    ) -> std::result::Result<String, SourceError> {
        self.content_calls.fetch_add(1, Ordering::SeqCst);
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(path.to_string()))
    }
}

/// Scores each file from a fixed table, counting calls.
struct TableScorer {
    scores: Vec<(&'static str, u8)>,
    calls: AtomicUsize,
    down: AtomicBool,
}

impl TableScorer {
    fn new(scores: Vec<(&'static str, u8)>) -> Self {
        Self {
            scores,
            calls: AtomicUsize::new(0),
            down: AtomicBool::new(false),
        }
    }

    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn uniform() -> Self {
        Self::new(FILES.iter().map(|p| (*p, 50)).collect())
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiScorer for TableScorer {
    fn model_name(&self) -> &str {
        "table"
    }

    async fn score(&self, prompt: &str) -> std::result::Result<String, ScorerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(ScorerError::Transient("503 service unavailable".to_string()));
        }
        let score = self
            .scores
            .iter()
            .find(|(path, _)| prompt.contains(&format!("Excerpt: {} ", path)))
            .map(|(_, score)| *score)
            .ok_or_else(|| ScorerError::Rejected("unknown excerpt".to_string()))?;
        Ok(serde_json::json!({
            "score": score,
            "reason": "scored by table",
            "complexity": "medium",
            "significance": "high",
            "isCoreFunctionality": true,
            "isRecentlyChanged": false,
            "technicalInterest": "character accounting",
        })
        .to_string())
    }
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];
    bytes.extend_from_slice(&13u32.to_be_bytes());
    bytes.extend_from_slice(b"IHDR");
    bytes.extend_from_slice(&width.to_be_bytes());
    bytes.extend_from_slice(&height.to_be_bytes());
    bytes.extend_from_slice(&[8, 6, 0, 0, 0]);
    bytes
}

#[derive(Default)]
struct FakeRenderer {
    failing: HashSet<String>,
    calls: AtomicUsize,
}

impl FakeRenderer {
    fn failing_on(path: &str) -> Self {
        Self {
            failing: HashSet::from([path.to_string()]),
            ..Self::default()
        }
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn render(
        &self,
        code: &str,
        _language: &str,
        file_path: &str,
        _options: &RenderOptions,
    ) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(!code.trim().is_empty());
        if self.failing.contains(file_path) {
            bail!("renderer crashed on {}", file_path);
        }
        Ok(png(800, 400))
    }
}

#[derive(Default)]
struct MemoryStorage {
    uploaded: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
}

impl MemoryStorage {
    fn uploaded(&self) -> Vec<String> {
        self.uploaded.lock().unwrap().clone()
    }

    fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn upload(&self, _bytes: &[u8], target: &UploadTarget) -> Result<String> {
        let mut uploaded = self.uploaded.lock().unwrap();
        let url = format!(
            "mem://{}/{}/{}.png",
            target.user_id,
            target.repository_id,
            uploaded.len()
        );
        uploaded.push(url.clone());
        Ok(url)
    }

    async fn delete(&self, url: &str) -> Result<()> {
        self.deleted.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

/// Store whose inserts always fail.
struct ReadOnlyStore(InMemorySnapshotStore);

#[async_trait]
impl SnapshotStore for ReadOnlyStore {
    async fn insert(&self, _snapshot: &Snapshot) -> Result<()> {
        bail!("database is read-only")
    }
    async fn get(&self, id: &str) -> Result<Option<Snapshot>> {
        self.0.get(id).await
    }
    async fn find_fresh(&self, repository_id: &str, user_id: &str) -> Result<Vec<Snapshot>> {
        self.0.find_fresh(repository_id, user_id).await
    }
    async fn find_by_repository(&self, repository_id: &str) -> Result<Vec<Snapshot>> {
        self.0.find_by_repository(repository_id).await
    }
    async fn mark_stale(&self, repository_id: &str, current_sha: &str) -> Result<u64> {
        self.0.mark_stale(repository_id, current_sha).await
    }
    async fn delete(&self, id: &str) -> Result<bool> {
        self.0.delete(id).await
    }
}

// ─── Harness ────────────────────────────────────────────────────────

fn config() -> Config {
    let mut config = Config::minimal();
    config.retry.fetch_base_delay_ms = 0;
    config.retry.scoring_retry_delays_ms = vec![0];
    config
}

fn catalog() -> InMemoryCatalog {
    let catalog = InMemoryCatalog::new();
    catalog.add_repository(Repository {
        id: "repo-1".to_string(),
        owner: "acme".to_string(),
        name: "widget".to_string(),
        user_id: "user-1".to_string(),
        description: Some("Job scheduling engine".to_string()),
        language: None,
    });
    catalog.add_summary(ProjectSummary {
        id: "analysis-1".to_string(),
        repository_id: "repo-1".to_string(),
        summary: "A scheduler with a planner and a router.".to_string(),
    });
    catalog.add_repository(Repository {
        id: "repo-unanalyzed".to_string(),
        owner: "acme".to_string(),
        name: "fresh".to_string(),
        user_id: "user-1".to_string(),
        description: None,
        language: Some("rust".to_string()),
    });
    catalog
}

struct Harness {
    source: Arc<FakeSource>,
    cache: Arc<InMemoryCache>,
    store: Arc<InMemorySnapshotStore>,
    catalog: Arc<InMemoryCatalog>,
    renderer: Arc<FakeRenderer>,
    storage: Arc<MemoryStorage>,
    pipeline: SnapshotPipeline,
}

struct HarnessBuilder {
    source: FakeSource,
    scorer: Arc<dyn AiScorer>,
    renderer: FakeRenderer,
    read_only: bool,
}

impl HarnessBuilder {
    fn new(source: FakeSource) -> Self {
        Self {
            source,
            scorer: Arc::new(DisabledScorer),
            renderer: FakeRenderer::default(),
            read_only: false,
        }
    }

    fn scorer(mut self, scorer: Arc<dyn AiScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    fn renderer(mut self, renderer: FakeRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    fn build(self) -> Harness {
        let source = Arc::new(self.source);
        let cache = Arc::new(InMemoryCache::new());
        let store = Arc::new(InMemorySnapshotStore::new());
        let catalog = Arc::new(catalog());
        let renderer = Arc::new(self.renderer);
        let storage = Arc::new(MemoryStorage::default());

        let snapshot_store: Arc<dyn SnapshotStore> = if self.read_only {
            Arc::new(ReadOnlyStore(InMemorySnapshotStore::new()))
        } else {
            store.clone()
        };

        let pipeline = SnapshotPipeline::new(
            &config(),
            Collaborators {
                catalog: catalog.clone(),
                source: source.clone(),
                scorer: self.scorer,
                cache: cache.clone(),
                store: snapshot_store,
                renderer: renderer.clone(),
                storage: storage.clone(),
            },
        )
        .unwrap();

        Harness {
            source,
            cache,
            store,
            catalog,
            renderer,
            storage,
            pipeline,
        }
    }
}

impl Harness {
    async fn generate(&self, options: &GenerateOptions) -> codeshot::error::Result<Vec<Snapshot>> {
        self.pipeline
            .generate_snapshots("repo-1", "user-1", "token", options)
            .await
    }

    async fn invalidate(&self, sha: &str) -> u64 {
        invalidate_on_new_commit(
            self.store.as_ref(),
            self.cache.as_ref(),
            self.catalog.as_ref(),
            "repo-1",
            sha,
        )
        .await
        .unwrap()
    }
}

fn force() -> GenerateOptions {
    GenerateOptions {
        force_regenerate: true,
        ..GenerateOptions::default()
    }
}

fn stored_snapshot(id: &str, repository_id: &str, sha: &str, stale: bool) -> Snapshot {
    Snapshot {
        id: id.to_string(),
        repository_id: repository_id.to_string(),
        analysis_id: "analysis-1".to_string(),
        user_id: "user-1".to_string(),
        file_path: format!("src/{}.rs", id),
        start_line: 3,
        end_line: 10,
        function_name: Some(format!("{}_step", id)),
        language: "rust".to_string(),
        line_count: 8,
        selection_score: 64,
        selection_reason: "core loop".to_string(),
        image_url: format!("mem://{}.png", id),
        image_size_bytes: 4_096,
        image_width: 1200,
        image_height: 630,
        theme: "dracula".to_string(),
        show_line_numbers: true,
        font_size: 14,
        is_stale: stale,
        last_commit_sha: sha.to_string(),
        created_at: Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(),
    }
}

// ─── Generation ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_two_of_five_fetched_aborts_without_snapshots() {
    let h = HarnessBuilder::new(FakeSource::new(&["src/engine.rs", "src/parser.rs"])).build();

    let err = h.generate(&GenerateOptions::default()).await.unwrap_err();

    assert!(matches!(err, SnapshotError::InsufficientData(_)), "got {:?}", err);
    assert!(h.store.all().is_empty());
    assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 0);
    assert!(h.storage.uploaded().is_empty());
}

#[tokio::test]
async fn test_four_fetched_with_ai_down_uses_heuristics() {
    let h = HarnessBuilder::new(FakeSource::new(&FILES[..4])).build();

    let snapshots = h.generate(&GenerateOptions::default()).await.unwrap();

    assert_eq!(snapshots.len(), 3);
    assert_eq!(h.store.all().len(), 3);
    for s in &snapshots {
        assert_eq!(s.selection_reason, HEURISTIC_REASON);
        assert!(s.selection_score <= 100);
        assert!(!s.is_stale);
        assert_eq!(s.last_commit_sha, "abc123");
        assert_eq!(s.analysis_id, "analysis-1");
        assert_eq!((s.image_width, s.image_height), (800, 400));
        assert_ne!(s.file_path, "src/planner.rs");
    }
    assert!(snapshots
        .windows(2)
        .all(|w| w[0].selection_score >= w[1].selection_score));
}

#[tokio::test]
async fn test_ai_scores_rank_and_truncate() {
    let scorer = Arc::new(TableScorer::new(vec![
        ("src/engine.rs", 70),
        ("src/parser.rs", 60),
        ("src/router.rs", 80),
        ("src/scheduler.rs", 50),
        ("src/planner.rs", 90),
    ]));
    let h = HarnessBuilder::new(FakeSource::all_fetchable())
        .scorer(scorer.clone())
        .build();

    let snapshots = h.generate(&GenerateOptions::default()).await.unwrap();

    let paths: Vec<&str> = snapshots.iter().map(|s| s.file_path.as_str()).collect();
    assert_eq!(paths, vec!["src/planner.rs", "src/router.rs", "src/engine.rs"]);
    assert_eq!(snapshots[0].selection_score, 90);
    assert_eq!(snapshots[0].selection_reason, "scored by table");
    assert_eq!(snapshots[0].function_name.as_deref(), Some("planner_step"));
    assert_eq!((snapshots[0].start_line, snapshots[0].end_line), (3, 10));
    assert_eq!(scorer.calls(), 5);
}

#[tokio::test]
async fn test_existing_fresh_snapshots_short_circuit() {
    let h = HarnessBuilder::new(FakeSource::all_fetchable()).build();

    let first = h.generate(&GenerateOptions::default()).await.unwrap();
    let fetches = h.source.content_calls.load(Ordering::SeqCst);
    let second = h.generate(&GenerateOptions::default()).await.unwrap();

    let ids = |v: &[Snapshot]| v.iter().map(|s| s.id.clone()).collect::<HashSet<_>>();
    assert_eq!(ids(&first), ids(&second));
    assert_eq!(h.source.content_calls.load(Ordering::SeqCst), fetches);
    assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_selection_and_analysis_caches_skip_ai() {
    let scorer = Arc::new(TableScorer::uniform());
    let h = HarnessBuilder::new(FakeSource::all_fetchable())
        .scorer(scorer.clone())
        .build();

    h.generate(&GenerateOptions::default()).await.unwrap();
    assert_eq!(scorer.calls(), 5);

    // selection cache hit for the same head commit
    h.generate(&force()).await.unwrap();
    assert_eq!(scorer.calls(), 5);

    // per-candidate analysis cache still answers every candidate
    h.cache
        .delete_by_prefix(&selection_prefix("repo-1"))
        .await
        .unwrap();
    let snapshots = h.generate(&force()).await.unwrap();
    assert_eq!(scorer.calls(), 5);
    assert!(snapshots.iter().all(|s| s.selection_reason == "scored by table"));
}

#[tokio::test]
async fn test_heuristic_results_are_not_cached_per_candidate() {
    let h = HarnessBuilder::new(FakeSource::all_fetchable()).build();

    h.generate(&GenerateOptions::default()).await.unwrap();

    let analysis_entries = h
        .cache
        .delete_by_prefix("analysis:")
        .await
        .unwrap();
    assert_eq!(analysis_entries, 0);
}

#[tokio::test]
async fn test_fallback_selection_is_rescored_once_ai_recovers() {
    let scorer = Arc::new(TableScorer::uniform());
    let h = HarnessBuilder::new(FakeSource::all_fetchable())
        .scorer(scorer.clone())
        .build();

    scorer.set_down(true);
    let during_outage = h.generate(&GenerateOptions::default()).await.unwrap();
    assert!(during_outage
        .iter()
        .all(|s| s.selection_reason == HEURISTIC_REASON));
    let outage_calls = scorer.calls();
    assert!(outage_calls > 0);

    scorer.set_down(false);
    let recovered = h.generate(&force()).await.unwrap();
    assert_eq!(scorer.calls(), outage_calls + 5);
    assert_eq!(recovered.len(), 3);
    assert!(recovered
        .iter()
        .all(|s| s.selection_reason == "scored by table"));

    // a full AI ranking is cached again
    h.generate(&force()).await.unwrap();
    assert_eq!(scorer.calls(), outage_calls + 5);
}

#[tokio::test]
async fn test_partial_fallback_is_not_cached_as_selection() {
    // planner is missing from the table, so it always falls back
    let scorer = Arc::new(TableScorer::new(vec![
        ("src/engine.rs", 40),
        ("src/parser.rs", 40),
        ("src/router.rs", 40),
        ("src/scheduler.rs", 40),
    ]));
    let h = HarnessBuilder::new(FakeSource::all_fetchable())
        .scorer(scorer.clone())
        .build();

    h.generate(&GenerateOptions::default()).await.unwrap();
    let first = scorer.calls();
    h.generate(&force()).await.unwrap();

    // AI answers come from the analysis cache; only the fallback re-asks
    assert_eq!(scorer.calls(), first + 1);
}

#[tokio::test]
async fn test_forced_regeneration_replaces_previous_snapshots() {
    let h = HarnessBuilder::new(FakeSource::all_fetchable()).build();

    let first = h.generate(&GenerateOptions::default()).await.unwrap();
    let second = h.generate(&force()).await.unwrap();

    assert_eq!(second.len(), 3);
    let remaining = h.store.all();
    assert_eq!(remaining.len(), 3);
    assert!(first.iter().all(|old| remaining.iter().all(|s| s.id != old.id)));
    let deleted = h.storage.deleted();
    assert!(first.iter().all(|old| deleted.contains(&old.image_url)));
}

#[tokio::test]
async fn test_render_failure_skips_only_that_snippet() {
    let scorer = Arc::new(TableScorer::new(vec![
        ("src/engine.rs", 70),
        ("src/parser.rs", 60),
        ("src/router.rs", 80),
        ("src/scheduler.rs", 50),
        ("src/planner.rs", 90),
    ]));
    let h = HarnessBuilder::new(FakeSource::all_fetchable())
        .scorer(scorer)
        .renderer(FakeRenderer::failing_on("src/planner.rs"))
        .build();

    let snapshots = h.generate(&GenerateOptions::default()).await.unwrap();

    let paths: Vec<&str> = snapshots.iter().map(|s| s.file_path.as_str()).collect();
    assert_eq!(paths, vec!["src/router.rs", "src/engine.rs"]);
    assert_eq!(h.storage.uploaded().len(), 2);
}

#[tokio::test]
async fn test_persist_failure_removes_uploaded_image() {
    let h = HarnessBuilder::new(FakeSource::all_fetchable())
        .read_only()
        .build();

    let snapshots = h.generate(&GenerateOptions::default()).await.unwrap();

    assert!(snapshots.is_empty());
    assert_eq!(h.storage.uploaded().len(), 3);
    assert_eq!(h.storage.deleted(), h.storage.uploaded());
}

#[tokio::test]
async fn test_all_boilerplate_tree_is_empty_success() {
    let tree = vec![
        TreeEntry {
            path: "package-lock.json".to_string(),
            kind: TreeEntryKind::File,
            size: 90_000,
        },
        TreeEntry {
            path: "dist/app.min.js".to_string(),
            kind: TreeEntryKind::File,
            size: 50_000,
        },
    ];
    let h = HarnessBuilder::new(FakeSource::all_fetchable().with_tree(tree)).build();

    let snapshots = h.generate(&GenerateOptions::default()).await.unwrap();

    assert!(snapshots.is_empty());
    assert_eq!(h.source.content_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_precondition_errors() {
    let h = HarnessBuilder::new(FakeSource::all_fetchable()).build();
    let options = GenerateOptions::default();

    let err = h
        .pipeline
        .generate_snapshots("missing", "user-1", "token", &options)
        .await
        .unwrap_err();
    assert!(matches!(err, SnapshotError::NotFound(_)));

    let err = h
        .pipeline
        .generate_snapshots("repo-1", "intruder", "token", &options)
        .await
        .unwrap_err();
    assert!(matches!(err, SnapshotError::Unauthorized(_)));

    let err = h
        .pipeline
        .generate_snapshots("repo-unanalyzed", "user-1", "token", &options)
        .await
        .unwrap_err();
    assert!(matches!(err, SnapshotError::NotFound(_)));
}

#[tokio::test]
async fn test_no_commits_is_insufficient_data() {
    let h = HarnessBuilder::new(FakeSource::all_fetchable().without_commits()).build();

    let err = h.generate(&GenerateOptions::default()).await.unwrap_err();
    assert!(matches!(err, SnapshotError::InsufficientData(_)));
}

#[tokio::test]
async fn test_source_failures_are_classified() {
    let h = HarnessBuilder::new(
        FakeSource::all_fetchable()
            .with_history_error(SourceError::Transient("502 bad gateway".to_string())),
    )
    .build();
    let err = h.generate(&GenerateOptions::default()).await.unwrap_err();
    assert!(matches!(err, SnapshotError::UpstreamUnavailable(_)));

    let h = HarnessBuilder::new(
        FakeSource::all_fetchable()
            .with_history_error(SourceError::Rejected("bad credentials".to_string())),
    )
    .build();
    let err = h.generate(&GenerateOptions::default()).await.unwrap_err();
    assert!(matches!(err, SnapshotError::Unauthorized(_)));
}

#[tokio::test]
async fn test_render_options_are_recorded() {
    let h = HarnessBuilder::new(FakeSource::all_fetchable()).build();
    let options = GenerateOptions {
        max_snippets: Some(1),
        theme: Some("github-light".to_string()),
        show_line_numbers: Some(false),
        font_size: Some(18),
        ..GenerateOptions::default()
    };

    let snapshots = h.generate(&options).await.unwrap();

    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].theme, "github-light");
    assert!(!snapshots[0].show_line_numbers);
    assert_eq!(snapshots[0].font_size, 18);
}

// ─── Deletion ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_delete_snapshot_checks_owner() {
    let h = HarnessBuilder::new(FakeSource::all_fetchable()).build();
    let snapshots = h.generate(&GenerateOptions::default()).await.unwrap();
    let target = &snapshots[0];

    let err = h
        .pipeline
        .delete_snapshot(&target.id, "intruder")
        .await
        .unwrap_err();
    assert!(matches!(err, SnapshotError::Unauthorized(_)));

    h.pipeline.delete_snapshot(&target.id, "user-1").await.unwrap();
    assert_eq!(h.store.all().len(), 2);
    assert_eq!(h.storage.deleted(), vec![target.image_url.clone()]);

    let err = h
        .pipeline
        .delete_snapshot(&target.id, "user-1")
        .await
        .unwrap_err();
    assert!(matches!(err, SnapshotError::NotFound(_)));
}

// ─── Invalidation ───────────────────────────────────────────────────

#[tokio::test]
async fn test_new_commit_flips_all_fresh_snapshots() {
    let h = HarnessBuilder::new(FakeSource::all_fetchable()).build();
    let snapshots = h.generate(&GenerateOptions::default()).await.unwrap();
    assert_eq!(snapshots.len(), 3);

    h.source.push_commit("def456", "Rewrite planner");
    assert_eq!(h.invalidate("def456").await, 3);
    assert!(h
        .pipeline
        .list_fresh_snapshots("repo-1", "user-1")
        .await
        .unwrap()
        .is_empty());
    assert!(h.cache.is_empty());

    let regenerated = h.generate(&GenerateOptions::default()).await.unwrap();
    assert_eq!(regenerated.len(), 3);
    assert!(regenerated.iter().all(|s| s.last_commit_sha == "def456"));
}

#[tokio::test]
async fn test_invalidation_is_idempotent() {
    let h = HarnessBuilder::new(FakeSource::all_fetchable()).build();
    for s in [
        stored_snapshot("a", "repo-1", "abc123", false),
        stored_snapshot("b", "repo-1", "def456", false),
        stored_snapshot("c", "repo-1", "0000aa", true),
    ] {
        h.store.insert(&s).await.unwrap();
    }

    let first = h.invalidate("def456").await;
    let after_once = h.store.all();
    let second = h.invalidate("def456").await;

    assert_eq!(first, 1);
    assert_eq!(second, 0);
    assert_eq!(h.store.all(), after_once);
}

#[tokio::test]
async fn test_staleness_correctness_and_field_preservation() {
    let h = HarnessBuilder::new(FakeSource::all_fetchable()).build();
    let before = vec![
        stored_snapshot("a", "repo-1", "abc123", false),
        stored_snapshot("b", "repo-1", "def456", false),
        stored_snapshot("c", "repo-1", "def456", true),
        stored_snapshot("d", "repo-1", "0000aa", true),
    ];
    for s in &before {
        h.store.insert(s).await.unwrap();
    }

    h.invalidate("def456").await;

    for (old, new) in before.iter().zip(h.store.all()) {
        let expected_stale = old.is_stale || old.last_commit_sha != "def456";
        assert_eq!(new.is_stale, expected_stale, "snapshot {}", old.id);
        assert_eq!(
            Snapshot {
                is_stale: old.is_stale,
                ..new
            },
            *old
        );
    }
}

#[tokio::test]
async fn test_invalidation_isolates_repositories() {
    let h = HarnessBuilder::new(FakeSource::all_fetchable()).build();
    let other = vec![
        stored_snapshot("x", "repo-2", "abc123", false),
        stored_snapshot("y", "repo-2", "fff000", false),
    ];
    for s in &other {
        h.store.insert(s).await.unwrap();
    }
    h.store
        .insert(&stored_snapshot("a", "repo-1", "abc123", false))
        .await
        .unwrap();

    assert_eq!(h.invalidate("def456").await, 1);
    assert_eq!(h.store.find_by_repository("repo-2").await.unwrap(), other);
}

// ─── SQLite ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_sqlite_backed_generate_and_invalidate() {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect_path(&tmp.path().join("codeshot.sqlite"))
        .await
        .unwrap();
    migrate::apply(&pool).await.unwrap();

    let store = Arc::new(SqliteStore::new(pool.clone()));
    let cache = Arc::new(SqliteCache::new(pool));
    store
        .upsert_repository(&Repository {
            id: "repo-1".to_string(),
            owner: "acme".to_string(),
            name: "widget".to_string(),
            user_id: "user-1".to_string(),
            description: None,
            language: Some("rust".to_string()),
        })
        .await
        .unwrap();
    let summary = store
        .add_summary("repo-1", "A scheduler with a planner and a router.")
        .await
        .unwrap();

    let pipeline = SnapshotPipeline::new(
        &config(),
        Collaborators {
            catalog: store.clone(),
            source: Arc::new(FakeSource::all_fetchable()),
            scorer: Arc::new(TableScorer::uniform()),
            cache: cache.clone(),
            store: store.clone(),
            renderer: Arc::new(FakeRenderer::default()),
            storage: Arc::new(MemoryStorage::default()),
        },
    )
    .unwrap();

    let snapshots = pipeline
        .generate_snapshots("repo-1", "user-1", "token", &GenerateOptions::default())
        .await
        .unwrap();
    assert_eq!(snapshots.len(), 3);
    for s in &snapshots {
        assert_eq!(s.analysis_id, summary.id);
        assert_eq!(store.get(&s.id).await.unwrap().as_ref(), Some(s));
    }

    let marked =
        invalidate_on_new_commit(store.as_ref(), cache.as_ref(), store.as_ref(), "repo-1", "def456")
            .await
            .unwrap();
    assert_eq!(marked, 3);
    assert!(pipeline
        .list_fresh_snapshots("repo-1", "user-1")
        .await
        .unwrap()
        .is_empty());

    let again =
        invalidate_on_new_commit(store.as_ref(), cache.as_ref(), store.as_ref(), "repo-1", "def456")
            .await
            .unwrap();
    assert_eq!(again, 0);
}
