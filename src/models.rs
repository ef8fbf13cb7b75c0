//! Core data models used throughout codeshot.
//!
//! These types represent the candidates, scored snippets, and persisted
//! snapshots that flow through the selection and rendering pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A repository registered with codeshot.
#[derive(Debug, Clone)]
pub struct Repository {
    pub id: String,
    pub owner: String,
    pub name: String,
    pub user_id: String,
    pub description: Option<String>,
    pub language: Option<String>,
}

impl Repository {
    /// `owner/name`, used to namespace per-candidate analysis cache entries.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Latest natural-language analysis of a repository.
#[derive(Debug, Clone)]
pub struct ProjectSummary {
    pub id: String,
    pub repository_id: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeEntryKind {
    File,
    Dir,
}

/// One entry of a repository file tree.
#[derive(Debug, Clone)]
pub struct TreeEntry {
    pub path: String,
    pub kind: TreeEntryKind,
    pub size: u64,
}

/// A proposed code excerpt before scoring.
///
/// `content` holds the full file text once the fetcher has populated it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub function_name: Option<String>,
    pub language: String,
    pub line_count: u32,
    pub file_size: u64,
    /// Interest estimated by the identifier, 0–100.
    pub heuristic_score: u8,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    Medium,
    High,
}

impl Level {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Level::Low),
            "medium" => Some(Level::Medium),
            "high" => Some(Level::High),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Low => "low",
            Level::Medium => "medium",
            Level::High => "high",
        }
    }
}

/// The scoring fields produced by the AI scorer, cached per candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisFields {
    pub score: u8,
    pub reason: String,
    pub complexity: Level,
    pub significance: Level,
    pub is_core_functionality: bool,
    pub is_recently_changed: bool,
    pub technical_interest: String,
}

/// A candidate with its selection score and rationale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredSnippet {
    pub candidate: Candidate,
    #[serde(flatten)]
    pub analysis: AnalysisFields,
}

impl ScoredSnippet {
    pub fn new(candidate: Candidate, analysis: AnalysisFields) -> Self {
        Self {
            candidate,
            analysis,
        }
    }

    pub fn score(&self) -> u8 {
        self.analysis.score
    }
}

/// Read-only view of the repository shared by all scoring calls in a run.
#[derive(Debug, Clone)]
pub struct RepositoryContext {
    pub name: String,
    pub description: Option<String>,
    pub primary_language: String,
    pub recent_commits: Vec<String>,
    pub file_tree: Vec<TreeEntry>,
    pub summary: String,
}

/// Render settings recorded on each snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderOptions {
    pub theme: String,
    pub show_line_numbers: bool,
    pub font_size: u32,
}

/// Caller-supplied options for [`crate::pipeline::SnapshotPipeline::generate_snapshots`].
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Ignore existing fresh snapshots and run the full pipeline.
    pub force_regenerate: bool,
    pub max_snippets: Option<usize>,
    pub theme: Option<String>,
    pub show_line_numbers: Option<bool>,
    pub font_size: Option<u32>,
}

/// A persisted rendered artifact for a scored snippet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub id: String,
    pub repository_id: String,
    pub analysis_id: String,
    pub user_id: String,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub function_name: Option<String>,
    pub language: String,
    pub line_count: u32,
    pub selection_score: u8,
    pub selection_reason: String,
    pub image_url: String,
    pub image_size_bytes: u64,
    pub image_width: u32,
    pub image_height: u32,
    pub theme: String,
    pub show_line_numbers: bool,
    pub font_size: u32,
    pub is_stale: bool,
    pub last_commit_sha: String,
    pub created_at: DateTime<Utc>,
}
