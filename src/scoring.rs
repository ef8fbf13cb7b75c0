//! Snippet scoring: AI ranking with content-addressed caching and a
//! heuristic fallback that never fails.
//!
//! # Per-candidate flow
//!
//! ```text
//! content_hash(path, start, end, content)
//!        │
//!        ▼
//!  analysis cache ──hit──▶ ScoreOutcome::Ai { cached: true }
//!        │ miss
//!        ▼
//!  build_prompt → AiScorer::score (retry table) → parse_response
//!        │ ok                                   │ any failure
//!        ▼                                      ▼
//!  cache + ScoreOutcome::Ai             ScoreOutcome::Heuristic
//! ```
//!
//! Only AI results are cached; heuristic results are recomputed each run so
//! a later run with the AI available can replace them.
//!
//! # Batching
//!
//! [`SnippetScorer::score_candidates`] scores fixed-size batches one after
//! another, with every candidate in a batch scored concurrently. This is
//! the only throttle on AI traffic.

use futures::future::join_all;
use serde_json::Value;

use crate::cache::{analysis_key, content_hash, get_json, set_json, CacheStore};
use crate::error::ScorerError;
use crate::identify::extract_lines;
use crate::models::{AnalysisFields, Candidate, Level, RepositoryContext, ScoredSnippet};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::traits::AiScorer;

/// Reason recorded on every heuristic fallback score.
pub const HEURISTIC_REASON: &str = "heuristic analysis (AI unavailable)";

/// Commit messages included in prompts.
const PROMPT_COMMITS: usize = 10;
/// Excerpt lines included in prompts.
const PROMPT_MAX_LINES: u32 = 80;

/// Where a score came from.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreOutcome {
    Ai { snippet: ScoredSnippet, cached: bool },
    Heuristic(ScoredSnippet),
}

impl ScoreOutcome {
    pub fn snippet(&self) -> &ScoredSnippet {
        match self {
            ScoreOutcome::Ai { snippet, .. } | ScoreOutcome::Heuristic(snippet) => snippet,
        }
    }

    pub fn into_snippet(self) -> ScoredSnippet {
        match self {
            ScoreOutcome::Ai { snippet, .. } | ScoreOutcome::Heuristic(snippet) => snippet,
        }
    }

    pub fn is_heuristic(&self) -> bool {
        matches!(self, ScoreOutcome::Heuristic(_))
    }
}

/// Scores candidates for one repository.
pub struct SnippetScorer<'a> {
    scorer: &'a dyn AiScorer,
    cache: &'a dyn CacheStore,
    policy: RetryPolicy,
}

impl<'a> SnippetScorer<'a> {
    pub fn new(scorer: &'a dyn AiScorer, cache: &'a dyn CacheStore, policy: RetryPolicy) -> Self {
        Self {
            scorer,
            cache,
            policy,
        }
    }

    /// Score one candidate. Always produces a result.
    pub async fn score_candidate(
        &self,
        candidate: Candidate,
        context: &RepositoryContext,
    ) -> ScoreOutcome {
        let content = candidate.content.as_deref().unwrap_or_default();
        let hash = content_hash(
            &candidate.file_path,
            candidate.start_line,
            candidate.end_line,
            content,
        );
        let key = analysis_key(&context.name, &hash);

        match get_json::<AnalysisFields>(self.cache, &key).await {
            Ok(Some(analysis)) => {
                tracing::debug!(file_path = %candidate.file_path, "analysis cache hit");
                return ScoreOutcome::Ai {
                    snippet: ScoredSnippet::new(candidate, analysis),
                    cached: true,
                };
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(file_path = %candidate.file_path, error = %e, "analysis cache read failed");
            }
        }

        let prompt = build_prompt(&candidate, context);
        let result = retry_with_backoff(&self.policy, ScorerError::is_retryable, |_| {
            self.scorer.score(&prompt)
        })
        .await
        .and_then(|text| parse_response(&text));

        match result {
            Ok(analysis) => {
                if let Err(e) = set_json(self.cache, &key, &analysis, None).await {
                    tracing::warn!(file_path = %candidate.file_path, error = %e, "analysis cache write failed");
                }
                ScoreOutcome::Ai {
                    snippet: ScoredSnippet::new(candidate, analysis),
                    cached: false,
                }
            }
            Err(e) => {
                tracing::warn!(
                    file_path = %candidate.file_path,
                    model = self.scorer.model_name(),
                    error = %e,
                    "AI scoring failed, using heuristic score"
                );
                let analysis = heuristic_analysis(&candidate, context);
                ScoreOutcome::Heuristic(ScoredSnippet::new(candidate, analysis))
            }
        }
    }

    /// Score candidates in sequential batches of `batch_size`, concurrently
    /// within each batch. Output order matches input order.
    pub async fn score_candidates(
        &self,
        candidates: &[Candidate],
        context: &RepositoryContext,
        batch_size: usize,
    ) -> Vec<ScoreOutcome> {
        let mut outcomes = Vec::with_capacity(candidates.len());

        for batch in candidates.chunks(batch_size.max(1)) {
            let scored = join_all(
                batch
                    .iter()
                    .cloned()
                    .map(|candidate| self.score_candidate(candidate, context)),
            )
            .await;
            outcomes.extend(scored);
        }

        let heuristic = outcomes.iter().filter(|o| o.is_heuristic()).count();
        let cached = outcomes
            .iter()
            .filter(|o| matches!(o, ScoreOutcome::Ai { cached: true, .. }))
            .count();
        tracing::info!(
            repository = %context.name,
            scored = outcomes.len(),
            cached,
            heuristic,
            "scored candidates"
        );
        outcomes
    }
}

/// Build the scoring prompt for one candidate.
pub fn build_prompt(candidate: &Candidate, context: &RepositoryContext) -> String {
    let code = candidate
        .content
        .as_deref()
        .map(|content| {
            let end = candidate
                .end_line
                .min(candidate.start_line + PROMPT_MAX_LINES - 1);
            extract_lines(content, candidate.start_line, end)
        })
        .unwrap_or_default();

    let commits = context
        .recent_commits
        .iter()
        .take(PROMPT_COMMITS)
        .map(|m| format!("- {}", m.lines().next().unwrap_or_default()))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are ranking code excerpts from the repository "{name}" to pick the ones most worth sharing.

Repository description: {description}
Primary language: {language}
Project summary: {summary}

Recent commits:
{commits}

Excerpt: {path} lines {start}-{end}{function} ({lang})
```{lang}
{code}
```

Respond with a single JSON object and nothing else:
{{"score": <integer 0-100>, "reason": "<one sentence>", "complexity": "low|medium|high", "significance": "low|medium|high", "isCoreFunctionality": <true|false>, "isRecentlyChanged": <true|false>, "technicalInterest": "<what makes it interesting>"}}"#,
        name = context.name,
        description = context.description.as_deref().unwrap_or("(none)"),
        language = context.primary_language,
        summary = context.summary,
        commits = if commits.is_empty() { "(none)".to_string() } else { commits },
        path = candidate.file_path,
        start = candidate.start_line,
        end = candidate.end_line,
        function = candidate
            .function_name
            .as_deref()
            .map(|f| format!(", function `{}`", f))
            .unwrap_or_default(),
        lang = candidate.language,
        code = code,
    )
}

/// Parse and validate a scorer response.
///
/// Accepts the JSON object anywhere in the text (models like to wrap it in
/// code fences). Any missing or ill-typed field rejects the whole response.
pub fn parse_response(text: &str) -> Result<AnalysisFields, ScorerError> {
    let start = text
        .find('{')
        .ok_or_else(|| ScorerError::Malformed("no JSON object in response".to_string()))?;
    let end = text
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| ScorerError::Malformed("unterminated JSON object".to_string()))?;

    let json: Value = serde_json::from_str(&text[start..=end])
        .map_err(|e| ScorerError::Malformed(format!("invalid JSON: {}", e)))?;

    let score = json
        .get("score")
        .and_then(Value::as_f64)
        .ok_or_else(|| ScorerError::Malformed("score must be a number".to_string()))?;

    Ok(AnalysisFields {
        score: score.round().clamp(0.0, 100.0) as u8,
        reason: required_text(&json, &["reason"])?,
        complexity: required_level(&json, "complexity")?,
        significance: required_level(&json, "significance")?,
        is_core_functionality: required_bool(
            &json,
            &["isCoreFunctionality", "is_core_functionality"],
        )?,
        is_recently_changed: required_bool(&json, &["isRecentlyChanged", "is_recently_changed"])?,
        technical_interest: required_text(&json, &["technicalInterest", "technical_interest"])?,
    })
}

fn field<'v>(json: &'v Value, names: &[&str]) -> Option<&'v Value> {
    names.iter().find_map(|name| json.get(*name))
}

fn required_text(json: &Value, names: &[&str]) -> Result<String, ScorerError> {
    field(json, names)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ScorerError::Malformed(format!("{} must be a non-empty string", names[0])))
}

fn required_level(json: &Value, name: &str) -> Result<Level, ScorerError> {
    json.get(name)
        .and_then(Value::as_str)
        .and_then(Level::parse)
        .ok_or_else(|| ScorerError::Malformed(format!("{} must be low, medium, or high", name)))
}

fn required_bool(json: &Value, names: &[&str]) -> Result<bool, ScorerError> {
    field(json, names)
        .and_then(Value::as_bool)
        .ok_or_else(|| ScorerError::Malformed(format!("{} must be a boolean", names[0])))
}

/// Score a candidate without the AI.
pub fn heuristic_analysis(candidate: &Candidate, context: &RepositoryContext) -> AnalysisFields {
    let path_lower = candidate.file_path.to_lowercase();
    let file_name = path_lower.rsplit('/').next().unwrap_or(&path_lower);
    let stem = file_name.split('.').next().unwrap_or(file_name);

    let is_recently_changed = context.recent_commits.iter().any(|m| {
        let m = m.to_lowercase();
        m.contains(file_name) || (stem.len() >= 4 && m.contains(stem))
    });
    let is_core_functionality = ["src/", "lib/", "core/", "engine/", "internal/", "pkg/"]
        .iter()
        .any(|dir| path_lower.starts_with(dir) || path_lower.contains(&format!("/{}", dir)));

    let mut score = candidate.heuristic_score as i32;
    if candidate.function_name.is_some() {
        score += 5;
    }
    if (10..=40).contains(&candidate.line_count) {
        score += 5;
    }
    if candidate.language == context.primary_language {
        score += 5;
    }
    if is_recently_changed {
        score += 5;
    }
    let score = score.clamp(0, 100) as u8;

    let complexity = match candidate.line_count {
        n if n > 30 => Level::High,
        n if n > 12 => Level::Medium,
        _ => Level::Low,
    };
    let significance = match score {
        s if s >= 70 => Level::High,
        s if s >= 40 => Level::Medium,
        _ => Level::Low,
    };

    let subject = candidate
        .function_name
        .as_deref()
        .map(|f| format!("`{}`", f))
        .unwrap_or_else(|| "excerpt".to_string());

    AnalysisFields {
        score,
        reason: HEURISTIC_REASON.to_string(),
        complexity,
        significance,
        is_core_functionality,
        is_recently_changed,
        technical_interest: format!(
            "{} {} spanning {} lines of {}",
            complexity.as_str(),
            subject,
            candidate.line_count,
            candidate.file_path
        ),
    }
}
