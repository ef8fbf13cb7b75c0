//! Candidate identification.
//!
//! Proposes code excerpts worth scoring from a repository's file tree,
//! commit history, and project summary, without any AI call:
//!
//! 1. Drop directories, non-source files, and boilerplate (lockfiles,
//!    minified bundles, build output, vendored code, fixtures, generated code).
//! 2. Estimate interest from commit centrality, recency, path signals,
//!    file size, and mentions in the project summary.
//! 3. Sort by interest (stable) and keep the top `max_candidates`.
//!
//! Line ranges are provisional until [`refine_excerpt`] sees the fetched
//! content and narrows each candidate to its most substantial definition.

use std::collections::HashMap;
use std::sync::OnceLock;

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;

use crate::config::PipelineConfig;
use crate::models::{Candidate, CommitInfo, TreeEntry, TreeEntryKind};

const BOILERPLATE_GLOBS: &[&str] = &[
    // lockfiles
    "**/*.lock",
    "**/package-lock.json",
    "**/pnpm-lock.yaml",
    "**/go.sum",
    // minified bundles and maps
    "**/*.min.js",
    "**/*.min.css",
    "**/*.bundle.js",
    "**/*.map",
    // build output
    "**/dist/**",
    "**/build/**",
    "**/out/**",
    "**/target/**",
    "**/.next/**",
    "**/coverage/**",
    // vendored dependencies
    "**/node_modules/**",
    "**/vendor/**",
    "**/third_party/**",
    // fixtures and snapshots
    "**/fixtures/**",
    "**/__fixtures__/**",
    "**/__snapshots__/**",
    "**/testdata/**",
    "**/__mocks__/**",
    // generated code
    "**/*.pb.go",
    "**/*_pb2.py",
    "**/*.g.dart",
    "**/*.d.ts",
    "**/*_generated.*",
    "**/*.generated.*",
    "**/migrations/**",
    "**/.git/**",
    "**/.github/**",
];

/// Commits at the head of history that count as "recent".
const RECENT_COMMIT_WINDOW: usize = 5;
/// Rough bytes per line when only the file size is known.
const BYTES_PER_LINE: u64 = 35;
/// Non-blank lines a definition needs to count as a real body.
const MIN_BODY_LINES: usize = 5;

const CORE_DIRS: &[&str] = &["src/", "lib/", "core/", "engine/", "internal/", "pkg/", "app/"];
const ENTRY_STEMS: &[&str] = &["main", "lib", "index", "app", "server", "mod"];
const CONFIG_HINTS: &[&str] = &["config", "settings", "constants", "setup"];

/// Heuristic candidate proposer built from pipeline limits.
pub struct CandidateIdentifier {
    excludes: GlobSet,
    min_file_bytes: u64,
    max_file_bytes: u64,
    max_candidates: usize,
    max_snippet_lines: u32,
}

impl CandidateIdentifier {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let patterns: Vec<String> = BOILERPLATE_GLOBS.iter().map(|s| s.to_string()).collect();
        Ok(Self {
            excludes: build_globset(&patterns)?,
            min_file_bytes: config.min_file_bytes,
            max_file_bytes: config.max_file_bytes,
            max_candidates: config.max_candidates,
            max_snippet_lines: config.max_snippet_lines,
        })
    }

    /// Whether `path` is generated, vendored, or otherwise not worth showing.
    pub fn is_boilerplate(&self, path: &str) -> bool {
        self.excludes.is_match(path) || detect_language(path).is_none()
    }

    /// Propose candidates, most interesting first.
    ///
    /// An empty or all-boilerplate tree yields an empty list.
    pub fn identify(
        &self,
        tree: &[TreeEntry],
        commits: &[CommitInfo],
        summary: &str,
    ) -> Vec<Candidate> {
        let summary_lower = summary.to_lowercase();
        let messages: Vec<String> = commits.iter().map(|c| c.message.to_lowercase()).collect();

        let mut candidates: Vec<Candidate> = tree
            .iter()
            .filter(|entry| entry.kind == TreeEntryKind::File)
            .filter(|entry| entry.size >= self.min_file_bytes)
            .filter(|entry| !self.is_boilerplate(&entry.path))
            .filter_map(|entry| {
                let language = detect_language(&entry.path)?;
                let estimated_lines = (entry.size / BYTES_PER_LINE).max(1) as u32;
                let end_line = estimated_lines.min(self.max_snippet_lines);
                Some(Candidate {
                    file_path: entry.path.clone(),
                    start_line: 1,
                    end_line,
                    function_name: None,
                    language: language.to_string(),
                    line_count: end_line,
                    file_size: entry.size,
                    heuristic_score: self.interest(entry, &messages, &summary_lower),
                    content: None,
                })
            })
            .collect();

        candidates.sort_by(|a, b| b.heuristic_score.cmp(&a.heuristic_score));
        candidates.truncate(self.max_candidates);

        tracing::debug!(
            tree_entries = tree.len(),
            candidates = candidates.len(),
            "identified candidates"
        );
        candidates
    }

    fn interest(&self, entry: &TreeEntry, messages: &[String], summary_lower: &str) -> u8 {
        let path_lower = entry.path.to_lowercase();
        let (file_name, stem) = file_name_and_stem(&path_lower);

        let mut score: i32 = 40;

        let touching = messages
            .iter()
            .filter(|m| mentions_file(m, file_name, stem))
            .count() as i32;
        score += (touching * 5).min(20);

        if messages
            .iter()
            .take(RECENT_COMMIT_WINDOW)
            .any(|m| mentions_file(m, file_name, stem))
        {
            score += 10;
        }

        if CORE_DIRS
            .iter()
            .any(|dir| path_lower.starts_with(dir) || path_lower.contains(&format!("/{}", dir)))
        {
            score += 10;
        }
        if ENTRY_STEMS.contains(&stem) {
            score += 5;
        }
        if CONFIG_HINTS.iter().any(|hint| stem.contains(hint)) {
            score -= 10;
        }
        if is_test_path(&path_lower) {
            score -= 15;
        }

        if (1_000..=20_000).contains(&entry.size) {
            score += 10;
        } else if entry.size > self.max_file_bytes {
            score -= 20;
        }

        if stem.len() >= 4 && summary_lower.contains(stem) {
            score += 10;
        }

        score.clamp(0, 100) as u8
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

fn file_name_and_stem(path: &str) -> (&str, &str) {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let stem = file_name.split('.').next().unwrap_or(file_name);
    (file_name, stem)
}

fn mentions_file(message: &str, file_name: &str, stem: &str) -> bool {
    message.contains(file_name) || (stem.len() >= 4 && message.contains(stem))
}

fn is_test_path(path: &str) -> bool {
    path.starts_with("test/")
        || path.starts_with("tests/")
        || path.contains("/test/")
        || path.contains("/tests/")
        || path.contains("test_")
        || path.contains("_test.")
        || path.contains(".test.")
        || path.contains(".spec.")
}

/// Map a file extension to a language name understood by the renderer.
pub fn detect_language(path: &str) -> Option<&'static str> {
    let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
    let language = match ext.as_str() {
        "rs" => "rust",
        "py" => "python",
        "js" | "mjs" | "cjs" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "swift" => "swift",
        "rb" => "ruby",
        "php" => "php",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" => "cpp",
        "cs" => "csharp",
        "scala" => "scala",
        "ex" | "exs" => "elixir",
        "hs" => "haskell",
        "lua" => "lua",
        "dart" => "dart",
        "zig" => "zig",
        "sh" | "bash" => "bash",
        _ => return None,
    };
    Some(language)
}

/// Most common language among source files in the tree.
pub fn detect_primary_language(tree: &[TreeEntry]) -> Option<String> {
    let mut counts: HashMap<&'static str, usize> = HashMap::new();
    for entry in tree.iter().filter(|e| e.kind == TreeEntryKind::File) {
        if let Some(language) = detect_language(&entry.path) {
            *counts.entry(language).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(language, _)| language.to_string())
}

fn definition_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:export\s+)?(?:default\s+)?(?:async\s+)?(?:static\s+)?(?:fn|def|func|function|class|fun)\s+(?:\([^)]*\)\s*)?([A-Za-z_][A-Za-z0-9_]*)",
        )
        .expect("definition regex is valid")
    })
}

fn indentation(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn is_block_closer(trimmed: &str) -> bool {
    trimmed.starts_with('}') || trimmed.starts_with(')') || trimmed == "end"
}

/// A definition found in file content: (start index, end index, name).
fn find_definitions(lines: &[&str]) -> Vec<(usize, usize, String)> {
    let re = definition_regex();
    let mut found = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let Some(caps) = re.captures(line) else {
            continue;
        };
        let indent = indentation(line);
        let mut end = i;

        for (j, next) in lines.iter().enumerate().skip(i + 1) {
            let trimmed = next.trim();
            if trimmed.is_empty() {
                continue;
            }
            if indentation(next) <= indent {
                if is_block_closer(trimmed) {
                    end = j;
                }
                break;
            }
            end = j;
        }

        found.push((i, end, caps[1].to_string()));
    }

    found
}

/// Narrow a fetched candidate to its most substantial definition.
///
/// Picks the definition with the most non-blank lines (earliest wins ties),
/// bounded by `max_lines`. Without a qualifying definition the excerpt is
/// the top of the file. Candidates without content are returned unchanged.
pub fn refine_excerpt(candidate: Candidate, max_lines: u32) -> Candidate {
    let Some(content) = candidate.content.as_deref() else {
        return candidate;
    };
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return candidate;
    }

    let best = find_definitions(&lines)
        .into_iter()
        .map(|(start, end, name)| {
            let body = lines[start..=end]
                .iter()
                .filter(|l| !l.trim().is_empty())
                .count();
            (start, end, name, body)
        })
        .filter(|(_, _, _, body)| *body >= MIN_BODY_LINES)
        .fold(None::<(usize, usize, String, usize)>, |best, def| match best {
            Some(b) if b.3 >= def.3 => Some(b),
            _ => Some(def),
        });

    let max_span = max_lines.max(1) as usize;
    let (start, end, function_name) = match best {
        Some((start, end, name, _)) => (start, end.min(start + max_span - 1), Some(name)),
        None => (0, (lines.len() - 1).min(max_span - 1), None),
    };

    let start_line = start as u32 + 1;
    let end_line = end as u32 + 1;
    Candidate {
        start_line,
        end_line,
        line_count: end_line - start_line + 1,
        function_name,
        ..candidate
    }
}

/// Lines `start_line..=end_line` (1-based) of `content`.
pub fn extract_lines(content: &str, start_line: u32, end_line: u32) -> String {
    if start_line == 0 || end_line < start_line {
        return String::new();
    }
    content
        .lines()
        .skip(start_line as usize - 1)
        .take((end_line - start_line + 1) as usize)
        .collect::<Vec<_>>()
        .join("\n")
}
