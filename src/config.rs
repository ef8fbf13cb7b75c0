use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub scorer: ScorerConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub renderer: RendererConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Selection limits and quotas for one pipeline run.
#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Snapshots rendered per run unless the caller overrides it.
    #[serde(default = "default_max_snippets")]
    pub max_snippets: usize,
    /// Candidates kept after identification.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    #[serde(default = "default_max_candidates_to_fetch")]
    pub max_candidates_to_fetch: usize,
    #[serde(default = "default_min_successful_fetches")]
    pub min_successful_fetches: usize,
    /// Files above this size are skipped without a fetch.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Files below this size are treated as trivial.
    #[serde(default = "default_min_file_bytes")]
    pub min_file_bytes: u64,
    #[serde(default = "default_max_snippet_lines")]
    pub max_snippet_lines: u32,
    #[serde(default = "default_parallel_batch_size")]
    pub parallel_batch_size: usize,
    #[serde(default = "default_selection_cache_ttl_secs")]
    pub selection_cache_ttl_secs: u64,
    #[serde(default = "default_commit_history_limit")]
    pub commit_history_limit: usize,
    #[serde(default = "default_tree_depth")]
    pub tree_depth: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_snippets: default_max_snippets(),
            max_candidates: default_max_candidates(),
            max_candidates_to_fetch: default_max_candidates_to_fetch(),
            min_successful_fetches: default_min_successful_fetches(),
            max_file_bytes: default_max_file_bytes(),
            min_file_bytes: default_min_file_bytes(),
            max_snippet_lines: default_max_snippet_lines(),
            parallel_batch_size: default_parallel_batch_size(),
            selection_cache_ttl_secs: default_selection_cache_ttl_secs(),
            commit_history_limit: default_commit_history_limit(),
            tree_depth: default_tree_depth(),
        }
    }
}

fn default_max_snippets() -> usize {
    3
}
fn default_max_candidates() -> usize {
    30
}
fn default_max_candidates_to_fetch() -> usize {
    12
}
fn default_min_successful_fetches() -> usize {
    3
}
fn default_max_file_bytes() -> u64 {
    100_000
}
fn default_min_file_bytes() -> u64 {
    200
}
fn default_max_snippet_lines() -> u32 {
    40
}
fn default_parallel_batch_size() -> usize {
    4
}
fn default_selection_cache_ttl_secs() -> u64 {
    24 * 60 * 60
}
fn default_commit_history_limit() -> usize {
    50
}
fn default_tree_depth() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_fetch_base_delay_ms")]
    pub fetch_base_delay_ms: u64,
    #[serde(default = "default_fetch_max_attempts")]
    pub fetch_max_attempts: u32,
    /// Delay before each scoring retry; its length bounds the retry count.
    #[serde(default = "default_scoring_retry_delays_ms")]
    pub scoring_retry_delays_ms: Vec<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            fetch_base_delay_ms: default_fetch_base_delay_ms(),
            fetch_max_attempts: default_fetch_max_attempts(),
            scoring_retry_delays_ms: default_scoring_retry_delays_ms(),
        }
    }
}

fn default_fetch_base_delay_ms() -> u64 {
    500
}
fn default_fetch_max_attempts() -> u32 {
    3
}
fn default_scoring_retry_delays_ms() -> Vec<u64> {
    vec![1000, 3000]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScorerConfig {
    #[serde(default = "default_scorer_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            provider: default_scorer_provider(),
            model: None,
            url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ScorerConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_scorer_provider() -> String {
    "disabled".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_api_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RendererConfig {
    #[serde(default = "default_renderer_url")]
    pub url: String,
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default = "default_show_line_numbers")]
    pub show_line_numbers: bool,
    #[serde(default = "default_font_size")]
    pub font_size: u32,
    /// Dimensions recorded when the rendered image cannot be probed.
    #[serde(default = "default_width")]
    pub default_width: u32,
    #[serde(default = "default_height")]
    pub default_height: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            url: default_renderer_url(),
            theme: default_theme(),
            show_line_numbers: default_show_line_numbers(),
            font_size: default_font_size(),
            default_width: default_width(),
            default_height: default_height(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_renderer_url() -> String {
    "http://localhost:3000/render".to_string()
}
fn default_theme() -> String {
    "dracula".to_string()
}
fn default_show_line_numbers() -> bool {
    true
}
fn default_font_size() -> u32 {
    14
}
fn default_width() -> u32 {
    1200
}
fn default_height() -> u32 {
    630
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
        }
    }
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("./data/snapshots")
}

impl Config {
    /// All-defaults configuration with the database under `./data`.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/codeshot.sqlite"),
            },
            pipeline: PipelineConfig::default(),
            retry: RetryConfig::default(),
            scorer: ScorerConfig::default(),
            github: GithubConfig::default(),
            renderer: RendererConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let pipeline = &config.pipeline;

    if pipeline.max_snippets == 0 {
        anyhow::bail!("pipeline.max_snippets must be > 0");
    }
    if pipeline.max_candidates_to_fetch == 0 {
        anyhow::bail!("pipeline.max_candidates_to_fetch must be > 0");
    }
    if pipeline.parallel_batch_size == 0 {
        anyhow::bail!("pipeline.parallel_batch_size must be > 0");
    }
    if pipeline.max_snippet_lines == 0 {
        anyhow::bail!("pipeline.max_snippet_lines must be > 0");
    }
    if pipeline.min_file_bytes >= pipeline.max_file_bytes {
        anyhow::bail!("pipeline.min_file_bytes must be below pipeline.max_file_bytes");
    }

    if config.retry.fetch_max_attempts == 0 {
        anyhow::bail!("retry.fetch_max_attempts must be >= 1");
    }

    match config.scorer.provider.as_str() {
        "disabled" => {}
        "openai" => {
            if config.scorer.model.is_none() {
                anyhow::bail!("scorer.model must be specified when provider is 'openai'");
            }
        }
        other => anyhow::bail!(
            "Unknown scorer provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = parse("[db]\npath = \"/tmp/x.sqlite\"\n").unwrap();
        assert_eq!(config.pipeline.max_snippets, 3);
        assert_eq!(config.pipeline.min_successful_fetches, 3);
        assert_eq!(config.retry.scoring_retry_delays_ms, vec![1000, 3000]);
        assert!(!config.scorer.is_enabled());
        assert_eq!(config.renderer.theme, "dracula");
    }

    #[test]
    fn test_openai_requires_model() {
        let err = parse("[db]\npath = \"x\"\n[scorer]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("scorer.model"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        assert!(parse("[db]\npath = \"x\"\n[scorer]\nprovider = \"magic\"\n").is_err());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let err =
            parse("[db]\npath = \"x\"\n[pipeline]\nparallel_batch_size = 0\n").unwrap_err();
        assert!(err.to_string().contains("parallel_batch_size"));
    }
}
