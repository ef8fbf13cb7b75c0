//! GitHub REST implementation of [`RepositorySource`].
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | commit history | `GET /repos/{owner}/{repo}/commits?per_page={limit}` |
//! | file tree | `GET /repos/{owner}/{repo}` (default branch), then `GET /repos/{owner}/{repo}/git/trees/{branch}?recursive=1` |
//! | file content | `GET /repos/{owner}/{repo}/contents/{path}?ref={ref}` with the raw media type |
//!
//! Status mapping:
//! - 404 → [`SourceError::NotFound`]
//! - 429, or 403 with `x-ratelimit-remaining: 0` → [`SourceError::RateLimited`]
//! - other 401/403 → [`SourceError::Rejected`]
//! - 5xx and network errors → [`SourceError::Transient`]

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::Deserialize;

use crate::config::GithubConfig;
use crate::error::SourceError;
use crate::models::{CommitInfo, TreeEntry, TreeEntryKind};
use crate::traits::RepositorySource;

const USER_AGENT: &str = concat!("codeshot/", env!("CARGO_PKG_VERSION"));
/// GitHub caps `per_page` at 100.
const MAX_PER_PAGE: usize = 100;

pub struct GithubSource {
    client: reqwest::Client,
    api_url: String,
}

impl GithubSource {
    pub fn new(config: &GithubConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get(
        &self,
        token: &str,
        path: &str,
        accept: &str,
    ) -> std::result::Result<Response, SourceError> {
        let mut request = self
            .client
            .get(format!("{}{}", self.api_url, path))
            .header("Accept", accept)
            .header("X-GitHub-Api-Version", "2022-11-28");
        if !token.is_empty() {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SourceError::Transient(format!("GitHub request failed: {}", e)))?;

        if response.status().is_success() {
            return Ok(response);
        }
        Err(classify_status(response, path).await)
    }
}

async fn classify_status(response: Response, path: &str) -> SourceError {
    let status = response.status();
    let rate_exhausted = response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        == Some("0");
    let body = response.text().await.unwrap_or_default();
    let message = format!("GitHub {} for {}: {}", status, path, body.trim());

    match status {
        StatusCode::NOT_FOUND => SourceError::NotFound(message),
        StatusCode::TOO_MANY_REQUESTS => SourceError::RateLimited(message),
        StatusCode::FORBIDDEN if rate_exhausted => SourceError::RateLimited(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SourceError::Rejected(message),
        s if s.is_server_error() => SourceError::Transient(message),
        _ => SourceError::Rejected(message),
    }
}

#[derive(Deserialize)]
struct CommitItem {
    sha: String,
    commit: CommitDetail,
}

#[derive(Deserialize)]
struct CommitDetail {
    message: String,
}

#[derive(Deserialize)]
struct RepoInfo {
    default_branch: String,
}

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<TreeItem>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct TreeItem {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    size: Option<u64>,
}

fn malformed(e: reqwest::Error) -> SourceError {
    SourceError::Transient(format!("Unexpected GitHub response: {}", e))
}

/// Percent-encode each segment of a repository path.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            segment
                .bytes()
                .map(|b| match b {
                    b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                        (b as char).to_string()
                    }
                    _ => format!("%{:02X}", b),
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn tree_entries(items: Vec<TreeItem>, depth: usize) -> Vec<TreeEntry> {
    items
        .into_iter()
        .filter(|item| item.path.split('/').count() <= depth)
        .filter_map(|item| {
            let kind = match item.kind.as_str() {
                "blob" => TreeEntryKind::File,
                "tree" => TreeEntryKind::Dir,
                _ => return None, // submodules
            };
            Some(TreeEntry {
                path: item.path,
                kind,
                size: item.size.unwrap_or(0),
            })
        })
        .collect()
}

#[async_trait]
impl RepositorySource for GithubSource {
    async fn fetch_commit_history(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        limit: usize,
    ) -> std::result::Result<Vec<CommitInfo>, SourceError> {
        let path = format!(
            "/repos/{}/{}/commits?per_page={}",
            owner,
            repo,
            limit.clamp(1, MAX_PER_PAGE)
        );
        let items: Vec<CommitItem> = self
            .get(token, &path, "application/vnd.github+json")
            .await?
            .json()
            .await
            .map_err(malformed)?;

        Ok(items
            .into_iter()
            .take(limit)
            .map(|item| CommitInfo {
                sha: item.sha,
                message: item.commit.message,
            })
            .collect())
    }

    async fn fetch_file_tree(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        depth: usize,
    ) -> std::result::Result<Vec<TreeEntry>, SourceError> {
        let info: RepoInfo = self
            .get(token, &format!("/repos/{}/{}", owner, repo), "application/vnd.github+json")
            .await?
            .json()
            .await
            .map_err(malformed)?;

        let path = format!(
            "/repos/{}/{}/git/trees/{}?recursive=1",
            owner,
            repo,
            encode_path(&info.default_branch)
        );
        let tree: TreeResponse = self
            .get(token, &path, "application/vnd.github+json")
            .await?
            .json()
            .await
            .map_err(malformed)?;

        if tree.truncated {
            tracing::warn!(owner, repo, "GitHub truncated the file tree");
        }
        Ok(tree_entries(tree.tree, depth))
    }

    async fn fetch_file_content(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> std::result::Result<String, SourceError> {
        let url_path = format!(
            "/repos/{}/{}/contents/{}?ref={}",
            owner,
            repo,
            encode_path(path),
            encode_path(git_ref)
        );
        self.get(token, &url_path, "application/vnd.github.raw+json")
            .await?
            .text()
            .await
            .map_err(malformed)
    }
}
