//! OpenAI chat-completions client implementing [`AiScorer`].
//!
//! Calls `POST {url}/v1/chat/completions` (default `https://api.openai.com`)
//! once per [`AiScorer::score`] call. Retrying is the caller's job
//! ([`crate::scoring`] drives a fixed delay table), so this client only
//! classifies failures:
//!
//! | Condition | Error |
//! |-----------|-------|
//! | HTTP 429 | [`ScorerError::RateLimited`] |
//! | request timeout | [`ScorerError::Timeout`] |
//! | HTTP 5xx, connection error | [`ScorerError::Transient`] |
//! | other HTTP 4xx | [`ScorerError::Rejected`] |
//! | missing message content | [`ScorerError::Malformed`] |

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::ScorerConfig;
use crate::error::ScorerError;
use crate::traits::{AiScorer, DisabledScorer};

const DEFAULT_URL: &str = "https://api.openai.com";

pub struct OpenAiScorer {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
}

impl OpenAiScorer {
    /// Create a scorer from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `scorer.model` is not set or `OPENAI_API_KEY`
    /// is not in the environment.
    pub fn new(config: &ScorerConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("scorer.model required for OpenAI provider"))?;

        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) => key,
            Err(_) => bail!("OPENAI_API_KEY environment variable not set"),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_URL.to_string()),
        })
    }
}

#[async_trait]
impl AiScorer for OpenAiScorer {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn score(&self, prompt: &str) -> std::result::Result<String, ScorerError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0.2,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": "You evaluate source code excerpts and reply with strict JSON." },
                { "role": "user", "content": prompt },
            ],
        });

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.url.trim_end_matches('/')))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let message = format!("OpenAI API error {}: {}", status, body_text);
            return Err(if status.as_u16() == 429 {
                ScorerError::RateLimited(message)
            } else if status.is_server_error() {
                ScorerError::Transient(message)
            } else {
                ScorerError::Rejected(message)
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ScorerError::Malformed(e.to_string()))?;
        parse_completion(&json)
    }
}

fn classify_transport_error(e: reqwest::Error) -> ScorerError {
    if e.is_timeout() {
        ScorerError::Timeout
    } else {
        ScorerError::Transient(e.to_string())
    }
}

/// Extract `choices[0].message.content`.
fn parse_completion(json: &serde_json::Value) -> std::result::Result<String, ScorerError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| ScorerError::Malformed("missing choices[0].message.content".to_string()))
}

/// Create the configured [`AiScorer`].
///
/// | Config Value | Scorer |
/// |-------------|--------|
/// | `"disabled"` | [`DisabledScorer`] (always falls back to heuristics) |
/// | `"openai"` | [`OpenAiScorer`] |
pub fn create_scorer(config: &ScorerConfig) -> Result<Box<dyn AiScorer>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledScorer)),
        "openai" => Ok(Box::new(OpenAiScorer::new(config)?)),
        other => bail!("Unknown scorer provider: {}", other),
    }
}
