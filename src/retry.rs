//! Retry policies shared by the fetcher and the AI scorer.
//!
//! Two shapes are used:
//! - **Exponential**: `base × 2^attempt` between attempts, bounded attempt count
//!   (repository content fetches).
//! - **Table**: a fixed escalating delay list; its length bounds the number of
//!   retries, so the whole sequence has a known worst-case duration
//!   (AI scoring calls).
//!
//! Only errors the caller marks retryable trigger another attempt.

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryPolicy {
    Exponential { base: Duration, max_attempts: u32 },
    Table(Vec<Duration>),
}

impl RetryPolicy {
    pub fn fetch(config: &RetryConfig) -> Self {
        RetryPolicy::Exponential {
            base: Duration::from_millis(config.fetch_base_delay_ms),
            max_attempts: config.fetch_max_attempts.max(1),
        }
    }

    pub fn scoring(config: &RetryConfig) -> Self {
        RetryPolicy::Table(
            config
                .scoring_retry_delays_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
        )
    }

    /// Total attempts, including the first.
    pub fn max_attempts(&self) -> u32 {
        match self {
            RetryPolicy::Exponential { max_attempts, .. } => *max_attempts,
            RetryPolicy::Table(delays) => delays.len() as u32 + 1,
        }
    }

    /// Delay to wait after failed attempt `attempt` (0-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self {
            RetryPolicy::Exponential { base, .. } => base.saturating_mul(1u32 << attempt.min(16)),
            RetryPolicy::Table(delays) => delays
                .get(attempt as usize)
                .copied()
                .unwrap_or(Duration::ZERO),
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy is exhausted. Returns the last error on exhaustion.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    is_retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 0;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if is_retryable(&e) && attempt + 1 < max_attempts => {
                let delay = policy.delay_after(attempt);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
