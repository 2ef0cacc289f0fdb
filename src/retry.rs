//! Backoff-retry combinators for network-calling operations.
//!
//! Two flavours wrap every outbound call the engines make:
//!
//! - [`with_retry`]: retries failures whose error text matches a
//!   configurable set of transient-failure substrings (timeouts,
//!   connection resets, DNS misses), with exponential backoff.
//! - [`with_rate_limit_retry`]: retries only rate-limit rejections,
//!   multiplying the exponential backoff by the server-advised wait.
//!
//! The wrappers compose: queries run rate-limit retry inside generic
//! retry so transient transport failures and rate limiting are handled
//! independently.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::marketplace::MarketplaceError;

/// Substrings that mark an error as transient. Matched case-insensitively
/// against the rendered error chain.
pub const DEFAULT_RETRYABLE_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "econnreset",
    "connection refused",
    "enotfound",
    "dns error",
    "temporarily unavailable",
];

/// Retry schedule shared by both combinators.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retryable_patterns: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            retryable_patterns: DEFAULT_RETRYABLE_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl RetryPolicy {
    /// Whether an error should be retried by the generic wrapper.
    ///
    /// A typed [`MarketplaceError`] carries its own verdict; anything else
    /// is classified by substring match over the full error chain.
    pub fn is_retryable(&self, err: &anyhow::Error) -> bool {
        if let Some(market_err) = err.downcast_ref::<MarketplaceError>() {
            if market_err.is_retryable() {
                return true;
            }
        }
        let rendered = format!("{err:#}").to_lowercase();
        self.retryable_patterns
            .iter()
            .any(|pattern| rendered.contains(&pattern.to_lowercase()))
    }

    /// Exponential backoff: `min(base * 2^attempt, max_delay)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }

    /// Rate-limit backoff: the server-advised wait multiplies the
    /// exponential term rather than replacing it, still capped.
    pub fn rate_limit_backoff(&self, attempt: u32, retry_after_secs: u64) -> Duration {
        let factor = u32::try_from(retry_after_secs.max(1)).unwrap_or(u32::MAX);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Invoke `op`, retrying transient failures up to `policy.max_retries`
/// times. Non-retryable or exhausted failures propagate unchanged. The
/// attempt counter is per call.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, op: F) -> anyhow::Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= policy.max_retries || !policy.is_retryable(&err) {
                    return Err(err);
                }
                let delay = policy.backoff(attempt);
                warn!(
                    op = label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Invoke `op`, retrying only rate-limit rejections (any error carrying a
/// server-advised `retry_after`), regardless of message content. Other
/// failures propagate immediately.
pub async fn with_rate_limit_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    op: F,
) -> anyhow::Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let retry_after = err
                    .downcast_ref::<MarketplaceError>()
                    .and_then(MarketplaceError::retry_after);
                match retry_after {
                    Some(secs) if attempt < policy.max_retries => {
                        let delay = policy.rate_limit_backoff(attempt, secs);
                        warn!(
                            op = label,
                            attempt,
                            retry_after_secs = secs,
                            delay_ms = delay.as_millis() as u64,
                            "Rate limited, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    _ => return Err(err),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
