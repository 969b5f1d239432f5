//! Error types for mcq-evidence
//!
//! Heuristic rejections are `None`, never errors. Only collaborator failures
//! (fetch, search, inference, persistence) are represented here, and the
//! orchestrator catches them per source so a run always completes.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Search / inference provider errors
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Provider quota exhausted; calls fail fast until `until`
    #[error("Quota exhausted until {until}")]
    QuotaExhausted { until: DateTime<Utc> },

    /// Short-lived rate limit; retried with backoff
    #[error("Rate limited (retry after {retry_after_ms:?} ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("API error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    /// Missing API key or endpoint
    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Only short rate limits are worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
    }
}

/// Page fetch errors (tolerated per source)
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Fetch timed out after {0} ms")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Body read failed: {0}")]
    Body(String),
}

impl FetchError {
    /// Short label used in run statistics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Timeout(_) => "timeout",
            FetchError::Network(_) => "network",
            FetchError::Body(_) => "body",
        }
    }
}
