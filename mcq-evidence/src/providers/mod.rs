//! External collaborators
//!
//! The engine talks to search, page fetching, text completion and persistence
//! through these traits. Concrete adapters live in the submodules; tests use
//! in-memory fakes.

use crate::error::{FetchError, ProviderError};
use crate::types::PageSnapshot;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod inference;
pub mod page_fetcher;
pub mod rate_limiter;
pub mod search;
pub mod store;

pub use inference::{ChatCompletionProvider, RateLimitedInference};
pub use page_fetcher::HttpPageFetcher;
pub use rate_limiter::RateLimiter;
pub use search::SerperSearchProvider;
pub use store::{MemoryStore, SqliteStore};

/// One organic search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub link: String,
    pub snippet: String,
}

/// Ordered results plus side channels
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    /// Direct answer snippet, if the search API produced one
    pub answer_box: Option<String>,
    /// Knowledge-panel style overview
    pub overview: Option<String>,
    /// "People also ask" style related snippets
    pub related: Vec<String>,
}

impl SearchResponse {
    /// Side-channel snippets in a stable order
    pub fn side_channels(&self) -> Vec<String> {
        self.answer_box
            .iter()
            .chain(self.overview.iter())
            .chain(self.related.iter())
            .filter(|s| !s.trim().is_empty())
            .cloned()
            .collect()
    }
}

/// Web search
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Provider identifier for logs
    fn name(&self) -> &'static str;

    async fn query(&self, query: &str) -> Result<SearchResponse, ProviderError>;
}

/// Page download
///
/// Non-2xx responses are returned as snapshots with an `Http` status; only
/// timeouts and transport failures are errors.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<PageSnapshot, FetchError>;
}

/// Completion request options
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 400,
        }
    }
}

/// Text completion
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn complete(
        &self,
        system: &str,
        user: &str,
        options: &InferenceOptions,
    ) -> Result<String, ProviderError>;

    /// Whether credentials are present
    fn is_available(&self) -> bool {
        true
    }
}

/// String key/value persistence for the decision cache
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn get(&self, key: &str) -> mcq_common::Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> mcq_common::Result<()>;
}
