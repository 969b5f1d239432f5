//! In-memory collaborators for engine tests
//!
//! No network: search hits, page texts and model replies are scripted.

#![allow(dead_code)]

use async_trait::async_trait;
use mcq_evidence::error::{FetchError, ProviderError};
use mcq_evidence::providers::{
    InferenceOptions, InferenceProvider, PageFetcher, SearchHit, SearchProvider, SearchResponse,
};
use mcq_evidence::types::{FetchStatus, PageSnapshot};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const FRANCE: &str = "Capital of France?\nA) London\nB) Paris\nC) Berlin";

/// Same question, options in a different order
pub const FRANCE_PERMUTED: &str = "Capital of France?\nA) Paris\nB) Berlin\nC) London";

/// Page declaring an answer key right after the option list
pub fn answer_key_page(letter: char, body: &str) -> String {
    format!(
        "Geography quiz\nCapital of France?\nA) London\nB) Paris\nC) Berlin\n\n\
         Answer key: {}) {}\nParis is the capital and most populous city of France, on the Seine.",
        letter, body
    )
}

/// Page carrying the question and options with no declared answer
pub fn bare_question_page() -> String {
    "Practice set for European geography\nCapital of France?\nA) London\nB) Paris\nC) Berlin\n\n\
     Try the question before checking the key at the end of the book."
        .to_string()
}

pub fn hit(link: &str) -> SearchHit {
    SearchHit {
        title: format!("Quiz at {}", link),
        link: link.to_string(),
        snippet: String::new(),
    }
}

// ============================================================================
// Search
// ============================================================================

pub struct FakeSearch {
    response: Result<SearchResponse, String>,
    pub queries: Mutex<Vec<String>>,
}

impl FakeSearch {
    pub fn with_hits(hits: Vec<SearchHit>) -> Arc<Self> {
        Arc::new(Self {
            response: Ok(SearchResponse {
                results: hits,
                ..Default::default()
            }),
            queries: Mutex::new(Vec::new()),
        })
    }

    /// Full response including side channels
    pub fn with_response(response: SearchResponse) -> Arc<Self> {
        Arc::new(Self {
            response: Ok(response),
            queries: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            response: Err(message.to_string()),
            queries: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

#[async_trait]
impl SearchProvider for FakeSearch {
    fn name(&self) -> &'static str {
        "fake-search"
    }

    async fn query(&self, query: &str) -> Result<SearchResponse, ProviderError> {
        self.queries.lock().unwrap().push(query.to_string());
        self.response
            .clone()
            .map_err(ProviderError::Network)
    }
}

// ============================================================================
// Fetch
// ============================================================================

pub struct FakeFetcher {
    pages: HashMap<String, String>,
}

impl FakeFetcher {
    pub fn new(pages: &[(&str, String)]) -> Arc<Self> {
        Arc::new(Self {
            pages: pages
                .iter()
                .map(|(link, text)| (link.to_string(), text.clone()))
                .collect(),
        })
    }
}

#[async_trait]
impl PageFetcher for FakeFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<PageSnapshot, FetchError> {
        match self.pages.get(url) {
            Some(text) => Ok(PageSnapshot {
                markup: format!("<html><body><pre>{}</pre></body></html>", text),
                text: text.clone(),
                status: FetchStatus::Ok(200),
            }),
            None => Err(FetchError::Network(format!("no route to {}", url))),
        }
    }
}

// ============================================================================
// Inference
// ============================================================================

/// Replies with the same text to every prompt
pub struct ScriptedInference {
    reply: String,
    pub calls: Arc<AtomicUsize>,
    /// User prompts in call order
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedInference {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            calls: Arc::new(AtomicUsize::new(0)),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl InferenceProvider for ScriptedInference {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn complete(
        &self,
        _system: &str,
        user: &str,
        _options: &InferenceOptions,
    ) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(user.to_string());
        Ok(self.reply.clone())
    }
}

/// Always reports an exhausted quota
pub struct ExhaustedInference {
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl InferenceProvider for ExhaustedInference {
    fn name(&self) -> &'static str {
        "exhausted"
    }

    async fn complete(
        &self,
        _system: &str,
        _user: &str,
        _options: &InferenceOptions,
    ) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ProviderError::QuotaExhausted {
            until: chrono::Utc::now(),
        })
    }
}
