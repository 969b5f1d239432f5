//! JSON web-search client (Serper-compatible API)

use super::{SearchHit, SearchProvider, SearchResponse};
use crate::config::SearchConfig;
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    q: &'a str,
    num: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    gl: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hl: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResponse {
    #[serde(default)]
    organic: Vec<RawOrganic>,
    #[serde(default)]
    answer_box: Option<RawAnswerBox>,
    #[serde(default)]
    knowledge_graph: Option<RawKnowledgeGraph>,
    #[serde(default)]
    people_also_ask: Vec<RawRelated>,
}

#[derive(Debug, Deserialize)]
struct RawOrganic {
    #[serde(default)]
    title: String,
    link: String,
    #[serde(default)]
    snippet: String,
}

#[derive(Debug, Deserialize)]
struct RawAnswerBox {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawKnowledgeGraph {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRelated {
    #[serde(default)]
    question: String,
    #[serde(default)]
    snippet: Option<String>,
}

impl From<RawResponse> for SearchResponse {
    fn from(raw: RawResponse) -> Self {
        let results = raw
            .organic
            .into_iter()
            .filter(|o| !o.link.is_empty())
            .map(|o| SearchHit {
                title: o.title,
                link: o.link,
                snippet: o.snippet,
            })
            .collect();

        let answer_box = raw.answer_box.and_then(|b| b.answer.or(b.snippet));
        let overview = raw.knowledge_graph.and_then(|k| match (k.title, k.description) {
            (Some(t), Some(d)) => Some(format!("{}: {}", t, d)),
            (None, Some(d)) => Some(d),
            _ => None,
        });
        let related = raw
            .people_also_ask
            .into_iter()
            .filter_map(|r| r.snippet.map(|s| format!("{} {}", r.question, s)))
            .collect();

        Self {
            results,
            answer_box,
            overview,
            related,
        }
    }
}

/// Search API client
pub struct SerperSearchProvider {
    http_client: reqwest::Client,
    config: SearchConfig,
    api_key: String,
}

impl SerperSearchProvider {
    pub fn new(config: SearchConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .resolved_api_key()
            .ok_or_else(|| ProviderError::NotConfigured("search API key".to_string()))?;
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        Ok(Self {
            http_client,
            config,
            api_key,
        })
    }
}

#[async_trait]
impl SearchProvider for SerperSearchProvider {
    fn name(&self) -> &'static str {
        "serper"
    }

    async fn query(&self, query: &str) -> Result<SearchResponse, ProviderError> {
        let request = SearchRequest {
            q: query,
            num: self.config.results,
            gl: self.config.country.as_deref(),
            hl: self.config.language.as_deref(),
        };

        tracing::debug!(endpoint = %self.config.endpoint, "Querying search API");

        let response = self
            .http_client
            .post(&self.config.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited { retry_after_ms: None });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let raw: RawResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        let parsed = SearchResponse::from(raw);
        tracing::debug!(results = parsed.results.len(), "Search results received");
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_payload() {
        let json = r#"{
            "organic": [
                {"title": "Quiz", "link": "https://quiz.example/1", "snippet": "Capital of France"},
                {"title": "No link", "link": ""}
            ],
            "answerBox": {"snippet": "Paris is the capital"},
            "knowledgeGraph": {"title": "Paris", "description": "Capital of France"},
            "peopleAlsoAsk": [{"question": "Is Paris the capital?", "snippet": "Yes."}]
        }"#;
        let raw: RawResponse = serde_json::from_str(json).unwrap();
        let response = SearchResponse::from(raw);
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.answer_box.as_deref(), Some("Paris is the capital"));
        assert_eq!(response.overview.as_deref(), Some("Paris: Capital of France"));
        assert_eq!(response.related, vec!["Is Paris the capital? Yes.".to_string()]);
    }

    #[test]
    fn test_missing_sections_default() {
        let raw: RawResponse = serde_json::from_str("{}").unwrap();
        let response = SearchResponse::from(raw);
        assert!(response.results.is_empty());
        assert!(response.side_channels().is_empty());
    }
}
