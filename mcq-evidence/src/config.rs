//! Engine configuration
//!
//! Loaded from the TOML bootstrap file located by
//! `mcq_common::config::ConfigFileResolver`. Every field has a serde default so a
//! missing file or section falls back to compiled defaults. API keys resolve
//! environment first, then TOML.

use crate::tunables::{
    DECISION_CACHE_MAX_ENTRIES, DECISION_CACHE_TTL_DAYS, FETCH_TIMEOUT_MS, MAX_CANDIDATES,
    MODEL_PAGE_BUDGET, PROVIDER_MIN_INTERVAL_MS, PROVIDER_QUOTA_COOLDOWN_SECS,
};
use mcq_common::config::{resolve_secret, LoggingConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Application name used for the default config directory
pub const APP_NAME: &str = "mcq-evidence";

/// Environment variable overriding the config file location
pub const CONFIG_ENV_VAR: &str = "MCQ_CONFIG";

pub const SEARCH_API_KEY_ENV: &str = "MCQ_SEARCH_API_KEY";
pub const INFERENCE_API_KEY_ENV: &str = "MCQ_INFERENCE_API_KEY";

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub inference: InferenceConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Produce an evidence-only overview for each answer
    #[serde(default)]
    pub overview: bool,

    /// Model-assisted single-page extractions allowed per run
    #[serde(default = "default_model_page_budget")]
    pub model_page_budget: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            search: SearchConfig::default(),
            inference: InferenceConfig::default(),
            fetch: FetchConfig::default(),
            cache: CacheConfig::default(),
            logging: LoggingConfig::default(),
            overview: false,
            model_page_budget: default_model_page_budget(),
        }
    }
}

fn default_model_page_budget() -> usize {
    MODEL_PAGE_BUDGET
}

/// `[search]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    /// Overridden by `MCQ_SEARCH_API_KEY`
    #[serde(default)]
    pub api_key: Option<String>,

    /// Results requested per query
    #[serde(default = "default_search_results")]
    pub results: usize,

    /// Locale hints passed to the search API
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            api_key: None,
            results: default_search_results(),
            country: None,
            language: None,
        }
    }
}

impl SearchConfig {
    pub fn resolved_api_key(&self) -> Option<String> {
        resolve_secret(SEARCH_API_KEY_ENV, self.api_key.as_deref())
    }
}

fn default_search_endpoint() -> String {
    "https://google.serper.dev/search".to_string()
}

fn default_search_results() -> usize {
    MAX_CANDIDATES
}

/// `[inference]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_inference_endpoint")]
    pub endpoint: String,

    /// Overridden by `MCQ_INFERENCE_API_KEY`
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_inference_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Minimum spacing between calls
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    /// Cooldown after a quota-exhausted response
    #[serde(default = "default_quota_cooldown_secs")]
    pub quota_cooldown_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_inference_endpoint(),
            api_key: None,
            model: default_inference_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            min_interval_ms: default_min_interval_ms(),
            quota_cooldown_secs: default_quota_cooldown_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl InferenceConfig {
    pub fn resolved_api_key(&self) -> Option<String> {
        resolve_secret(INFERENCE_API_KEY_ENV, self.api_key.as_deref())
    }
}

fn default_inference_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_inference_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_tokens() -> u32 {
    400
}

fn default_min_interval_ms() -> u64 {
    PROVIDER_MIN_INTERVAL_MS
}

fn default_quota_cooldown_secs() -> u64 {
    PROVIDER_QUOTA_COOLDOWN_SECS
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// `[fetch]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_fetch_timeout_ms(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_fetch_timeout_ms() -> u64 {
    FETCH_TIMEOUT_MS
}

fn default_user_agent() -> String {
    format!("mcq-evidence/{}", env!("CARGO_PKG_VERSION"))
}

/// `[cache]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Read/write the decision cache
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// SQLite file for the decision cache; in-memory when unset
    #[serde(default)]
    pub database: Option<PathBuf>,

    #[serde(default = "default_ttl_days")]
    pub ttl_days: i64,

    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            database: None,
            ttl_days: default_ttl_days(),
            max_entries: default_max_entries(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_ttl_days() -> i64 {
    DECISION_CACHE_TTL_DAYS
}

fn default_max_entries() -> usize {
    DECISION_CACHE_MAX_ENTRIES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.fetch.timeout_ms, FETCH_TIMEOUT_MS);
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_partial_sections() {
        let config: EngineConfig = toml::from_str(
            r#"
            overview = true

            [inference]
            model = "local-model"

            [cache]
            ttl_days = 3
            "#,
        )
        .unwrap();
        assert!(config.overview);
        assert_eq!(config.inference.model, "local-model");
        assert_eq!(config.inference.min_interval_ms, PROVIDER_MIN_INTERVAL_MS);
        assert_eq!(config.cache.ttl_days, 3);
        assert_eq!(config.cache.max_entries, DECISION_CACHE_MAX_ENTRIES);
    }
}
