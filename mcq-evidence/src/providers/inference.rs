//! Chat-completion inference client and its rate-limited wrapper

use super::{InferenceOptions, InferenceProvider, RateLimiter};
use crate::config::InferenceConfig;
use crate::error::ProviderError;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Map a 429 body to quota exhaustion or a short rate limit
fn classify_429(body: &str, retry_after_ms: Option<u64>) -> ProviderError {
    if body.contains("insufficient_quota") || body.contains("quota_exceeded") {
        ProviderError::QuotaExhausted { until: Utc::now() }
    } else {
        ProviderError::RateLimited { retry_after_ms }
    }
}

/// `Retry-After` in whole seconds
fn parse_retry_after(value: Option<&str>) -> Option<u64> {
    value?.trim().parse::<u64>().ok().map(|s| s * 1000)
}

/// OpenAI-compatible chat completion client
pub struct ChatCompletionProvider {
    http_client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl ChatCompletionProvider {
    pub fn new(config: &InferenceConfig) -> Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let api_key = config.resolved_api_key();
        if api_key.is_none() {
            tracing::warn!("Inference API key not configured, model-assisted steps disabled");
        }
        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl InferenceProvider for ChatCompletionProvider {
    fn name(&self) -> &'static str {
        "chat_completion"
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(
        &self,
        system: &str,
        user: &str,
        options: &InferenceOptions,
    ) -> Result<String, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::NotConfigured("inference API key".to_string()))?;

        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = parse_retry_after(
                response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok()),
            );
            let body = response.text().await.unwrap_or_default();
            return Err(classify_429(&body, retry_after));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::Parse("empty completion".to_string()))
    }
}

/// Any provider behind an owned [`RateLimiter`]
pub struct RateLimitedInference<P> {
    inner: P,
    limiter: RateLimiter,
}

impl<P: InferenceProvider> RateLimitedInference<P> {
    pub fn new(inner: P, limiter: RateLimiter) -> Self {
        Self { inner, limiter }
    }

    pub fn from_config(inner: P, config: &InferenceConfig) -> Self {
        let limiter = RateLimiter::new(
            inner.name(),
            Duration::from_millis(config.min_interval_ms),
            Duration::from_secs(config.quota_cooldown_secs),
        );
        Self::new(inner, limiter)
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}

#[async_trait]
impl<P: InferenceProvider> InferenceProvider for RateLimitedInference<P> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn is_available(&self) -> bool {
        self.inner.is_available() && self.limiter.quota_until().is_none()
    }

    async fn complete(
        &self,
        system: &str,
        user: &str,
        options: &InferenceOptions,
    ) -> Result<String, ProviderError> {
        let inner = &self.inner;
        self.limiter
            .call(move || inner.complete(system, user, options))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_classify_429() {
        let quota = classify_429(r#"{"error":{"code":"insufficient_quota"}}"#, None);
        assert!(matches!(quota, ProviderError::QuotaExhausted { .. }));
        let limited = classify_429(r#"{"error":{"code":"rate_limit_exceeded"}}"#, Some(2000));
        assert!(matches!(limited, ProviderError::RateLimited { retry_after_ms: Some(2000) }));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(Some("3")), Some(3000));
        assert_eq!(parse_retry_after(Some("soon")), None);
        assert_eq!(parse_retry_after(None), None);
    }

    #[test]
    fn test_unconfigured_provider_unavailable() {
        let config = InferenceConfig {
            api_key: None,
            ..Default::default()
        };
        // Environment may carry a key; only assert when it does not
        if std::env::var(crate::config::INFERENCE_API_KEY_ENV).is_err() {
            let provider = ChatCompletionProvider::new(&config).unwrap();
            assert!(!provider.is_available());
        }
    }

    struct QuotaProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl InferenceProvider for QuotaProvider {
        fn name(&self) -> &'static str {
            "quota"
        }

        async fn complete(
            &self,
            _system: &str,
            _user: &str,
            _options: &InferenceOptions,
        ) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::QuotaExhausted { until: Utc::now() })
        }
    }

    #[tokio::test]
    async fn test_wrapper_cools_down_after_quota() {
        let wrapped = RateLimitedInference::new(
            QuotaProvider {
                calls: AtomicUsize::new(0),
            },
            RateLimiter::new("quota", Duration::from_millis(1), Duration::from_secs(60)),
        );
        let options = InferenceOptions::default();
        assert!(wrapped.complete("s", "u", &options).await.is_err());
        assert!(!wrapped.is_available());
        assert!(matches!(
            wrapped.complete("s", "u", &options).await,
            Err(ProviderError::QuotaExhausted { .. })
        ));
        assert_eq!(wrapped.inner.calls.load(Ordering::SeqCst), 1);
    }
}
