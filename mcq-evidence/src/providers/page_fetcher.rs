//! HTTP page fetcher

use super::PageFetcher;
use crate::error::FetchError;
use crate::services::html_extractor::plain_text;
use crate::types::{FetchStatus, PageSnapshot};
use async_trait::async_trait;
use std::time::Duration;

/// Markup beyond this many bytes is discarded before parsing
const MAX_MARKUP_BYTES: usize = 2 * 1024 * 1024;

/// `reqwest`-backed fetcher, tolerant of non-2xx responses
pub struct HttpPageFetcher {
    http_client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new(user_agent: &str) -> Result<Self, FetchError> {
        let http_client = reqwest::Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self { http_client })
    }
}

fn truncate_markup(mut markup: String) -> String {
    if markup.len() > MAX_MARKUP_BYTES {
        let mut cut = MAX_MARKUP_BYTES;
        while !markup.is_char_boundary(cut) {
            cut -= 1;
        }
        markup.truncate(cut);
    }
    markup
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<PageSnapshot, FetchError> {
        tracing::debug!(url = %url, timeout_ms = timeout.as_millis() as u64, "Fetching page");

        let response = self
            .http_client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout(timeout.as_millis() as u64)
                } else {
                    FetchError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        let markup = response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(timeout.as_millis() as u64)
            } else {
                FetchError::Body(e.to_string())
            }
        })?;
        let markup = truncate_markup(markup);
        let text = plain_text(&markup);

        let status = if status.is_success() {
            FetchStatus::Ok(status.as_u16())
        } else {
            tracing::debug!(url = %url, status = status.as_u16(), "Non-2xx response");
            FetchStatus::Http(status.as_u16())
        };

        Ok(PageSnapshot {
            markup,
            text,
            status,
        })
    }
}
