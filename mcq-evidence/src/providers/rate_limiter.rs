//! Per-provider call serialization, pacing and quota cooldown
//!
//! Calls go through one ordered queue (a fair async mutex held for the whole
//! call), spaced by a minimum interval. A quota-exhausted response starts a
//! cooldown during which every call fails immediately without queueing.
//! Short rate limits are retried with capped exponential backoff.

use crate::error::ProviderError;
use crate::tunables::{PROVIDER_MAX_BACKOFF_MS, PROVIDER_MAX_RATE_LIMIT_RETRIES};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Owned limiter for one provider instance
pub struct RateLimiter {
    name: &'static str,
    /// Held across the call so calls are serialized in arrival order
    last_call: Mutex<Option<Instant>>,
    /// Checked before queueing; never held across an await
    quota_until: std::sync::Mutex<Option<DateTime<Utc>>>,
    min_interval: Duration,
    quota_cooldown: Duration,
    max_retries: u32,
    max_backoff: Duration,
}

impl RateLimiter {
    pub fn new(name: &'static str, min_interval: Duration, quota_cooldown: Duration) -> Self {
        Self {
            name,
            last_call: Mutex::new(None),
            quota_until: std::sync::Mutex::new(None),
            min_interval,
            quota_cooldown,
            max_retries: PROVIDER_MAX_RATE_LIMIT_RETRIES,
            max_backoff: Duration::from_millis(PROVIDER_MAX_BACKOFF_MS),
        }
    }

    /// Override the rate-limit retry policy
    pub fn with_retry(mut self, max_retries: u32, max_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.max_backoff = max_backoff;
        self
    }

    /// End of the active quota cooldown, if any
    pub fn quota_until(&self) -> Option<DateTime<Utc>> {
        let guard = self
            .quota_until
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        (*guard).filter(|until| *until > Utc::now())
    }

    fn check_quota(&self) -> Result<(), ProviderError> {
        match self.quota_until() {
            Some(until) => {
                debug!(provider = self.name, %until, "Quota cooldown active, failing fast");
                Err(ProviderError::QuotaExhausted { until })
            }
            None => Ok(()),
        }
    }

    fn start_cooldown(&self) -> DateTime<Utc> {
        let cooldown = chrono::Duration::from_std(self.quota_cooldown)
            .unwrap_or_else(|_| chrono::Duration::seconds(0));
        let until = Utc::now() + cooldown;
        let mut guard = self
            .quota_until
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(until);
        until
    }

    /// Run `operation` through the queue
    ///
    /// `operation` is re-invoked for each rate-limit retry.
    pub async fn call<F, Fut, T>(&self, mut operation: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.check_quota()?;

        let mut last = self.last_call.lock().await;
        let mut attempt = 0u32;
        let mut backoff = self.min_interval.max(Duration::from_millis(250));

        loop {
            // Cooldown may have started while this call was queued
            self.check_quota()?;

            if let Some(last_time) = *last {
                let elapsed = last_time.elapsed();
                if elapsed < self.min_interval {
                    let wait_time = self.min_interval - elapsed;
                    debug!(provider = self.name, ?wait_time, "Rate limiting: waiting");
                    tokio::time::sleep(wait_time).await;
                }
            }
            *last = Some(Instant::now());

            match operation().await {
                Ok(value) => return Ok(value),
                Err(ProviderError::QuotaExhausted { .. }) => {
                    let until = self.start_cooldown();
                    warn!(provider = self.name, %until, "Quota exhausted, cooling down");
                    return Err(ProviderError::QuotaExhausted { until });
                }
                Err(ProviderError::RateLimited { retry_after_ms }) if attempt < self.max_retries => {
                    attempt += 1;
                    let delay = retry_after_ms
                        .map(Duration::from_millis)
                        .unwrap_or(backoff)
                        .min(self.max_backoff);
                    warn!(
                        provider = self.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    backoff = (backoff * 2).min(self.max_backoff);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn limiter(min_interval_ms: u64) -> RateLimiter {
        RateLimiter::new(
            "test",
            Duration::from_millis(min_interval_ms),
            Duration::from_secs(60),
        )
        .with_retry(2, Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_quota_cooldown_fails_fast() {
        let limiter = limiter(1);
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let first: Result<(), _> = limiter
            .call(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::QuotaExhausted { until: Utc::now() }) }
            })
            .await;
        assert!(matches!(first, Err(ProviderError::QuotaExhausted { .. })));
        assert!(limiter.quota_until().is_some());

        let counter = calls.clone();
        let second: Result<(), _> = limiter
            .call(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(matches!(second, Err(ProviderError::QuotaExhausted { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rate_limited_retries_then_succeeds() {
        let limiter = limiter(1);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result = limiter
            .call(|| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ProviderError::RateLimited { retry_after_ms: Some(5) })
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_retries_are_capped() {
        let limiter = limiter(1);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = limiter
            .call(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::RateLimited { retry_after_ms: None }) }
            })
            .await;
        assert!(matches!(result, Err(ProviderError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_min_interval_between_calls() {
        let limiter = limiter(40);
        let start = Instant::now();
        for _ in 0..2 {
            limiter.call(|| async { Ok::<_, ProviderError>(()) }).await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_other_errors_not_retried() {
        let limiter = limiter(1);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = limiter
            .call(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::Http { status: 500, body: String::new() }) }
            })
            .await;
        assert!(matches!(result, Err(ProviderError::Http { status: 500, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
