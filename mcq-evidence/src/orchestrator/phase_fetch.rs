//! Batched page fetching

use super::{EvidenceEngine, RunStats};
use crate::error::FetchError;
use crate::tunables::FETCH_CONCURRENCY;
use crate::types::{CandidateSource, FetchStatus, PageSnapshot};
use futures::stream::{self, StreamExt};
use tracing::debug;

impl EvidenceEngine {
    /// Fetch one batch through a bounded worker pool
    ///
    /// Snapshots already in the snapshot cache are reused; only usable 2xx
    /// snapshots are cached. Errors become `FetchStatus::Failed` snapshots,
    /// and those plus non-2xx responses count as fetch failures.
    /// The returned batch is back in rank order whatever the completion order.
    pub(super) async fn fetch_batch(
        &self,
        batch: Vec<CandidateSource>,
        stats: &mut RunStats,
    ) -> Vec<CandidateSource> {
        let timeout = self.settings.fetch_timeout;

        let mut results: Vec<(CandidateSource, bool)> = stream::iter(batch)
            .map(|mut candidate| {
                let fetcher = self.fetcher.clone();
                let snapshots = self.snapshots.clone();
                async move {
                    if let Some(snapshot) = snapshots.get(&candidate.link) {
                        candidate.snapshot = Some(snapshot);
                        return (candidate, true);
                    }

                    let outcome =
                        match tokio::time::timeout(timeout, fetcher.fetch(&candidate.link, timeout))
                            .await
                        {
                            Ok(result) => result,
                            Err(_) => Err(FetchError::Timeout(timeout.as_millis() as u64)),
                        };

                    let snapshot = match outcome {
                        Ok(snapshot) => {
                            if snapshot.is_usable() {
                                snapshots.put(&candidate.link, snapshot.clone());
                            } else {
                                debug!(host = %candidate.host, status = ?snapshot.status, "Unusable response");
                            }
                            snapshot
                        }
                        Err(e) => {
                            debug!(host = %candidate.host, kind = e.kind(), error = %e, "Fetch failed");
                            PageSnapshot {
                                markup: String::new(),
                                text: String::new(),
                                status: FetchStatus::Failed(e.to_string()),
                            }
                        }
                    };
                    candidate.snapshot = Some(snapshot);
                    (candidate, false)
                }
            })
            .buffer_unordered(FETCH_CONCURRENCY)
            .collect()
            .await;

        results.sort_by_key(|(candidate, _)| candidate.rank);

        for (candidate, cache_hit) in &results {
            if *cache_hit {
                stats.snapshot_hits += 1;
            }
            match candidate.snapshot.as_ref().map(|s| &s.status) {
                Some(FetchStatus::Ok(_)) => stats.fetched += 1,
                _ => stats.fetch_failures += 1,
            }
        }

        debug!(
            batch = results.len(),
            fetched = stats.fetched,
            failures = stats.fetch_failures,
            "Batch fetched"
        );
        results.into_iter().map(|(candidate, _)| candidate).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::providers::{PageFetcher, SearchProvider, SearchResponse};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct NoSearch;

    #[async_trait]
    impl SearchProvider for NoSearch {
        fn name(&self) -> &'static str {
            "none"
        }

        async fn query(&self, _query: &str) -> Result<SearchResponse, ProviderError> {
            Ok(SearchResponse::default())
        }
    }

    struct Pages {
        pages: HashMap<String, String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PageFetcher for Pages {
        async fn fetch(&self, url: &str, _timeout: Duration) -> Result<PageSnapshot, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.pages.get(url) {
                Some(text) => Ok(PageSnapshot {
                    markup: format!("<p>{}</p>", text),
                    text: text.clone(),
                    status: FetchStatus::Ok(200),
                }),
                None => Err(FetchError::Network("unreachable".into())),
            }
        }
    }

    fn candidates() -> Vec<CandidateSource> {
        (0..3)
            .map(|rank| {
                CandidateSource::new(
                    rank,
                    format!("Page {}", rank),
                    format!("https://site{}.example/q", rank),
                    String::new(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_fetch_batch_counts_and_orders() {
        let mut pages = HashMap::new();
        pages.insert("https://site0.example/q".to_string(), "zero".to_string());
        pages.insert("https://site2.example/q".to_string(), "two".to_string());
        let fetcher = Arc::new(Pages {
            pages,
            calls: AtomicUsize::new(0),
        });
        let engine = EvidenceEngine::new(Arc::new(NoSearch), fetcher.clone());

        let mut stats = RunStats::default();
        let fetched = engine.fetch_batch(candidates(), &mut stats).await;
        assert_eq!(fetched.iter().map(|c| c.rank).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(stats.fetched, 2);
        assert_eq!(stats.fetch_failures, 1);
        assert!(matches!(
            fetched[1].snapshot.as_ref().map(|s| &s.status),
            Some(FetchStatus::Failed(_))
        ));

        // Second pass is served from the snapshot cache
        let mut stats = RunStats::default();
        engine.fetch_batch(candidates(), &mut stats).await;
        assert_eq!(stats.snapshot_hits, 2);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 4);
    }

    struct Forbidden {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PageFetcher for Forbidden {
        async fn fetch(&self, _url: &str, _timeout: Duration) -> Result<PageSnapshot, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(PageSnapshot {
                markup: "<p>Capital of France? A) London B) Paris</p>".into(),
                text: "Capital of France? A) London B) Paris".into(),
                status: FetchStatus::Http(403),
            })
        }
    }

    #[tokio::test]
    async fn test_non_2xx_counts_as_failure_and_is_not_cached() {
        let fetcher = Arc::new(Forbidden {
            calls: AtomicUsize::new(0),
        });
        let engine = EvidenceEngine::new(Arc::new(NoSearch), fetcher.clone());

        let mut stats = RunStats::default();
        engine.fetch_batch(candidates(), &mut stats).await;
        assert_eq!(stats.fetched, 0);
        assert_eq!(stats.fetch_failures, 3);

        let mut stats = RunStats::default();
        engine.fetch_batch(candidates(), &mut stats).await;
        assert_eq!(stats.snapshot_hits, 0);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 6);
    }
}
