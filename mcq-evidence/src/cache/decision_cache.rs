//! Fingerprint-keyed decision cache
//!
//! Only confirmed verdicts with STRONG evidence are written, and only such
//! entries are served back. Entries expire after a fixed number of days and
//! the map is bounded, evicting the least recently updated entry first. The
//! whole map is stored as one JSON value under a single store key.

use crate::providers::PersistenceStore;
use crate::types::Verdict;
use chrono::{DateTime, Utc};
use mcq_common::time::{days_between, now};
use mcq_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Store key holding the serialized map
pub const DECISION_CACHE_KEY: &str = "mcq_decision_cache_v1";

/// One cached decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionCacheEntry {
    pub fingerprint: String,
    pub verdict: Verdict,
    /// Body of the chosen option; the fingerprint ignores option order, so
    /// the letter is re-derived from this on read
    pub answer_text: Option<String>,
    /// Links of the sources that voted for the cached answer
    pub links: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

type DecisionMap = BTreeMap<String, DecisionCacheEntry>;

pub struct DecisionCache {
    store: Arc<dyn PersistenceStore>,
    ttl_days: i64,
    max_entries: usize,
}

impl DecisionCache {
    pub fn new(store: Arc<dyn PersistenceStore>, ttl_days: i64, max_entries: usize) -> Self {
        Self {
            store,
            ttl_days,
            max_entries,
        }
    }

    fn is_expired(&self, entry: &DecisionCacheEntry, at: DateTime<Utc>) -> bool {
        days_between(entry.updated_at, at) >= self.ttl_days
    }

    async fn load(&self) -> DecisionMap {
        match self.store.get(DECISION_CACHE_KEY).await {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
                warn!(error = %e, "Decision cache unreadable, starting empty");
                DecisionMap::new()
            }),
            Ok(None) => DecisionMap::new(),
            Err(e) => {
                warn!(error = %e, "Decision cache load failed");
                DecisionMap::new()
            }
        }
    }

    async fn save(&self, map: &DecisionMap) -> Result<()> {
        let json = serde_json::to_string(map).map_err(|e| Error::Serialization(e.to_string()))?;
        self.store.set(DECISION_CACHE_KEY, &json).await
    }

    /// Cached decision for `fingerprint`, if fresh and still confirmed/STRONG
    pub async fn get(&self, fingerprint: &str) -> Option<DecisionCacheEntry> {
        let map = self.load().await;
        let entry = map.get(fingerprint)?;
        if !entry.verdict.is_cacheable() {
            debug!(fingerprint, "Cached entry not cacheable, ignoring");
            return None;
        }
        if self.is_expired(entry, now()) {
            debug!(fingerprint, "Cached entry expired");
            return None;
        }
        Some(entry.clone())
    }

    /// Store a decision; returns `false` when the verdict is not cacheable
    pub async fn put(
        &self,
        fingerprint: &str,
        verdict: &Verdict,
        answer_text: Option<String>,
        links: Vec<String>,
    ) -> Result<bool> {
        if !verdict.is_cacheable() {
            return Ok(false);
        }

        let at = now();
        let mut map = self.load().await;
        map.retain(|_, entry| !self.is_expired(entry, at));
        map.insert(
            fingerprint.to_string(),
            DecisionCacheEntry {
                fingerprint: fingerprint.to_string(),
                verdict: verdict.clone(),
                answer_text,
                links,
                updated_at: at,
            },
        );

        while map.len() > self.max_entries {
            let oldest = map
                .iter()
                .min_by_key(|(_, entry)| entry.updated_at)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    debug!(fingerprint = %key, "Evicting oldest decision");
                    map.remove(&key);
                }
                None => break,
            }
        }

        self.save(&map).await?;
        Ok(true)
    }

    /// Number of stored entries (fresh or not)
    pub async fn len(&self) -> usize {
        self.load().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MemoryStore;
    use crate::types::{EvidenceTier, Letter, ResultState};

    fn confirmed() -> Verdict {
        Verdict {
            best_letter: Some(Letter::B),
            result_state: ResultState::Confirmed,
            reason: "agree".into(),
            confidence: 0.9,
            evidence_tier: EvidenceTier::Strong,
        }
    }

    fn cache(max_entries: usize) -> (Arc<MemoryStore>, DecisionCache) {
        let store = Arc::new(MemoryStore::new());
        let cache = DecisionCache::new(store.clone(), 14, max_entries);
        (store, cache)
    }

    #[tokio::test]
    async fn test_write_gate() {
        let (_, cache) = cache(10);
        let mut weak = confirmed();
        weak.evidence_tier = EvidenceTier::Medium;
        assert!(!cache.put("fp", &weak, None, vec![]).await.unwrap());
        assert!(cache.get("fp").await.is_none());

        assert!(cache.put("fp", &confirmed(), Some("Paris".into()), vec!["https://a".into()]).await.unwrap());
        let entry = cache.get("fp").await.unwrap();
        assert_eq!(entry.verdict.best_letter, Some(Letter::B));
        assert_eq!(entry.links, vec!["https://a".to_string()]);
    }

    #[tokio::test]
    async fn test_read_gate_and_expiry() {
        let (store, cache) = cache(10);
        let mut map = DecisionMap::new();
        let mut suggested = confirmed();
        suggested.result_state = ResultState::Suggested;
        map.insert(
            "suggested".into(),
            DecisionCacheEntry {
                fingerprint: "suggested".into(),
                verdict: suggested,
                answer_text: None,
                links: vec![],
                updated_at: now(),
            },
        );
        map.insert(
            "stale".into(),
            DecisionCacheEntry {
                fingerprint: "stale".into(),
                verdict: confirmed(),
                answer_text: None,
                links: vec![],
                updated_at: now() - chrono::Duration::days(15),
            },
        );
        store
            .set(DECISION_CACHE_KEY, &serde_json::to_string(&map).unwrap())
            .await
            .unwrap();

        assert!(cache.get("suggested").await.is_none());
        assert!(cache.get("stale").await.is_none());

        // Writing prunes the expired entry
        cache.put("fresh", &confirmed(), None, vec![]).await.unwrap();
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_oldest_evicted_at_capacity() {
        let (_, cache) = cache(2);
        for fp in ["one", "two", "three"] {
            cache.put(fp, &confirmed(), None, vec![]).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(cache.len().await, 2);
        assert!(cache.get("one").await.is_none());
        assert!(cache.get("three").await.is_some());
    }

    #[tokio::test]
    async fn test_corrupt_payload_starts_empty() {
        let (store, cache) = cache(10);
        store.set(DECISION_CACHE_KEY, "not json").await.unwrap();
        assert!(cache.get("fp").await.is_none());
        assert!(cache.put("fp", &confirmed(), None, vec![]).await.unwrap());
        assert!(cache.get("fp").await.is_some());
    }
}
