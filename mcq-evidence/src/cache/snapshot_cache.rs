//! URL-keyed page snapshot cache (process local)

use crate::types::PageSnapshot;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Short-lived snapshots shared by concurrent fetch workers
///
/// The lock is never held across an await.
pub struct SnapshotCache {
    entries: Mutex<HashMap<String, (Instant, PageSnapshot)>>,
    ttl: Duration,
    capacity: usize,
}

impl SnapshotCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (Instant, PageSnapshot)>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, url: &str) -> Option<PageSnapshot> {
        let mut entries = self.lock();
        let fresh = entries.get(url).map(|(stored, _)| stored.elapsed() < self.ttl)?;
        if fresh {
            entries.get(url).map(|(_, snapshot)| snapshot.clone())
        } else {
            entries.remove(url);
            None
        }
    }

    pub fn put(&self, url: &str, snapshot: PageSnapshot) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.lock();
        let ttl = self.ttl;
        entries.retain(|_, (stored, _)| stored.elapsed() < ttl);

        if !entries.contains_key(url) && entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, (stored, _))| *stored)
                .map(|(key, _)| key.clone());
            if let Some(key) = oldest {
                entries.remove(&key);
            }
        }
        entries.insert(url.to_string(), (Instant::now(), snapshot));
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FetchStatus;

    fn snapshot(text: &str) -> PageSnapshot {
        PageSnapshot {
            markup: format!("<p>{}</p>", text),
            text: text.to_string(),
            status: FetchStatus::Ok(200),
        }
    }

    #[test]
    fn test_get_put() {
        let cache = SnapshotCache::new(Duration::from_secs(60), 4);
        assert!(cache.get("https://a").is_none());
        cache.put("https://a", snapshot("alpha"));
        assert_eq!(cache.get("https://a").unwrap().text, "alpha");
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = SnapshotCache::new(Duration::from_secs(60), 2);
        cache.put("https://a", snapshot("a"));
        std::thread::sleep(Duration::from_millis(2));
        cache.put("https://b", snapshot("b"));
        std::thread::sleep(Duration::from_millis(2));
        cache.put("https://c", snapshot("c"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("https://a").is_none());
        assert!(cache.get("https://c").is_some());
    }

    #[test]
    fn test_expired_entries_dropped() {
        let cache = SnapshotCache::new(Duration::from_millis(5), 4);
        cache.put("https://a", snapshot("a"));
        std::thread::sleep(Duration::from_millis(15));
        assert!(cache.get("https://a").is_none());
        assert!(cache.is_empty());
    }
}
