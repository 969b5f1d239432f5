//! Decision cache, page snapshot cache and run metrics

pub mod decision_cache;
pub mod metrics;
pub mod snapshot_cache;

pub use decision_cache::{DecisionCache, DecisionCacheEntry, DECISION_CACHE_KEY};
pub use metrics::{MetricsSnapshot, RunMetrics, RunRecord};
pub use snapshot_cache::SnapshotCache;
