//! Cross-run metrics

use crate::orchestrator::statistics::{BlockReason, RunStats};
use crate::types::{EvidenceTier, Letter, ResultState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use uuid::Uuid;

/// Summary of one finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub fingerprint: String,
    pub finished_at: DateTime<Utc>,
    pub result_state: ResultState,
    pub evidence_tier: EvidenceTier,
    pub answer_letter: Option<Letter>,
    pub confidence: f64,
    pub cached: bool,
    pub stats: RunStats,
}

/// Serializable view of the accumulated counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub runs: usize,
    /// "answered" (a letter was chosen) vs "unanswered"
    pub outcomes: BTreeMap<String, usize>,
    pub result_states: BTreeMap<String, usize>,
    pub evidence_tiers: BTreeMap<String, usize>,
    pub blocked: BTreeMap<BlockReason, usize>,
    pub cache_hits: usize,
    pub recent: Vec<RunRecord>,
}

/// Counters plus a capped ring of recent runs
pub struct RunMetrics {
    inner: Mutex<MetricsSnapshot>,
    recent: Mutex<VecDeque<RunRecord>>,
    recent_cap: usize,
}

impl RunMetrics {
    pub fn new(recent_cap: usize) -> Self {
        Self {
            inner: Mutex::new(MetricsSnapshot::default()),
            recent: Mutex::new(VecDeque::with_capacity(recent_cap)),
            recent_cap,
        }
    }

    pub fn record(&self, record: RunRecord) {
        {
            let mut counters = self
                .inner
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            counters.runs += 1;
            let outcome = if record.answer_letter.is_some() {
                "answered"
            } else {
                "unanswered"
            };
            *counters.outcomes.entry(outcome.to_string()).or_default() += 1;
            *counters
                .result_states
                .entry(record.result_state.as_str().to_string())
                .or_default() += 1;
            *counters
                .evidence_tiers
                .entry(record.evidence_tier.as_str().to_string())
                .or_default() += 1;
            for (reason, count) in &record.stats.blocked {
                *counters.blocked.entry(*reason).or_default() += count;
            }
            if record.cached {
                counters.cache_hits += 1;
            }
        }

        let mut recent = self
            .recent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.recent_cap == 0 {
            return;
        }
        while recent.len() >= self.recent_cap {
            recent.pop_front();
        }
        recent.push_back(record);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut snapshot = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        snapshot.recent = self
            .recent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect();
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(state: ResultState, letter: Option<Letter>) -> RunRecord {
        let mut stats = RunStats::default();
        stats.block(BlockReason::Paywall);
        RunRecord {
            run_id: Uuid::new_v4(),
            fingerprint: "fp".into(),
            finished_at: Utc::now(),
            result_state: state,
            evidence_tier: EvidenceTier::Weak,
            answer_letter: letter,
            confidence: 0.3,
            cached: false,
            stats,
        }
    }

    #[test]
    fn test_counters_accumulate() {
        let metrics = RunMetrics::new(30);
        metrics.record(record(ResultState::Suggested, Some(Letter::A)));
        metrics.record(record(ResultState::Inconclusive, None));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.runs, 2);
        assert_eq!(snapshot.outcomes["answered"], 1);
        assert_eq!(snapshot.result_states["inconclusive"], 1);
        assert_eq!(snapshot.evidence_tiers["WEAK"], 2);
        assert_eq!(snapshot.blocked[&BlockReason::Paywall], 2);
    }

    #[test]
    fn test_recent_ring_is_capped() {
        let metrics = RunMetrics::new(3);
        for _ in 0..5 {
            metrics.record(record(ResultState::Conflict, Some(Letter::B)));
        }
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.runs, 5);
        assert_eq!(snapshot.recent.len(), 3);
    }
}
