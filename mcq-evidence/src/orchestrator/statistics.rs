//! Per-run statistics
//!
//! Counters collected while one question is solved; attached to the result
//! and accumulated into `RunMetrics`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Why a fetched source was skipped before extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// Too little text and topically weak
    LowCoverage,
    Paywall,
    Obfuscated,
    /// User options not recognizable in the page
    OptionsMismatch,
    FetchFailed,
}

impl BlockReason {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockReason::LowCoverage => "low_coverage",
            BlockReason::Paywall => "paywall",
            BlockReason::Obfuscated => "obfuscated",
            BlockReason::OptionsMismatch => "options_mismatch",
            BlockReason::FetchFailed => "fetch_failed",
        }
    }
}

/// Counters for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    /// Search results considered
    pub candidates: usize,
    /// Snapshots obtained (network or cache)
    pub fetched: usize,
    pub fetch_failures: usize,
    /// Snapshots served by the snapshot cache
    pub snapshot_hits: usize,
    pub blocked: BTreeMap<BlockReason, usize>,
    /// Sources that contributed a vote
    pub accepted_sources: usize,
    /// Sources whose text went to the knowledge pool
    pub pooled_sources: usize,
    pub model_calls: usize,
    pub early_exit: bool,
    pub second_batch: bool,
    pub synthesis_used: bool,
    pub reflection_used: bool,
    pub elapsed_ms: u64,
}

impl RunStats {
    pub fn block(&mut self, reason: BlockReason) {
        *self.blocked.entry(reason).or_default() += 1;
    }

    pub fn blocked_count(&self, reason: BlockReason) -> usize {
        self.blocked.get(&reason).copied().unwrap_or(0)
    }

    pub fn total_blocked(&self) -> usize {
        self.blocked.values().sum()
    }

    pub fn display_string(&self) -> String {
        format!(
            "{} candidates, {} fetched ({} failed), {} blocked, {} accepted, {} model calls, {} ms",
            self.candidates,
            self.fetched,
            self.fetch_failures,
            self.total_blocked(),
            self.accepted_sources,
            self.model_calls,
            self.elapsed_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_counters() {
        let mut stats = RunStats::default();
        stats.block(BlockReason::Paywall);
        stats.block(BlockReason::Paywall);
        stats.block(BlockReason::Obfuscated);
        assert_eq!(stats.blocked_count(BlockReason::Paywall), 2);
        assert_eq!(stats.blocked_count(BlockReason::FetchFailed), 0);
        assert_eq!(stats.total_blocked(), 3);
    }

    #[test]
    fn test_blocked_serializes_with_reason_keys() {
        let mut stats = RunStats::default();
        stats.block(BlockReason::OptionsMismatch);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["blocked"]["options_mismatch"], 1);
    }

    #[test]
    fn test_display_string() {
        let stats = RunStats {
            candidates: 8,
            fetched: 6,
            fetch_failures: 2,
            accepted_sources: 3,
            ..Default::default()
        };
        assert!(stats.display_string().starts_with("8 candidates, 6 fetched (2 failed)"));
    }
}
