//! mcq-evidence library interface
//!
//! Locates the answer to a multiple-choice question from web evidence:
//! search, fetch and vet candidate pages, run the extraction waterfall per
//! page, and combine every proposal into one graded verdict.
//!
//! Exposes public APIs for the CLI and for integration testing.

pub mod cache;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod providers;
pub mod services;
pub mod tunables;
pub mod types;

pub use crate::cache::{DecisionCache, MetricsSnapshot};
pub use crate::config::EngineConfig;
pub use crate::error::{FetchError, ProviderError};
pub use crate::orchestrator::{build_query, EngineSettings, EvidenceEngine, RunStats};
pub use crate::types::{
    AnswerResult, EvidenceTier, Letter, Polarity, Question, ResultState, Verdict,
};
