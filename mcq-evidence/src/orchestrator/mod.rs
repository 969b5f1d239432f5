//! Evidence engine
//!
//! One logical run per question:
//! 1. Parse; malformed lettering short-circuits to inconclusive
//! 2. Serve a confirmed/STRONG decision from the cache when present
//! 3. Search, then fetch the first batch through a bounded worker pool
//! 4. Gate and run the extraction waterfall per source, in rank order
//! 5. Fetch a second batch only when support is still insufficient
//! 6. Cross-source synthesis, then reflection, when direct evidence is weak
//! 7. Vote, assemble the result, write the cache, record metrics
//!
//! Extraction and scoring are sequential within a run so vote order and the
//! early-exit point are reproducible.

mod phase_extraction;
mod phase_fetch;
mod phase_synthesis;
pub mod prompts;
pub mod statistics;
pub mod strategies;
pub mod weights;

pub use statistics::{BlockReason, RunStats};
pub use strategies::{EvidenceCandidate, Strategy};

use crate::cache::{DecisionCache, MetricsSnapshot, RunMetrics, RunRecord, SnapshotCache};
use crate::config::EngineConfig;
use crate::error::ProviderError;
use crate::providers::{InferenceOptions, InferenceProvider, PageFetcher, SearchProvider};
use crate::services::evidence::{compute_votes_and_state, tally_votes};
use crate::services::options_match::match_body_to_user_letter;
use crate::services::question_parser::collapse_whitespace;
use crate::tunables::{
    EARLY_EXIT_VOTE, FETCH_TIMEOUT_MS, FIRST_BATCH_SIZE, MAX_CANDIDATES, METRICS_RECENT_RUNS,
    MODEL_PAGE_BUDGET, SNAPSHOT_CAPACITY, SNAPSHOT_TTL_SECS, SUFFICIENT_SUPPORT_VOTE,
};
use crate::types::{
    AnswerResult, CandidateSource, EvidenceBlock, Letter, Question, SourceVote, Verdict, VoteTally,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Search query length cap (chars)
const QUERY_MAX_CHARS: usize = 250;

/// Stems shorter than this get the option bodies appended to the query
const QUERY_SHORT_STEM_CHARS: usize = 40;

/// Run-independent engine knobs
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub fetch_timeout: Duration,
    pub model_page_budget: usize,
    /// Produce an evidence-only overview
    pub overview: bool,
    pub use_decision_cache: bool,
    pub inference_options: InferenceOptions,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_millis(FETCH_TIMEOUT_MS),
            model_page_budget: MODEL_PAGE_BUDGET,
            overview: false,
            use_decision_cache: true,
            inference_options: InferenceOptions::default(),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            fetch_timeout: Duration::from_millis(config.fetch.timeout_ms),
            model_page_budget: config.model_page_budget,
            overview: config.overview,
            use_decision_cache: config.cache.enabled,
            inference_options: InferenceOptions {
                temperature: config.inference.temperature,
                max_tokens: config.inference.max_tokens,
            },
        }
    }
}

/// Text kept for synthesis and reflection
#[derive(Debug, Clone)]
pub(crate) struct PooledText {
    pub source: String,
    pub text: String,
    /// Search snippet or side channel rather than fetched page text
    pub snippet: bool,
}

/// Mutable state of one run
pub(crate) struct RunContext {
    pub question: Question,
    pub votes: Vec<SourceVote>,
    pub blocks: Vec<EvidenceBlock>,
    pub pool: Vec<PooledText>,
    pub stats: RunStats,
    pub model_pages_used: usize,
    /// Set after a quota-exhausted response
    pub model_disabled: bool,
    pub early_exit: bool,
}

impl RunContext {
    fn new(question: Question) -> Self {
        Self {
            question,
            votes: Vec::new(),
            blocks: Vec::new(),
            pool: Vec::new(),
            stats: RunStats::default(),
            model_pages_used: 0,
            model_disabled: false,
            early_exit: false,
        }
    }

    pub fn tally(&self) -> VoteTally {
        tally_votes(&self.votes, &self.blocks)
    }

    pub fn leading_vote(&self) -> f64 {
        self.tally().best_score()
    }

    /// Best letter among non-model votes
    pub fn direct_best(&self) -> Option<Letter> {
        let direct: Vec<SourceVote> = self
            .votes
            .iter()
            .filter(|v| !v.method.is_model())
            .cloned()
            .collect();
        tally_votes(&direct, &self.blocks).best
    }

    /// Note a failed model call; quota exhaustion disables the model for the run
    pub fn provider_failed(&mut self, step: &'static str, error: &ProviderError) {
        if matches!(error, ProviderError::QuotaExhausted { .. }) {
            self.model_disabled = true;
        }
        warn!(step, error = %error, "Inference call failed");
    }

    /// Append a vote and its evidence block together
    pub fn accept(&mut self, vote: SourceVote, block: Option<EvidenceBlock>) {
        self.votes.push(vote);
        if let Some(block) = block {
            self.blocks.push(block);
        }
        self.stats.accepted_sources += 1;

        let leading = self.leading_vote();
        if leading >= EARLY_EXIT_VOTE && !self.early_exit {
            info!(leading, "Leading vote reached early-exit threshold");
            self.early_exit = true;
            self.stats.early_exit = true;
        }
    }
}

/// Answer-evidence engine
pub struct EvidenceEngine {
    search: Arc<dyn SearchProvider>,
    fetcher: Arc<dyn PageFetcher>,
    inference: Option<Arc<dyn InferenceProvider>>,
    decisions: Option<DecisionCache>,
    snapshots: Arc<SnapshotCache>,
    metrics: RunMetrics,
    /// Model page answers keyed by link + question fingerprint
    model_page_memo: Mutex<HashMap<String, Option<Letter>>>,
    settings: EngineSettings,
}

impl EvidenceEngine {
    pub fn new(search: Arc<dyn SearchProvider>, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            search,
            fetcher,
            inference: None,
            decisions: None,
            snapshots: Arc::new(SnapshotCache::new(
                Duration::from_secs(SNAPSHOT_TTL_SECS),
                SNAPSHOT_CAPACITY,
            )),
            metrics: RunMetrics::new(METRICS_RECENT_RUNS),
            model_page_memo: Mutex::new(HashMap::new()),
            settings: EngineSettings::default(),
        }
    }

    pub fn with_inference(mut self, inference: Arc<dyn InferenceProvider>) -> Self {
        self.inference = Some(inference);
        self
    }

    pub fn with_decision_cache(mut self, decisions: DecisionCache) -> Self {
        self.decisions = Some(decisions);
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Inference provider, when configured and not cooling down
    fn available_inference(&self) -> Option<Arc<dyn InferenceProvider>> {
        self.inference
            .as_ref()
            .filter(|p| p.is_available())
            .cloned()
    }

    fn decision_cache(&self) -> Option<&DecisionCache> {
        self.decisions
            .as_ref()
            .filter(|_| self.settings.use_decision_cache)
    }

    /// Solve each question in order (one run per question)
    pub async fn solve_all(&self, questions: &[String]) -> Vec<AnswerResult> {
        let mut results = Vec::with_capacity(questions.len());
        for raw in questions {
            results.push(self.solve(raw).await);
        }
        results
    }

    /// Solve one question; always returns a best-effort result
    pub async fn solve(&self, raw: &str) -> AnswerResult {
        let started = Instant::now();
        let question = Question::parse(raw);
        let short_fp: String = question.fingerprint.chars().take(12).collect();
        info!(
            fingerprint = %short_fp,
            options = question.options.len(),
            polarity = ?question.polarity,
            "Solving question"
        );

        if !question.is_well_formed() {
            warn!(options = question.options.len(), "Options are not lettered sequentially");
            let verdict = Verdict::inconclusive("malformed options: letters are not sequential");
            return self.finish(RunContext::new(question), verdict, VoteTally::default(), None, started);
        }

        if let Some(result) = self.cached_result(&question, started).await {
            return result;
        }

        let mut ctx = RunContext::new(question);

        let response = match self.search.query(&build_query(&ctx.question)).await {
            Ok(response) => response,
            Err(e) => {
                warn!(provider = self.search.name(), error = %e, "Search failed");
                let verdict = Verdict::inconclusive(format!("search failed: {}", e));
                return self.finish(ctx, verdict, VoteTally::default(), None, started);
            }
        };

        for snippet in response.side_channels() {
            ctx.pool.push(PooledText {
                source: "search".to_string(),
                text: snippet,
                snippet: true,
            });
        }

        let mut seen = HashSet::new();
        let mut candidates: Vec<CandidateSource> = response
            .results
            .iter()
            .filter(|hit| seen.insert(hit.link.clone()))
            .take(MAX_CANDIDATES)
            .enumerate()
            .map(|(rank, hit)| {
                CandidateSource::new(rank, hit.title.clone(), hit.link.clone(), hit.snippet.clone())
            })
            .collect();
        ctx.stats.candidates = candidates.len();
        for candidate in &candidates {
            if !candidate.snippet.trim().is_empty() {
                ctx.pool.push(PooledText {
                    source: candidate.source_id(),
                    text: candidate.snippet.clone(),
                    snippet: true,
                });
            }
        }
        debug!(candidates = candidates.len(), "Search candidates");

        let second = candidates.split_off(FIRST_BATCH_SIZE.min(candidates.len()));
        let fetched = self.fetch_batch(candidates, &mut ctx.stats).await;
        self.process_batch(&mut ctx, fetched).await;

        if !ctx.early_exit && !second.is_empty() && ctx.leading_vote() < SUFFICIENT_SUPPORT_VOTE {
            info!(leading = ctx.leading_vote(), "Support insufficient, fetching second batch");
            ctx.stats.second_batch = true;
            let fetched = self.fetch_batch(second, &mut ctx.stats).await;
            self.process_batch(&mut ctx, fetched).await;
        }

        if ctx.leading_vote() < SUFFICIENT_SUPPORT_VOTE {
            self.synthesize(&mut ctx).await;
        }
        if ctx.votes.is_empty() {
            self.reflect(&mut ctx).await;
        }

        let (tally, verdict) = compute_votes_and_state(&ctx.votes, &ctx.blocks);
        let overview = if self.settings.overview {
            self.overview(&mut ctx).await.or(response.overview.clone())
        } else {
            None
        };

        if let Some(decisions) = self.decision_cache() {
            if verdict.is_cacheable() {
                let answer_text = verdict
                    .best_letter
                    .and_then(|l| ctx.question.option(l))
                    .map(str::to_string);
                let links = ctx
                    .votes
                    .iter()
                    .filter(|v| Some(v.letter) == verdict.best_letter && !v.link.is_empty())
                    .map(|v| v.link.clone())
                    .collect();
                if let Err(e) = decisions
                    .put(&ctx.question.fingerprint, &verdict, answer_text, links)
                    .await
                {
                    warn!(error = %e, "Decision cache write failed");
                }
            }
        }

        self.finish(ctx, verdict, tally, overview, started)
    }

    /// Result served from the decision cache
    async fn cached_result(&self, question: &Question, started: Instant) -> Option<AnswerResult> {
        let entry = self.decision_cache()?.get(&question.fingerprint).await?;

        // Same fingerprint may carry a different option order
        let letter = match entry.answer_text.as_deref() {
            Some(body) => match_body_to_user_letter(body, &question.options).map(|(l, _)| l),
            None => entry.verdict.best_letter,
        };
        let Some(letter) = letter.filter(|l| question.options.contains_key(l)) else {
            debug!("Cached answer does not map onto these options, ignoring");
            return None;
        };

        info!(letter = %letter, "Decision served from cache");
        let mut verdict = entry.verdict.clone();
        verdict.best_letter = Some(letter);
        verdict.reason = format!("cached: {}", entry.verdict.reason);

        let mut ctx = RunContext::new(question.clone());
        ctx.stats.elapsed_ms = started.elapsed().as_millis() as u64;
        let mut result = self.assemble(ctx, verdict, VoteTally::default(), None, true);
        result.links = entry.links;
        self.record(&result, &question.fingerprint);
        Some(result)
    }

    fn finish(
        &self,
        mut ctx: RunContext,
        verdict: Verdict,
        tally: VoteTally,
        overview: Option<String>,
        started: Instant,
    ) -> AnswerResult {
        ctx.stats.elapsed_ms = started.elapsed().as_millis() as u64;
        let fingerprint = ctx.question.fingerprint.clone();
        let result = self.assemble(ctx, verdict, tally, overview, false);
        info!(
            state = result.result_state.as_str(),
            tier = result.evidence_tier.as_str(),
            answer = %result.answer,
            confidence = result.confidence,
            stats = %result.run_stats.display_string(),
            "Run finished"
        );
        self.record(&result, &fingerprint);
        result
    }

    fn assemble(
        &self,
        ctx: RunContext,
        verdict: Verdict,
        tally: VoteTally,
        overview: Option<String>,
        cached: bool,
    ) -> AnswerResult {
        let answer_text = verdict
            .best_letter
            .and_then(|l| ctx.question.option(l))
            .map(str::to_string);
        let answer = match (verdict.best_letter, &answer_text) {
            (Some(letter), Some(body)) => format!("{}) {}", letter, body),
            (Some(letter), None) => letter.to_string(),
            _ => "No answer".to_string(),
        };
        let links = ctx
            .votes
            .iter()
            .filter(|v| !v.link.is_empty())
            .map(|v| v.link.clone())
            .collect();

        AnswerResult {
            question: ctx.question.raw.clone(),
            answer,
            answer_letter: verdict.best_letter,
            answer_text,
            sources: ctx.votes,
            links,
            votes: tally.combined(),
            confidence: verdict.confidence,
            result_state: verdict.result_state,
            reason: verdict.reason,
            evidence_tier: verdict.evidence_tier,
            question_polarity: ctx.question.polarity,
            overview,
            run_stats: ctx.stats,
            cached,
        }
    }

    fn record(&self, result: &AnswerResult, fingerprint: &str) {
        self.metrics.record(RunRecord {
            run_id: Uuid::new_v4(),
            fingerprint: fingerprint.to_string(),
            finished_at: mcq_common::time::now(),
            result_state: result.result_state,
            evidence_tier: result.evidence_tier,
            answer_letter: result.answer_letter,
            confidence: result.confidence,
            cached: result.cached,
            stats: result.run_stats.clone(),
        });
    }
}

/// Search query for a question: the stem, plus option bodies when the stem is short
pub fn build_query(question: &Question) -> String {
    let mut query = collapse_whitespace(&question.stem);
    if query.chars().count() < QUERY_SHORT_STEM_CHARS {
        for body in question.options.values() {
            query.push(' ');
            query.push_str(body);
        }
    }
    query.chars().take(QUERY_MAX_CHARS).collect()
}
