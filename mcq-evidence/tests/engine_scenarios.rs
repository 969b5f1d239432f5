//! End-to-end engine runs over scripted collaborators

mod helpers;

use helpers::*;
use mcq_evidence::providers::{InferenceProvider, RateLimitedInference, RateLimiter};
use mcq_evidence::types::ExtractionMethod;
use mcq_evidence::{EvidenceEngine, EvidenceTier, Letter, ResultState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const ONE: &str = "https://quiz-one.example/france";
const TWO: &str = "https://study-two.example/capitals";
const THREE: &str = "https://review-three.example/europe";

#[tokio::test]
async fn test_two_agreeing_answer_keys_confirm() {
    let search = FakeSearch::with_hits(vec![hit(ONE), hit(TWO), hit(THREE)]);
    let fetcher = FakeFetcher::new(&[
        (ONE, answer_key_page('B', "Paris")),
        (TWO, answer_key_page('B', "Paris")),
        (THREE, answer_key_page('B', "Paris")),
    ]);
    let engine = EvidenceEngine::new(search.clone(), fetcher);

    let result = engine.solve(FRANCE).await;

    assert_eq!(result.result_state, ResultState::Confirmed);
    assert_eq!(result.evidence_tier, EvidenceTier::Strong);
    assert_eq!(result.answer_letter, Some(Letter::B));
    assert_eq!(result.answer, "B) Paris");
    assert!(result.confidence >= 0.85);
    assert!(!result.cached);

    // Third source is never read once two strong keys agree
    assert!(result.run_stats.early_exit);
    assert_eq!(result.run_stats.accepted_sources, 2);
    assert_eq!(result.sources.len(), 2);
    assert!(result
        .sources
        .iter()
        .all(|s| s.method == ExtractionMethod::LocalExplicit));

    assert_eq!(search.calls(), 1);
    let query = search.queries.lock().unwrap()[0].clone();
    assert!(query.starts_with("Capital of France?"));
    assert!(query.contains("Paris"));
}

#[tokio::test]
async fn test_model_read_page_does_not_outvote_answer_key() {
    let search = FakeSearch::with_hits(vec![hit(ONE), hit(TWO)]);
    let fetcher = FakeFetcher::new(&[
        (ONE, answer_key_page('B', "Paris")),
        (TWO, bare_question_page()),
    ]);
    let inference = Arc::new(ScriptedInference::new("Answer: C"));
    let engine = EvidenceEngine::new(search, fetcher).with_inference(inference.clone());

    let result = engine.solve(FRANCE).await;

    assert_eq!(result.answer_letter, Some(Letter::B));
    assert_eq!(result.result_state, ResultState::Suggested);
    assert_eq!(result.evidence_tier, EvidenceTier::Medium);

    let model_vote = result
        .sources
        .iter()
        .find(|s| s.method == ExtractionMethod::ModelPage)
        .expect("model-read vote recorded");
    assert_eq!(model_vote.letter, Letter::C);
    assert!(result.votes[&Letter::B] > result.votes[&Letter::C]);
    assert_eq!(inference.calls(), 1);
}

#[tokio::test]
async fn test_malformed_options_skip_search() {
    let search = FakeSearch::with_hits(vec![hit(ONE)]);
    let fetcher = FakeFetcher::new(&[(ONE, answer_key_page('B', "Paris"))]);
    let engine = EvidenceEngine::new(search.clone(), fetcher);

    let result = engine.solve("Capital?\nA) London\nC) Paris\nD) Rome").await;

    assert_eq!(result.result_state, ResultState::Inconclusive);
    assert_eq!(result.answer_letter, None);
    assert_eq!(result.answer, "No answer");
    assert!(result.reason.contains("malformed"));
    assert_eq!(search.calls(), 0);
}

#[tokio::test]
async fn test_search_failure_is_inconclusive() {
    let engine = EvidenceEngine::new(FakeSearch::failing("connection reset"), FakeFetcher::new(&[]));

    let result = engine.solve(FRANCE).await;

    assert_eq!(result.result_state, ResultState::Inconclusive);
    assert!(result.reason.starts_with("search failed"));
    assert!(result.sources.is_empty());
}

#[tokio::test]
async fn test_unreachable_pages_are_counted() {
    let search = FakeSearch::with_hits(vec![hit(ONE), hit(TWO)]);
    let engine = EvidenceEngine::new(search, FakeFetcher::new(&[]));

    let result = engine.solve(FRANCE).await;

    assert_eq!(result.result_state, ResultState::Inconclusive);
    assert_eq!(result.run_stats.candidates, 2);
    assert_eq!(result.run_stats.fetch_failures, 2);
    assert!(result.votes.is_empty());
}

#[tokio::test]
async fn test_exhausted_quota_disables_model_steps_across_runs() {
    let calls = Arc::new(AtomicUsize::new(0));
    let limited = Arc::new(RateLimitedInference::new(
        ExhaustedInference { calls: calls.clone() },
        RateLimiter::new("exhausted", Duration::ZERO, Duration::from_secs(600)),
    ));
    let search = FakeSearch::with_hits(vec![hit(TWO)]);
    let fetcher = FakeFetcher::new(&[(TWO, bare_question_page())]);
    let engine = EvidenceEngine::new(search, fetcher).with_inference(limited.clone());

    let first = engine.solve(FRANCE).await;
    assert_eq!(first.result_state, ResultState::Inconclusive);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(limited.limiter().quota_until().is_some());
    assert!(!limited.is_available());

    let second = engine.solve(FRANCE).await;
    assert_eq!(second.result_state, ResultState::Inconclusive);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_metrics_accumulate_over_runs() {
    let search = FakeSearch::with_hits(vec![hit(ONE), hit(TWO)]);
    let fetcher = FakeFetcher::new(&[
        (ONE, answer_key_page('B', "Paris")),
        (TWO, answer_key_page('B', "Paris")),
    ]);
    let engine = EvidenceEngine::new(search, fetcher);

    let questions = vec![
        FRANCE.to_string(),
        "Capital?\nA) London\nC) Paris".to_string(),
    ];
    let results = engine.solve_all(&questions).await;
    assert_eq!(results.len(), 2);

    let metrics = engine.metrics();
    assert_eq!(metrics.runs, 2);
    assert_eq!(metrics.outcomes.get("answered"), Some(&1));
    assert_eq!(metrics.outcomes.get("unanswered"), Some(&1));
    assert_eq!(metrics.recent.len(), 2);
}
