//! Per-source gates and the extraction waterfall

use super::prompts::{page_prompt, PAGE_SYSTEM_PROMPT};
use super::strategies::{EvidenceCandidate, PageView, Strategy};
use super::weights::source_weight;
use super::{BlockReason, EvidenceEngine, PooledText, RunContext};
use crate::services::evidence::{build_evidence_block, find_question_block, BlockInput};
use crate::services::html_extractor::{
    classify_page, is_structured_host, obfuscation_signals, paywall_signals,
};
use crate::services::options_match::{coverage, options_match};
use crate::services::question_parser::{parse_answer_letter, token_coverage};
use crate::tunables::{
    MIN_PAGE_TEXT_CHARS, MODEL_PAGE_CHARS, PAYWALL_LEAK_MIN_CHARS, PAYWALL_LEAK_MIN_TOPIC,
    STRUCTURED_HOST_MIN_TOPIC, WEAK_TOPIC_SIMILARITY,
};
use crate::types::{CandidateSource, FetchStatus, Question, SourceVote};
use tracing::{debug, info};

/// Local confidence recorded for a model-read page
const MODEL_PAGE_LOCAL_CONFIDENCE: f64 = 0.5;

/// Page title chars kept as the citation of a model-read page
const MODEL_CITATION_CHARS: usize = 240;

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

/// Run the pre-extraction gates over one fetched source
///
/// Order: fetch outcome (2xx with text), size/topic pre-filter, obfuscation, paywall (unless
/// enough readable text leaks through), options match (waived for structured
/// hosts at sufficient topical similarity).
pub fn gate_page(candidate: &CandidateSource, question: &Question) -> Result<PageView, BlockReason> {
    // Non-2xx responses count as failed fetches even when a body came back
    let snapshot = match &candidate.snapshot {
        Some(snapshot) if snapshot.is_usable() => snapshot,
        _ => return Err(BlockReason::FetchFailed),
    };

    let text = &snapshot.text;
    let topic = token_coverage(&question.stem, text);
    let chars = text.chars().count();
    if chars < MIN_PAGE_TEXT_CHARS && topic < WEAK_TOPIC_SIMILARITY {
        return Err(BlockReason::LowCoverage);
    }

    if obfuscation_signals(text).obfuscated {
        return Err(BlockReason::Obfuscated);
    }

    if paywall_signals(text, &candidate.host).paywalled {
        let leaks = chars >= PAYWALL_LEAK_MIN_CHARS && topic >= PAYWALL_LEAK_MIN_TOPIC;
        if !leaks {
            return Err(BlockReason::Paywall);
        }
        debug!(host = %candidate.host, "Paywalled page leaks readable text, continuing");
    }

    if !options_match(&question.options, text) {
        let waived = is_structured_host(&candidate.host) && topic >= STRUCTURED_HOST_MIN_TOPIC;
        if !waived {
            return Err(BlockReason::OptionsMismatch);
        }
    }

    Ok(PageView {
        source_id: candidate.source_id(),
        host: candidate.host.clone(),
        link: candidate.link.clone(),
        title: candidate.title.clone(),
        markup: snapshot.markup.clone(),
        text: text.clone(),
        kind: classify_page(&snapshot.markup, text),
        topic,
        option_coverage: coverage(&question.options, text).ratio(),
        block: find_question_block(text, question),
    })
}

impl EvidenceEngine {
    /// Process fetched sources in rank order until early exit
    pub(super) async fn process_batch(&self, ctx: &mut RunContext, batch: Vec<CandidateSource>) {
        for candidate in batch {
            if ctx.early_exit {
                debug!(host = %candidate.host, "Early exit, skipping remaining sources");
                break;
            }
            self.process_source(ctx, &candidate).await;
        }
    }

    async fn process_source(&self, ctx: &mut RunContext, candidate: &CandidateSource) {
        let page = match gate_page(candidate, &ctx.question) {
            Ok(page) => page,
            Err(reason) => {
                debug!(host = %candidate.host, reason = reason.as_str(), "Source blocked");
                ctx.stats.block(reason);
                return;
            }
        };

        for strategy in Strategy::ORDER {
            if let Some(found) = strategy.attempt(self, ctx, &page).await {
                accept_candidate(ctx, &page, found);
                return;
            }
        }

        debug!(host = %page.host, "No strategy matched, pooling text");
        ctx.stats.pooled_sources += 1;
        ctx.pool.push(PooledText {
            source: page.source_id,
            text: page.text,
            snippet: false,
        });
    }

    /// Model-assisted single-page extraction, budget-limited per run
    ///
    /// Answers are memoized by link and question fingerprint; a memo hit does
    /// not consume budget.
    pub(super) async fn model_page(
        &self,
        ctx: &mut RunContext,
        page: &PageView,
    ) -> Option<EvidenceCandidate> {
        let memo_key = format!("{}|{}", page.link, ctx.question.fingerprint);
        let memoized = self
            .model_page_memo
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&memo_key)
            .copied();

        let letter = match memoized {
            Some(letter) => {
                debug!(host = %page.host, "Model page answer served from memo");
                letter
            }
            None => {
                if ctx.model_disabled || ctx.model_pages_used >= self.settings.model_page_budget {
                    return None;
                }
                let inference = self.available_inference()?;

                let excerpt = page
                    .block
                    .as_ref()
                    .map(|b| b.text.as_str())
                    .unwrap_or(page.text.as_str());
                let excerpt = truncate_chars(excerpt, MODEL_PAGE_CHARS);

                ctx.model_pages_used += 1;
                ctx.stats.model_calls += 1;
                let reply = match inference
                    .complete(
                        PAGE_SYSTEM_PROMPT,
                        &page_prompt(&ctx.question, excerpt),
                        &self.settings.inference_options,
                    )
                    .await
                {
                    Ok(reply) => reply,
                    Err(e) => {
                        ctx.provider_failed("model_page", &e);
                        return None;
                    }
                };

                let letter = parse_answer_letter(&reply)
                    .filter(|l| ctx.question.options.contains_key(l));
                self.model_page_memo
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .insert(memo_key, letter);
                letter
            }
        }?;

        Some(EvidenceCandidate {
            letter,
            method: Strategy::ModelPage.method(),
            citation: truncate_chars(page.title.as_str(), MODEL_CITATION_CHARS).to_string(),
            context: String::new(),
            local_confidence: MODEL_PAGE_LOCAL_CONFIDENCE,
            option_coverage: page.option_coverage,
        })
    }
}

/// Weigh a candidate and append its vote (and block, for page-read methods)
fn accept_candidate(ctx: &mut RunContext, page: &PageView, candidate: EvidenceCandidate) {
    let weight = source_weight(&page.host, candidate.method, candidate.option_coverage);

    let block = (!candidate.method.is_model()).then(|| {
        build_evidence_block(
            BlockInput {
                source_id: &page.source_id,
                host: &page.host,
                explicit_letter: Some(candidate.letter),
                context: &candidate.context,
                citation: &candidate.citation,
                local_confidence: candidate.local_confidence,
                method: candidate.method,
            },
            &ctx.question,
        )
    });

    info!(
        host = %page.host,
        letter = %candidate.letter,
        method = candidate.method.as_str(),
        weight,
        "Source accepted"
    );

    ctx.accept(
        SourceVote {
            source_id: page.source_id.clone(),
            host: page.host.clone(),
            link: page.link.clone(),
            title: page.title.clone(),
            letter: candidate.letter,
            weight,
            method: candidate.method,
            citation: candidate.citation,
        },
        block,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PageSnapshot;

    fn france() -> Question {
        Question::parse("Capital of France? A) London B) Paris C) Berlin")
    }

    fn candidate(host: &str, text: &str, status: FetchStatus) -> CandidateSource {
        let mut candidate = CandidateSource::new(
            0,
            "Quiz".into(),
            format!("https://{}/q", host),
            String::new(),
        );
        candidate.snapshot = Some(PageSnapshot {
            markup: format!("<p>{}</p>", text),
            text: text.to_string(),
            status,
        });
        candidate
    }

    fn quiz_text() -> String {
        let mut text = String::from("Capital of France?\nA) London\nB) Paris\nC) Berlin\n\nAnswer key: B\n");
        text.push_str(&"France is a country in western Europe with a long history. ".repeat(10));
        text
    }

    #[test]
    fn test_failed_fetch_is_blocked() {
        let source = candidate("quiz.example", "", FetchStatus::Failed("timeout".into()));
        assert_eq!(gate_page(&source, &france()).unwrap_err(), BlockReason::FetchFailed);

        let mut missing = source.clone();
        missing.snapshot = None;
        assert_eq!(gate_page(&missing, &france()).unwrap_err(), BlockReason::FetchFailed);
    }

    #[test]
    fn test_short_off_topic_page_is_low_coverage() {
        let source = candidate("quiz.example", "Bread recipes.", FetchStatus::Ok(200));
        assert_eq!(gate_page(&source, &france()).unwrap_err(), BlockReason::LowCoverage);
    }

    #[test]
    fn test_options_mismatch() {
        let text = "Capital of France? ".to_string()
            + &"The Seine flows through many towns in the north. ".repeat(10);
        let source = candidate("quiz.example", &text, FetchStatus::Ok(200));
        assert_eq!(gate_page(&source, &france()).unwrap_err(), BlockReason::OptionsMismatch);
    }

    #[test]
    fn test_matching_page_passes() {
        let source = candidate("quiz.example", &quiz_text(), FetchStatus::Ok(200));
        let page = gate_page(&source, &france()).expect("page passes gates");
        assert_eq!(page.source_id, "src-0-quiz.example");
        assert!(page.topic > 0.9);
        assert!((page.option_coverage - 1.0).abs() < 1e-9);
        assert!(page.block.is_some());
    }

    #[test]
    fn test_http_error_page_is_skipped_even_with_matching_text() {
        for status in [403, 404, 500] {
            let source = candidate("quiz.example", &quiz_text(), FetchStatus::Http(status));
            assert_eq!(gate_page(&source, &france()).unwrap_err(), BlockReason::FetchFailed);
        }
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 5), "hi");
    }
}
