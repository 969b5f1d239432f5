//! Model fallbacks: cross-source synthesis, reflection, overview

use super::prompts::{
    overview_prompt, reflection_prompt, synthesis_prompt, OVERVIEW_SYSTEM_PROMPT,
    REFLECTION_SYSTEM_PROMPT, SYNTHESIS_SYSTEM_PROMPT,
};
use super::{EvidenceEngine, PooledText, RunContext};
use crate::services::question_parser::{parse_answer_letter, token_coverage};
use crate::tunables::{
    REFLECTION_MAX_SNIPPETS, REFLECTION_SNIPPET_CHARS, REFLECTION_WEIGHT, SYNTHESIS_MAX_TEXTS,
    SYNTHESIS_STRONG_SUPPORT, SYNTHESIS_STRONG_SUPPORT_MARGIN, SYNTHESIS_STRONG_SUPPORT_WEIGHT,
    SYNTHESIS_SUPPORT_MARGIN, SYNTHESIS_TEXT_CHARS, SYNTHESIS_WEIGHT,
};
use crate::types::{ExtractionMethod, Letter, Polarity, Question, SourceVote};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Letter claims embedded in pooled snippets ("Answer: B", "gabarito letra C")
static LETTER_CLAIM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i:\b(?:answer|resposta|gabarito|alternativa|letra|letter|option|key)(?:\s+(?:is|é|correta|correct))?)\s*[:=\-]?\s*[\(\[]?[A-E][\)\]]?(?:\W|$)",
    )
    .expect("valid letter claim regex")
});

const REDACTED: &str = "[claim removed] ";

/// Citations handed to the overview prompt
const OVERVIEW_MAX_CITATIONS: usize = 4;

fn clip(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Top pooled page texts by topical similarity, then the snippets as one text
pub(crate) fn synthesis_texts(question: &Question, pool: &[PooledText]) -> Vec<String> {
    let mut pages: Vec<(f64, &PooledText)> = pool
        .iter()
        .filter(|p| !p.snippet)
        .map(|p| (token_coverage(&question.stem, &p.text), p))
        .collect();
    pages.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut texts: Vec<String> = pages
        .into_iter()
        .take(SYNTHESIS_MAX_TEXTS)
        .map(|(_, p)| clip(&p.text, SYNTHESIS_TEXT_CHARS))
        .collect();

    let snippets: Vec<&str> = pool
        .iter()
        .filter(|p| p.snippet)
        .map(|p| p.text.as_str())
        .collect();
    if texts.len() < SYNTHESIS_MAX_TEXTS && !snippets.is_empty() {
        texts.push(clip(&snippets.join("\n"), SYNTHESIS_TEXT_CHARS));
    }
    texts
}

/// Average token coverage of each option body over the evidence texts
pub fn lexical_support(question: &Question, texts: &[String]) -> BTreeMap<Letter, f64> {
    question
        .options
        .iter()
        .map(|(letter, body)| {
            let total: f64 = texts.iter().map(|t| token_coverage(body, t)).sum();
            let average = if texts.is_empty() {
                0.0
            } else {
                total / texts.len() as f64
            };
            (*letter, average)
        })
        .collect()
}

/// Weight a synthesis answer is admitted with, or `None` when rejected
///
/// Paths, first match wins:
/// - agrees with the best direct (non-model) letter
/// - the question seeks the incorrect option (lexical support is not
///   meaningful there)
/// - own support ≥ 0.6 and margin ≥ 0.1 over the runner-up: raised weight
/// - margin ≥ 0.05 over the runner-up
pub fn synthesis_admission(
    letter: Letter,
    polarity: Polarity,
    direct_best: Option<Letter>,
    support: &BTreeMap<Letter, f64>,
) -> Option<f64> {
    if direct_best == Some(letter) {
        return Some(SYNTHESIS_WEIGHT);
    }
    if polarity == Polarity::Incorrect {
        return Some(SYNTHESIS_WEIGHT);
    }

    let own = support.get(&letter).copied().unwrap_or(0.0);
    let runner_up = support
        .iter()
        .filter(|(l, _)| **l != letter)
        .map(|(_, s)| *s)
        .fold(0.0, f64::max);
    let margin = own - runner_up;

    if own >= SYNTHESIS_STRONG_SUPPORT && margin >= SYNTHESIS_STRONG_SUPPORT_MARGIN {
        Some(SYNTHESIS_STRONG_SUPPORT_WEIGHT)
    } else if margin >= SYNTHESIS_SUPPORT_MARGIN {
        Some(SYNTHESIS_WEIGHT)
    } else {
        None
    }
}

/// Blank out letter claims so reflection judges option content only
pub fn redact_letter_claims(text: &str) -> String {
    LETTER_CLAIM.replace_all(text, REDACTED).into_owned()
}

fn model_vote(
    source_id: &str,
    title: &str,
    letter: Letter,
    weight: f64,
    method: ExtractionMethod,
    citation: &str,
) -> SourceVote {
    SourceVote {
        source_id: source_id.to_string(),
        host: String::new(),
        link: String::new(),
        title: title.to_string(),
        letter,
        weight,
        method,
        citation: citation.trim().to_string(),
    }
}

impl EvidenceEngine {
    /// Cross-source synthesis over the pooled texts
    pub(super) async fn synthesize(&self, ctx: &mut RunContext) {
        if ctx.model_disabled {
            return;
        }
        let Some(inference) = self.available_inference() else {
            return;
        };
        let texts = synthesis_texts(&ctx.question, &ctx.pool);
        if texts.is_empty() {
            debug!("Nothing pooled for synthesis");
            return;
        }

        ctx.stats.model_calls += 1;
        let reply = match inference
            .complete(
                SYNTHESIS_SYSTEM_PROMPT,
                &synthesis_prompt(&ctx.question, &texts),
                &self.settings.inference_options,
            )
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                ctx.provider_failed("synthesis", &e);
                return;
            }
        };

        let Some(letter) =
            parse_answer_letter(&reply).filter(|l| ctx.question.options.contains_key(l))
        else {
            debug!("Synthesis reply carries no usable letter");
            return;
        };

        let support = lexical_support(&ctx.question, &texts);
        let Some(weight) =
            synthesis_admission(letter, ctx.question.polarity, ctx.direct_best(), &support)
        else {
            info!(letter = %letter, support = ?support, "Synthesis answer lacks lexical support, rejected");
            return;
        };

        info!(letter = %letter, weight, texts = texts.len(), "Synthesis answer admitted");
        ctx.stats.synthesis_used = true;
        let vote = model_vote(
            "synthesis",
            "Cross-source synthesis",
            letter,
            weight,
            ExtractionMethod::CrossSourceSynthesis,
            &clip(&reply, SYNTHESIS_TEXT_CHARS),
        );
        ctx.accept(vote, None);
    }

    /// Reconcile pooled snippets with their letter claims removed
    pub(super) async fn reflect(&self, ctx: &mut RunContext) {
        if ctx.model_disabled {
            return;
        }
        let Some(inference) = self.available_inference() else {
            return;
        };
        let snippets: Vec<String> = ctx
            .pool
            .iter()
            .take(REFLECTION_MAX_SNIPPETS)
            .map(|p| redact_letter_claims(&clip(&p.text, REFLECTION_SNIPPET_CHARS)))
            .collect();
        if snippets.is_empty() {
            return;
        }

        ctx.stats.model_calls += 1;
        let reply = match inference
            .complete(
                REFLECTION_SYSTEM_PROMPT,
                &reflection_prompt(&ctx.question, &snippets),
                &self.settings.inference_options,
            )
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                ctx.provider_failed("reflection", &e);
                return;
            }
        };

        if let Some(letter) =
            parse_answer_letter(&reply).filter(|l| ctx.question.options.contains_key(l))
        {
            info!(letter = %letter, "Reflection proposed an answer");
            ctx.stats.reflection_used = true;
            let vote = model_vote(
                "reflection",
                "Reflection",
                letter,
                REFLECTION_WEIGHT,
                ExtractionMethod::Reflection,
                &reply,
            );
            ctx.accept(vote, None);
        }
    }

    /// Evidence-only overview of the accepted citations
    pub(super) async fn overview(&self, ctx: &mut RunContext) -> Option<String> {
        if ctx.model_disabled {
            return None;
        }
        let citations: Vec<String> = ctx
            .votes
            .iter()
            .filter(|v| !v.method.is_model() && !v.citation.trim().is_empty())
            .take(OVERVIEW_MAX_CITATIONS)
            .map(|v| v.citation.clone())
            .collect();
        if citations.is_empty() {
            return None;
        }
        let inference = self.available_inference()?;

        ctx.stats.model_calls += 1;
        match inference
            .complete(
                OVERVIEW_SYSTEM_PROMPT,
                &overview_prompt(&ctx.question, &citations),
                &self.settings.inference_options,
            )
            .await
        {
            Ok(reply) => Some(reply.trim().to_string()).filter(|s| !s.is_empty()),
            Err(e) => {
                ctx.provider_failed("overview", &e);
                None
            }
        }
    }
}
