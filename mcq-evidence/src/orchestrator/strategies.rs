//! Extraction strategies
//!
//! Tried per source in `Strategy::ORDER`; the first strategy that yields a
//! candidate wins. Every candidate carries a letter in the user's lettering.

use super::{EvidenceEngine, RunContext};
use crate::services::evidence::{
    extract_explicit_letter_from_text, is_explicit_letter_safe, match_explanation_to_option,
    QuestionBlock,
};
use crate::services::html_extractor::{
    extract_answer_card_evidence, extract_by_anchors, extract_generic_anchored_evidence,
    extract_highlight_letter, is_rendered_document_host, is_structured_host, window,
    AnchoredEvidence, PageKind,
};
use crate::services::options_match::remap_letter_to_user_options;
use crate::services::question_parser::{extract_options, has_sequential_letters};
use crate::tunables::LOCAL_EXTRACTOR_MIN_TOPIC;
use crate::types::{ExtractionMethod, Letter, Question};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use tracing::debug;

/// Citation chars kept on each side of an explicit claim
const CLAIM_CITATION_CHARS: usize = 160;

/// Longest trailing explanation considered
const EXPLANATION_MAX_CHARS: usize = 800;

static OPTION_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*[\(\[]?[A-Ea-e]\s*[\)\]\.]\s+\S.*$").expect("valid option line regex")
});

static EXPLANATION_CUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i:\b(?:explanation|explicação|comentário|resolução|solution|justificativa|rationale)\b)\s*[:\-]?")
        .expect("valid explanation cue regex")
});

/// A fetched page that passed the gates
#[derive(Debug, Clone)]
pub struct PageView {
    pub source_id: String,
    pub host: String,
    pub link: String,
    pub title: String,
    pub markup: String,
    pub text: String,
    pub kind: PageKind,
    /// Share of stem tokens present in the page text
    pub topic: f64,
    /// Share of user options recognizable in the page text
    pub option_coverage: f64,
    /// The user's question localized in the page, if found
    pub block: Option<QuestionBlock>,
}

/// Proposal produced by one strategy
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceCandidate {
    /// In the user's lettering
    pub letter: Letter,
    pub method: ExtractionMethod,
    pub citation: String,
    /// Text the option stances are read from
    pub context: String,
    pub local_confidence: f64,
    pub option_coverage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    StructuredCard,
    VisualHighlight,
    LocalExplicit,
    SimplePattern,
    ModelPage,
}

impl Strategy {
    /// Priority order, first match wins
    pub const ORDER: [Strategy; 5] = [
        Strategy::StructuredCard,
        Strategy::VisualHighlight,
        Strategy::LocalExplicit,
        Strategy::SimplePattern,
        Strategy::ModelPage,
    ];

    pub fn method(self) -> ExtractionMethod {
        match self {
            Strategy::StructuredCard => ExtractionMethod::StructuredCard,
            Strategy::VisualHighlight => ExtractionMethod::VisualHighlight,
            Strategy::LocalExplicit => ExtractionMethod::LocalExplicit,
            Strategy::SimplePattern => ExtractionMethod::SimplePattern,
            Strategy::ModelPage => ExtractionMethod::ModelPage,
        }
    }

    pub(crate) async fn attempt(
        self,
        engine: &EvidenceEngine,
        ctx: &mut RunContext,
        page: &PageView,
    ) -> Option<EvidenceCandidate> {
        match self {
            Strategy::ModelPage => engine.model_page(ctx, page).await,
            local => local.attempt_local(page, &ctx.question),
        }
    }

    /// Page-local strategies; `ModelPage` always yields `None` here
    pub fn attempt_local(self, page: &PageView, question: &Question) -> Option<EvidenceCandidate> {
        let candidate = match self {
            Strategy::StructuredCard => structured_card(page, question),
            Strategy::VisualHighlight => visual_highlight(page, question),
            Strategy::LocalExplicit => local_explicit(page, question),
            Strategy::SimplePattern => simple_pattern(page, question),
            Strategy::ModelPage => None,
        };
        if let Some(c) = &candidate {
            debug!(
                host = %page.host,
                strategy = c.method.as_str(),
                letter = %c.letter,
                "Strategy matched"
            );
        }
        candidate
    }
}

/// Options printed in a source's own block, when they are lettered cleanly
fn source_options(block_text: &str) -> Option<BTreeMap<Letter, String>> {
    let options = extract_options(block_text);
    has_sequential_letters(&options).then_some(options)
}

/// Shuffle-correct an anchored letter into the user's lettering
pub fn to_user_letter(evidence: &AnchoredEvidence, question: &Question) -> Option<Letter> {
    let letter = match source_options(&evidence.block_text) {
        Some(source) => remap_letter_to_user_options(evidence.letter, &source, &question.options),
        None => evidence.letter,
    };
    question.options.contains_key(&letter).then_some(letter)
}

fn from_anchored(
    evidence: AnchoredEvidence,
    method: ExtractionMethod,
    page: &PageView,
    question: &Question,
) -> Option<EvidenceCandidate> {
    let letter = to_user_letter(&evidence, question)?;
    let context = if evidence.block_text.is_empty() {
        page.block
            .as_ref()
            .map(|b| b.text.clone())
            .unwrap_or_else(|| evidence.citation.clone())
    } else {
        evidence.block_text
    };
    Some(EvidenceCandidate {
        letter,
        method,
        citation: evidence.citation,
        context,
        local_confidence: evidence.score,
        option_coverage: page.option_coverage,
    })
}

fn structured_card(page: &PageView, question: &Question) -> Option<EvidenceCandidate> {
    let evidence = if page.kind == PageKind::AnswerCard || is_structured_host(&page.host) {
        extract_answer_card_evidence(&page.markup, question)
    } else if page.kind == PageKind::RenderedDocument {
        extract_by_anchors(&page.text, question)
    } else {
        None
    }?;
    from_anchored(evidence, ExtractionMethod::StructuredCard, page, question)
}

fn visual_highlight(page: &PageView, question: &Question) -> Option<EvidenceCandidate> {
    if !is_rendered_document_host(&page.host) {
        return None;
    }
    let evidence = extract_highlight_letter(&page.markup, question)?;
    from_anchored(evidence, ExtractionMethod::VisualHighlight, page, question)
}

fn local_explicit(page: &PageView, question: &Question) -> Option<EvidenceCandidate> {
    if page.topic < LOCAL_EXTRACTOR_MIN_TOPIC {
        return None;
    }
    let scan = page
        .block
        .as_ref()
        .map(|b| b.text.as_str())
        .unwrap_or(page.text.as_str());

    let claim = extract_explicit_letter_from_text(scan, question)?;
    let source = source_options(scan);
    let claim_options = source.as_ref().unwrap_or(&question.options);
    if !is_explicit_letter_safe(&claim, scan, claim_options) {
        debug!(host = %page.host, letter = %claim.letter, "Explicit claim failed safety check");
        return None;
    }

    let letter = match &source {
        Some(source) => remap_letter_to_user_options(claim.letter, source, &question.options),
        None => claim.letter,
    };
    if !question.options.contains_key(&letter) {
        return None;
    }

    Some(EvidenceCandidate {
        letter,
        method: ExtractionMethod::LocalExplicit,
        citation: window(scan, claim.start, claim.end, CLAIM_CITATION_CHARS, CLAIM_CITATION_CHARS)
            .trim()
            .to_string(),
        context: scan.to_string(),
        local_confidence: claim.confidence,
        option_coverage: page.option_coverage,
    })
}

/// Explanatory passage following the option list of the localized block
pub fn trailing_explanation(block_text: &str) -> Option<&str> {
    let after_options = OPTION_LINE
        .find_iter(block_text)
        .last()
        .map(|m| m.end())
        .unwrap_or(0);
    let rest = &block_text[after_options..];
    let cue = EXPLANATION_CUE.find(rest)?;
    let explanation = rest[cue.end()..].trim();
    let end = explanation
        .char_indices()
        .nth(EXPLANATION_MAX_CHARS)
        .map(|(i, _)| i)
        .unwrap_or(explanation.len());
    let explanation = &explanation[..end];
    (!explanation.is_empty()).then_some(explanation)
}

fn simple_pattern(page: &PageView, question: &Question) -> Option<EvidenceCandidate> {
    if let Some(evidence) = extract_generic_anchored_evidence(&page.text, question, &page.host) {
        if let Some(candidate) =
            from_anchored(evidence, ExtractionMethod::SimplePattern, page, question)
        {
            return Some(candidate);
        }
    }

    let block = page.block.as_ref()?;
    let explanation = trailing_explanation(&block.text)?;
    let (letter, score) = match_explanation_to_option(explanation, question)?;
    Some(EvidenceCandidate {
        letter,
        method: ExtractionMethod::SimplePattern,
        citation: explanation.to_string(),
        context: block.text.clone(),
        local_confidence: score,
        option_coverage: page.option_coverage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::evidence::find_question_block;
    use crate::services::options_match::coverage;
    use crate::services::question_parser::token_coverage;

    fn france() -> Question {
        Question::parse("Capital of France? A) London B) Paris C) Berlin")
    }

    fn page(host: &str, text: &str, question: &Question) -> PageView {
        PageView {
            source_id: format!("src-0-{}", host),
            host: host.to_string(),
            link: format!("https://{}/q", host),
            title: String::new(),
            markup: format!("<pre>{}</pre>", text),
            text: text.to_string(),
            kind: PageKind::GenericQa,
            topic: token_coverage(&question.stem, text),
            option_coverage: coverage(&question.options, text).ratio(),
            block: find_question_block(text, question),
        }
    }

    #[test]
    fn test_order_ends_with_model() {
        assert_eq!(Strategy::ORDER[0], Strategy::StructuredCard);
        assert_eq!(Strategy::ORDER[4], Strategy::ModelPage);
        assert_eq!(Strategy::LocalExplicit.method(), ExtractionMethod::LocalExplicit);
    }

    #[test]
    fn test_to_user_letter_corrects_shuffle() {
        let evidence = AnchoredEvidence {
            letter: Letter::A,
            citation: "Answer key: A".into(),
            block_text: "A) Paris\nB) London\nC) Berlin".into(),
            score: 0.9,
        };
        assert_eq!(to_user_letter(&evidence, &france()), Some(Letter::B));
    }

    #[test]
    fn test_to_user_letter_without_block_keeps_letter() {
        let evidence = AnchoredEvidence {
            letter: Letter::C,
            citation: String::new(),
            block_text: String::new(),
            score: 0.7,
        };
        assert_eq!(to_user_letter(&evidence, &france()), Some(Letter::C));

        let two_options = Question::parse("Capital of France? A) London B) Paris");
        assert_eq!(to_user_letter(&evidence, &two_options), None);
    }

    #[test]
    fn test_local_explicit_remaps_source_lettering() {
        let question = france();
        let text = "Capital of France?\nA) Paris\nB) London\nC) Berlin\n\nCorrect answer: A) Paris";
        let view = page("quiz.example", text, &question);
        let candidate = Strategy::LocalExplicit
            .attempt_local(&view, &question)
            .expect("explicit claim");
        assert_eq!(candidate.letter, Letter::B);
        assert_eq!(candidate.method, ExtractionMethod::LocalExplicit);
        assert!(candidate.citation.contains("Correct answer"));
    }

    #[test]
    fn test_local_explicit_requires_topic() {
        let question = france();
        let mut view = page(
            "quiz.example",
            "Capital of France?\nA) London\nB) Paris\nC) Berlin\n\nCorrect answer: B) Paris",
            &question,
        );
        view.topic = 0.2;
        assert!(Strategy::LocalExplicit.attempt_local(&view, &question).is_none());
    }

    #[test]
    fn test_visual_highlight_only_on_rendered_hosts() {
        let question = france();
        let view = page("quiz.example", "Capital of France? A) London B) Paris", &question);
        assert!(Strategy::VisualHighlight.attempt_local(&view, &question).is_none());
    }

    #[test]
    fn test_model_page_is_not_local() {
        let question = france();
        let view = page("quiz.example", "Capital of France?", &question);
        assert!(Strategy::ModelPage.attempt_local(&view, &question).is_none());
    }

    #[test]
    fn test_trailing_explanation() {
        let block = "Capital of France?\nA) London\nB) Paris\nC) Berlin\nExplanation: Paris has been the capital since the tenth century.";
        assert_eq!(
            trailing_explanation(block),
            Some("Paris has been the capital since the tenth century.")
        );
        assert_eq!(trailing_explanation("A) London\nB) Paris"), None);
    }
}
