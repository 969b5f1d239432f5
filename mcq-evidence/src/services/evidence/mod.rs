//! Evidence Service
//!
//! Turns one source's text into a structured judgment and combines all
//! judgments into a verdict:
//! - `question_block`: localize the user's question in a long page
//! - `explicit`: answer-declaration cascade, hallucination guard, explanation matching
//! - `stance`: per-option entails / contradicts / neutral
//! - `votes`: tally and verdict state machine

pub mod explicit;
pub mod question_block;
pub mod stance;
pub mod votes;

pub use explicit::{
    extract_explicit_gabarito, extract_explicit_letter_from_text, is_explicit_letter_safe,
    match_explanation_to_option, ExplicitAnswer,
};
pub use question_block::{find_question_block, BlockLocator, QuestionBlock};
pub use stance::classify_option_stance;
pub use votes::{compute_votes_and_state, tally_votes};

use crate::tunables::{LOCAL_CONFIDENCE_MAX, LOCAL_CONFIDENCE_MIN};
use crate::types::{EvidenceBlock, ExtractionMethod, Letter, Question};
use std::collections::BTreeMap;

/// Inputs for one source's evidence block
#[derive(Debug, Clone)]
pub struct BlockInput<'a> {
    pub source_id: &'a str,
    pub host: &'a str,
    /// Declared letter, already in the user's lettering
    pub explicit_letter: Option<Letter>,
    /// Text the stances are read from (the localized block when available)
    pub context: &'a str,
    pub citation: &'a str,
    pub local_confidence: f64,
    pub method: ExtractionMethod,
}

/// Assemble the per-source record; local confidence is clamped
pub fn build_evidence_block(input: BlockInput<'_>, question: &Question) -> EvidenceBlock {
    let local_confidence = input
        .local_confidence
        .clamp(LOCAL_CONFIDENCE_MIN, LOCAL_CONFIDENCE_MAX);
    let declared = input.explicit_letter.map(|l| (l, local_confidence));

    let stances: BTreeMap<_, _> = question
        .options
        .keys()
        .map(|letter| {
            (
                *letter,
                classify_option_stance(input.context, *letter, question, declared),
            )
        })
        .collect();

    EvidenceBlock {
        source_id: input.source_id.to_string(),
        host: input.host.to_string(),
        explicit_letter: input.explicit_letter,
        stances,
        citation: input.citation.to_string(),
        local_confidence,
        evidence_type: input.method,
    }
}
