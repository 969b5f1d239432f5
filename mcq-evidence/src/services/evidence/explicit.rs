//! Explicit answer extraction
//!
//! Pattern cascade over answer-declaration phrasings. Each pattern carries a
//! fixed confidence and a priority; the chooser refuses to pick when the two
//! best letters are too close.

use crate::services::options_match::coverage;
use crate::services::question_parser::{
    dice_similarity, normalize_text, token_coverage, token_set,
};
use crate::tunables::{
    EXPLANATION_MIN_MARGIN, EXPLANATION_MIN_SCORE, EXPLICIT_MIN_CONTEXT_DENSITY,
    EXPLICIT_MIN_OPTION_COVERAGE, GABARITO_TIE_MARGIN,
};
use crate::types::{Letter, Polarity, Question};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use tracing::debug;

/// An explicit answer declaration found in text
#[derive(Debug, Clone, PartialEq)]
pub struct ExplicitAnswer {
    pub letter: Letter,
    pub confidence: f64,
    /// Byte range of the declaration in the scanned text
    pub start: usize,
    pub end: usize,
    pub pattern: &'static str,
}

struct GabaritoPattern {
    name: &'static str,
    regex: Lazy<Regex>,
    confidence: f64,
    priority: f64,
}

macro_rules! pattern {
    ($name:expr, $re:expr, $confidence:expr, $priority:expr) => {
        GabaritoPattern {
            name: $name,
            regex: Lazy::new(|| Regex::new($re).expect("valid gabarito pattern")),
            confidence: $confidence,
            priority: $priority,
        }
    };
}

static GABARITO_PATTERNS: [GabaritoPattern; 6] = [
    pattern!(
        "answer_key",
        r"(?i:\b(?:gabarito(?:\s+oficial)?|answer\s+key))\s*[:=\-–]?\s*(?:(?i:letra|letter|alternativa|option)\s*)?[\(\[]?([A-E])\b",
        0.95,
        1.0
    ),
    pattern!(
        "correct_answer",
        r"(?i:\b(?:resposta\s+correta|correct\s+answer|right\s+answer))\s*(?:(?i:is|é|:|=|-|–)\s*)*(?:(?i:letra|letter|alternativa|option)\s*)?[\(\[]?([A-E])\b",
        0.9,
        0.95
    ),
    pattern!(
        "correct_option",
        r"(?i:\b(?:alternativa\s+correta|op[çc][ãa]o\s+correta|correct\s+(?:option|alternative|choice)|the\s+answer\s+is))\s*(?:(?i:is|é|:|=|-|–)\s*)*(?:(?i:letra|letter|alternativa|option)\s*)?[\(\[]?([A-E])\b",
        0.88,
        0.9
    ),
    pattern!(
        "answer",
        r"(?i:\b(?:resposta|answer))\s*[:=\-–]\s*(?:(?i:letra|letter|alternativa|option)\s*)?[\(\[]?([A-E])\b",
        0.8,
        0.8
    ),
    pattern!(
        "letter_mention",
        r"(?m)^\s*(?i:letra|letter)\s+[\(\[]?([A-E])\b",
        0.7,
        0.7
    ),
    pattern!(
        "letter_is_correct",
        r"\b[\(\[]?([A-E])[\)\]]?\s+(?i:is\s+(?:the\s+)?correct|está\s+correta|é\s+a\s+correta)",
        0.65,
        0.6
    ),
];

/// "the false/incorrect option is X", "a alternativa incorreta é X"
static NEGATIVE_DECLARATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i:\b(?:the\s+)?(?:false|incorrect|wrong|untrue)\s+(?:option|alternative|statement|answer|one)\s+is|alternativa\s+(?:incorreta|falsa|errada)\s+é|a\s+(?:incorreta|falsa)\s+é)\s*[:\-]?\s*(?:(?i:letra|letter|option)\s*)?[\(\[]?([A-E])\b",
    )
    .expect("valid negative declaration regex")
});

/// "the true/correct statement is X"
static POSITIVE_DECLARATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i:\b(?:the\s+)?(?:true|correct|right)\s+(?:option|alternative|statement|one)\s+is|alternativa\s+(?:verdadeira|correta)\s+é)\s*[:\-]?\s*(?:(?i:letra|letter|option)\s*)?[\(\[]?([A-E])\b",
    )
    .expect("valid positive declaration regex")
});

const CONTEXT_CHARS: usize = 300;

// ============================================================================
// Gabarito cascade
// ============================================================================

fn all_candidates(text: &str) -> Vec<ExplicitAnswer> {
    let mut found = Vec::new();
    for pattern in GABARITO_PATTERNS.iter() {
        for caps in pattern.regex.captures_iter(text) {
            let (Some(whole), Some(letter)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let Some(letter) = Letter::from_str_start(letter.as_str()) else {
                continue;
            };
            found.push(ExplicitAnswer {
                letter,
                confidence: pattern.confidence * pattern.priority,
                start: whole.start(),
                end: whole.end(),
                pattern: pattern.name,
            });
        }
    }
    found
}

/// Priority-weighted chooser: best candidate per letter, rejected on a near tie
fn choose(candidates: Vec<ExplicitAnswer>) -> Option<ExplicitAnswer> {
    let mut best_per_letter: BTreeMap<Letter, ExplicitAnswer> = BTreeMap::new();
    for candidate in candidates {
        let replace = best_per_letter
            .get(&candidate.letter)
            .map(|b| candidate.confidence > b.confidence)
            .unwrap_or(true);
        if replace {
            best_per_letter.insert(candidate.letter, candidate);
        }
    }

    let mut ranked: Vec<ExplicitAnswer> = best_per_letter.into_values().collect();
    ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut iter = ranked.into_iter();
    let top = iter.next()?;
    if let Some(second) = iter.next() {
        if top.confidence - second.confidence < GABARITO_TIE_MARGIN {
            debug!(
                top = %top.letter,
                second = %second.letter,
                "Explicit candidates too close, refusing to choose"
            );
            return None;
        }
    }
    Some(top)
}

/// Run the answer-declaration cascade over `text`
pub fn extract_explicit_gabarito(text: &str) -> Option<ExplicitAnswer> {
    choose(all_candidates(text))
}

// ============================================================================
// Polarity-aware extraction
// ============================================================================

fn context_window(text: &str, start: usize, end: usize) -> &str {
    let mut from = start.saturating_sub(CONTEXT_CHARS);
    while !text.is_char_boundary(from) {
        from -= 1;
    }
    let mut to = (end + CONTEXT_CHARS).min(text.len());
    while !text.is_char_boundary(to) {
        to += 1;
    }
    &text[from..to]
}

/// Explicit letter with polarity-aware phrasing, checked against local context
///
/// For a question seeking the incorrect option, "the false option is X" is a
/// declaration of the answer; for a question seeking the correct option, the
/// positive phrasing is. Answer-key phrasings apply to both.
pub fn extract_explicit_letter_from_text(text: &str, question: &Question) -> Option<ExplicitAnswer> {
    let declaration = match question.polarity {
        Polarity::Incorrect => &*NEGATIVE_DECLARATION,
        Polarity::Correct => &*POSITIVE_DECLARATION,
    };

    let mut candidates = all_candidates(text);
    for caps in declaration.captures_iter(text) {
        let (Some(whole), Some(letter)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if let Some(letter) = Letter::from_str_start(letter.as_str()) {
            candidates.push(ExplicitAnswer {
                letter,
                confidence: 0.85,
                start: whole.start(),
                end: whole.end(),
                pattern: "polarity_declaration",
            });
        }
    }

    let grounded: Vec<ExplicitAnswer> = candidates
        .into_iter()
        .filter(|c| {
            let context = context_window(text, c.start, c.end);
            let density = token_coverage(&question.stem, context);
            let option_coverage = coverage(&question.options, context).ratio();
            density >= EXPLICIT_MIN_CONTEXT_DENSITY && option_coverage >= EXPLICIT_MIN_OPTION_COVERAGE
        })
        .collect();

    choose(grounded)
}

// ============================================================================
// Hallucination guard
// ============================================================================

/// Short, mostly uppercase or single-token bodies ("DNA", "HTTP", "4")
fn is_acronym_like(body: &str) -> bool {
    let trimmed = body.trim();
    let letters: Vec<char> = trimmed.chars().filter(|c| c.is_alphabetic()).collect();
    let uppercase = letters.iter().filter(|c| c.is_uppercase()).count();
    !trimmed.contains(' ')
        && trimmed.chars().count() <= 6
        && (letters.is_empty() || uppercase * 2 >= letters.len())
}

/// Reject a claimed letter that its surroundings do not support
///
/// `options` are the options in the lettering the claim was made in (the
/// source's own block when it was parsed, else the user's).
pub fn is_explicit_letter_safe(
    claim: &ExplicitAnswer,
    text: &str,
    options: &BTreeMap<Letter, String>,
) -> bool {
    let Some(body) = options.get(&claim.letter) else {
        return false;
    };

    if is_acronym_like(body) {
        let padded = format!(" {} ", normalize_text(text));
        if !padded.contains(&format!(" {} ", normalize_text(body))) {
            debug!(letter = %claim.letter, "Acronym-like option absent from text");
            return false;
        }
    }

    let rest = &text[claim.end.min(text.len())..];
    let line = rest.split('\n').next().unwrap_or_default();
    let following: String = line
        .trim_start_matches(|c: char| c == ')' || c == ']' || c == '.' || c == ':' || c == '-' || c.is_whitespace())
        .chars()
        .take(120)
        .collect();
    if following.trim().is_empty() {
        return true;
    }

    let shares_tokens = token_set(&following)
        .intersection(&token_set(body))
        .next()
        .is_some();
    if shares_tokens || dice_similarity(&following, body) >= 0.5 {
        return true;
    }

    let resembles_other = options
        .iter()
        .filter(|(letter, _)| **letter != claim.letter)
        .any(|(_, other)| {
            dice_similarity(&following, other) >= 0.6
                || format!(" {} ", normalize_text(&following)).contains(&format!(" {} ", normalize_text(other)))
        });
    if resembles_other {
        debug!(letter = %claim.letter, following = %following, "Claim is followed by another option's text");
    } else {
        debug!(letter = %claim.letter, following = %following, "Claim is followed by unrelated text");
    }
    false
}

// ============================================================================
// Explanation matching
// ============================================================================

/// Score each option against a trailing explanation and pick a clear winner
///
/// Scores are inverted when the question seeks the incorrect option: the
/// statement the explanation supports least is the answer.
pub fn match_explanation_to_option(explanation: &str, question: &Question) -> Option<(Letter, f64)> {
    if explanation.trim().is_empty() || question.options.is_empty() {
        return None;
    }

    let mut scored: Vec<(Letter, f64)> = question
        .options
        .iter()
        .map(|(letter, body)| {
            let overlap = token_coverage(body, explanation);
            let similarity = explanation
                .split(['.', '\n', ';'])
                .map(|sentence| dice_similarity(sentence, body))
                .fold(0.0, f64::max);
            let score = overlap.max(similarity);
            let score = match question.polarity {
                Polarity::Correct => score,
                Polarity::Incorrect => 1.0 - score,
            };
            (*letter, score)
        })
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    let (letter, best) = scored[0];
    let runner_up = scored.get(1).map(|s| s.1).unwrap_or(0.0);
    if best >= EXPLANATION_MIN_SCORE && best - runner_up >= EXPLANATION_MIN_MARGIN {
        Some((letter, best))
    } else {
        None
    }
}
