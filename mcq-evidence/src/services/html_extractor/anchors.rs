//! Anchored answer-evidence extraction
//!
//! Three entry points, one per page shape:
//! - rendered documents: numbered-question blocks, best block searched for an anchor
//! - structured answer cards: accepted/best answer containers and JSON-LD
//! - generic pages: answer-declaration anchors anywhere, scored by context

use super::classify::is_risky_host;
use super::{window, AnchoredEvidence};
use crate::services::options_match::{coverage, match_body_to_user_letter};
use crate::services::question_parser::{
    collapse_whitespace, parse_answer_letter, question_starts, token_coverage,
};
use crate::tunables::{
    ANCHOR_BLOCK_MIN_SCORE, ANCHOR_EVIDENCE_WINDOW, GENERIC_MIN_COVERAGE,
    GENERIC_MIN_COVERAGE_RISKY, GENERIC_MIN_TOPIC, GENERIC_MIN_TOPIC_RISKY,
    GENERIC_WINDOW_AFTER, GENERIC_WINDOW_BEFORE,
};
use crate::types::{Letter, Question};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

// ============================================================================
// Patterns
// ============================================================================

/// Answer declaration followed by a letter: "Answer key: B", "Gabarito: letra C"
static ANSWER_ANCHOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i:(gabarito(?:\s+oficial)?|answer\s+key|correct\s+answer|right\s+answer|resposta\s+correta|alternativa\s+correta|letra\s+correta)|resposta|answer)\s*(?:(?i:is|é|:|=|-|–)\s*)*(?:(?i:letter|letra|option|alternativa)\s*)?[\(\[]?([A-E])\b",
    )
    .expect("valid answer anchor regex")
});

static INSTRUCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i:\b(?:assinale|marque|choose|select|indique|pick|circle|escolha)\b)")
        .expect("valid instruction regex")
});

static OPTION_MARKER_AFTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\s)[\(\[]?[A-E]\s*[\)\]]").expect("valid option marker regex")
});

static GABARITO_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i:\b(?:gabarito|answer key|respostas)\b)").expect("valid gabarito heading regex")
});

static GABARITO_PAIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b0*(\d{1,3})\s*[\.\)\-–:]?\s*([A-E])\b").expect("valid gabarito pair regex")
});

/// Characters before an anchor scanned for instruction verbs
const INSTRUCTION_LOOKBEHIND: usize = 80;

/// Characters after an anchor scanned for a continuing option list
const OPTION_LIST_LOOKAHEAD: usize = 25;

// ============================================================================
// Anchor helpers
// ============================================================================

/// An accepted answer-declaration match
struct Anchor {
    letter: Letter,
    start: usize,
    end: usize,
    strength: f64,
}

fn anchor_from(caps: &Captures<'_>) -> Option<Anchor> {
    let whole = caps.get(0)?;
    let letter = Letter::from_str_start(caps.get(2)?.as_str())?;
    let strength = if caps.get(1).is_some() { 1.0 } else { 0.7 };
    Some(Anchor {
        letter,
        start: whole.start(),
        end: whole.end(),
        strength,
    })
}

/// The anchor is an instruction ("select the answer A...") or the start of an option list
fn is_instruction_window(text: &str, anchor: &Anchor) -> bool {
    let before = window(text, anchor.start, anchor.start, INSTRUCTION_LOOKBEHIND, 0);
    let before_line = before.rsplit('\n').next().unwrap_or(before);
    if INSTRUCTION.is_match(before_line) {
        return true;
    }

    let after = window(text, anchor.end, anchor.end, 0, OPTION_LIST_LOOKAHEAD);
    let after_line = after.split('\n').next().unwrap_or(after);
    OPTION_MARKER_AFTER.is_match(after_line)
}

/// Answer anchors in `text`, instruction windows removed
fn answer_anchors(text: &str) -> Vec<Anchor> {
    ANSWER_ANCHOR
        .captures_iter(text)
        .filter_map(|caps| anchor_from(&caps))
        .filter(|anchor| {
            let instruction = is_instruction_window(text, anchor);
            if instruction {
                debug!(letter = %anchor.letter, "Anchor rejected as instruction/option list");
            }
            !instruction
        })
        .collect()
}

// ============================================================================
// Rendered documents
// ============================================================================

/// A numbered question block of a multi-question document
#[derive(Debug, Clone)]
pub struct NumberedBlock {
    pub number: Option<u32>,
    pub text: String,
}

/// Split a document into numbered-question blocks (leading preamble has no number)
pub fn split_numbered_blocks(text: &str) -> Vec<NumberedBlock> {
    let starts = question_starts(text);

    let mut blocks = Vec::with_capacity(starts.len() + 1);
    let first = starts.first().map(|(s, _)| *s).unwrap_or(text.len());
    if first > 0 {
        blocks.push(NumberedBlock {
            number: None,
            text: text[..first].to_string(),
        });
    }
    for (i, (start, number)) in starts.iter().enumerate() {
        let end = starts.get(i + 1).map(|(s, _)| *s).unwrap_or(text.len());
        blocks.push(NumberedBlock {
            number: *number,
            text: text[*start..end].to_string(),
        });
    }
    blocks
}

/// Topical score of a block: stem token coverage and option coverage
pub fn block_score(block: &str, question: &Question) -> f64 {
    let stem = token_coverage(&question.stem, block);
    let options = coverage(&question.options, block).ratio();
    0.6 * stem + 0.4 * options
}

/// Answer-key table ("1-B 2-C 3-A") after the last gabarito heading
fn gabarito_table(text: &str) -> HashMap<u32, Letter> {
    let Some(heading) = GABARITO_HEADING.find_iter(text).last() else {
        return HashMap::new();
    };
    GABARITO_PAIR
        .captures_iter(&text[heading.end()..])
        .filter_map(|caps| {
            let number = caps.get(1)?.as_str().parse().ok()?;
            let letter = Letter::from_str_start(caps.get(2)?.as_str())?;
            Some((number, letter))
        })
        .collect()
}

/// Locate the question in a multi-question rendered document and read its anchor
///
/// Falls back to an answer-key table lookup by question number.
pub fn extract_by_anchors(text: &str, question: &Question) -> Option<AnchoredEvidence> {
    let blocks = split_numbered_blocks(text);
    let (best, score) = blocks
        .iter()
        .map(|b| (b, block_score(&b.text, question)))
        .max_by(|a, b| a.1.total_cmp(&b.1))?;

    if score < ANCHOR_BLOCK_MIN_SCORE {
        debug!(score, "No block resembles the question");
        return None;
    }

    if let Some(anchor) = answer_anchors(&best.text).into_iter().next() {
        let citation = window(&best.text, anchor.start, anchor.end, 0, ANCHOR_EVIDENCE_WINDOW);
        return Some(AnchoredEvidence {
            letter: anchor.letter,
            citation: collapse_whitespace(citation),
            block_text: best.text.clone(),
            score: score.min(1.0) * anchor.strength,
        });
    }

    let number = best.number.or(question.number)?;
    let letter = *gabarito_table(text).get(&number)?;
    debug!(number, letter = %letter, "Answer read from gabarito table");
    Some(AnchoredEvidence {
        letter,
        citation: format!("{} - {}", number, letter),
        block_text: best.text.clone(),
        score: score.min(1.0) * 0.9,
    })
}

// ============================================================================
// Structured answer cards
// ============================================================================

const CARD_SELECTOR: &str = r#"[itemprop="acceptedAnswer"], [itemprop="suggestedAnswer"], .accepted-answer, .best-answer, .answer-content, [data-testid="answer_box"]"#;
const QUESTION_SELECTOR: &str = r#"[itemtype*="Question"], [itemprop="mainEntity"], .question-content"#;

/// Letter declared by a card's text, or the single user option it names
fn card_letter(card_text: &str, question: &Question) -> Option<(Letter, bool)> {
    if let Some(anchor) = answer_anchors(card_text).into_iter().next() {
        return Some((anchor.letter, true));
    }
    if let Some(letter) = parse_answer_letter(card_text) {
        return Some((letter, true));
    }

    // No letter: the card must name exactly one user option
    let named: Vec<Letter> = question
        .options
        .iter()
        .filter(|(_, body)| coverage(&single(body), card_text).count() == 1)
        .map(|(letter, _)| *letter)
        .collect();
    match named.as_slice() {
        [only] => match_body_to_user_letter(&question.options[only], &question.options)
            .map(|(letter, _)| (letter, false)),
        _ => None,
    }
}

fn single(body: &str) -> std::collections::BTreeMap<Letter, String> {
    std::iter::once((Letter::A, body.to_string())).collect()
}

/// Depth-first search for `acceptedAnswer.text` in a JSON-LD value
fn json_ld_answers(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map {
                if key == "acceptedAnswer" || key == "suggestedAnswer" {
                    collect_answer_text(inner, out);
                } else {
                    json_ld_answers(inner, out);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| json_ld_answers(v, out)),
        _ => {}
    }
}

fn collect_answer_text(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Array(items) => items.iter().for_each(|v| collect_answer_text(v, out)),
        Value::Object(map) => {
            if let Some(Value::String(text)) = map.get("text") {
                out.push(text.clone());
            }
        }
        Value::String(text) => out.push(text.clone()),
        _ => {}
    }
}

/// Scan structured answer containers (microdata, classed cards, JSON-LD)
pub fn extract_answer_card_evidence(markup: &str, question: &Question) -> Option<AnchoredEvidence> {
    let doc = Html::parse_document(markup);

    let question_text = Selector::parse(QUESTION_SELECTOR)
        .ok()
        .and_then(|sel| {
            doc.select(&sel)
                .next()
                .map(|el| collapse_whitespace(&el.text().collect::<Vec<_>>().join(" ")))
        })
        .unwrap_or_default();

    let mut cards: Vec<String> = Selector::parse(CARD_SELECTOR)
        .map(|sel| {
            doc.select(&sel)
                .map(|el| collapse_whitespace(&el.text().collect::<Vec<_>>().join(" ")))
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default();

    if let Ok(sel) = Selector::parse(r#"script[type="application/ld+json"]"#) {
        for script in doc.select(&sel) {
            let raw = script.text().collect::<String>();
            match serde_json::from_str::<Value>(&raw) {
                Ok(value) => json_ld_answers(&value, &mut cards),
                Err(e) => debug!(error = %e, "Unparseable JSON-LD block"),
            }
        }
    }

    for card in cards {
        let Some((letter, declared)) = card_letter(&card, question) else {
            continue;
        };
        let excerpt: String = card.chars().take(ANCHOR_EVIDENCE_WINDOW).collect();
        return Some(AnchoredEvidence {
            letter,
            citation: excerpt,
            // Body-matched letters are already in the user's lettering
            block_text: if declared { question_text.clone() } else { String::new() },
            score: if declared { 0.9 } else { 0.75 },
        });
    }
    None
}

// ============================================================================
// Generic pages
// ============================================================================

/// Best answer anchor anywhere in the page, judged by its context window
pub fn extract_generic_anchored_evidence(
    text: &str,
    question: &Question,
    host: &str,
) -> Option<AnchoredEvidence> {
    let (min_topic, min_coverage) = if is_risky_host(host) {
        (GENERIC_MIN_TOPIC_RISKY, GENERIC_MIN_COVERAGE_RISKY)
    } else {
        (GENERIC_MIN_TOPIC, GENERIC_MIN_COVERAGE)
    };

    let mut best: Option<AnchoredEvidence> = None;
    for anchor in answer_anchors(text) {
        let context = window(text, anchor.start, anchor.end, GENERIC_WINDOW_BEFORE, GENERIC_WINDOW_AFTER);
        let topic = token_coverage(&question.stem, context);
        let option_coverage = coverage(&question.options, context).ratio();
        if topic < min_topic || option_coverage < min_coverage {
            debug!(host, topic, option_coverage, "Generic anchor below thresholds");
            continue;
        }

        let score = 0.5 * topic + 0.3 * option_coverage + 0.2 * anchor.strength;
        if best.as_ref().map(|b| score > b.score).unwrap_or(true) {
            let citation = window(text, anchor.start, anchor.end, 0, ANCHOR_EVIDENCE_WINDOW);
            best = Some(AnchoredEvidence {
                letter: anchor.letter,
                citation: collapse_whitespace(citation),
                block_text: context.to_string(),
                score,
            });
        }
    }
    best
}
