//! Option stance classification
//!
//! A stance says whether a passage supports one option as the answer
//! (entails), argues against it (contradicts), or says nothing about it.

use crate::services::question_parser::{normalize_text, token_set};
use crate::types::{Letter, OptionStance, Polarity, Question, Stance};
use std::collections::HashSet;

/// Tokens either side of a keyword hit scanned for cue words
const CUE_RADIUS: usize = 8;

const POSITIVE_CUES: &[&str] = &[
    "correct", "true", "right", "yes", "indeed", "correta", "correto", "verdadeira",
    "verdadeiro", "certa", "certo", "gabarito",
];

const NEGATIVE_CUES: &[&str] = &[
    "incorrect", "false", "wrong", "not", "never", "incorreta", "incorreto", "falsa", "falso",
    "errada", "errado", "nao", "nunca",
];

/// Tokens of an option absent from every other option and from the stem
pub fn distinctive_keywords(letter: Letter, question: &Question) -> HashSet<String> {
    let Some(body) = question.option(letter) else {
        return HashSet::new();
    };
    let mut shared = token_set(&question.stem);
    for (other, other_body) in &question.options {
        if *other != letter {
            shared.extend(token_set(other_body));
        }
    }
    token_set(body)
        .into_iter()
        .filter(|t| !shared.contains(t))
        .collect()
}

/// Flip a stance for questions seeking the incorrect option
fn orient(stance: Stance, polarity: Polarity) -> Stance {
    match (polarity, stance) {
        (Polarity::Incorrect, Stance::Entails) => Stance::Contradicts,
        (Polarity::Incorrect, Stance::Contradicts) => Stance::Entails,
        (_, s) => s,
    }
}

/// Explicit statements about the option body itself ("the answer is Paris",
/// "Paris is incorrect"); independent of any lettering
fn body_declaration(context: &str, body: &str) -> Option<Stance> {
    let body_norm = normalize_text(body);
    if body_norm.is_empty() {
        return None;
    }
    let text = format!(" {} ", normalize_text(context));

    let entails = [
        format!(" answer is {} ", body_norm),
        format!(" correct answer {} ", body_norm),
        format!(" resposta correta e {} ", body_norm),
        format!(" {} is correct ", body_norm),
        format!(" {} is the correct answer ", body_norm),
        format!(" {} esta correta ", body_norm),
    ];
    if entails.iter().any(|p| text.contains(p.as_str())) {
        return Some(Stance::Entails);
    }

    let contradicts = [
        format!(" {} is incorrect ", body_norm),
        format!(" {} is wrong ", body_norm),
        format!(" {} is false ", body_norm),
        format!(" {} is not correct ", body_norm),
        format!(" {} esta incorreta ", body_norm),
        format!(" not {} ", body_norm),
    ];
    if contradicts.iter().any(|p| text.contains(p.as_str())) {
        return Some(Stance::Contradicts);
    }
    None
}

/// Net cue count around distinctive keyword hits; `None` when no keyword occurs
fn anchor_context_cues(context: &str, keywords: &HashSet<String>) -> Option<i32> {
    if keywords.is_empty() {
        return None;
    }
    let words: Vec<String> = normalize_text(context)
        .split(' ')
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();

    let mut found = false;
    let mut net = 0i32;
    for (i, word) in words.iter().enumerate() {
        if !keywords.contains(word) {
            continue;
        }
        found = true;
        let from = i.saturating_sub(CUE_RADIUS);
        let to = (i + CUE_RADIUS + 1).min(words.len());
        for cue in &words[from..to] {
            if POSITIVE_CUES.contains(&cue.as_str()) {
                net += 1;
            } else if NEGATIVE_CUES.contains(&cue.as_str()) {
                net -= 1;
            }
        }
    }
    found.then_some(net)
}

/// Stance of `context` towards `letter` being the answer
///
/// `declared` is an explicit answer letter already in the user's lettering
/// together with its pattern confidence. Checked in order: explicit
/// statements about the option body, the declared letter, then cue words
/// around the option's distinctive keywords.
pub fn classify_option_stance(
    context: &str,
    letter: Letter,
    question: &Question,
    declared: Option<(Letter, f64)>,
) -> OptionStance {
    if let Some(body) = question.option(letter) {
        if let Some(stance) = body_declaration(context, body) {
            return OptionStance {
                stance: orient(stance, question.polarity),
                score: 0.85,
            };
        }
    }

    if let Some((declared_letter, confidence)) = declared {
        return if declared_letter == letter {
            OptionStance {
                stance: Stance::Entails,
                score: confidence,
            }
        } else {
            OptionStance {
                stance: Stance::Contradicts,
                score: confidence * 0.5,
            }
        };
    }

    match anchor_context_cues(context, &distinctive_keywords(letter, question)) {
        Some(net) if net != 0 => {
            let raw = if net > 0 { Stance::Entails } else { Stance::Contradicts };
            OptionStance {
                stance: orient(raw, question.polarity),
                score: (0.4 + 0.1 * net.unsigned_abs() as f64).min(0.8),
            }
        }
        _ => OptionStance::neutral(),
    }
}
