//! Options Match Service
//!
//! Decides how many of the user's options are recognizable in an arbitrary
//! text and corrects letter shuffles between a source's lettering and the
//! user's own.

use crate::services::question_parser::{
    compact, dice_similarity, is_structural, normalize_structural, normalize_text, token_coverage_in,
    token_set,
};
use crate::tunables::{
    COVERAGE_TOKEN_RATIO, HIGHLIGHT_VERIFY_SIMILARITY, OPTIONS_MATCH_MIN_COUNT,
    OPTIONS_MATCH_MIN_RATIO, OPTIONS_MATCH_SIMILARITY, REMAP_SIMILARITY,
};
use crate::types::Letter;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

static LEADING_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*[\(\[]?[A-Ea-e]\s*[\)\]\.:\-–]\s*").expect("valid leading marker regex")
});

static OPERATOR_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"==|!=|<=|>=|=>|->|&&|\|\||[=<>+\-*/%(){}\[\];]").expect("valid operator token regex")
});

/// Which user options were recognized in a text
#[derive(Debug, Clone, Default)]
pub struct CoverageReport {
    pub matched: Vec<Letter>,
    pub total: usize,
}

impl CoverageReport {
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.matched.len() as f64 / self.total as f64
        }
    }

    pub fn count(&self) -> usize {
        self.matched.len()
    }
}

/// Pre-normalized views of one text, built once per coverage call
pub struct TextIndex {
    normalized: String,
    compacted: String,
    structural: String,
    tokens: HashSet<String>,
    lines: Vec<String>,
}

impl TextIndex {
    pub fn new(text: &str) -> Self {
        let normalized = normalize_text(text);
        let compacted = compact(&normalized);
        let structural = compact(&normalize_structural(text));
        let tokens = token_set(text);
        let lines = text
            .lines()
            .map(strip_leading_marker)
            .map(|l| normalize_text(&l))
            .filter(|l| !l.is_empty())
            .collect();
        Self {
            normalized,
            compacted,
            structural,
            tokens,
            lines,
        }
    }

    /// Exact containment of a normalized body on word boundaries
    fn contains_words(&self, body_norm: &str) -> bool {
        !body_norm.is_empty()
            && format!(" {} ", self.normalized).contains(&format!(" {} ", body_norm))
    }
}

/// Remove a leading "B)" / "(c)" / "D." marker
pub fn strip_leading_marker(line: &str) -> String {
    LEADING_MARKER.replace(line, "").trim().to_string()
}

/// Is one option body recognizable in the indexed text?
fn option_present(body: &str, index: &TextIndex) -> bool {
    if is_structural(body) {
        return structural_present(body, index);
    }

    let body_norm = normalize_text(body);
    if index.contains_words(&body_norm) {
        return true;
    }

    let body_compact = compact(&body_norm);
    if body_compact.chars().count() >= 4 && index.compacted.contains(&body_compact) {
        return true;
    }

    let body_tokens = token_set(body);
    !body_tokens.is_empty() && token_coverage_in(&body_tokens, &index.tokens) >= COVERAGE_TOKEN_RATIO
}

/// Code-like bodies: whole compacted form, or every operator plus enough word tokens
fn structural_present(body: &str, index: &TextIndex) -> bool {
    let body_structural = compact(&normalize_structural(body));
    if index.structural.contains(&body_structural) {
        return true;
    }

    let operators_present = OPERATOR_TOKEN
        .find_iter(body)
        .all(|op| index.structural.contains(op.as_str()));
    let body_tokens = token_set(body);
    operators_present
        && (body_tokens.is_empty()
            || token_coverage_in(&body_tokens, &index.tokens) >= COVERAGE_TOKEN_RATIO)
}

/// Count the user options recognizable in `text`
///
/// Escalates per option: exact containment → compacted containment → token
/// overlap ratio. Code-like options match operator tokens separately.
pub fn coverage(options: &BTreeMap<Letter, String>, text: &str) -> CoverageReport {
    let index = TextIndex::new(text);
    coverage_indexed(options, &index)
}

pub fn coverage_indexed(options: &BTreeMap<Letter, String>, index: &TextIndex) -> CoverageReport {
    let matched = options
        .iter()
        .filter(|(_, body)| option_present(body, index))
        .map(|(letter, _)| *letter)
        .collect();
    CoverageReport {
        matched,
        total: options.len(),
    }
}

/// Does `text` carry the user's option set?
///
/// Accepts when at least 3 options, or at least 60% of them, match exactly
/// or with line similarity ≥ 0.75.
pub fn options_match(options: &BTreeMap<Letter, String>, text: &str) -> bool {
    if options.is_empty() {
        return false;
    }
    let index = TextIndex::new(text);

    let matched = options
        .values()
        .filter(|body| {
            let body_norm = normalize_text(body);
            if index.contains_words(&body_norm) {
                return true;
            }
            let max_len = body_norm.len() * 3 + 16;
            index
                .lines
                .iter()
                .filter(|line| line.len() <= max_len)
                .any(|line| strsim::sorensen_dice(line, &body_norm) >= OPTIONS_MATCH_SIMILARITY)
        })
        .count();

    let ratio = matched as f64 / options.len() as f64;
    debug!(matched, total = options.len(), "Options match check");
    matched >= OPTIONS_MATCH_MIN_COUNT || (matched > 0 && ratio >= OPTIONS_MATCH_MIN_RATIO)
}

// ============================================================================
// Shuffle correction
// ============================================================================

/// Containment score: shorter/longer length ratio when one contains the other
fn containment_score(a: &str, b: &str) -> Option<f64> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if short.chars().count() < 3 && short != long {
        return None;
    }
    let padded_long = format!(" {} ", long);
    if padded_long.contains(&format!(" {} ", short)) || (short.contains(' ') && long.contains(short)) {
        Some(short.len() as f64 / long.len() as f64)
    } else {
        None
    }
}

fn best_by<F>(user_options: &BTreeMap<Letter, String>, mut score: F) -> Option<(Letter, f64)>
where
    F: FnMut(&str) -> Option<f64>,
{
    user_options
        .iter()
        .filter_map(|(letter, body)| score(body).map(|s| (*letter, s)))
        .fold(None, |best: Option<(Letter, f64)>, (letter, s)| match best {
            Some((_, best_s)) if best_s >= s => best,
            _ => Some((letter, s)),
        })
}

/// Find the user letter whose body corresponds to `body`
///
/// containment → similarity ≥ 0.7 → whitespace-insensitive containment →
/// whitespace-insensitive similarity ≥ 0.7
pub fn match_body_to_user_letter(
    body: &str,
    user_options: &BTreeMap<Letter, String>,
) -> Option<(Letter, f64)> {
    let body_norm = normalize_text(body);
    if body_norm.is_empty() {
        return None;
    }

    if let Some(hit) = best_by(user_options, |u| containment_score(&normalize_text(u), &body_norm)) {
        return Some(hit);
    }

    if let Some(hit) = best_by(user_options, |u| {
        let s = dice_similarity(u, body);
        (s >= REMAP_SIMILARITY).then_some(s)
    }) {
        return Some(hit);
    }

    let body_compact = compact(&body_norm);
    if let Some(hit) = best_by(user_options, |u| {
        let u_compact = compact(&normalize_text(u));
        if u_compact.len() < 3 || body_compact.len() < 3 {
            return None;
        }
        if u_compact.contains(&body_compact) || body_compact.contains(&u_compact) {
            let (short, long) = if u_compact.len() <= body_compact.len() {
                (u_compact.len(), body_compact.len())
            } else {
                (body_compact.len(), u_compact.len())
            };
            Some(short as f64 / long as f64)
        } else {
            None
        }
    }) {
        return Some(hit);
    }

    best_by(user_options, |u| {
        let u_compact = compact(&normalize_text(u));
        if u_compact.is_empty() {
            return None;
        }
        let s = strsim::sorensen_dice(&u_compact, &body_compact);
        (s >= REMAP_SIMILARITY).then_some(s)
    })
}

/// Translate a source's letter into the user's lettering
///
/// Returns the original letter, unchanged and logged, when the source body
/// cannot be matched to any user option.
pub fn remap_letter_to_user_options(
    source_letter: Letter,
    source_options: &BTreeMap<Letter, String>,
    user_options: &BTreeMap<Letter, String>,
) -> Letter {
    let Some(source_body) = source_options.get(&source_letter) else {
        return source_letter;
    };

    match match_body_to_user_letter(source_body, user_options) {
        Some((letter, score)) => {
            if letter != source_letter {
                debug!(from = %source_letter, to = %letter, score, "Shuffle correction applied");
            }
            letter
        }
        None => {
            warn!(letter = %source_letter, body = %source_body, "No user option matches source body, keeping letter");
            source_letter
        }
    }
}

/// Re-derive the user letter from highlighted text alone
///
/// Returns `None` unless the text matches some user option above 0.55
/// similarity (containment counts as a full match).
pub fn verify_highlight_match(
    highlighted_text: &str,
    user_options: &BTreeMap<Letter, String>,
) -> Option<Letter> {
    let stripped = strip_leading_marker(highlighted_text);
    let text_norm = normalize_text(&stripped);
    if text_norm.is_empty() {
        return None;
    }

    let best = best_by(user_options, |u| {
        let u_norm = normalize_text(u);
        let contained = containment_score(&u_norm, &text_norm).map(|_| 1.0);
        Some(contained.unwrap_or_else(|| dice_similarity(u, &stripped)))
    })?;

    if best.1 >= HIGHLIGHT_VERIFY_SIMILARITY {
        Some(best.0)
    } else {
        debug!(score = best.1, "Highlighted text matches no user option");
        None
    }
}
