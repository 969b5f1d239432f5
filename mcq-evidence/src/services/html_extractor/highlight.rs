//! Visual-highlight answer detection
//!
//! Rendered documents often mark the correct option only through styling
//! (a different font class, colour, or bold run). The detector locates the
//! question by stem-token density, groups the following fragments by option
//! marker, and looks for the one option whose styling stands out.
//!
//! Every candidate must survive shuffle correction and an independent
//! re-match of the highlighted text against the user's options.

use super::AnchoredEvidence;
use crate::services::options_match::{remap_letter_to_user_options, verify_highlight_match};
use crate::services::question_parser::{collapse_whitespace, token_set};
use crate::tunables::{
    HIGHLIGHT_ANCHOR_WINDOW, HIGHLIGHT_DOMINANT_SHARE, HIGHLIGHT_MIN_STEM_HITS,
    HIGHLIGHT_SIGNATURE_MARGIN,
};
use crate::types::{Letter, Question};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

static STYLE_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?:fc|ff|fs|sc|fw|hl)\d+|bold|highlight|highlighted|marked|correct|destaque|negrito)$")
        .expect("valid style class regex")
});

static FRAGMENT_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*[\(\[]?([A-Ea-e])\s*[\)\]\.]\s*(.*)$").expect("valid fragment marker regex")
});

static FRAGMENT_QUESTION_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d{1,3}\s*[\.\)]\s+\S").expect("valid fragment start regex"));

const EMPHASIS_TAGS: &[&str] = &["b", "strong", "mark", "u", "em"];
const STYLE_PROPERTIES: &[&str] = &[
    "color",
    "background",
    "background-color",
    "font-weight",
    "text-decoration",
];

/// A text run with the style tokens it inherits
#[derive(Debug, Clone)]
struct Fragment {
    text: String,
    style: BTreeSet<String>,
}

/// Option group: fragments following one option marker
#[derive(Debug)]
struct Group {
    letter: Letter,
    text: String,
    fragments: Vec<Fragment>,
}

/// Candidate produced by one resolution strategy
struct Candidate {
    group: usize,
    strategy: &'static str,
    score: f64,
}

// ============================================================================
// Fragment collection
// ============================================================================

/// Style tokens of an element and its ancestors up to `<body>`
fn style_tokens_of(element: ElementRef<'_>) -> BTreeSet<String> {
    let mut tokens = BTreeSet::new();
    for ancestor in std::iter::once(*element).chain(element.ancestors()) {
        let Some(el) = ancestor.value().as_element() else {
            continue;
        };
        if el.name() == "body" || el.name() == "html" {
            break;
        }
        if EMPHASIS_TAGS.contains(&el.name()) {
            tokens.insert(format!("tag:{}", el.name()));
        }
        for class in el.classes() {
            if STYLE_CLASS.is_match(class) {
                tokens.insert(class.to_ascii_lowercase());
            }
        }
        if let Some(style) = el.attr("style") {
            for declaration in style.split(';') {
                let Some((property, value)) = declaration.split_once(':') else {
                    continue;
                };
                let property = property.trim().to_ascii_lowercase();
                if STYLE_PROPERTIES.contains(&property.as_str()) {
                    let value: String = value
                        .chars()
                        .filter(|c| !c.is_whitespace())
                        .collect::<String>()
                        .to_ascii_lowercase();
                    tokens.insert(format!("style:{}:{}", property, value));
                }
            }
        }
    }
    tokens
}

fn collect_fragments(markup: &str) -> Vec<Fragment> {
    let doc = Html::parse_document(markup);
    doc.root_element()
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let trimmed = collapse_whitespace(text);
            if trimmed.is_empty() {
                return None;
            }
            let in_script = node.ancestors().any(|a| {
                a.value()
                    .as_element()
                    .map(|e| matches!(e.name(), "script" | "style" | "head"))
                    .unwrap_or(false)
            });
            if in_script {
                return None;
            }
            let parent = node.parent().and_then(ElementRef::wrap)?;
            Some(Fragment {
                text: trimmed,
                style: style_tokens_of(parent),
            })
        })
        .collect()
}

// ============================================================================
// Anchor window and grouping
// ============================================================================

/// Start of the fragment window with the most distinct stem-token hits
fn anchor_window(fragments: &[Fragment], stem_tokens: &HashSet<String>) -> Option<usize> {
    let required = HIGHLIGHT_MIN_STEM_HITS.min(stem_tokens.len()).max(1);
    let fragment_tokens: Vec<HashSet<String>> =
        fragments.iter().map(|f| token_set(&f.text)).collect();

    let mut best: Option<(usize, usize)> = None;
    for start in 0..fragments.len() {
        let end = (start + HIGHLIGHT_ANCHOR_WINDOW).min(fragments.len());
        let hits = stem_tokens
            .iter()
            .filter(|t| fragment_tokens[start..end].iter().any(|set| set.contains(*t)))
            .count();
        if best.map(|(_, h)| hits > h).unwrap_or(true) {
            best = Some((start, hits));
        }
    }

    match best {
        Some((start, hits)) if hits >= required => Some(start),
        _ => None,
    }
}

fn group_options(fragments: &[Fragment]) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    for fragment in fragments {
        let expected = groups
            .last()
            .and_then(|g| Letter::from_index(g.letter.index() + 1))
            .unwrap_or(Letter::A);

        if let Some(caps) = FRAGMENT_MARKER.captures(&fragment.text) {
            let letter = caps.get(1).and_then(|m| Letter::from_str_start(m.as_str()));
            if letter == Some(expected) {
                let body = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
                groups.push(Group {
                    letter: expected,
                    text: body.to_string(),
                    fragments: vec![fragment.clone()],
                });
                continue;
            }
        }

        if !groups.is_empty() && FRAGMENT_QUESTION_START.is_match(&fragment.text) {
            break;
        }
        if let Some(group) = groups.last_mut() {
            if !group.text.is_empty() {
                group.text.push(' ');
            }
            group.text.push_str(&fragment.text);
            group.fragments.push(fragment.clone());
        }
    }
    groups
}

// ============================================================================
// Strategies
// ============================================================================

/// Tokens covering at least the dominant share of a group's characters
fn dominant_tokens(group: &Group) -> BTreeSet<String> {
    let total: usize = group.fragments.iter().map(|f| f.text.chars().count()).sum();
    if total == 0 {
        return BTreeSet::new();
    }
    let all: BTreeSet<&String> = group.fragments.iter().flat_map(|f| f.style.iter()).collect();
    all.into_iter()
        .filter(|token| {
            let covered: usize = group
                .fragments
                .iter()
                .filter(|f| f.style.contains(*token))
                .map(|f| f.text.chars().count())
                .sum();
            covered as f64 / total as f64 >= HIGHLIGHT_DOMINANT_SHARE
        })
        .cloned()
        .collect()
}

/// A dominant token that appears in no other group at all
fn unique_dominant(groups: &[Group], dominant: &[BTreeSet<String>]) -> Option<Candidate> {
    let owners: Vec<usize> = (0..groups.len())
        .filter(|&i| {
            dominant[i].iter().any(|token| {
                groups
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .all(|(_, other)| other.fragments.iter().all(|f| !f.style.contains(token)))
            })
        })
        .collect();
    match owners.as_slice() {
        [only] => Some(Candidate {
            group: *only,
            strategy: "unique_dominant",
            score: 0.9,
        }),
        _ => None,
    }
}

/// All groups share one signature except a single outlier
fn single_outlier(dominant: &[BTreeSet<String>]) -> Option<Candidate> {
    if dominant.len() < 3 {
        return None;
    }
    let mut counts: BTreeMap<&BTreeSet<String>, usize> = BTreeMap::new();
    for signature in dominant {
        *counts.entry(signature).or_default() += 1;
    }
    if counts.len() != 2 {
        return None;
    }
    let (majority, majority_count) = counts.iter().max_by_key(|(_, c)| **c)?;
    if *majority_count != dominant.len() - 1 {
        return None;
    }
    let outlier = dominant.iter().position(|s| s != *majority)?;
    Some(Candidate {
        group: outlier,
        strategy: "single_outlier",
        score: 0.8,
    })
}

fn emphasis_bonus(token: &str) -> f64 {
    if token.starts_with("tag:")
        || token.starts_with("style:")
        || matches!(token, "bold" | "highlight" | "highlighted" | "marked" | "correct" | "destaque" | "negrito")
    {
        2.0
    } else {
        1.0
    }
}

/// Rarity-weighted signature score with a required margin over the runner-up
fn weighted_signature(dominant: &[BTreeSet<String>]) -> Option<Candidate> {
    let n = dominant.len() as f64;
    let scores: Vec<f64> = dominant
        .iter()
        .map(|signature| {
            signature
                .iter()
                .map(|token| {
                    let holders = dominant.iter().filter(|s| s.contains(token)).count() as f64;
                    (1.0 - holders / n) * emphasis_bonus(token)
                })
                .sum()
        })
        .collect();

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|a, b| scores[*b].total_cmp(&scores[*a]));
    let top = *order.first()?;
    let runner_up = order.get(1).map(|i| scores[*i]).unwrap_or(0.0);
    (scores[top] - runner_up >= HIGHLIGHT_SIGNATURE_MARGIN).then_some(Candidate {
        group: top,
        strategy: "weighted_signature",
        score: 0.7,
    })
}

// ============================================================================
// Entry point
// ============================================================================

/// Detect the visually highlighted option, in the user's lettering
pub fn extract_highlight_letter(markup: &str, question: &Question) -> Option<AnchoredEvidence> {
    let fragments = collect_fragments(markup);
    let stem_tokens = token_set(&question.stem);
    if fragments.is_empty() || stem_tokens.is_empty() {
        return None;
    }

    let start = anchor_window(&fragments, &stem_tokens)?;
    let end = (start + 3 * HIGHLIGHT_ANCHOR_WINDOW).min(fragments.len());
    let groups = group_options(&fragments[start..end]);
    if groups.len() < 2 {
        debug!(groups = groups.len(), "Too few option groups near the anchor");
        return None;
    }

    let dominant: Vec<BTreeSet<String>> = groups.iter().map(dominant_tokens).collect();
    let source_options: BTreeMap<Letter, String> =
        groups.iter().map(|g| (g.letter, g.text.clone())).collect();

    let candidates = [
        unique_dominant(&groups, &dominant),
        single_outlier(&dominant),
        weighted_signature(&dominant),
    ];

    for candidate in candidates.into_iter().flatten() {
        let group = &groups[candidate.group];
        let remapped = remap_letter_to_user_options(group.letter, &source_options, &question.options);
        match verify_highlight_match(&group.text, &question.options) {
            Some(verified) if verified == remapped => {
                debug!(letter = %verified, strategy = candidate.strategy, "Highlighted option accepted");
                return Some(AnchoredEvidence {
                    letter: verified,
                    citation: format!("{}) {}", group.letter, group.text),
                    block_text: String::new(),
                    score: candidate.score,
                });
            }
            other => {
                debug!(
                    strategy = candidate.strategy,
                    remapped = %remapped,
                    verified = ?other,
                    "Highlight candidate failed verification"
                );
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(options: [&str; 3], highlighted: usize) -> String {
        let mut markup = String::from(
            r#"<html><body><div class="t ff1 fc0">1. What is the capital city of France?</div>"#,
        );
        for (i, body) in options.iter().enumerate() {
            let letter = Letter::from_index(i).unwrap();
            if i == highlighted {
                markup.push_str(&format!(
                    r#"<div class="t ff1 fc0">{letter}) <span class="fc1">{body}</span></div>"#
                ));
            } else {
                markup.push_str(&format!(r#"<div class="t ff1 fc0">{letter}) {body}</div>"#));
            }
        }
        markup.push_str(r#"<div class="t ff1 fc0">2. Next question here</div></body></html>"#);
        markup
    }

    fn france() -> Question {
        Question::parse("What is the capital city of France?\nA) London\nB) Paris\nC) Berlin")
    }

    #[test]
    fn test_unique_dominant_style_wins() {
        let markup = rendered(["London", "Paris", "Berlin"], 1);
        let evidence = extract_highlight_letter(&markup, &france()).expect("highlight");
        assert_eq!(evidence.letter, Letter::B);
        assert!(evidence.citation.contains("Paris"));
    }

    #[test]
    fn test_shuffled_page_is_remapped() {
        let markup = rendered(["Paris", "Berlin", "London"], 0);
        let evidence = extract_highlight_letter(&markup, &france()).expect("highlight");
        assert_eq!(evidence.letter, Letter::B);
    }

    #[test]
    fn test_wrong_question_block_is_rejected() {
        let markup = rendered(["Rome", "Madrid", "Lisbon"], 1);
        assert!(extract_highlight_letter(&markup, &france()).is_none());
    }

    #[test]
    fn test_no_highlight_yields_none() {
        let markup = rendered(["London", "Paris", "Berlin"], 9);
        assert!(extract_highlight_letter(&markup, &france()).is_none());
    }

    #[test]
    fn test_single_outlier_signature() {
        let dominant: Vec<BTreeSet<String>> = vec![
            ["fc0".to_string()].into_iter().collect(),
            ["fc0".to_string(), "tag:b".to_string()].into_iter().collect(),
            ["fc0".to_string()].into_iter().collect(),
        ];
        let candidate = single_outlier(&dominant).expect("outlier");
        assert_eq!(candidate.group, 1);
        let weighted = weighted_signature(&dominant).expect("weighted");
        assert_eq!(weighted.group, 1);
    }
}
