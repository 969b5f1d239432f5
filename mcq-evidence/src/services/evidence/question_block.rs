//! Question-block localization inside long page texts

use crate::services::options_match::coverage;
use crate::services::question_parser::{question_starts, token_coverage, token_set};
use crate::tunables::{BLOCK_MIN_OPTION_DENSITY, BLOCK_MIN_STEM_DENSITY};
use crate::types::Question;
use tracing::debug;

/// Upper bound on a number-anchored block with no following question
const NUMBERED_BLOCK_MAX_CHARS: usize = 2500;

/// How the block was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockLocator {
    /// Exact question-number anchor
    Number,
    /// Sliding-window stem/option density match
    Window,
}

/// Localized slice of a page that holds the user's question
#[derive(Debug, Clone)]
pub struct QuestionBlock {
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub locator: BlockLocator,
    pub stem_density: f64,
    pub option_density: f64,
}

fn floor_boundary(s: &str, mut index: usize) -> usize {
    index = index.min(s.len());
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Locate the user's question in `text`
///
/// Tries the question's own number first, then a sliding window requiring
/// both stem-token and option density. Low option density means a different
/// question on a multi-question page and is rejected.
pub fn find_question_block(text: &str, question: &Question) -> Option<QuestionBlock> {
    if let Some(block) = find_by_number(text, question) {
        return Some(block);
    }
    find_by_window(text, question)
}

fn find_by_number(text: &str, question: &Question) -> Option<QuestionBlock> {
    let number = question.number?;
    let starts = question_starts(text);

    starts
        .iter()
        .enumerate()
        .filter(|(_, (_, n))| *n == Some(number))
        .filter_map(|(i, (start, _))| {
            let next = starts.get(i + 1).map(|(s, _)| *s).unwrap_or(text.len());
            let end = floor_boundary(text, next.min(start + NUMBERED_BLOCK_MAX_CHARS));
            let slice = &text[*start..end];
            let stem_density = token_coverage(&question.stem, slice);
            let option_density = coverage(&question.options, slice).ratio();
            (stem_density >= BLOCK_MIN_STEM_DENSITY).then(|| QuestionBlock {
                text: slice.to_string(),
                start: *start,
                end,
                locator: BlockLocator::Number,
                stem_density,
                option_density,
            })
        })
        .max_by(|a, b| {
            (a.stem_density + a.option_density).total_cmp(&(b.stem_density + b.option_density))
        })
}

fn find_by_window(text: &str, question: &Question) -> Option<QuestionBlock> {
    let stem_tokens = token_set(&question.stem);
    if stem_tokens.is_empty() {
        return None;
    }
    let span = (question.raw.len() * 2).max(600);

    let mut line_starts = vec![0];
    line_starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));

    let mut best: Option<QuestionBlock> = None;
    for start in line_starts.into_iter().filter(|s| *s < text.len()) {
        let first_line_end = text[start..].find('\n').map(|i| start + i).unwrap_or(text.len());
        let first_line = token_set(&text[start..first_line_end]);
        if !first_line.iter().any(|t| stem_tokens.contains(t)) {
            continue;
        }

        let end = floor_boundary(text, start + span);
        let slice = &text[start..end];
        let stem_density = token_coverage(&question.stem, slice);
        if stem_density < BLOCK_MIN_STEM_DENSITY {
            continue;
        }
        let option_density = coverage(&question.options, slice).ratio();
        if option_density < BLOCK_MIN_OPTION_DENSITY {
            debug!(start, option_density, "Window rejected: low option density");
            continue;
        }

        let score = 0.6 * stem_density + 0.4 * option_density;
        let better = best
            .as_ref()
            .map(|b| score > 0.6 * b.stem_density + 0.4 * b.option_density)
            .unwrap_or(true);
        if better {
            best = Some(QuestionBlock {
                text: slice.to_string(),
                start,
                end,
                locator: BlockLocator::Window,
                stem_density,
                option_density,
            });
        }
    }
    best
}
