//! Question Parser
//!
//! Pure text utilities shared by every other service:
//! - stem / option extraction (line-oriented and inline passes)
//! - canonicalization and fingerprinting
//! - free-form answer-letter parsing
//! - Dice similarity and token-overlap coverage
//! - polarity detection
//!
//! Nothing here allocates state between calls; regexes are compiled once.

use crate::types::{Letter, Polarity};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

// ============================================================================
// Patterns
// ============================================================================

/// "A) body", "(b) body", "C. body", "D - body" at line start
static OPTION_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*[\(\[]?([A-Ea-e])\s*[\)\]\.:\-–]\s*(\S.*)$").expect("valid option line regex")
});

/// Inline markers need a closing parenthesis/bracket: "A) x B) y"
static INLINE_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[\s;,])[\(\[]?([A-E])\s*[\)\]]\s*").expect("valid inline marker regex")
});

static LEAKAGE_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\s+(?i:answer key|answer|resposta correta|resposta|gabarito|key)\s*[:\-–]\s*[\(\[]?[A-E]\b.*$",
    )
    .expect("valid leakage key regex")
});

static LEAKAGE_MARK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s*(?:[\-–|]\s*)?(?:\(\s*(?i:correct|correta|certa|right answer)\s*\)|[✓✔]|\*+)\s*$")
        .expect("valid leakage mark regex")
});

static QUESTION_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:(?i:quest(?:ão|ao|ion)|q)\s*)?0*(\d{1,3})\s*[\.\)\-:–]")
        .expect("valid question number regex")
});

/// Start of a numbered question line ("12.", "Questão 3)", "Q7 -")
static QUESTION_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:(?i:quest(?:ão|ao|ion)|q)\s*)?0*(\d{1,3})\s*[\.\)\-:–]\s+\S")
        .expect("valid question start regex")
});

/// Operators that do not occur in ordinary prose
static STRUCTURAL_OPERATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"==|!=|<=|>=|=>|->|&&|\|\||[=<>{};]").expect("valid operator regex")
});

static CODE_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?i:select|from|where|insert|update|return|function|def|int|var|let|const|print|printf|if|else|while|for)\b")
        .expect("valid code keyword regex")
});

static OPERATOR_SPACING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s*(==|!=|<=|>=|=>|->|&&|\|\||[=<>+\-*/%(){}\[\];,])\s*").expect("valid spacing regex")
});

/// Tagged explicit answer: "Answer: B", "Gabarito - C", "Key: D"
static EXPLICIT_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i:\b(?:final answer|answer key|answer|resposta final|resposta|gabarito|key|correct option|correct answer))\s*[:=\-–]\s*\**\s*[\(\[]?([A-E])\b",
    )
    .expect("valid explicit tag regex")
});

/// Tagged mention: "Letter A:", "alternativa (C) -", "option D)"
static TAGGED_MENTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i:\b(?:letter|letra|alternative|alternativa|option|opção|opcao|choice))\s+[\(\[]?([A-E])[\)\]]?\s*[:\)\.\-–]",
    )
    .expect("valid tagged mention regex")
});

static PROSE_ANSWER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i:\b(?:the correct (?:answer|option|alternative|choice) is|the answer is|correct answer is|a resposta correta é|a alternativa correta é|resposta correta é))\s*[:\-]?\s*(?i:(?:letter|letra|option|alternativa)\s+)?[\(\[]?([A-E])\b",
    )
    .expect("valid prose answer regex")
});

static PROSE_CORRECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b[\(\[]?([A-E])[\)\]]?\s+(?i:is (?:the )?correct|is (?:the )?right answer|está correta|é a correta)",
    )
    .expect("valid prose correct regex")
});

static BARE_FINAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?i:answer|resposta|letra|letter)\s*)?[\(\[]?([A-E])[\)\]\.]?$")
        .expect("valid bare final regex")
});

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "which", "what", "from", "are", "was", "were",
    "has", "have", "had", "its", "into", "not", "but", "all", "any", "can", "one", "following",
    "about", "than", "then", "they", "their", "there", "these", "those", "will", "would", "should",
    "que", "qual", "quais", "uma", "uns", "umas", "para", "com", "dos", "das", "por", "como",
    "sao", "nao", "mais", "ser", "sua", "seu", "nos", "nas", "pelo", "pela", "esta", "este",
    "essa", "esse", "entre", "sobre", "alternativa", "alternativas", "option", "options",
    "afirmativa", "assinale", "marque", "choose", "select",
];

const NEGATIVE_TOKENS: &[&str] = &[
    "incorrect", "incorreta", "incorreto", "false", "falsa", "falso", "except", "exceto",
    "excecao", "wrong", "errada", "errado", "untrue", "inadequada", "inadequado",
];

const NEGATIVE_PHRASES: &[&str] = &[
    "not correct", "not true", "is not", "are not", "does not", "nao e correta",
    "nao e correto", "nao esta correta", "nao corresponde", "nao e verdadeira", "nao e", "nao sao",
];

const POSITIVE_TOKENS: &[&str] = &[
    "correct", "correta", "correto", "true", "verdadeira", "verdadeiro", "right", "certa",
];

// ============================================================================
// Normalization
// ============================================================================

/// Lowercase, strip diacritics, replace punctuation with spaces, collapse whitespace
pub fn normalize_text(s: &str) -> String {
    let folded: String = s
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    collapse_whitespace(&folded)
}

/// Collapse runs of whitespace into single spaces and trim
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Remove all whitespace from already-normalized text
pub fn compact(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Option body looks like code or a query (operators matter)
pub fn is_structural(body: &str) -> bool {
    STRUCTURAL_OPERATOR.is_match(body)
        || (CODE_KEYWORD.is_match(body) && body.contains(['(', '*', '+', '%']))
}

/// Structure-preserving normalization: keep operators, drop spacing around them
pub fn normalize_structural(s: &str) -> String {
    let folded: String = s
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect();
    let collapsed = collapse_whitespace(&folded);
    OPERATOR_SPACING.replace_all(&collapsed, "$1").into_owned()
}

/// Key used to de-duplicate and canonicalize option bodies
pub fn option_key(body: &str) -> String {
    if is_structural(body) {
        format!("s:{}", normalize_structural(body))
    } else {
        normalize_text(body)
    }
}

/// Meaningful tokens (length ≥ 3 or numeric, stopwords removed)
pub fn tokens(s: &str) -> Vec<String> {
    normalize_text(s)
        .split(' ')
        .filter(|t| !t.is_empty())
        .filter(|t| t.chars().count() >= 3 || t.chars().all(|c| c.is_ascii_digit()))
        .filter(|t| !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Unique meaningful tokens
pub fn token_set(s: &str) -> HashSet<String> {
    tokens(s).into_iter().collect()
}

// ============================================================================
// Stem / options
// ============================================================================

/// Byte offset where the first option ("A") begins, if any
fn first_option_offset(raw: &str) -> Option<usize> {
    let mut offset = 0;
    for line in raw.split_inclusive('\n') {
        if let Some(caps) = OPTION_LINE.captures(line.trim_end_matches(['\n', '\r'])) {
            if caps.get(1).map(|m| m.as_str().eq_ignore_ascii_case("a")) == Some(true) {
                return Some(offset);
            }
        }
        offset += line.len();
    }

    INLINE_MARKER
        .captures_iter(raw)
        .find(|caps| caps.get(1).map(|m| m.as_str()) == Some("A"))
        .and_then(|caps| caps.get(0))
        .map(|m| m.start())
}

/// Text preceding the first well-formed option, whitespace-collapsed
pub fn extract_stem(raw: &str) -> String {
    match first_option_offset(raw) {
        Some(offset) => collapse_whitespace(&raw[..offset]),
        None => collapse_whitespace(raw),
    }
}

/// Leading question number of a stem ("12. ...", "Questão 7) ...")
pub fn extract_question_number(stem: &str) -> Option<u32> {
    QUESTION_NUMBER
        .captures(stem)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Byte offsets and numbers of numbered-question lines in a longer text
pub fn question_starts(text: &str) -> Vec<(usize, Option<u32>)> {
    QUESTION_START
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let number = caps.get(1).and_then(|m| m.as_str().parse().ok());
            Some((whole.start(), number))
        })
        .collect()
}

/// Strip trailing answer-key leakage ("... Answer: B", "(correct)", "✓")
pub fn strip_answer_leakage(body: &str) -> String {
    let cut = LEAKAGE_KEY.replace(body, "");
    let cut = LEAKAGE_MARK.replace(&cut, "");
    collapse_whitespace(cut.trim_end_matches([';', ' ']))
}

/// Insert into the option map unless the letter or an equivalent body is already present
fn insert_option(
    options: &mut BTreeMap<Letter, String>,
    seen_keys: &mut HashSet<String>,
    letter: Letter,
    body: &str,
) {
    let body = strip_answer_leakage(body);
    if body.is_empty() || options.contains_key(&letter) {
        return;
    }
    let key = option_key(&body);
    if !seen_keys.insert(key) {
        debug!(letter = %letter, "Duplicate option body dropped");
        return;
    }
    options.insert(letter, body);
}

/// Line-oriented pass: one option per line, continuation lines appended
fn scan_option_lines(raw: &str) -> BTreeMap<Letter, String> {
    let mut bodies: Vec<(Letter, String)> = Vec::new();
    let mut open = false;
    let mut started = false;

    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            open = false;
            continue;
        }
        if let Some(caps) = OPTION_LINE.captures(line) {
            let letter = caps.get(1).and_then(|m| Letter::from_str_start(m.as_str()));
            let body = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            if let Some(letter) = letter {
                if !started && letter != Letter::A {
                    continue;
                }
                started = true;
                bodies.push((letter, body.to_string()));
                open = true;
                continue;
            }
        }
        if open {
            if let Some((_, body)) = bodies.last_mut() {
                body.push(' ');
                body.push_str(trimmed);
            }
        }
    }

    let mut options = BTreeMap::new();
    let mut seen = HashSet::new();
    for (letter, body) in bodies {
        insert_option(&mut options, &mut seen, letter, &body);
    }
    options
}

/// Inline pass: "A) x B) y C) z" on one or more lines, letters in sequence
fn scan_inline_options(raw: &str) -> BTreeMap<Letter, String> {
    let mut markers: Vec<(Letter, usize, usize)> = Vec::new();
    for caps in INLINE_MARKER.captures_iter(raw) {
        let (Some(whole), Some(letter)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let Some(letter) = Letter::from_str_start(letter.as_str()) else {
            continue;
        };
        let expected = markers
            .last()
            .and_then(|(l, _, _)| Letter::from_index(l.index() + 1))
            .unwrap_or(Letter::A);
        if letter == expected {
            markers.push((letter, whole.start(), whole.end()));
        } else if letter == Letter::A {
            // A fresh "A)" restarts the sequence
            markers.clear();
            markers.push((letter, whole.start(), whole.end()));
        }
    }

    let mut options = BTreeMap::new();
    let mut seen = HashSet::new();
    for (i, (letter, _, body_start)) in markers.iter().enumerate() {
        let body_end = markers.get(i + 1).map(|m| m.1).unwrap_or(raw.len());
        let mut body = &raw[*body_start..body_end];
        if let Some(paragraph_end) = body.find("\n\n") {
            body = &body[..paragraph_end];
        }
        insert_option(&mut options, &mut seen, *letter, body);
    }
    options
}

/// Extract the de-duplicated letter → body map
pub fn extract_options(raw: &str) -> BTreeMap<Letter, String> {
    let by_line = scan_option_lines(raw);
    if by_line.len() >= 2 && has_sequential_letters(&by_line) {
        return by_line;
    }

    let inline = scan_inline_options(raw);
    if inline.len() >= by_line.len() {
        inline
    } else {
        by_line
    }
}

/// Letters run A, B, C... without gaps, at least two options
pub fn has_sequential_letters(options: &BTreeMap<Letter, String>) -> bool {
    options.len() >= 2
        && options
            .keys()
            .enumerate()
            .all(|(i, letter)| letter.index() == i)
}

// ============================================================================
// Canonicalization
// ============================================================================

/// normalized stem + sorted normalized options
pub fn canonicalize(stem: &str, options: &BTreeMap<Letter, String>) -> String {
    let mut keys: Vec<String> = options.values().map(|b| option_key(b)).collect();
    keys.sort();
    format!("{}||{}", normalize_text(stem), keys.join("|"))
}

/// SHA-256 of the canonical form, lowercase hex
pub fn fingerprint(stem: &str, options: &BTreeMap<Letter, String>) -> String {
    format!("{:x}", Sha256::digest(canonicalize(stem, options).as_bytes()))
}

// ============================================================================
// Similarity
// ============================================================================

/// Bigram (Sørensen–Dice) similarity on normalized text
pub fn dice_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_text(a);
    let b = normalize_text(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::sorensen_dice(&a, &b)
}

/// Share of `needle`'s meaningful tokens present in `haystack`
pub fn token_coverage(needle: &str, haystack: &str) -> f64 {
    let needle_tokens = token_set(needle);
    if needle_tokens.is_empty() {
        return 0.0;
    }
    let haystack_tokens = token_set(haystack);
    token_coverage_in(&needle_tokens, &haystack_tokens)
}

/// Token coverage against a precomputed haystack set
pub fn token_coverage_in(needle: &HashSet<String>, haystack: &HashSet<String>) -> f64 {
    if needle.is_empty() {
        return 0.0;
    }
    let hits = needle.iter().filter(|t| haystack.contains(*t)).count();
    hits as f64 / needle.len() as f64
}

// ============================================================================
// Polarity
// ============================================================================

/// Count negative vs positive markers in the stem
pub fn detect_polarity(stem: &str) -> Polarity {
    let normalized = normalize_text(stem);
    let padded = format!(" {} ", normalized);
    let words: Vec<&str> = normalized.split(' ').collect();

    let phrase_hits = NEGATIVE_PHRASES
        .iter()
        .map(|p| padded.matches(&format!(" {} ", p)).count())
        .sum::<usize>();
    let negative = words.iter().filter(|w| NEGATIVE_TOKENS.contains(w)).count() + phrase_hits;
    let positive = words
        .iter()
        .filter(|w| POSITIVE_TOKENS.contains(w))
        .count()
        .saturating_sub(phrase_hits);

    if negative > 0 && negative >= positive {
        Polarity::Incorrect
    } else {
        Polarity::Correct
    }
}

// ============================================================================
// Answer-letter parsing
// ============================================================================

fn letters_from(re: &Regex, text: &str) -> BTreeSet<Letter> {
    re.captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| Letter::from_str_start(m.as_str()))
        .collect()
}

/// Parse a free-form model answer into a letter
///
/// Cascade: explicit tag → unique tagged mention → prose phrasing → bare letter
/// on a short final line. Two distinct tagged letters is a conflict and yields
/// `None`; the parser never guesses.
pub fn parse_answer_letter(text: &str) -> Option<Letter> {
    let mut tagged = letters_from(&EXPLICIT_TAG, text);
    tagged.extend(letters_from(&TAGGED_MENTION, text));
    match tagged.len() {
        0 => {}
        1 => return tagged.into_iter().next(),
        _ => {
            debug!(letters = ?tagged, "Conflicting tagged letters, refusing to guess");
            return None;
        }
    }

    let mut prose = letters_from(&PROSE_ANSWER, text);
    prose.extend(letters_from(&PROSE_CORRECT, text));
    match prose.len() {
        0 => {}
        1 => return prose.into_iter().next(),
        _ => return None,
    }

    let last_line = text.lines().rev().find(|l| !l.trim().is_empty())?;
    let stripped = last_line.trim().trim_matches(|c: char| c == '*' || c == '_' || c == ':');
    if stripped.chars().count() > 12 {
        return None;
    }
    BARE_FINAL
        .captures(stripped.trim())
        .and_then(|caps| caps.get(1))
        .and_then(|m| Letter::from_str_start(m.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(pairs: &[(Letter, &str)]) -> BTreeMap<Letter, String> {
        pairs.iter().map(|(l, b)| (*l, b.to_string())).collect()
    }

    #[test]
    fn test_extract_line_options() {
        let raw = "3. Which planet is largest?\nA) Mars\nB) Jupiter\nC) Venus\nD) Earth";
        let options = extract_options(raw);
        assert_eq!(options.len(), 4);
        assert_eq!(options[&Letter::B], "Jupiter");
        assert_eq!(extract_stem(raw), "3. Which planet is largest?");
        assert_eq!(extract_question_number(&extract_stem(raw)), Some(3));
    }

    #[test]
    fn test_extract_inline_options() {
        let raw = "Capital of France? A) London B) Paris C) Berlin";
        let options = extract_options(raw);
        assert_eq!(options.len(), 3);
        assert_eq!(options[&Letter::A], "London");
        assert_eq!(options[&Letter::C], "Berlin");
        assert_eq!(extract_stem(raw), "Capital of France?");
    }

    #[test]
    fn test_continuation_lines_are_appended() {
        let raw = "Pick one\na) first part\n   continues here\nb) second";
        let options = extract_options(raw);
        assert_eq!(options[&Letter::A], "first part continues here");
        assert_eq!(options[&Letter::B], "second");
    }

    #[test]
    fn test_answer_key_leakage_is_stripped() {
        let raw = "Q?\nA) one\nB) two\nC) three Answer: B";
        let options = extract_options(raw);
        assert_eq!(options[&Letter::C], "three");
        assert_eq!(strip_answer_leakage("Paris (correct)"), "Paris");
        assert_eq!(strip_answer_leakage("Paris ✓"), "Paris");
    }

    #[test]
    fn test_structural_options_are_not_merged() {
        let raw = "Which comparison?\nA) x = 1\nB) x == 1\nC) x != 1";
        let options = extract_options(raw);
        assert_eq!(options.len(), 3, "operators must keep options distinct");
        assert!(is_structural("SELECT * FROM t WHERE a = 1"));
        assert!(!is_structural("The French capital"));
        assert_eq!(normalize_structural("x  ==  1"), normalize_structural("x==1"));
    }

    #[test]
    fn test_duplicate_bodies_are_dropped() {
        let raw = "Q?\nA) Paris\nB) paris.\nC) Rome";
        let options = extract_options(raw);
        assert!(options.contains_key(&Letter::A));
        assert!(!options.contains_key(&Letter::B));
        assert!(!has_sequential_letters(&options));
    }

    #[test]
    fn test_sequential_letters() {
        assert!(has_sequential_letters(&opts(&[(Letter::A, "x"), (Letter::B, "y")])));
        assert!(!has_sequential_letters(&opts(&[(Letter::A, "x"), (Letter::C, "y")])));
        assert!(!has_sequential_letters(&opts(&[(Letter::A, "x")])));
    }

    #[test]
    fn test_canonical_form_is_invariant() {
        let a = opts(&[(Letter::A, "São Paulo"), (Letter::B, "Rio de Janeiro"), (Letter::C, "Brasília")]);
        let b = opts(&[(Letter::A, "brasilia"), (Letter::B, "SAO  PAULO"), (Letter::C, "rio de janeiro!")]);
        let fp_a = fingerprint("What is the  capital of Brazil?", &a);
        let fp_b = fingerprint("what is the capital of brazil", &b);
        assert_eq!(fp_a, fp_b);
        assert_eq!(fp_a.len(), 64);
    }

    #[test]
    fn test_canonical_form_distinguishes_content() {
        let a = opts(&[(Letter::A, "1"), (Letter::B, "2")]);
        let b = opts(&[(Letter::A, "1"), (Letter::B, "3")]);
        assert_ne!(fingerprint("Pick", &a), fingerprint("Pick", &b));
    }

    #[test]
    fn test_normalize_text_folds_diacritics() {
        assert_eq!(normalize_text("  Ação, É   Fácil! "), "acao e facil");
    }

    #[test]
    fn test_dice_similarity() {
        assert!((dice_similarity("Paris", "paris") - 1.0).abs() < 1e-9);
        assert!(dice_similarity("Paris", "Berlin") < 0.3);
        assert_eq!(dice_similarity("", "x"), 0.0);
    }

    #[test]
    fn test_token_coverage() {
        assert!((token_coverage("capital of France", "France has Paris as capital") - 1.0).abs() < 1e-9);
        assert_eq!(token_coverage("capital of France", "nothing relevant"), 0.0);
        assert_eq!(token_coverage("of a", "anything"), 0.0);
    }

    #[test]
    fn test_polarity_detection() {
        assert_eq!(detect_polarity("Which statement is correct?"), Polarity::Correct);
        assert_eq!(detect_polarity("Which statement is INCORRECT?"), Polarity::Incorrect);
        assert_eq!(detect_polarity("All are true EXCEPT:"), Polarity::Incorrect);
        assert_eq!(detect_polarity("Assinale a alternativa falsa"), Polarity::Incorrect);
        assert_eq!(detect_polarity("Which one is not correct?"), Polarity::Incorrect);
        assert_eq!(detect_polarity("Which city is NOT in France?"), Polarity::Incorrect);
        assert_eq!(detect_polarity("Name the river"), Polarity::Correct);
    }

    #[test]
    fn test_parse_answer_explicit_tag() {
        assert_eq!(parse_answer_letter("Reasoning...\nAnswer: C"), Some(Letter::C));
        assert_eq!(parse_answer_letter("Gabarito - B"), Some(Letter::B));
    }

    #[test]
    fn test_parse_answer_conflicting_tags_is_none() {
        assert_eq!(parse_answer_letter("Letter A: looks right. Key: C"), None);
    }

    #[test]
    fn test_parse_answer_prose_and_bare() {
        assert_eq!(parse_answer_letter("I think the correct answer is D because..."), Some(Letter::D));
        assert_eq!(parse_answer_letter("Paris is the capital.\n\n**B**"), Some(Letter::B));
        assert_eq!(parse_answer_letter("It depends on context."), None);
    }

    #[test]
    fn test_parse_answer_ignores_word_starting_with_letter() {
        assert_eq!(parse_answer_letter("Answer: Berlin is wrong"), None);
    }
}
