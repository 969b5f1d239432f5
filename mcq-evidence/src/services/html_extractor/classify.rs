//! Page classification, paywall and obfuscation gates

use crate::services::question_parser::normalize_text;
use crate::tunables::{
    OBFUSCATION_HARD_NO_VOWEL_RUN, OBFUSCATION_JUNK_RATIO, OBFUSCATION_MAX_VOWEL_RATIO,
    OBFUSCATION_MIN_LETTERS, OBFUSCATION_MIN_VOWEL_RATIO, OBFUSCATION_NO_VOWEL_RUN,
    PAYWALL_MIN_HITS, PAYWALL_MIN_HITS_HEAVY_HOST,
};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

// ============================================================================
// Host lists
// ============================================================================

const PAYWALL_HEAVY_HOSTS: &[&str] = &[
    "brainly.com",
    "brainly.com.br",
    "chegg.com",
    "coursehero.com",
    "studocu.com",
    "passeidireto.com",
    "scribd.com",
    "quizlet.com",
    "numerade.com",
    "bartleby.com",
];

const FORUM_HOSTS: &[&str] = &[
    "answers.com",
    "reddit.com",
    "quora.com",
    "answers.yahoo.com",
    "gauthmath.com",
    "respondeai.com.br",
];

const STRUCTURED_HOSTS: &[&str] = &[
    "brainly.com",
    "brainly.com.br",
    "quizlet.com",
    "answers.com",
    "stackexchange.com",
    "stackoverflow.com",
    "gauthmath.com",
    "toppr.com",
];

const RENDERED_DOCUMENT_HOSTS: &[&str] = &[
    "docplayer.net",
    "docplayer.com.br",
    "pdfcoffee.com",
    "studocu.com",
    "passeidireto.com",
    "scribd.com",
    "dokumen.pub",
    "idoc.pub",
];

const TRUSTED_HOSTS: &[&str] = &[
    "wikipedia.org",
    "britannica.com",
    "khanacademy.org",
    "scielo.br",
    "nature.com",
    "who.int",
];

const TRUSTED_SUFFIXES: &[&str] = &[".gov", ".edu", ".gov.br", ".edu.br", ".ac.uk", ".mil"];

const LOW_QUALITY_HOSTS: &[&str] = &[
    "pinterest.com",
    "facebook.com",
    "instagram.com",
    "tiktok.com",
    "youtube.com",
    "twitter.com",
    "x.com",
];

fn host_in(host: &str, list: &[&str]) -> bool {
    list.iter()
        .any(|h| host == *h || host.ends_with(&format!(".{}", h)))
}

/// Hosts that gate most content behind an account
pub fn is_paywall_heavy_host(host: &str) -> bool {
    host_in(host, PAYWALL_HEAVY_HOSTS)
}

/// Hosts whose answers are user-contributed or often partially hidden
pub fn is_risky_host(host: &str) -> bool {
    is_paywall_heavy_host(host) || host_in(host, FORUM_HOSTS)
}

/// Reference, government and academic hosts
pub fn is_trusted_host(host: &str) -> bool {
    host_in(host, TRUSTED_HOSTS) || TRUSTED_SUFFIXES.iter().any(|s| host.ends_with(s))
}

/// Social and video hosts whose text rarely states an answer reliably
pub fn is_low_quality_host(host: &str) -> bool {
    host_in(host, LOW_QUALITY_HOSTS)
}

/// Hosts with a dedicated structured answer-card extractor
pub fn is_structured_host(host: &str) -> bool {
    host_in(host, STRUCTURED_HOSTS)
}

/// Hosts serving style-per-fragment renderings of documents
pub fn is_rendered_document_host(host: &str) -> bool {
    host_in(host, RENDERED_DOCUMENT_HOSTS)
}

// ============================================================================
// Classification
// ============================================================================

/// Page structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    /// Absolutely positioned text fragments (PDF/slide renderings)
    RenderedDocument,
    /// Q&A page with a structured accepted/best answer container
    AnswerCard,
    /// Free-form page carrying option lines
    GenericQa,
    Unknown,
}

const POSITIONED_FRAGMENT_MIN: usize = 30;

static OPTION_LINE_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*[\(\[]?[A-Ea-e]\s*[\)\]\.]\s+\S").expect("valid option hint regex")
});

fn count(doc: &Html, selector: &str) -> usize {
    Selector::parse(selector)
        .map(|sel| doc.select(&sel).count())
        .unwrap_or(0)
}

/// Classify a page from structural signals in its markup
pub fn classify_page(markup: &str, text: &str) -> PageKind {
    let doc = Html::parse_document(markup);

    let positioned = count(
        &doc,
        r#"div.t, [style*="position:absolute"], [style*="position: absolute"]"#,
    );
    if markup.contains("pdf2htmlEX") || positioned >= POSITIONED_FRAGMENT_MIN {
        return PageKind::RenderedDocument;
    }

    let cards = count(
        &doc,
        r#"[itemprop="acceptedAnswer"], [itemprop="suggestedAnswer"], [itemtype*="QAPage"], .accepted-answer, .best-answer"#,
    );
    if cards > 0 || markup.contains("\"acceptedAnswer\"") {
        return PageKind::AnswerCard;
    }

    if OPTION_LINE_HINT.find_iter(text).count() >= 2 {
        return PageKind::GenericQa;
    }

    PageKind::Unknown
}

// ============================================================================
// Obfuscation
// ============================================================================

/// Letter statistics of a text
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObfuscationReport {
    pub letters: usize,
    pub vowel_ratio: f64,
    /// Share of words with a long consonant run or no vowel at all
    pub junk_ratio: f64,
    pub longest_no_vowel_run: usize,
    pub obfuscated: bool,
}

fn is_vowel(c: char) -> bool {
    matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'y')
}

/// Longest run of consecutive non-vowel letters in a word
fn no_vowel_run(word: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for c in word.chars() {
        if c.is_alphabetic() && !is_vowel(c) {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

/// Flag scrambled or protected text
///
/// Obfuscated when a single consonant run is extremely long, or when the vowel
/// ratio is abnormal and enough words look like junk.
pub fn obfuscation_signals(text: &str) -> ObfuscationReport {
    let normalized = normalize_text(text);
    let letters = normalized.chars().filter(|c| c.is_alphabetic()).count();
    if letters < OBFUSCATION_MIN_LETTERS {
        return ObfuscationReport {
            letters,
            ..Default::default()
        };
    }

    let vowels = normalized.chars().filter(|c| is_vowel(*c)).count();
    let vowel_ratio = vowels as f64 / letters as f64;

    let words: Vec<&str> = normalized
        .split(' ')
        .filter(|w| w.chars().count() >= 4 && w.chars().all(char::is_alphabetic))
        .collect();
    let junk = words
        .iter()
        .filter(|w| no_vowel_run(w) >= OBFUSCATION_NO_VOWEL_RUN || !w.chars().any(is_vowel))
        .count();
    let junk_ratio = if words.is_empty() {
        0.0
    } else {
        junk as f64 / words.len() as f64
    };
    let longest_no_vowel_run = normalized.split(' ').map(no_vowel_run).max().unwrap_or(0);

    let abnormal_vowels =
        vowel_ratio < OBFUSCATION_MIN_VOWEL_RATIO || vowel_ratio > OBFUSCATION_MAX_VOWEL_RATIO;
    let obfuscated = longest_no_vowel_run >= OBFUSCATION_HARD_NO_VOWEL_RUN
        || (abnormal_vowels && junk_ratio >= OBFUSCATION_JUNK_RATIO);

    ObfuscationReport {
        letters,
        vowel_ratio,
        junk_ratio,
        longest_no_vowel_run,
        obfuscated,
    }
}

// ============================================================================
// Paywall
// ============================================================================

const PAYWALL_MARKERS: &[&str] = &[
    "subscribe to unlock",
    "unlock this answer",
    "unlock the full",
    "sign up to view",
    "create a free account",
    "log in to see",
    "become a premium",
    "premium members",
    "to continue reading",
    "members only",
    "start your free trial",
    "this content is locked",
    "upgrade to view",
    "view the full answer",
    "see the full answer",
    "desbloqueie",
    "assine para",
    "seja premium",
    "faca login para ver",
    "conteudo exclusivo",
    "resposta bloqueada",
];

/// Paywall marker count against the host's threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaywallReport {
    pub hits: usize,
    pub required: usize,
    pub paywalled: bool,
}

/// Count preview/unlock phrases; paywall-heavy hosts need more hits
pub fn paywall_signals(text: &str, host: &str) -> PaywallReport {
    let normalized = normalize_text(text);
    let hits = PAYWALL_MARKERS
        .iter()
        .filter(|marker| normalized.contains(*marker))
        .count();
    let required = if is_paywall_heavy_host(host) {
        PAYWALL_MIN_HITS_HEAVY_HOST
    } else {
        PAYWALL_MIN_HITS
    };
    PaywallReport {
        hits,
        required,
        paywalled: hits >= required,
    }
}
