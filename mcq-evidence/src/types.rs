//! Core Types for the evidence engine
//!
//! Question model, per-source evidence records, vote tallies and verdicts.
//! Everything here is plain data; behaviour lives in `services` and
//! `orchestrator`.

use crate::orchestrator::statistics::RunStats;
use crate::services::question_parser;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Question
// ============================================================================

/// Option letter (A–E)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Letter {
    A,
    B,
    C,
    D,
    E,
}

impl Letter {
    pub const ALL: [Letter; 5] = [Letter::A, Letter::B, Letter::C, Letter::D, Letter::E];

    /// Parse an option letter (case-insensitive)
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'A' => Some(Letter::A),
            'B' => Some(Letter::B),
            'C' => Some(Letter::C),
            'D' => Some(Letter::D),
            'E' => Some(Letter::E),
            _ => None,
        }
    }

    /// Parse the first character of a regex capture
    pub fn from_str_start(s: &str) -> Option<Self> {
        s.trim().chars().next().and_then(Self::from_char)
    }

    pub fn as_char(self) -> char {
        match self {
            Letter::A => 'A',
            Letter::B => 'B',
            Letter::C => 'C',
            Letter::D => 'D',
            Letter::E => 'E',
        }
    }

    /// Zero-based position (A = 0)
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for Letter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Whether the question asks for the correct or the incorrect option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Correct,
    Incorrect,
}

/// Parsed multiple-choice question (immutable for a run)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    /// Raw text as supplied by the question extractor
    pub raw: String,
    /// Text preceding the first option line
    pub stem: String,
    /// Letter → option body, in letter order
    pub options: BTreeMap<Letter, String>,
    /// Seeking the correct or the incorrect option
    pub polarity: Polarity,
    /// Hash of normalized stem + sorted normalized options
    pub fingerprint: String,
    /// The question's own number when the stem starts with one ("12.", "Question 12")
    pub number: Option<u32>,
}

impl Question {
    /// Parse raw question text into stem, options, polarity and fingerprint
    pub fn parse(raw: &str) -> Self {
        let stem = question_parser::extract_stem(raw);
        let options = question_parser::extract_options(raw);
        let polarity = question_parser::detect_polarity(&stem);
        let fingerprint = question_parser::fingerprint(&stem, &options);
        let number = question_parser::extract_question_number(&stem);

        Self {
            raw: raw.to_string(),
            stem,
            options,
            polarity,
            fingerprint,
            number,
        }
    }

    /// Options are lettered A, B, C... without gaps and there are at least two
    pub fn is_well_formed(&self) -> bool {
        question_parser::has_sequential_letters(&self.options)
    }

    pub fn option(&self, letter: Letter) -> Option<&str> {
        self.options.get(&letter).map(String::as_str)
    }
}

// ============================================================================
// Sources
// ============================================================================

/// Fetch outcome for a page snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum FetchStatus {
    /// 2xx response
    Ok(u16),
    /// Non-2xx response; the source is skipped
    Http(u16),
    /// Timeout or network failure
    Failed(String),
}

/// Fetched page content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub markup: String,
    pub text: String,
    pub status: FetchStatus,
}

impl PageSnapshot {
    /// 2xx with non-blank text
    pub fn is_usable(&self) -> bool {
        matches!(self.status, FetchStatus::Ok(_)) && !self.text.trim().is_empty()
    }
}

/// Search-result entry, later enriched with a fetched snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSource {
    /// Position in the search result list
    pub rank: usize,
    pub title: String,
    pub link: String,
    pub snippet: String,
    /// Lowercased host without a leading "www."
    pub host: String,
    pub snapshot: Option<PageSnapshot>,
}

impl CandidateSource {
    pub fn new(rank: usize, title: String, link: String, snippet: String) -> Self {
        let host = host_of(&link);
        Self {
            rank,
            title,
            link,
            snippet,
            host,
            snapshot: None,
        }
    }

    /// Stable identifier used by evidence blocks and votes
    pub fn source_id(&self) -> String {
        format!("src-{}-{}", self.rank, self.host)
    }
}

/// Extract the lowercased host of a URL ("https://www.Example.com/x" → "example.com")
pub fn host_of(link: &str) -> String {
    let without_scheme = link.split("://").nth(1).unwrap_or(link);
    let authority = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host = authority.rsplit('@').next().unwrap_or(authority);
    let host = host.split(':').next().unwrap_or(host).to_ascii_lowercase();
    host.strip_prefix("www.").map(str::to_string).unwrap_or(host)
}

// ============================================================================
// Evidence
// ============================================================================

/// How a source's answer was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Structured answer card container / JSON-LD accepted answer
    StructuredCard,
    /// Highlighted option in a style-per-fragment rendered page
    VisualHighlight,
    /// Explicit marker inside the localized question block
    LocalExplicit,
    /// Simple explicit-letter pattern anywhere on the page
    SimplePattern,
    /// Model-assisted single-page extraction
    ModelPage,
    /// Model inference over several collected texts
    CrossSourceSynthesis,
    /// Model reconciliation of pooled knowledge snippets
    Reflection,
}

impl ExtractionMethod {
    /// Answer came from a model rather than from page text
    pub fn is_model(self) -> bool {
        matches!(
            self,
            ExtractionMethod::ModelPage
                | ExtractionMethod::CrossSourceSynthesis
                | ExtractionMethod::Reflection
        )
    }

    /// Methods that read an unambiguous structural or declared answer
    pub fn is_high_quality(self) -> bool {
        matches!(
            self,
            ExtractionMethod::StructuredCard
                | ExtractionMethod::VisualHighlight
                | ExtractionMethod::LocalExplicit
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExtractionMethod::StructuredCard => "structured_card",
            ExtractionMethod::VisualHighlight => "visual_highlight",
            ExtractionMethod::LocalExplicit => "local_explicit",
            ExtractionMethod::SimplePattern => "simple_pattern",
            ExtractionMethod::ModelPage => "model_page",
            ExtractionMethod::CrossSourceSynthesis => "cross_source_synthesis",
            ExtractionMethod::Reflection => "reflection",
        }
    }
}

/// Passage position relative to one option being the answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stance {
    Entails,
    Contradicts,
    Neutral,
}

/// Stance plus its strength (0.0-1.0)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptionStance {
    pub stance: Stance,
    pub score: f64,
}

impl OptionStance {
    pub fn neutral() -> Self {
        Self {
            stance: Stance::Neutral,
            score: 0.0,
        }
    }
}

/// Per-source judgment (built once, immutable)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceBlock {
    pub source_id: String,
    pub host: String,
    /// Letter the source declares, already in the user's lettering
    pub explicit_letter: Option<Letter>,
    pub stances: BTreeMap<Letter, OptionStance>,
    /// Excerpt supporting the judgment
    pub citation: String,
    /// Clamped to [LOCAL_CONFIDENCE_MIN, LOCAL_CONFIDENCE_MAX]
    pub local_confidence: f64,
    pub evidence_type: ExtractionMethod,
}

impl EvidenceBlock {
    pub fn stance_of(&self, letter: Letter) -> OptionStance {
        self.stances
            .get(&letter)
            .copied()
            .unwrap_or_else(OptionStance::neutral)
    }
}

/// One accepted proposal from a source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceVote {
    pub source_id: String,
    pub host: String,
    pub link: String,
    pub title: String,
    pub letter: Letter,
    pub weight: f64,
    pub method: ExtractionMethod,
    pub citation: String,
}

// ============================================================================
// Votes and verdict
// ============================================================================

/// Weighted letter scores
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoteTally {
    /// Direct-proposal votes
    pub base: BTreeMap<Letter, f64>,
    /// Stance-derived bonus votes
    pub evidence: BTreeMap<Letter, f64>,
    pub best: Option<Letter>,
    pub second: Option<Letter>,
    /// best score − second score (best score when there is no second)
    pub margin: f64,
    /// Sum of all letter scores
    pub total: f64,
}

impl VoteTally {
    /// Combined base + evidence score for a letter
    pub fn score(&self, letter: Letter) -> f64 {
        self.base.get(&letter).copied().unwrap_or(0.0)
            + self.evidence.get(&letter).copied().unwrap_or(0.0)
    }

    /// Combined scores for every letter that received any vote
    pub fn combined(&self) -> BTreeMap<Letter, f64> {
        let mut out = BTreeMap::new();
        for letter in self.base.keys().chain(self.evidence.keys()) {
            out.insert(*letter, self.score(*letter));
        }
        out
    }

    pub fn best_score(&self) -> f64 {
        self.best.map(|l| self.score(l)).unwrap_or(0.0)
    }
}

/// Verdict state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultState {
    Confirmed,
    Suggested,
    Conflict,
    Inconclusive,
}

impl ResultState {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultState::Confirmed => "confirmed",
            ResultState::Suggested => "suggested",
            ResultState::Conflict => "conflict",
            ResultState::Inconclusive => "inconclusive",
        }
    }
}

/// Coarse trust bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceTier {
    Strong,
    Medium,
    Weak,
    AiOnly,
}

impl EvidenceTier {
    pub fn as_str(self) -> &'static str {
        match self {
            EvidenceTier::Strong => "STRONG",
            EvidenceTier::Medium => "MEDIUM",
            EvidenceTier::Weak => "WEAK",
            EvidenceTier::AiOnly => "AI_ONLY",
        }
    }
}

/// Single graded verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub best_letter: Option<Letter>,
    pub result_state: ResultState,
    pub reason: String,
    /// 0.0-1.0
    pub confidence: f64,
    pub evidence_tier: EvidenceTier,
}

impl Verdict {
    /// Verdict for a run that produced nothing usable
    pub fn inconclusive(reason: impl Into<String>) -> Self {
        Self {
            best_letter: None,
            result_state: ResultState::Inconclusive,
            reason: reason.into(),
            confidence: crate::tunables::CONFIDENCE_MIN,
            evidence_tier: EvidenceTier::Weak,
        }
    }

    /// Only confirmed + STRONG verdicts are cacheable
    pub fn is_cacheable(&self) -> bool {
        self.result_state == ResultState::Confirmed && self.evidence_tier == EvidenceTier::Strong
    }
}

// ============================================================================
// Produced result record
// ============================================================================

/// Result of one run (in-process contract)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResult {
    pub question: String,
    /// Display string, e.g. "B) Paris"
    pub answer: String,
    pub answer_letter: Option<Letter>,
    pub answer_text: Option<String>,
    pub sources: Vec<SourceVote>,
    /// Links backing the answer (from the cache entry when `cached`)
    pub links: Vec<String>,
    pub votes: BTreeMap<Letter, f64>,
    pub confidence: f64,
    pub result_state: ResultState,
    pub reason: String,
    pub evidence_tier: EvidenceTier,
    pub question_polarity: Polarity,
    pub overview: Option<String>,
    pub run_stats: RunStats,
    /// Served from the decision cache
    pub cached: bool,
}
