//! Heuristic thresholds and budgets
//!
//! Every numeric knob used by the parser, extractors, vote state machine and
//! orchestrator lives here so tests can reference them by name.

// ============================================================================
// Similarity / coverage
// ============================================================================

/// Token-overlap ratio at which an option counts as present in a text
pub const COVERAGE_TOKEN_RATIO: f64 = 0.55;

/// `options_match` accepts when at least this many options match...
pub const OPTIONS_MATCH_MIN_COUNT: usize = 3;

/// ...or at least this share of options match
pub const OPTIONS_MATCH_MIN_RATIO: f64 = 0.6;

/// Dice similarity for a non-exact option/line match in `options_match`
pub const OPTIONS_MATCH_SIMILARITY: f64 = 0.75;

/// Dice similarity for shuffle-correction remapping
pub const REMAP_SIMILARITY: f64 = 0.7;

/// Minimum similarity between highlighted text and a user option
pub const HIGHLIGHT_VERIFY_SIMILARITY: f64 = 0.55;

/// Minimum topical similarity for the local explicit-marker extractor
pub const LOCAL_EXTRACTOR_MIN_TOPIC: f64 = 0.5;

// ============================================================================
// Page gates
// ============================================================================

/// Pages shorter than this (chars) are checked for topical weakness
pub const MIN_PAGE_TEXT_CHARS: usize = 400;

/// Topical similarity under which a short page is skipped
pub const WEAK_TOPIC_SIMILARITY: f64 = 0.3;

/// Vowel ratio below which text looks scrambled
pub const OBFUSCATION_MIN_VOWEL_RATIO: f64 = 0.24;

/// Vowel ratio above which text looks scrambled
pub const OBFUSCATION_MAX_VOWEL_RATIO: f64 = 0.72;

/// Share of junk (vowel-starved) words that marks text as scrambled
pub const OBFUSCATION_JUNK_RATIO: f64 = 0.28;

/// Consecutive-consonant run that marks a single word as junk
pub const OBFUSCATION_NO_VOWEL_RUN: usize = 5;

/// A run this long anywhere flags the text by itself
pub const OBFUSCATION_HARD_NO_VOWEL_RUN: usize = 14;

/// Letters required before obfuscation statistics are trusted
pub const OBFUSCATION_MIN_LETTERS: usize = 80;

/// Paywall marker hits required on ordinary hosts
pub const PAYWALL_MIN_HITS: usize = 2;

/// Paywall marker hits required on paywall-heavy hosts
pub const PAYWALL_MIN_HITS_HEAVY_HOST: usize = 3;

/// Readable text (chars) that lets a paywalled page through
pub const PAYWALL_LEAK_MIN_CHARS: usize = 800;

/// Topical similarity a paywalled page needs to be let through
pub const PAYWALL_LEAK_MIN_TOPIC: f64 = 0.5;

/// Topical similarity that lets a structured host skip the options-match gate
pub const STRUCTURED_HOST_MIN_TOPIC: f64 = 0.55;

// ============================================================================
// Anchored extraction
// ============================================================================

/// Minimum block score for rendered-document block selection
pub const ANCHOR_BLOCK_MIN_SCORE: f64 = 0.35;

/// Characters kept after an anchor as the evidence window
pub const ANCHOR_EVIDENCE_WINDOW: usize = 240;

/// Context window (chars) before / after a generic anchor
pub const GENERIC_WINDOW_BEFORE: usize = 400;
pub const GENERIC_WINDOW_AFTER: usize = 300;

/// Generic anchor thresholds (ordinary hosts)
pub const GENERIC_MIN_TOPIC: f64 = 0.3;
pub const GENERIC_MIN_COVERAGE: f64 = 0.4;

/// Generic anchor thresholds (risky hosts)
pub const GENERIC_MIN_TOPIC_RISKY: f64 = 0.45;
pub const GENERIC_MIN_COVERAGE_RISKY: f64 = 0.6;

/// Fragments per sliding window when locating the question in a rendered page
pub const HIGHLIGHT_ANCHOR_WINDOW: usize = 40;

/// Stem token hits required to accept a highlight anchor window
pub const HIGHLIGHT_MIN_STEM_HITS: usize = 3;

/// Share of a group's fragments a dominant style token must cover
pub const HIGHLIGHT_DOMINANT_SHARE: f64 = 0.6;

/// Margin of the weighted-signature winner over the runner-up
pub const HIGHLIGHT_SIGNATURE_MARGIN: f64 = 0.75;

// ============================================================================
// Evidence service
// ============================================================================

/// Chooser rejects when the top two explicit candidates are this close
pub const GABARITO_TIE_MARGIN: f64 = 0.15;

/// Question-block sliding window: stem token density required
pub const BLOCK_MIN_STEM_DENSITY: f64 = 0.45;

/// Question-block sliding window: option density required
pub const BLOCK_MIN_OPTION_DENSITY: f64 = 0.5;

/// Explicit letter in free text: local context density required
pub const EXPLICIT_MIN_CONTEXT_DENSITY: f64 = 0.2;

/// Explicit letter in free text: option coverage required
pub const EXPLICIT_MIN_OPTION_COVERAGE: f64 = 0.34;

/// Explanation matching: minimum score and margin
pub const EXPLANATION_MIN_SCORE: f64 = 0.45;
pub const EXPLANATION_MIN_MARGIN: f64 = 0.12;

/// EvidenceBlock.local_confidence bounds
pub const LOCAL_CONFIDENCE_MIN: f64 = 0.25;
pub const LOCAL_CONFIDENCE_MAX: f64 = 0.98;

/// Stance-confirmed bonus multiplier (applied to the stance score)
pub const EVIDENCE_VOTE_BONUS: f64 = 0.5;

// ============================================================================
// Vote state machine
// ============================================================================

pub const CONFIRMED_MIN_SOURCES: usize = 2;
pub const CONFIRMED_MIN_STRONG_SOURCES: usize = 2;
pub const CONFIRMED_MIN_SCORE: f64 = 5.0;
pub const CONFIRMED_MIN_MARGIN: f64 = 1.0;
pub const CONFIRMED_MIN_STANCE_SOURCES: usize = 2;
pub const CONFIRMED_MIN_STANCE_DOMAINS: usize = 2;

pub const SUGGESTED_MIN_SCORE: f64 = 3.0;

/// Margin under which non-model evidence is a conflict
pub const CONFLICT_MARGIN: f64 = 1.0;

/// Source weight at which a domain counts as strong
pub const STRONG_SOURCE_WEIGHT: f64 = 2.5;

/// Overall confidence bounds
pub const CONFIDENCE_MIN: f64 = 0.25;
pub const CONFIDENCE_MAX: f64 = 0.98;

/// Per-state confidence floors / ceilings
pub const CONFIRMED_CONFIDENCE_FLOOR: f64 = 0.85;
pub const SUGGESTED_CONFIDENCE_FLOOR: f64 = 0.45;
pub const SUGGESTED_CONFIDENCE_CEILING: f64 = 0.84;
pub const CONFLICT_CONFIDENCE_CEILING: f64 = 0.5;
pub const INCONCLUSIVE_CONFIDENCE_CEILING: f64 = 0.35;

// ============================================================================
// Orchestrator
// ============================================================================

/// Leading letter vote that stops further fetching/processing
pub const EARLY_EXIT_VOTE: f64 = 6.5;

/// Leading vote below which the second fetch batch runs
pub const SUFFICIENT_SUPPORT_VOTE: f64 = 4.0;

/// Width of the fetch worker pool
pub const FETCH_CONCURRENCY: usize = 5;

/// Per-fetch timeout
pub const FETCH_TIMEOUT_MS: u64 = 6500;

/// Candidates in the first fetch batch
pub const FIRST_BATCH_SIZE: usize = 5;

/// Candidates considered in total (both batches)
pub const MAX_CANDIDATES: usize = 10;

/// Model-assisted single-page extractions allowed per run
pub const MODEL_PAGE_BUDGET: usize = 2;

/// Page text (chars) handed to a model in one prompt
pub const MODEL_PAGE_CHARS: usize = 6000;

/// Texts and chars per text fed to cross-source synthesis
pub const SYNTHESIS_MAX_TEXTS: usize = 4;
pub const SYNTHESIS_TEXT_CHARS: usize = 2500;

/// Lexical support margin the synthesis answer needs over the runner-up
pub const SYNTHESIS_SUPPORT_MARGIN: f64 = 0.05;

/// Own support and margin that earn the raised synthesis weight
pub const SYNTHESIS_STRONG_SUPPORT: f64 = 0.6;
pub const SYNTHESIS_STRONG_SUPPORT_MARGIN: f64 = 0.1;

/// Pooled snippets and chars per snippet handed to reflection
pub const REFLECTION_MAX_SNIPPETS: usize = 8;
pub const REFLECTION_SNIPPET_CHARS: usize = 600;

/// Weights for model-derived votes
pub const MODEL_PAGE_WEIGHT: f64 = 0.6;
pub const SYNTHESIS_WEIGHT: f64 = 0.9;
pub const SYNTHESIS_STRONG_SUPPORT_WEIGHT: f64 = 1.2;
pub const REFLECTION_WEIGHT: f64 = 0.5;

// ============================================================================
// Caches / provider
// ============================================================================

pub const DECISION_CACHE_TTL_DAYS: i64 = 14;
pub const DECISION_CACHE_MAX_ENTRIES: usize = 200;

pub const SNAPSHOT_TTL_SECS: u64 = 600;
pub const SNAPSHOT_CAPACITY: usize = 48;

pub const METRICS_RECENT_RUNS: usize = 30;

pub const PROVIDER_MIN_INTERVAL_MS: u64 = 1200;
pub const PROVIDER_QUOTA_COOLDOWN_SECS: u64 = 600;
pub const PROVIDER_MAX_RATE_LIMIT_RETRIES: u32 = 2;
pub const PROVIDER_MAX_BACKOFF_MS: u64 = 8000;
