//! Service modules for answer evidence
//!
//! Leaf-first: the parser has no dependencies, options matching builds on the
//! parser, and the HTML extractor and evidence service build on both.

pub mod evidence;
pub mod html_extractor;
pub mod options_match;
pub mod question_parser;

pub use evidence::{build_evidence_block, compute_votes_and_state, BlockInput};
pub use html_extractor::{plain_text, AnchoredEvidence, PageKind};
pub use options_match::{
    coverage, match_body_to_user_letter, options_match, remap_letter_to_user_options,
    verify_highlight_match, CoverageReport,
};
pub use question_parser::{dice_similarity, parse_answer_letter, token_coverage};
