//! HTML Extractor Service
//!
//! Page-level analysis of fetched markup:
//! - structure classification and plain-text rendering (`classify`)
//! - paywall / obfuscation gates (`classify`)
//! - anchored answer-evidence extraction (`anchors`)
//! - visual-highlight answer detection (`highlight`)

pub mod anchors;
pub mod classify;
pub mod highlight;

pub use anchors::{
    extract_answer_card_evidence, extract_by_anchors, extract_generic_anchored_evidence,
};
pub use classify::{
    classify_page, is_low_quality_host, is_paywall_heavy_host, is_rendered_document_host,
    is_risky_host, is_structured_host, is_trusted_host, obfuscation_signals, paywall_signals,
    ObfuscationReport, PageKind, PaywallReport,
};
pub use highlight::extract_highlight_letter;

use crate::types::Letter;
use scraper::{Html, Node};

/// Answer evidence anchored in a page, letter in the page's own lettering
#[derive(Debug, Clone, PartialEq)]
pub struct AnchoredEvidence {
    /// Letter as printed by the source
    pub letter: Letter,
    /// Excerpt around the anchor
    pub citation: String,
    /// Text of the question block the anchor was found in (for shuffle correction)
    pub block_text: String,
    /// Extractor-specific score (0.0-1.0)
    pub score: f64,
}

const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "template", "svg", "head"];

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "br", "li", "tr", "td", "th", "h1", "h2", "h3", "h4", "h5", "h6", "section",
    "article", "blockquote", "pre", "table", "ul", "ol", "dd", "dt", "header", "footer",
];

/// Script/style-stripped text with one line per block element
pub fn plain_text(markup: &str) -> String {
    let doc = Html::parse_document(markup);
    let mut out = String::with_capacity(markup.len() / 2);

    for node in doc.root_element().descendants() {
        match node.value() {
            Node::Element(el) if BLOCK_TAGS.contains(&el.name()) => out.push('\n'),
            Node::Text(text) => {
                let skipped = node.ancestors().any(|a| {
                    a.value()
                        .as_element()
                        .map(|e| SKIPPED_TAGS.contains(&e.name()))
                        .unwrap_or(false)
                });
                if !skipped {
                    out.push_str(text);
                    out.push(' ');
                }
            }
            _ => {}
        }
    }

    out.lines()
        .map(crate::services::question_parser::collapse_whitespace)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Clamp a byte index down to the nearest char boundary
pub(crate) fn floor_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Clamp a byte index up to the nearest char boundary
pub(crate) fn ceil_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index += 1;
    }
    index
}

/// Slice `[start - before, end + after]`, respecting char boundaries
pub(crate) fn window(s: &str, start: usize, end: usize, before: usize, after: usize) -> &str {
    let from = floor_boundary(s, start.saturating_sub(before));
    let to = ceil_boundary(s, end.saturating_add(after));
    &s[from..to]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_strips_scripts() {
        let markup = r#"<html><head><title>T</title><style>.x{color:red}</style></head>
            <body><p>First  paragraph</p><script>var a = 1;</script><div>Second<br>line</div></body></html>"#;
        let text = plain_text(markup);
        assert!(text.contains("First paragraph"));
        assert!(text.contains("Second"));
        assert!(!text.contains("var a"));
        assert!(!text.contains("color:red"));
        assert!(text.lines().count() >= 3);
    }

    #[test]
    fn test_window_respects_char_boundaries() {
        let s = "ação é fácil";
        let w = window(s, 3, 4, 2, 2);
        assert!(!w.is_empty());
        assert_eq!(window(s, 0, s.len(), 100, 100), s);
    }
}
