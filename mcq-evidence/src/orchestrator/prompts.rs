//! Prompt texts for model-assisted steps

use crate::types::{Polarity, Question};

pub const PAGE_SYSTEM_PROMPT: &str = "You read one web page and decide which option of a \
multiple-choice question the page itself marks as the answer. Use only the page text. \
Reply with a single line 'Answer: <letter>', or 'Answer: NONE' when the page does not say.";

pub const SYNTHESIS_SYSTEM_PROMPT: &str = "You answer a multiple-choice question using only \
the numbered evidence excerpts provided. Do not rely on outside knowledge. Reply with \
'Answer: <letter>' on the first line and one sentence citing the excerpt that supports it.";

pub const REFLECTION_SYSTEM_PROMPT: &str = "You reconcile partial knowledge snippets about a \
multiple-choice question. Letter claims inside the snippets have been removed and must not \
be guessed back; judge the option statements on their content. Reply with \
'Answer: <letter>' on the first line, or 'Answer: NONE' if the snippets are insufficient.";

pub const OVERVIEW_SYSTEM_PROMPT: &str = "You summarize evidence. Write two or three sentences \
describing what the cited excerpts say about the question. Add no facts that are not in the \
excerpts.";

/// Stem and options in the user's lettering
pub fn format_question(question: &Question) -> String {
    let mut out = question.stem.clone();
    for (letter, body) in &question.options {
        out.push_str(&format!("\n{}) {}", letter, body));
    }
    if question.polarity == Polarity::Incorrect {
        out.push_str("\n(The question asks for the option that is NOT correct.)");
    }
    out
}

pub fn page_prompt(question: &Question, excerpt: &str) -> String {
    format!(
        "Question:\n{}\n\nPage text:\n{}",
        format_question(question),
        excerpt
    )
}

fn numbered(texts: &[String]) -> String {
    texts
        .iter()
        .enumerate()
        .map(|(i, t)| format!("[{}] {}", i + 1, t))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn synthesis_prompt(question: &Question, texts: &[String]) -> String {
    format!(
        "Question:\n{}\n\nEvidence:\n{}",
        format_question(question),
        numbered(texts)
    )
}

pub fn reflection_prompt(question: &Question, snippets: &[String]) -> String {
    format!(
        "Question:\n{}\n\nKnowledge snippets:\n{}",
        format_question(question),
        numbered(snippets)
    )
}

pub fn overview_prompt(question: &Question, citations: &[String]) -> String {
    format!(
        "Question:\n{}\n\nCited excerpts:\n{}",
        format_question(question),
        numbered(citations)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_question_lists_options() {
        let question = Question::parse("Capital of France? A) London B) Paris C) Berlin");
        let formatted = format_question(&question);
        assert!(formatted.contains("\nA) London"));
        assert!(formatted.contains("\nC) Berlin"));
        assert!(!formatted.contains("NOT correct"));
    }

    #[test]
    fn test_synthesis_prompt_numbers_evidence() {
        let question = Question::parse("Capital of France? A) London B) Paris");
        let prompt = synthesis_prompt(&question, &["one".into(), "two".into()]);
        assert!(prompt.contains("[1] one\n\n[2] two"));
    }
}
