//! Vote tallying and the verdict state machine

use crate::services::html_extractor::is_trusted_host;
use crate::tunables::{
    CONFIDENCE_MAX, CONFIDENCE_MIN, CONFIRMED_CONFIDENCE_FLOOR, CONFIRMED_MIN_MARGIN,
    CONFIRMED_MIN_SCORE, CONFIRMED_MIN_SOURCES, CONFIRMED_MIN_STANCE_DOMAINS,
    CONFIRMED_MIN_STANCE_SOURCES, CONFIRMED_MIN_STRONG_SOURCES, CONFLICT_CONFIDENCE_CEILING,
    CONFLICT_MARGIN, EVIDENCE_VOTE_BONUS, INCONCLUSIVE_CONFIDENCE_CEILING, STRONG_SOURCE_WEIGHT,
    SUGGESTED_CONFIDENCE_CEILING, SUGGESTED_CONFIDENCE_FLOOR, SUGGESTED_MIN_SCORE,
};
use crate::types::{
    EvidenceBlock, EvidenceTier, Letter, ResultState, SourceVote, Stance, Verdict, VoteTally,
};
use std::collections::BTreeSet;
use tracing::debug;

/// Base votes plus stance-confirmed bonus votes
///
/// A block's bonus counts only for the letter its own source voted for.
pub fn tally_votes(votes: &[SourceVote], blocks: &[EvidenceBlock]) -> VoteTally {
    let mut tally = VoteTally::default();
    for vote in votes {
        *tally.base.entry(vote.letter).or_default() += vote.weight;
    }

    for block in blocks {
        let voted: BTreeSet<Letter> = votes
            .iter()
            .filter(|v| v.source_id == block.source_id)
            .map(|v| v.letter)
            .collect();
        for letter in voted {
            let stance = block.stance_of(letter);
            if stance.stance == Stance::Entails {
                *tally.evidence.entry(letter).or_default() += EVIDENCE_VOTE_BONUS * stance.score;
            }
        }
    }

    let mut ranked: Vec<(Letter, f64)> = tally.combined().into_iter().collect();
    // Highest score first; equal scores resolve to the earlier letter
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    tally.best = ranked.first().map(|(l, _)| *l);
    tally.second = ranked.get(1).map(|(l, _)| *l);
    let best_score = ranked.first().map(|(_, s)| *s).unwrap_or(0.0);
    let second_score = ranked.get(1).map(|(_, s)| *s).unwrap_or(0.0);
    tally.margin = best_score - second_score;
    tally.total = ranked.iter().map(|(_, s)| s).sum();
    tally
}

/// Per-letter support counters used by the state machine
#[derive(Debug, Default)]
struct Support {
    hosts: BTreeSet<String>,
    strong_hosts: BTreeSet<String>,
    high_quality: bool,
    model_only: bool,
    /// Base weight from non-model votes only
    direct_score: f64,
    stance_sources: BTreeSet<String>,
    stance_hosts: BTreeSet<String>,
}

fn support_for(letter: Letter, votes: &[SourceVote], blocks: &[EvidenceBlock]) -> Support {
    let mut support = Support {
        model_only: true,
        ..Default::default()
    };

    for vote in votes.iter().filter(|v| v.letter == letter) {
        if vote.method.is_model() {
            continue;
        }
        support.model_only = false;
        support.direct_score += vote.weight;
        support.hosts.insert(vote.host.clone());
        if vote.weight >= STRONG_SOURCE_WEIGHT || is_trusted_host(&vote.host) {
            support.strong_hosts.insert(vote.host.clone());
        }
        if vote.method.is_high_quality() {
            support.high_quality = true;
        }
    }

    for block in blocks {
        if block.evidence_type.is_model() || block.stance_of(letter).stance != Stance::Entails {
            continue;
        }
        support.stance_sources.insert(block.source_id.clone());
        support.stance_hosts.insert(block.host.clone());
    }
    support
}

fn clamp_confidence(raw: f64, state: ResultState) -> f64 {
    let raw = raw.clamp(CONFIDENCE_MIN, CONFIDENCE_MAX);
    match state {
        ResultState::Confirmed => raw.max(CONFIRMED_CONFIDENCE_FLOOR),
        ResultState::Suggested => raw.clamp(SUGGESTED_CONFIDENCE_FLOOR, SUGGESTED_CONFIDENCE_CEILING),
        ResultState::Conflict => raw.min(CONFLICT_CONFIDENCE_CEILING),
        ResultState::Inconclusive => raw.min(INCONCLUSIVE_CONFIDENCE_CEILING),
    }
}

/// Tally votes and decide the verdict
///
/// - confirmed: ≥2 distinct non-model hosts, ≥2 of them strong or trusted,
///   score ≥5, margin ≥1, entailing stance from ≥2 sources on ≥2 hosts
/// - conflict: a competing letter within a margin of 1 while non-model
///   evidence is present
/// - suggested: non-model base votes summing to ≥3 with a high-quality method or
///   agreement across hosts, or model-only support with no competing letter
/// - otherwise inconclusive
pub fn compute_votes_and_state(votes: &[SourceVote], blocks: &[EvidenceBlock]) -> (VoteTally, Verdict) {
    let tally = tally_votes(votes, blocks);
    let Some(best) = tally.best else {
        return (tally, Verdict::inconclusive("no source proposed an answer"));
    };

    let best_score = tally.best_score();
    let support = support_for(best, votes, blocks);
    let any_non_model = votes.iter().any(|v| !v.method.is_model());
    let competing = tally.second.map(|l| tally.score(l) > 0.0).unwrap_or(false);

    let confirmed = support.hosts.len() >= CONFIRMED_MIN_SOURCES
        && support.strong_hosts.len() >= CONFIRMED_MIN_STRONG_SOURCES
        && best_score >= CONFIRMED_MIN_SCORE
        && tally.margin >= CONFIRMED_MIN_MARGIN
        && support.stance_sources.len() >= CONFIRMED_MIN_STANCE_SOURCES
        && support.stance_hosts.len() >= CONFIRMED_MIN_STANCE_DOMAINS;

    let non_model_suggested = !support.model_only
        && support.direct_score >= SUGGESTED_MIN_SCORE
        && (support.high_quality || support.hosts.len() >= 2);
    let model_only_suggested = support.model_only && !any_non_model && !competing;

    let (state, reason) = if confirmed {
        (
            ResultState::Confirmed,
            format!(
                "{} independent sources agree on {} ({})",
                support.hosts.len(),
                best,
                support.hosts.iter().cloned().collect::<Vec<_>>().join(", ")
            ),
        )
    } else if competing && tally.margin < CONFLICT_MARGIN && any_non_model {
        (
            ResultState::Conflict,
            format!(
                "sources disagree: {} leads {} by {:.2}",
                best,
                tally.second.map(|l| l.to_string()).unwrap_or_default(),
                tally.margin
            ),
        )
    } else if non_model_suggested {
        (
            ResultState::Suggested,
            format!("{} supported by {} source(s), not independently confirmed", best, support.hosts.len()),
        )
    } else if model_only_suggested {
        (
            ResultState::Suggested,
            format!("{} inferred by the model without contradicting evidence", best),
        )
    } else {
        (
            ResultState::Inconclusive,
            format!("evidence for {} is too weak to decide", best),
        )
    };

    let raw = if tally.total > 0.0 { best_score / tally.total } else { 0.0 };
    let confidence = clamp_confidence(raw, state);

    let evidence_tier = if support.model_only {
        EvidenceTier::AiOnly
    } else if state == ResultState::Confirmed {
        EvidenceTier::Strong
    } else if state == ResultState::Suggested && support.high_quality {
        EvidenceTier::Medium
    } else {
        EvidenceTier::Weak
    };

    debug!(
        best = %best,
        score = best_score,
        margin = tally.margin,
        state = state.as_str(),
        tier = evidence_tier.as_str(),
        "Votes computed"
    );

    let verdict = Verdict {
        best_letter: Some(best),
        result_state: state,
        reason,
        confidence,
        evidence_tier,
    };
    (tally, verdict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExtractionMethod, OptionStance};
    use std::collections::BTreeMap;

    fn vote(id: &str, host: &str, letter: Letter, weight: f64, method: ExtractionMethod) -> SourceVote {
        SourceVote {
            source_id: id.to_string(),
            host: host.to_string(),
            link: format!("https://{}/q", host),
            title: String::new(),
            letter,
            weight,
            method,
            citation: String::new(),
        }
    }

    fn entailing_block(id: &str, host: &str, letter: Letter, score: f64) -> EvidenceBlock {
        let mut stances = BTreeMap::new();
        stances.insert(
            letter,
            OptionStance {
                stance: Stance::Entails,
                score,
            },
        );
        EvidenceBlock {
            source_id: id.to_string(),
            host: host.to_string(),
            explicit_letter: Some(letter),
            stances,
            citation: String::new(),
            local_confidence: score,
            evidence_type: ExtractionMethod::LocalExplicit,
        }
    }

    #[test]
    fn test_two_strong_sources_confirm() {
        let votes = vec![
            vote("s1", "a.example", Letter::B, 3.0, ExtractionMethod::LocalExplicit),
            vote("s2", "b.example", Letter::B, 3.0, ExtractionMethod::LocalExplicit),
        ];
        let blocks = vec![
            entailing_block("s1", "a.example", Letter::B, 0.9),
            entailing_block("s2", "b.example", Letter::B, 0.9),
        ];
        let (tally, verdict) = compute_votes_and_state(&votes, &blocks);
        assert!((tally.score(Letter::B) - 6.9).abs() < 1e-9);
        assert_eq!(verdict.result_state, ResultState::Confirmed);
        assert_eq!(verdict.best_letter, Some(Letter::B));
        assert!(verdict.confidence >= CONFIRMED_CONFIDENCE_FLOOR);
        assert_eq!(verdict.evidence_tier, EvidenceTier::Strong);
    }

    #[test]
    fn test_single_host_never_confirms() {
        let votes = vec![
            vote("s1", "a.example", Letter::B, 4.0, ExtractionMethod::LocalExplicit),
            vote("s2", "a.example", Letter::B, 4.0, ExtractionMethod::StructuredCard),
            vote("s3", "model", Letter::B, 0.9, ExtractionMethod::CrossSourceSynthesis),
        ];
        let blocks = vec![
            entailing_block("s1", "a.example", Letter::B, 0.9),
            entailing_block("s2", "a.example", Letter::B, 0.9),
        ];
        let (_, verdict) = compute_votes_and_state(&votes, &blocks);
        assert_ne!(verdict.result_state, ResultState::Confirmed);
        assert_eq!(verdict.result_state, ResultState::Suggested);
    }

    #[test]
    fn test_strong_source_beats_weak_model_vote() {
        let votes = vec![
            vote("s1", "a.example", Letter::B, 3.0, ExtractionMethod::StructuredCard),
            vote("m1", "model", Letter::C, 0.3, ExtractionMethod::ModelPage),
        ];
        let (_, verdict) = compute_votes_and_state(&votes, &[]);
        assert_eq!(verdict.best_letter, Some(Letter::B));
        assert_eq!(verdict.result_state, ResultState::Suggested);
        assert_eq!(verdict.evidence_tier, EvidenceTier::Medium);
    }

    #[test]
    fn test_model_votes_do_not_lift_weak_direct_support() {
        let votes = vec![
            vote("s1", "a.example", Letter::B, 1.2, ExtractionMethod::LocalExplicit),
            vote("m1", "a.example", Letter::B, 2.0, ExtractionMethod::ModelPage),
        ];
        let (tally, verdict) = compute_votes_and_state(&votes, &[]);
        assert!((tally.best_score() - 3.2).abs() < 1e-9);
        assert_eq!(verdict.best_letter, Some(Letter::B));
        assert_eq!(verdict.result_state, ResultState::Inconclusive);
        assert_eq!(verdict.evidence_tier, EvidenceTier::Weak);
    }

    #[test]
    fn test_close_disagreement_is_conflict() {
        let votes = vec![
            vote("s1", "a.example", Letter::A, 2.5, ExtractionMethod::SimplePattern),
            vote("s2", "b.example", Letter::C, 2.0, ExtractionMethod::SimplePattern),
        ];
        let (_, verdict) = compute_votes_and_state(&votes, &[]);
        assert_eq!(verdict.result_state, ResultState::Conflict);
        assert!(verdict.confidence <= CONFLICT_CONFIDENCE_CEILING);
    }

    #[test]
    fn test_model_only_is_ai_only() {
        let votes = vec![vote("m1", "model", Letter::D, 0.9, ExtractionMethod::CrossSourceSynthesis)];
        let (_, verdict) = compute_votes_and_state(&votes, &[]);
        assert_eq!(verdict.result_state, ResultState::Suggested);
        assert_eq!(verdict.evidence_tier, EvidenceTier::AiOnly);
        assert!(!verdict.is_cacheable());
    }

    #[test]
    fn test_no_votes_is_inconclusive() {
        let (_, verdict) = compute_votes_and_state(&[], &[]);
        assert_eq!(verdict.result_state, ResultState::Inconclusive);
        assert_eq!(verdict.best_letter, None);
    }

    #[test]
    fn test_bonus_requires_own_vote() {
        let votes = vec![vote("s1", "a.example", Letter::A, 1.0, ExtractionMethod::SimplePattern)];
        let blocks = vec![entailing_block("s1", "a.example", Letter::B, 0.9)];
        let tally = tally_votes(&votes, &blocks);
        assert_eq!(tally.score(Letter::B), 0.0);
        assert_eq!(tally.best, Some(Letter::A));
    }
}
