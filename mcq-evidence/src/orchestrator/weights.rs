//! Source vote weights
//!
//! weight = host prior + method boost + match-quality bonus. Model-derived
//! votes use fixed weights from `tunables`.

use crate::services::html_extractor::{is_low_quality_host, is_trusted_host};
use crate::tunables::{MODEL_PAGE_WEIGHT, REFLECTION_WEIGHT, SYNTHESIS_WEIGHT};
use crate::types::ExtractionMethod;

pub fn host_prior(host: &str) -> f64 {
    if is_trusted_host(host) {
        1.5
    } else if is_low_quality_host(host) {
        0.4
    } else {
        1.0
    }
}

pub fn method_boost(method: ExtractionMethod) -> f64 {
    match method {
        ExtractionMethod::StructuredCard => 1.6,
        ExtractionMethod::VisualHighlight => 1.4,
        ExtractionMethod::LocalExplicit => 1.5,
        ExtractionMethod::SimplePattern => 1.0,
        ExtractionMethod::ModelPage
        | ExtractionMethod::CrossSourceSynthesis
        | ExtractionMethod::Reflection => 0.0,
    }
}

/// Bonus for how well the user's options appear in the source (0.0-1.0 coverage)
pub fn match_bonus(option_coverage: f64) -> f64 {
    if option_coverage >= 0.8 {
        0.5
    } else if option_coverage >= 0.6 {
        0.25
    } else {
        0.0
    }
}

/// Weight of a page-derived vote
pub fn source_weight(host: &str, method: ExtractionMethod, option_coverage: f64) -> f64 {
    match method {
        ExtractionMethod::ModelPage => MODEL_PAGE_WEIGHT,
        ExtractionMethod::CrossSourceSynthesis => SYNTHESIS_WEIGHT,
        ExtractionMethod::Reflection => REFLECTION_WEIGHT,
        _ => host_prior(host) + method_boost(method) + match_bonus(option_coverage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunables::STRONG_SOURCE_WEIGHT;

    #[test]
    fn test_explicit_marker_on_ordinary_host_is_strong() {
        let weight = source_weight("quiz.example", ExtractionMethod::LocalExplicit, 1.0);
        assert!((weight - 3.0).abs() < 1e-9);
        assert!(weight >= STRONG_SOURCE_WEIGHT);
    }

    #[test]
    fn test_simple_pattern_partial_match_is_not_strong() {
        let weight = source_weight("quiz.example", ExtractionMethod::SimplePattern, 0.65);
        assert!((weight - 2.25).abs() < 1e-9);
        assert!(weight < STRONG_SOURCE_WEIGHT);
    }

    #[test]
    fn test_model_weights_fixed() {
        assert_eq!(source_weight("any", ExtractionMethod::ModelPage, 1.0), MODEL_PAGE_WEIGHT);
        assert_eq!(source_weight("any", ExtractionMethod::Reflection, 0.0), REFLECTION_WEIGHT);
    }

    #[test]
    fn test_match_bonus_steps() {
        assert_eq!(match_bonus(0.59), 0.0);
        assert_eq!(match_bonus(0.6), 0.25);
        assert_eq!(match_bonus(0.8), 0.5);
    }
}
