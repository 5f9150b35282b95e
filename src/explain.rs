//! Explanation attribution
//!
//! Picks the single factor judged most responsible for a prediction. A fired
//! rule always wins over model weights; otherwise the feature with the largest
//! absolute contribution is chosen, ties going to the feature declared first.

use crate::estimator::Contributions;
use crate::types::{FeatureVector, OverrideProvenance};

/// Reported when neither a rule nor contributions explain the prediction
pub const INDETERMINATE: &str = "indeterminate";

/// Explanation attributor
pub struct ExplanationAttributor;

impl ExplanationAttributor {
    pub fn attribute(
        features: &FeatureVector,
        contributions: Option<&Contributions>,
        provenance: &OverrideProvenance,
    ) -> String {
        if let Some(rule) = provenance.primary() {
            return rule.as_str().to_string();
        }

        contributions
            .filter(|c| c.len() == features.len())
            .and_then(dominant_feature)
            .unwrap_or(INDETERMINATE)
            .to_string()
    }
}

fn dominant_feature(contributions: &Contributions) -> Option<&'static str> {
    let mut best: Option<(&'static str, f64)> = None;
    for (feature, value) in contributions.iter() {
        if !value.is_finite() || value == 0.0 {
            continue;
        }
        let magnitude = value.abs();
        // Strict comparison keeps the earlier feature on ties
        if best.map_or(true, |(_, m)| magnitude > m) {
            best = Some((feature.as_str(), magnitude));
        }
    }
    best.map(|(name, _)| name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Feature, RuleHit, RuleId, FEATURE_COUNT};

    fn vector() -> FeatureVector {
        FeatureVector::from_values(vec![0.0; FEATURE_COUNT])
    }

    fn contributions(pairs: &[(Feature, f64)]) -> Contributions {
        let mut values = vec![0.0; FEATURE_COUNT];
        for (feature, value) in pairs {
            values[feature.index()] = *value;
        }
        Contributions::from_values(values)
    }

    #[test]
    fn test_rule_beats_contributions() {
        let provenance = OverrideProvenance {
            hits: vec![
                RuleHit {
                    rule: RuleId::ConsecutiveAbsences,
                    floor: 0.8,
                },
                RuleHit {
                    rule: RuleId::FinancialHold,
                    floor: 0.5,
                },
            ],
        };
        let c = contributions(&[(Feature::Course, 3.0)]);

        assert_eq!(
            ExplanationAttributor::attribute(&vector(), Some(&c), &provenance),
            "financial_hold"
        );
    }

    #[test]
    fn test_largest_magnitude_wins() {
        let c = contributions(&[(Feature::Course, 0.4), (Feature::ConsecutiveAbsences, -1.1)]);
        assert_eq!(
            ExplanationAttributor::attribute(&vector(), Some(&c), &OverrideProvenance::default()),
            "consecutive_absences"
        );
    }

    #[test]
    fn test_tie_broken_by_declaration_order() {
        let c = contributions(&[(Feature::CurrentModule, 0.8), (Feature::Sex, -0.8)]);
        assert_eq!(
            ExplanationAttributor::attribute(&vector(), Some(&c), &OverrideProvenance::default()),
            "sex"
        );
    }

    #[test]
    fn test_no_contributions_is_indeterminate() {
        assert_eq!(
            ExplanationAttributor::attribute(&vector(), None, &OverrideProvenance::default()),
            INDETERMINATE
        );

        let short = Contributions::from_values(vec![1.0]);
        assert_eq!(
            ExplanationAttributor::attribute(&vector(), Some(&short), &OverrideProvenance::default()),
            INDETERMINATE
        );
    }

    #[test]
    fn test_all_zero_contributions_is_indeterminate() {
        let c = contributions(&[]);
        assert_eq!(
            ExplanationAttributor::attribute(&vector(), Some(&c), &OverrideProvenance::default()),
            INDETERMINATE
        );
    }

    #[test]
    fn test_non_finite_contributions_ignored() {
        let c = contributions(&[(Feature::Course, f64::NAN), (Feature::Curriculum, 0.1)]);
        assert_eq!(
            ExplanationAttributor::attribute(&vector(), Some(&c), &OverrideProvenance::default()),
            "curriculum"
        );
    }
}
