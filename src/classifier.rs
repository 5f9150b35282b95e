//! Urgency and confidence classification
//!
//! Maps a post-rule probability onto an urgency tier and a predicted status
//! using fixed boundaries (inclusive lower bound):
//!
//! | probability | tier     | status        |
//! |-------------|----------|---------------|
//! | [0.0, 0.3)  | none     | retained      |
//! | [0.3, 0.5)  | low      | watch         |
//! | [0.5, 0.7)  | medium   | at_risk       |
//! | [0.7, 0.9)  | high     | at_risk       |
//! | [0.9, 1.0]  | critical | evaded_likely |
//!
//! Confidence measures agreement between model and rules. When a rule fired
//! it is `1 - |adjusted - raw|`, so a rule that overrides the model lowers
//! confidence. When the model decided alone it is a fixed baseline.

use crate::rules::RuleOutcome;
use crate::types::{PredictedStatus, UrgencyTier};

/// Confidence reported when no rule fired
pub const DEFAULT_CONFIDENCE_BASELINE: f64 = 0.95;

/// Lower bounds of the low, medium, high and critical tiers
pub const TIER_BOUNDARIES: [f64; 4] = [0.3, 0.5, 0.7, 0.9];

/// Tier, status and confidence for one prediction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub urgency_tier: UrgencyTier,
    pub predicted_status: PredictedStatus,
    pub confidence: f64,
}

/// Urgency tier for a probability
pub fn tier_for(probability: f64) -> UrgencyTier {
    let [low, medium, high, critical] = TIER_BOUNDARIES;
    if probability >= critical {
        UrgencyTier::Critical
    } else if probability >= high {
        UrgencyTier::High
    } else if probability >= medium {
        UrgencyTier::Medium
    } else if probability >= low {
        UrgencyTier::Low
    } else {
        UrgencyTier::None
    }
}

/// Predicted status implied by a tier
pub fn status_for(tier: UrgencyTier) -> PredictedStatus {
    match tier {
        UrgencyTier::None => PredictedStatus::Retained,
        UrgencyTier::Low => PredictedStatus::Watch,
        UrgencyTier::Medium | UrgencyTier::High => PredictedStatus::AtRisk,
        UrgencyTier::Critical => PredictedStatus::EvadedLikely,
    }
}

/// Whether a probability, tier and status agree with the boundary table
pub fn is_consistent(probability: f64, tier: UrgencyTier, status: PredictedStatus) -> bool {
    (0.0..=1.0).contains(&probability) && tier_for(probability) == tier && status_for(tier) == status
}

/// Urgency and confidence classifier
pub struct UrgencyClassifier {
    confidence_baseline: f64,
}

impl Default for UrgencyClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_BASELINE)
    }
}

impl UrgencyClassifier {
    pub fn new(confidence_baseline: f64) -> Self {
        Self {
            confidence_baseline,
        }
    }

    pub fn classify(&self, outcome: &RuleOutcome) -> Classification {
        let urgency_tier = tier_for(outcome.adjusted_probability);
        let confidence = if outcome.provenance.fired() {
            1.0 - (outcome.adjusted_probability - outcome.raw_probability).abs()
        } else {
            self.confidence_baseline
        };

        Classification {
            urgency_tier,
            predicted_status: status_for(urgency_tier),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OverrideProvenance, RuleHit, RuleId};

    fn outcome(raw: f64, adjusted: f64, fired: bool) -> RuleOutcome {
        let hits = if fired {
            vec![RuleHit {
                rule: RuleId::FinancialHold,
                floor: adjusted,
            }]
        } else {
            Vec::new()
        };
        RuleOutcome {
            raw_probability: raw,
            adjusted_probability: adjusted,
            provenance: OverrideProvenance { hits },
        }
    }

    #[test]
    fn test_tier_boundaries_are_inclusive_lower() {
        assert_eq!(tier_for(0.0), UrgencyTier::None);
        assert_eq!(tier_for(0.2999), UrgencyTier::None);
        assert_eq!(tier_for(0.3), UrgencyTier::Low);
        assert_eq!(tier_for(0.5), UrgencyTier::Medium);
        assert_eq!(tier_for(0.6999), UrgencyTier::Medium);
        assert_eq!(tier_for(0.7), UrgencyTier::High);
        assert_eq!(tier_for(0.9), UrgencyTier::Critical);
        assert_eq!(tier_for(1.0), UrgencyTier::Critical);
    }

    #[test]
    fn test_status_follows_tier() {
        assert_eq!(status_for(UrgencyTier::None), PredictedStatus::Retained);
        assert_eq!(status_for(UrgencyTier::Low), PredictedStatus::Watch);
        assert_eq!(status_for(UrgencyTier::Medium), PredictedStatus::AtRisk);
        assert_eq!(status_for(UrgencyTier::High), PredictedStatus::AtRisk);
        assert_eq!(status_for(UrgencyTier::Critical), PredictedStatus::EvadedLikely);
    }

    #[test]
    fn test_inconsistent_combination_rejected() {
        assert!(!is_consistent(0.2, UrgencyTier::Critical, PredictedStatus::EvadedLikely));
        assert!(!is_consistent(0.6, UrgencyTier::Medium, PredictedStatus::Watch));
        assert!(is_consistent(0.95, UrgencyTier::Critical, PredictedStatus::EvadedLikely));
    }

    #[test]
    fn test_rule_override_lowers_confidence() {
        let classifier = UrgencyClassifier::default();
        let result = classifier.classify(&outcome(0.2, 0.5, true));

        assert_eq!(result.urgency_tier, UrgencyTier::Medium);
        assert_eq!(result.predicted_status, PredictedStatus::AtRisk);
        assert!((result.confidence - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_model_only_uses_baseline() {
        let classifier = UrgencyClassifier::default();
        let result = classifier.classify(&outcome(0.35, 0.35, false));

        assert_eq!(result.urgency_tier, UrgencyTier::Low);
        assert_eq!(result.confidence, DEFAULT_CONFIDENCE_BASELINE);
    }
}
