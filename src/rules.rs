//! Institutional rule overrides
//!
//! Deterministic rules that raise the model probability to a floor when a
//! hard institutional signal is present. Rules only ever raise risk. When
//! several rules fire the highest floor wins, and every fired rule is kept in
//! the provenance for audit.

use crate::error::EngineError;
use crate::types::{HoldFlag, OverrideProvenance, RuleHit, RuleId, StudentRecord};
use serde::{Deserialize, Serialize};

/// Rule thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    /// Floor applied when the student has a financial hold
    pub financial_hold_floor: f64,
    /// Floor applied when the student has an academic hold
    pub academic_hold_floor: f64,
    /// Consecutive absences at which the absence rule fires (K)
    pub absence_threshold: i64,
    /// Floor at exactly K absences
    pub absence_base_floor: f64,
    /// Floor increase per absence beyond K
    pub absence_step: f64,
    /// Status codes meaning enrollment is locked and progress has stalled
    pub stagnation_statuses: Vec<String>,
    pub stagnation_floor: f64,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            financial_hold_floor: 0.5,
            academic_hold_floor: 0.6,
            absence_threshold: 5,
            absence_base_floor: 0.5,
            absence_step: 0.05,
            stagnation_statuses: vec![
                "TR".to_string(),
                "TRANCADO".to_string(),
                "LOCKED".to_string(),
            ],
            stagnation_floor: 0.7,
        }
    }
}

impl RuleConfig {
    /// Reject thresholds that would make rules meaningless
    pub fn validate(&self) -> Result<(), EngineError> {
        let floors = [
            ("financial_hold_floor", self.financial_hold_floor),
            ("academic_hold_floor", self.academic_hold_floor),
            ("absence_base_floor", self.absence_base_floor),
            ("stagnation_floor", self.stagnation_floor),
        ];
        for (name, value) in floors {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::RuleConfiguration(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.absence_threshold < 1 {
            return Err(EngineError::RuleConfiguration(format!(
                "absence_threshold must be at least 1, got {}",
                self.absence_threshold
            )));
        }
        if !self.absence_step.is_finite() || self.absence_step < 0.0 {
            return Err(EngineError::RuleConfiguration(format!(
                "absence_step must be a non-negative number, got {}",
                self.absence_step
            )));
        }
        Ok(())
    }
}

/// Probability after rules, with the rules that fired
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    /// Model probability clamped to [0, 1]
    pub raw_probability: f64,
    pub adjusted_probability: f64,
    pub provenance: OverrideProvenance,
}

impl RuleOutcome {
    /// Whether a rule actually raised the probability
    pub fn forced(&self) -> bool {
        self.adjusted_probability > self.raw_probability
    }
}

/// Rule override layer
pub struct RuleOverrideLayer<'a> {
    config: &'a RuleConfig,
}

impl<'a> RuleOverrideLayer<'a> {
    pub fn new(config: &'a RuleConfig) -> Self {
        Self { config }
    }

    /// Apply every rule in priority order
    pub fn apply(&self, record: &StudentRecord, raw_probability: f64) -> RuleOutcome {
        let raw = if raw_probability.is_nan() {
            0.0
        } else {
            raw_probability.clamp(0.0, 1.0)
        };

        let hits: Vec<RuleHit> = RuleId::PRIORITY
            .iter()
            .filter_map(|&rule| self.floor_for(rule, record).map(|floor| RuleHit { rule, floor }))
            .collect();

        let adjusted = hits.iter().map(|h| h.floor).fold(raw, f64::max);

        RuleOutcome {
            raw_probability: raw,
            adjusted_probability: adjusted,
            provenance: OverrideProvenance { hits },
        }
    }

    /// Floor imposed by one rule, if it fires
    fn floor_for(&self, rule: RuleId, record: &StudentRecord) -> Option<f64> {
        let config = self.config;
        match rule {
            RuleId::FinancialHold => {
                (record.financial_hold == HoldFlag::Yes).then_some(config.financial_hold_floor)
            }
            RuleId::AcademicHold => {
                (record.academic_hold == HoldFlag::Yes).then_some(config.academic_hold_floor)
            }
            RuleId::ConsecutiveAbsences => {
                let absences = i64::from(record.consecutive_absences);
                (absences >= config.absence_threshold).then(|| {
                    let excess = (absences - config.absence_threshold) as f64;
                    (config.absence_base_floor + config.absence_step * excess).min(1.0)
                })
            }
            RuleId::CurricularStagnation => {
                let status = record.current_status.trim().to_lowercase();
                config
                    .stagnation_statuses
                    .iter()
                    .any(|s| s.trim().to_lowercase() == status)
                    .then_some(config.stagnation_floor)
            }
        }
    }
}
