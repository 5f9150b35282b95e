//! Engine configuration
//!
//! Every threshold, table and limit the engine uses lives here and is passed
//! to [`RiskEngine`](crate::pipeline::RiskEngine) at construction. There is no
//! process-wide state. Configuration can be loaded from JSON; absent keys take
//! their defaults.

use crate::classifier::DEFAULT_CONFIDENCE_BASELINE;
use crate::error::EngineError;
use crate::features::{Vocabulary, DEFAULT_MAX_ABSENCES};
use crate::rules::RuleConfig;
use crate::schema::{AliasTable, HeaderConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub header: HeaderConfig,
    pub aliases: AliasTable,
    pub vocabulary: Vocabulary,
    pub rules: RuleConfig,
    /// Apply institutional rule overrides
    pub apply_rules: bool,
    /// Use backend contributions to pick the dominant factor
    pub include_explanations: bool,
    /// Upper bound for consecutive absences fed to the model
    pub max_absences: u32,
    /// Confidence reported when no rule fired
    pub confidence_baseline: f64,
    /// Worker threads; `None` uses available parallelism
    pub workers: Option<usize>,
    /// Batch deadline in milliseconds from the start of processing
    pub deadline_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            header: HeaderConfig::default(),
            aliases: AliasTable::default(),
            vocabulary: Vocabulary::default(),
            rules: RuleConfig::default(),
            apply_rules: true,
            include_explanations: true,
            max_absences: DEFAULT_MAX_ABSENCES,
            confidence_baseline: DEFAULT_CONFIDENCE_BASELINE,
            workers: None,
            deadline_ms: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from JSON and validate it
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Fail fast on configuration that cannot produce meaningful results
    pub fn validate(&self) -> Result<(), EngineError> {
        self.rules.validate()?;

        if !(0.0..=1.0).contains(&self.confidence_baseline) {
            return Err(EngineError::RuleConfiguration(format!(
                "confidence_baseline must be within [0, 1], got {}",
                self.confidence_baseline
            )));
        }
        if self.header.scan_window == 0 {
            return Err(EngineError::RuleConfiguration(
                "header.scan_window must be at least 1".to_string(),
            ));
        }
        if self.header.min_matches == 0 {
            return Err(EngineError::RuleConfiguration(
                "header.min_matches must be at least 1".to_string(),
            ));
        }
        if self.workers == Some(0) {
            return Err(EngineError::RuleConfiguration(
                "workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }
}
