//! Pipeline orchestration
//!
//! This module provides the public API for the evasion risk engine.
//! It drives every stage from raw spreadsheet rows to predictions.
//!
//! Records are independent, so a batch is scored by a bounded pool of scoped
//! worker threads pulling record indices from a shared cursor. Results are
//! re-sorted by input position, so output order never depends on scheduling.

use crate::classifier::UrgencyClassifier;
use crate::config::EngineConfig;
use crate::error::{EngineError, ScoringError};
use crate::estimator::ProbabilityEstimator;
use crate::explain::ExplanationAttributor;
use crate::features::FeatureDeriver;
use crate::normalizer::{Normalized, Normalizer};
use crate::rules::{RuleOutcome, RuleOverrideLayer};
use crate::schema::{LabeledRow, RawRow};
use crate::types::{
    BatchOutcome, OverrideProvenance, Prediction, RecordFailure, RunStatistics, RunStatus,
    StudentRecord, TierCounts,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Per-record result carried back from a worker
struct Assessed {
    prediction: Prediction,
    forced: bool,
}

/// Evasion risk engine: configuration plus a probability backend.
///
/// The backend is shared read-only by every worker thread.
pub struct RiskEngine {
    config: EngineConfig,
    estimator: Arc<dyn ProbabilityEstimator>,
}

impl RiskEngine {
    /// Create an engine, rejecting invalid configuration before any record
    /// is processed
    pub fn new(
        config: EngineConfig,
        estimator: Arc<dyn ProbabilityEstimator>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self { config, estimator })
    }

    /// Create an engine that owns its backend
    pub fn with_estimator<E>(config: EngineConfig, estimator: E) -> Result<Self, EngineError>
    where
        E: ProbabilityEstimator + 'static,
    {
        Self::new(config, Arc::new(estimator))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn estimator_name(&self) -> &str {
        self.estimator.name()
    }

    /// Stage 1 only: normalize a raw grid into student records
    pub fn normalize(&self, rows: &[RawRow]) -> Result<Normalized, EngineError> {
        Normalizer::new(&self.config.header, &self.config.aliases).normalize_grid(rows)
    }

    /// Stage 1 only, for rows that already carry column labels
    pub fn normalize_labeled(&self, rows: &[LabeledRow]) -> Normalized {
        Normalizer::new(&self.config.header, &self.config.aliases).normalize_labeled(rows)
    }

    /// Predict every student in a raw spreadsheet grid.
    ///
    /// Pipeline stages:
    /// 1. Normalizer - Locate header, resolve aliases, fill defaults
    /// 2. FeatureDeriver - Encode records as feature vectors
    /// 3. ProbabilityEstimator - Score vectors
    /// 4. RuleOverrideLayer - Apply institutional floors
    /// 5. UrgencyClassifier - Tier, status and confidence
    /// 6. ExplanationAttributor - Dominant factor
    pub fn predict_students(&self, rows: &[RawRow]) -> Result<BatchOutcome, EngineError> {
        let normalized = self.normalize(rows)?;
        info!(
            records = normalized.report.records,
            dropped = normalized.report.dropped_missing_id,
            duplicates = normalized.report.duplicates_dropped,
            "normalized input"
        );
        self.process_records(&normalized.records)
    }

    /// Predict every student in labeled rows
    pub fn predict_labeled(&self, rows: &[LabeledRow]) -> Result<BatchOutcome, EngineError> {
        let normalized = self.normalize_labeled(rows);
        self.process_records(&normalized.records)
    }

    /// Score already-normalized records
    pub fn process_records(&self, records: &[StudentRecord]) -> Result<BatchOutcome, EngineError> {
        if records.is_empty() {
            return Err(EngineError::EmptyBatch);
        }

        let started = Instant::now();
        let deadline = self.config.deadline().map(|d| started + d);
        let workers = self.worker_count(records.len());
        info!(
            records = records.len(),
            workers,
            backend = self.estimator.name(),
            "processing batch"
        );

        let cursor = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel::<(usize, Result<Assessed, ScoringError>)>();

        thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let cursor = &cursor;
                scope.spawn(move || loop {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        break;
                    }
                    let position = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some(record) = records.get(position) else {
                        break;
                    };
                    if tx.send((position, self.assess_record(record))).is_err() {
                        break;
                    }
                });
            }
        });
        drop(tx);

        let mut results: Vec<_> = rx.into_iter().collect();
        results.sort_by_key(|(position, _)| *position);

        let skipped_count = records.len() - results.len();
        let mut predictions = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        let mut forced_count = 0;

        for (position, result) in results {
            match result {
                Ok(assessed) => {
                    forced_count += usize::from(assessed.forced);
                    predictions.push(assessed.prediction);
                }
                Err(e) => {
                    let record = &records[position];
                    warn!(
                        registration_id = %record.registration_id,
                        error = %e,
                        "record could not be scored"
                    );
                    failures.push(RecordFailure {
                        input_index: record.input_index,
                        registration_id: record.registration_id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let status = if skipped_count > 0 {
            warn!(skipped = skipped_count, "deadline reached, returning partial results");
            RunStatus::TimedOut
        } else {
            RunStatus::Completed
        };

        let statistics = summarize(
            records.len(),
            &predictions,
            failures.len(),
            skipped_count,
            forced_count,
            status,
        );
        info!(
            scored = statistics.scored_count,
            failed = statistics.failed_count,
            overrides = statistics.override_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch finished"
        );

        Ok(BatchOutcome {
            predictions,
            statistics,
            failures,
        })
    }

    /// Run stages 2-6 for one record
    pub fn assess(&self, record: &StudentRecord) -> Result<Prediction, ScoringError> {
        self.assess_record(record).map(|a| a.prediction)
    }

    fn assess_record(&self, record: &StudentRecord) -> Result<Assessed, ScoringError> {
        let derived = FeatureDeriver::new(&self.config.vocabulary, self.config.max_absences)
            .derive(record);
        let score = self.estimator.score(&derived.vector)?;
        if !score.probability.is_finite() {
            return Err(ScoringError::NonFinite);
        }

        let outcome = if self.config.apply_rules {
            RuleOverrideLayer::new(&self.config.rules).apply(record, score.probability)
        } else {
            let raw = score.probability.clamp(0.0, 1.0);
            RuleOutcome {
                raw_probability: raw,
                adjusted_probability: raw,
                provenance: OverrideProvenance::default(),
            }
        };

        let classification = UrgencyClassifier::new(self.config.confidence_baseline).classify(&outcome);
        let contributions = if self.config.include_explanations {
            score.contributions.as_ref()
        } else {
            None
        };
        let dominant_factor =
            ExplanationAttributor::attribute(&derived.vector, contributions, &outcome.provenance);

        debug!(
            registration_id = %record.registration_id,
            raw = outcome.raw_probability,
            adjusted = outcome.adjusted_probability,
            factor = %dominant_factor,
            "record assessed"
        );

        Ok(Assessed {
            forced: outcome.forced(),
            prediction: Prediction {
                input_index: record.input_index,
                registration_id: record.registration_id.clone(),
                name: record.name.clone(),
                current_status: record.current_status.clone(),
                course: record.course.clone(),
                predicted_status: classification.predicted_status,
                evasion_probability: outcome.adjusted_probability,
                raw_probability: outcome.raw_probability,
                urgency_tier: classification.urgency_tier,
                dominant_factor,
                confidence: classification.confidence,
                fired_rules: outcome.provenance.rules(),
                quality_flags: derived.flags,
            },
        })
    }

    fn worker_count(&self, records: usize) -> usize {
        let available = self
            .config
            .workers
            .unwrap_or_else(|| thread::available_parallelism().map_or(1, |n| n.get()));
        available.clamp(1, records.max(1))
    }
}

fn summarize(
    total_records: usize,
    predictions: &[Prediction],
    failed_count: usize,
    skipped_count: usize,
    forced_count: usize,
    status: RunStatus,
) -> RunStatistics {
    let mut tier_counts = TierCounts::default();
    let mut probability_sum = 0.0;
    let mut override_count = 0;

    for prediction in predictions {
        tier_counts.increment(prediction.urgency_tier);
        probability_sum += prediction.evasion_probability;
        if !prediction.fired_rules.is_empty() {
            override_count += 1;
        }
    }

    let mean_probability = if predictions.is_empty() {
        0.0
    } else {
        probability_sum / predictions.len() as f64
    };

    RunStatistics {
        total_records,
        scored_count: predictions.len(),
        failed_count,
        skipped_count,
        tier_counts,
        mean_probability,
        override_count,
        forced_count,
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::Score;
    use crate::types::{FeatureVector, HoldFlag, UrgencyTier};

    /// Returns a fixed probability and no contributions
    struct FixedEstimator(f64);

    impl ProbabilityEstimator for FixedEstimator {
        fn score(&self, _features: &FeatureVector) -> Result<Score, ScoringError> {
            Ok(Score {
                probability: self.0,
                contributions: None,
            })
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    /// Fails for any record whose absence feature is 13
    struct PickyEstimator;

    impl ProbabilityEstimator for PickyEstimator {
        fn score(&self, features: &FeatureVector) -> Result<Score, ScoringError> {
            match features.get(crate::types::Feature::ConsecutiveAbsences) {
                Some(v) if v == 13.0 => Err(ScoringError::Unavailable("unlucky".to_string())),
                _ => Ok(Score {
                    probability: 0.1,
                    contributions: None,
                }),
            }
        }

        fn name(&self) -> &str {
            "picky"
        }
    }

    fn record(index: usize, id: &str) -> StudentRecord {
        StudentRecord::with_defaults(index, id)
    }

    #[test]
    fn test_empty_batch_is_fatal() {
        let engine = RiskEngine::with_estimator(EngineConfig::default(), FixedEstimator(0.1)).unwrap();
        assert!(matches!(engine.process_records(&[]), Err(EngineError::EmptyBatch)));
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let mut config = EngineConfig::default();
        config.rules.absence_threshold = -4;
        let result = RiskEngine::with_estimator(config, FixedEstimator(0.1));
        assert!(matches!(result, Err(EngineError::RuleConfiguration(_))));
    }

    #[test]
    fn test_scoring_failure_is_per_record() {
        let engine = RiskEngine::with_estimator(EngineConfig::default(), PickyEstimator).unwrap();
        let records = vec![
            record(0, "A"),
            StudentRecord {
                consecutive_absences: 13,
                ..record(1, "B")
            },
            record(2, "C"),
        ];
        let outcome = engine.process_records(&records).unwrap();

        assert_eq!(outcome.predictions.len(), 2);
        assert_eq!(outcome.statistics.failed_count, 1);
        assert_eq!(outcome.statistics.total_records, 3);
        assert_eq!(outcome.failures[0].registration_id, "B");
        assert_eq!(outcome.failures[0].input_index, 1);
    }

    #[test]
    fn test_statistics() {
        let engine = RiskEngine::with_estimator(EngineConfig::default(), FixedEstimator(0.2)).unwrap();
        let records = vec![
            record(0, "A"),
            StudentRecord {
                financial_hold: HoldFlag::Yes,
                ..record(1, "B")
            },
        ];
        let stats = engine.process_records(&records).unwrap().statistics;

        assert_eq!(stats.scored_count, 2);
        assert_eq!(stats.tier_counts.get(UrgencyTier::None), 1);
        assert_eq!(stats.tier_counts.get(UrgencyTier::Medium), 1);
        assert_eq!(stats.override_count, 1);
        assert_eq!(stats.forced_count, 1);
        assert!((stats.mean_probability - 0.35).abs() < 1e-12);
        assert_eq!(stats.status, RunStatus::Completed);
    }

    #[test]
    fn test_rules_can_be_disabled() {
        let config = EngineConfig {
            apply_rules: false,
            ..EngineConfig::default()
        };
        let engine = RiskEngine::with_estimator(config, FixedEstimator(0.2)).unwrap();
        let prediction = engine
            .assess(&StudentRecord {
                financial_hold: HoldFlag::Yes,
                ..record(0, "A")
            })
            .unwrap();

        assert_eq!(prediction.evasion_probability, 0.2);
        assert!(prediction.fired_rules.is_empty());
        assert_eq!(prediction.dominant_factor, crate::explain::INDETERMINATE);
    }

    #[test]
    fn test_expired_deadline_returns_partial_results() {
        let config = EngineConfig {
            deadline_ms: Some(0),
            ..EngineConfig::default()
        };
        let engine = RiskEngine::with_estimator(config, FixedEstimator(0.2)).unwrap();
        let records: Vec<_> = (0..20).map(|i| record(i, &format!("S{i}"))).collect();
        let outcome = engine.process_records(&records).unwrap();

        assert_eq!(outcome.statistics.status, RunStatus::TimedOut);
        assert_eq!(
            outcome.statistics.skipped_count + outcome.predictions.len(),
            records.len()
        );
    }

    #[test]
    fn test_non_finite_probability_is_scoring_error() {
        let engine =
            RiskEngine::with_estimator(EngineConfig::default(), FixedEstimator(f64::NAN)).unwrap();
        assert_eq!(engine.assess(&record(0, "A")), Err(ScoringError::NonFinite));
    }
}
