//! Probability estimation backends
//!
//! The engine never depends on a concrete model. Any backend implementing
//! [`ProbabilityEstimator`] can score feature vectors; [`LogisticModel`] is the
//! built-in backend, loaded from a serialized parameter file.
//!
//! Backends are shared by reference across worker threads, so the trait
//! requires `Send + Sync`. A backend that needs exclusive access implements
//! [`ExclusiveEstimator`] instead and is wrapped in [`Serialized`], which
//! funnels every call through a mutex.

use crate::error::{EngineError, ScoringError};
use crate::types::{Feature, FeatureVector, FEATURE_COUNT, FEATURE_SCHEMA_VERSION};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Signed per-feature contributions, in feature order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contributions(Vec<f64>);

impl Contributions {
    pub fn from_values(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, feature: Feature) -> Option<f64> {
        self.0.get(feature.index()).copied()
    }

    /// Pairs of feature and contribution in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (Feature, f64)> + '_ {
        Feature::ALL.iter().copied().zip(self.0.iter().copied())
    }
}

/// Backend output for one feature vector
#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    /// Evasion probability (0-1)
    pub probability: f64,
    pub contributions: Option<Contributions>,
}

/// Thread-safe probability backend
pub trait ProbabilityEstimator: Send + Sync {
    /// Score one feature vector
    fn score(&self, features: &FeatureVector) -> Result<Score, ScoringError>;

    /// Backend name for logs and export metadata
    fn name(&self) -> &str;
}

/// Backend that needs `&mut self` to score (e.g. one holding scratch buffers)
pub trait ExclusiveEstimator: Send {
    fn score_mut(&mut self, features: &FeatureVector) -> Result<Score, ScoringError>;

    fn name(&self) -> &str;
}

/// Serializes access to an [`ExclusiveEstimator`] so workers can share it
pub struct Serialized<E> {
    inner: Mutex<E>,
    name: String,
}

impl<E: ExclusiveEstimator> Serialized<E> {
    pub fn new(estimator: E) -> Self {
        let name = estimator.name().to_string();
        Self {
            inner: Mutex::new(estimator),
            name,
        }
    }
}

impl<E: ExclusiveEstimator> ProbabilityEstimator for Serialized<E> {
    fn score(&self, features: &FeatureVector) -> Result<Score, ScoringError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| ScoringError::Unavailable(format!("{} lock poisoned", self.name)))?;
        guard.score_mut(features)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Check a vector has the layout a backend was built for
pub fn check_shape(features: &FeatureVector, expected_len: usize) -> Result<(), ScoringError> {
    if features.schema_version != FEATURE_SCHEMA_VERSION {
        return Err(ScoringError::SchemaVersion {
            expected: FEATURE_SCHEMA_VERSION,
            actual: features.schema_version,
        });
    }
    if features.len() != expected_len {
        return Err(ScoringError::ShapeMismatch {
            expected: expected_len,
            actual: features.len(),
        });
    }
    Ok(())
}

/// Pre-trained logistic model
///
/// probability = sigmoid(bias + Σ wᵢxᵢ). Contributions are wᵢ(xᵢ − refᵢ) in
/// logit space, which is an exact additive attribution for a linear model
/// relative to the reference point.
#[derive(Debug, Clone, PartialEq)]
pub struct LogisticModel {
    name: String,
    bias: f64,
    weights: Vec<f64>,
    reference: Vec<f64>,
}

/// On-disk shape of a logistic model; absent features weigh zero
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogisticModelFile {
    #[serde(default = "default_model_name")]
    name: String,
    #[serde(default = "default_schema_version")]
    feature_schema_version: u32,
    bias: f64,
    #[serde(default)]
    weights: BTreeMap<Feature, f64>,
    #[serde(default)]
    reference: BTreeMap<Feature, f64>,
}

fn default_model_name() -> String {
    "logistic".to_string()
}

fn default_schema_version() -> u32 {
    FEATURE_SCHEMA_VERSION
}

impl LogisticModel {
    pub fn new(bias: f64, weights: [f64; FEATURE_COUNT]) -> Self {
        Self {
            name: default_model_name(),
            bias,
            weights: weights.to_vec(),
            reference: vec![0.0; FEATURE_COUNT],
        }
    }

    pub fn with_reference(mut self, reference: [f64; FEATURE_COUNT]) -> Self {
        self.reference = reference.to_vec();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Load model parameters from JSON
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let file: LogisticModelFile = serde_json::from_str(json)?;
        if file.feature_schema_version != FEATURE_SCHEMA_VERSION {
            return Err(EngineError::InvalidInput(format!(
                "model built for feature schema {}, engine uses {}",
                file.feature_schema_version, FEATURE_SCHEMA_VERSION
            )));
        }

        let expand = |map: &BTreeMap<Feature, f64>| -> Vec<f64> {
            Feature::ALL
                .iter()
                .map(|f| map.get(f).copied().unwrap_or(0.0))
                .collect()
        };
        let weights = expand(&file.weights);
        let reference = expand(&file.reference);

        let all_finite = std::iter::once(file.bias)
            .chain(weights.iter().copied())
            .chain(reference.iter().copied())
            .all(f64::is_finite);
        if !all_finite {
            return Err(EngineError::InvalidInput(
                "model parameters must be finite".to_string(),
            ));
        }

        Ok(Self {
            name: file.name,
            bias: file.bias,
            weights,
            reference,
        })
    }

    /// Serialize model parameters to JSON
    pub fn to_json(&self) -> Result<String, EngineError> {
        let collect = |values: &[f64]| -> BTreeMap<Feature, f64> {
            Feature::ALL.iter().copied().zip(values.iter().copied()).collect()
        };
        let file = LogisticModelFile {
            name: self.name.clone(),
            feature_schema_version: FEATURE_SCHEMA_VERSION,
            bias: self.bias,
            weights: collect(&self.weights),
            reference: collect(&self.reference),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }
}

impl ProbabilityEstimator for LogisticModel {
    fn score(&self, features: &FeatureVector) -> Result<Score, ScoringError> {
        check_shape(features, self.weights.len())?;

        let x = features.values();
        let logit = self.bias
            + self
                .weights
                .iter()
                .zip(x)
                .map(|(w, xi)| w * xi)
                .sum::<f64>();
        let probability = sigmoid(logit);
        if !probability.is_finite() {
            return Err(ScoringError::NonFinite);
        }

        let contributions = self
            .weights
            .iter()
            .zip(x.iter().zip(&self.reference))
            .map(|(w, (xi, r))| w * (xi - r))
            .collect();

        Ok(Score {
            probability,
            contributions: Some(Contributions::from_values(contributions)),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}
