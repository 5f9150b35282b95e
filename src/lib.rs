//! Evasion Risk - Deterministic dropout-risk scoring for academic-records exports
//!
//! The engine turns a loosely structured spreadsheet export of enrolled
//! students into per-student risk assessments through a deterministic
//! pipeline: schema normalization → feature derivation → probability
//! estimation → rule overrides → urgency classification → explanation.
//!
//! The probability model sits behind the [`ProbabilityEstimator`] trait so
//! any backend can be plugged in; [`LogisticModel`] is the built-in one.

pub mod classifier;
pub mod config;
pub mod error;
pub mod estimator;
pub mod explain;
pub mod export;
pub mod features;
pub mod normalizer;
pub mod pipeline;
pub mod rules;
pub mod schema;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::EngineConfig;
pub use error::{EngineError, ScoringError};
pub use estimator::{LogisticModel, ProbabilityEstimator, Score, Serialized};
pub use export::DashboardEncoder;
pub use pipeline::RiskEngine;
pub use types::{BatchOutcome, Prediction, RunStatistics, StudentRecord};

/// Engine version embedded in every export
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name reported in export metadata
pub const ENGINE_NAME: &str = "evasion-risk";
