//! Core types for the evasion risk pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: canonical student records, feature vectors, rule provenance,
//! predictions, and per-run statistics.

use serde::{Deserialize, Serialize};

/// Placeholder for absent free-text fields, as the source system writes it
pub const DEFAULT_TEXT: &str = "Não informado";

/// Default sex category when the column is absent
pub const DEFAULT_SEX: &str = "M";

/// Default identity flag when the column is absent
pub const DEFAULT_IDENTITY_FLAG: &str = "N";

/// Canonical fields of a student record
///
/// Declaration order is the order fields are reported in normalization output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    RegistrationId,
    Name,
    IdentityFlag,
    Course,
    CourseCode,
    Curriculum,
    CurrentModule,
    CurrentClass,
    CurrentSubjectCode,
    CurrentSubjectName,
    CurrentStatus,
    AcademicHold,
    FinancialHold,
    ConsecutiveAbsences,
    Sex,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 15] = [
        CanonicalField::RegistrationId,
        CanonicalField::Name,
        CanonicalField::IdentityFlag,
        CanonicalField::Course,
        CanonicalField::CourseCode,
        CanonicalField::Curriculum,
        CanonicalField::CurrentModule,
        CanonicalField::CurrentClass,
        CanonicalField::CurrentSubjectCode,
        CanonicalField::CurrentSubjectName,
        CanonicalField::CurrentStatus,
        CanonicalField::AcademicHold,
        CanonicalField::FinancialHold,
        CanonicalField::ConsecutiveAbsences,
        CanonicalField::Sex,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalField::RegistrationId => "registration_id",
            CanonicalField::Name => "name",
            CanonicalField::IdentityFlag => "identity_flag",
            CanonicalField::Course => "course",
            CanonicalField::CourseCode => "course_code",
            CanonicalField::Curriculum => "curriculum",
            CanonicalField::CurrentModule => "current_module",
            CanonicalField::CurrentClass => "current_class",
            CanonicalField::CurrentSubjectCode => "current_subject_code",
            CanonicalField::CurrentSubjectName => "current_subject_name",
            CanonicalField::CurrentStatus => "current_status",
            CanonicalField::AcademicHold => "academic_hold",
            CanonicalField::FinancialHold => "financial_hold",
            CanonicalField::ConsecutiveAbsences => "consecutive_absences",
            CanonicalField::Sex => "sex",
        }
    }

    /// Column label the source system uses for this field
    pub fn source_label(&self) -> &'static str {
        match self {
            CanonicalField::RegistrationId => "Matrícula",
            CanonicalField::Name => "Nome",
            CanonicalField::IdentityFlag => "Identidade",
            CanonicalField::Course => "Curso",
            CanonicalField::CourseCode => "Cód.Curso",
            CanonicalField::Curriculum => "Currículo",
            CanonicalField::CurrentModule => "Módulo atual",
            CanonicalField::CurrentClass => "Turma Atual",
            CanonicalField::CurrentSubjectCode => "Cód.Disc. atual",
            CanonicalField::CurrentSubjectName => "Disciplina atual",
            CanonicalField::CurrentStatus => "Situação",
            CanonicalField::AcademicHold => "Pend. Acad.",
            CanonicalField::FinancialHold => "Pend. Financ.",
            CanonicalField::ConsecutiveAbsences => "Faltas Consecutivas",
            CanonicalField::Sex => "Sexo",
        }
    }
}

/// Tri-state institutional hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldFlag {
    Yes,
    No,
    Unknown,
}

impl HoldFlag {
    /// Parse a hold cell. `None` means the cell was empty.
    pub fn parse(raw: &str) -> Option<HoldFlag> {
        let value = raw.trim().to_uppercase();
        match value.as_str() {
            "" => None,
            "S" | "SIM" | "Y" | "YES" | "TRUE" | "1" | "X" => Some(HoldFlag::Yes),
            "N" | "NAO" | "NÃO" | "NO" | "FALSE" | "0" => Some(HoldFlag::No),
            _ => Some(HoldFlag::Unknown),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HoldFlag::Yes => "yes",
            HoldFlag::No => "no",
            HoldFlag::Unknown => "unknown",
        }
    }
}

/// Data-quality note attached to a record; never an error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QualityFlag {
    /// Field was absent or empty and received its documented default
    Defaulted { field: CanonicalField },
    /// Absence count was outside the accepted range and was clamped
    AbsencesClamped { raw: i64, clamped: u32 },
    /// Absence cell could not be read as a number
    AbsencesUnparseable,
    /// Hold cell held a value that is neither yes nor no
    UnrecognizedHold { field: CanonicalField },
}

/// Canonical, fully-populated student snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRecord {
    /// Position of the source row among data rows (0-based)
    pub input_index: usize,
    pub registration_id: String,
    pub name: String,
    pub identity_flag: String,
    pub course: String,
    pub course_code: String,
    pub curriculum: String,
    pub current_module: String,
    pub current_class: String,
    pub current_subject_code: String,
    pub current_subject_name: String,
    /// Enrollment status code (e.g. MT for enrolled, TR for locked)
    pub current_status: String,
    pub academic_hold: HoldFlag,
    pub financial_hold: HoldFlag,
    pub consecutive_absences: u32,
    pub sex: String,
    /// Defaults and clamps applied while building this record
    pub provenance: Vec<QualityFlag>,
}

impl StudentRecord {
    /// Record with every field at its documented default
    pub fn with_defaults(input_index: usize, registration_id: impl Into<String>) -> Self {
        Self {
            input_index,
            registration_id: registration_id.into(),
            name: DEFAULT_TEXT.to_string(),
            identity_flag: DEFAULT_IDENTITY_FLAG.to_string(),
            course: DEFAULT_TEXT.to_string(),
            course_code: DEFAULT_TEXT.to_string(),
            curriculum: DEFAULT_TEXT.to_string(),
            current_module: DEFAULT_TEXT.to_string(),
            current_class: DEFAULT_TEXT.to_string(),
            current_subject_code: DEFAULT_TEXT.to_string(),
            current_subject_name: DEFAULT_TEXT.to_string(),
            current_status: DEFAULT_TEXT.to_string(),
            academic_hold: HoldFlag::No,
            financial_hold: HoldFlag::No,
            consecutive_absences: 0,
            sex: DEFAULT_SEX.to_string(),
            provenance: Vec::new(),
        }
    }
}

/// Model features, in the fixed order of the feature vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Course,
    Curriculum,
    Sex,
    CurrentClass,
    CurrentSubjectCode,
    CurrentSubjectName,
    AcademicHold,
    FinancialHold,
    ConsecutiveAbsences,
    CourseCode,
    IdentityFlag,
    CurrentModule,
}

/// Number of features in a vector
pub const FEATURE_COUNT: usize = 12;

/// Version of the feature layout; bump when `Feature` order or encoding changes
pub const FEATURE_SCHEMA_VERSION: u32 = 1;

impl Feature {
    pub const ALL: [Feature; FEATURE_COUNT] = [
        Feature::Course,
        Feature::Curriculum,
        Feature::Sex,
        Feature::CurrentClass,
        Feature::CurrentSubjectCode,
        Feature::CurrentSubjectName,
        Feature::AcademicHold,
        Feature::FinancialHold,
        Feature::ConsecutiveAbsences,
        Feature::CourseCode,
        Feature::IdentityFlag,
        Feature::CurrentModule,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Course => "course",
            Feature::Curriculum => "curriculum",
            Feature::Sex => "sex",
            Feature::CurrentClass => "current_class",
            Feature::CurrentSubjectCode => "current_subject_code",
            Feature::CurrentSubjectName => "current_subject_name",
            Feature::AcademicHold => "academic_hold",
            Feature::FinancialHold => "financial_hold",
            Feature::ConsecutiveAbsences => "consecutive_absences",
            Feature::CourseCode => "course_code",
            Feature::IdentityFlag => "identity_flag",
            Feature::CurrentModule => "current_module",
        }
    }
}

/// Fixed-order numeric encoding of one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub schema_version: u32,
    values: Vec<f64>,
}

impl FeatureVector {
    /// Build a vector in the current schema. Callers outside the deriver use
    /// this for tests and for adapting foreign backends.
    pub fn from_values(values: Vec<f64>) -> Self {
        Self {
            schema_version: FEATURE_SCHEMA_VERSION,
            values,
        }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, feature: Feature) -> Option<f64> {
        self.values.get(feature.index()).copied()
    }
}

/// Institutional rules, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleId {
    FinancialHold,
    AcademicHold,
    ConsecutiveAbsences,
    CurricularStagnation,
}

impl RuleId {
    pub const PRIORITY: [RuleId; 4] = [
        RuleId::FinancialHold,
        RuleId::AcademicHold,
        RuleId::ConsecutiveAbsences,
        RuleId::CurricularStagnation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleId::FinancialHold => "financial_hold",
            RuleId::AcademicHold => "academic_hold",
            RuleId::ConsecutiveAbsences => "consecutive_absences",
            RuleId::CurricularStagnation => "curricular_stagnation",
        }
    }
}

/// One rule that fired, with the floor it imposed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuleHit {
    pub rule: RuleId,
    pub floor: f64,
}

/// Every rule that fired for a record, in priority order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverrideProvenance {
    pub hits: Vec<RuleHit>,
}

impl OverrideProvenance {
    pub fn fired(&self) -> bool {
        !self.hits.is_empty()
    }

    /// Highest-priority rule that fired
    pub fn primary(&self) -> Option<RuleId> {
        self.hits.iter().map(|h| h.rule).min()
    }

    pub fn rules(&self) -> Vec<RuleId> {
        self.hits.iter().map(|h| h.rule).collect()
    }
}

/// Discretized urgency, ordered from least to most urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyTier {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl UrgencyTier {
    pub const ALL: [UrgencyTier; 5] = [
        UrgencyTier::None,
        UrgencyTier::Low,
        UrgencyTier::Medium,
        UrgencyTier::High,
        UrgencyTier::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UrgencyTier::None => "none",
            UrgencyTier::Low => "low",
            UrgencyTier::Medium => "medium",
            UrgencyTier::High => "high",
            UrgencyTier::Critical => "critical",
        }
    }
}

/// Categorical outcome of the decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictedStatus {
    Retained,
    Watch,
    AtRisk,
    EvadedLikely,
}

impl PredictedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictedStatus::Retained => "retained",
            PredictedStatus::Watch => "watch",
            PredictedStatus::AtRisk => "at_risk",
            PredictedStatus::EvadedLikely => "evaded_likely",
        }
    }
}

/// Final risk assessment for one student
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub input_index: usize,
    pub registration_id: String,
    pub name: String,
    pub current_status: String,
    pub course: String,
    pub predicted_status: PredictedStatus,
    /// Post-rule probability (0-1)
    pub evasion_probability: f64,
    /// Model-only probability (0-1), kept for audit
    pub raw_probability: f64,
    pub urgency_tier: UrgencyTier,
    pub dominant_factor: String,
    /// Agreement between model and rules (0-1)
    pub confidence: f64,
    pub fired_rules: Vec<RuleId>,
    /// Defaults and clamps applied on the way from source row to features
    #[serde(default)]
    pub quality_flags: Vec<QualityFlag>,
}

/// Per-tier prediction counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub none: usize,
    pub low: usize,
    pub medium: usize,
    pub high: usize,
    pub critical: usize,
}

impl TierCounts {
    pub fn increment(&mut self, tier: UrgencyTier) {
        *self.slot(tier) += 1;
    }

    pub fn get(&self, tier: UrgencyTier) -> usize {
        match tier {
            UrgencyTier::None => self.none,
            UrgencyTier::Low => self.low,
            UrgencyTier::Medium => self.medium,
            UrgencyTier::High => self.high,
            UrgencyTier::Critical => self.critical,
        }
    }

    fn slot(&mut self, tier: UrgencyTier) -> &mut usize {
        match tier {
            UrgencyTier::None => &mut self.none,
            UrgencyTier::Low => &mut self.low,
            UrgencyTier::Medium => &mut self.medium,
            UrgencyTier::High => &mut self.high,
            UrgencyTier::Critical => &mut self.critical,
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    TimedOut,
}

/// Aggregate over one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub total_records: usize,
    pub scored_count: usize,
    pub failed_count: usize,
    /// Records never processed because the deadline passed
    pub skipped_count: usize,
    pub tier_counts: TierCounts,
    /// Mean post-rule probability over scored records (0 when none scored)
    pub mean_probability: f64,
    /// Predictions where at least one rule fired
    pub override_count: usize,
    /// Predictions whose probability a rule actually raised
    pub forced_count: usize,
    pub status: RunStatus,
}

/// A record the backend could not score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub input_index: usize,
    pub registration_id: String,
    pub message: String,
}

/// Everything a batch run produces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// Predictions in input order
    pub predictions: Vec<Prediction>,
    pub statistics: RunStatistics,
    pub failures: Vec<RecordFailure>,
}
