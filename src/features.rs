//! Feature derivation
//!
//! This module encodes a canonical student record into the fixed-order feature
//! vector the probability model consumes:
//! - Categorical fields through a versioned vocabulary (index 0 is "other")
//! - Holds as 1.0 / 0.0, with 0.5 for unrecognized values
//! - Absence counts clamped to a sane range
//! - Module number taken from the first integer in the module label

use crate::types::{
    Feature, FeatureVector, HoldFlag, QualityFlag, StudentRecord, FEATURE_COUNT,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Version of the built-in vocabulary
pub const VOCABULARY_VERSION: u32 = 1;

/// Upper bound for consecutive absences fed to the model
pub const DEFAULT_MAX_ABSENCES: u32 = 365;

/// Encoded value of any category missing from the vocabulary
pub const OTHER_CATEGORY: f64 = 0.0;

/// Known categories per categorical feature
///
/// Position in each list is the 1-based code the model was trained with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    pub version: u32,
    pub categories: BTreeMap<Feature, Vec<String>>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        let mut categories = BTreeMap::new();
        categories.insert(Feature::Sex, vec!["M".to_string(), "F".to_string()]);
        categories.insert(
            Feature::IdentityFlag,
            vec!["N".to_string(), "S".to_string()],
        );
        Self {
            version: VOCABULARY_VERSION,
            categories,
        }
    }
}

impl Vocabulary {
    /// Code for a category; unknown categories fall into the "other" bucket
    pub fn encode(&self, feature: Feature, value: &str) -> f64 {
        let needle = value.trim().to_lowercase();
        self.categories
            .get(&feature)
            .and_then(|known| known.iter().position(|c| c.trim().to_lowercase() == needle))
            .map_or(OTHER_CATEGORY, |pos| (pos + 1) as f64)
    }
}

/// Feature vector plus any clamping done while deriving it
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedFeatures {
    pub vector: FeatureVector,
    /// Record provenance followed by flags raised during derivation
    pub flags: Vec<QualityFlag>,
}

/// Feature deriver for encoding student records
pub struct FeatureDeriver<'a> {
    vocabulary: &'a Vocabulary,
    max_absences: u32,
}

impl<'a> FeatureDeriver<'a> {
    pub fn new(vocabulary: &'a Vocabulary, max_absences: u32) -> Self {
        Self {
            vocabulary,
            max_absences,
        }
    }

    /// Derive the feature vector for one record. Never fails.
    pub fn derive(&self, record: &StudentRecord) -> DerivedFeatures {
        let mut flags = record.provenance.clone();
        let mut values = vec![0.0; FEATURE_COUNT];

        for feature in Feature::ALL {
            values[feature.index()] = match feature {
                Feature::Course => self.categorical(feature, &record.course),
                Feature::Curriculum => self.categorical(feature, &record.curriculum),
                Feature::Sex => self.categorical(feature, &record.sex),
                Feature::CurrentClass => self.categorical(feature, &record.current_class),
                Feature::CurrentSubjectCode => {
                    self.categorical(feature, &record.current_subject_code)
                }
                Feature::CurrentSubjectName => {
                    self.categorical(feature, &record.current_subject_name)
                }
                Feature::AcademicHold => encode_hold(record.academic_hold),
                Feature::FinancialHold => encode_hold(record.financial_hold),
                Feature::ConsecutiveAbsences => {
                    let clamped = record.consecutive_absences.min(self.max_absences);
                    if clamped != record.consecutive_absences {
                        warn!(
                            registration_id = %record.registration_id,
                            raw = record.consecutive_absences,
                            clamped,
                            "consecutive absences above model range, clamped"
                        );
                        flags.push(QualityFlag::AbsencesClamped {
                            raw: record.consecutive_absences as i64,
                            clamped,
                        });
                    }
                    clamped as f64
                }
                Feature::CourseCode => self.categorical(feature, &record.course_code),
                Feature::IdentityFlag => self.categorical(feature, &record.identity_flag),
                Feature::CurrentModule => module_number(&record.current_module),
            };
        }

        DerivedFeatures {
            vector: FeatureVector::from_values(values),
            flags,
        }
    }

    fn categorical(&self, feature: Feature, value: &str) -> f64 {
        self.vocabulary.encode(feature, value)
    }
}

fn encode_hold(hold: HoldFlag) -> f64 {
    match hold {
        HoldFlag::Yes => 1.0,
        HoldFlag::No => 0.0,
        HoldFlag::Unknown => 0.5,
    }
}

/// First integer in a module label ("Módulo 3" is 3), else 0
fn module_number(label: &str) -> f64 {
    let digits: String = label
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse::<u32>().map_or(0.0, |n| n as f64)
}
