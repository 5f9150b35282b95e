//! Record normalization
//!
//! This module turns a raw spreadsheet grid (or already-labeled rows) into
//! canonical student records.
//! - Header row located inside a bounded scan window
//! - Column labels resolved through the alias table
//! - Missing fields filled with documented defaults and flagged
//! - Rows without a registration id dropped; duplicate ids keep the first row

use crate::error::EngineError;
use crate::schema::{cell_text, AliasTable, HeaderConfig, HeaderLocator, LabeledRow, RawRow};
use crate::types::{CanonicalField, HoldFlag, QualityFlag, StudentRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// What normalization did to the input, for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizationReport {
    /// Grid index of the detected header row (`None` for labeled input)
    pub header_row: Option<usize>,
    pub sentinel_found: bool,
    /// Data rows seen after the header
    pub rows_seen: usize,
    pub records: usize,
    /// Rows skipped because every cell was empty
    pub blank_rows: usize,
    /// Rows with content but no registration id
    pub dropped_missing_id: usize,
    /// Later rows repeating an already-seen registration id
    pub duplicates_dropped: usize,
    /// Columns with neither header nor data
    pub empty_columns: usize,
    /// Header labels no alias resolves
    pub unmapped_columns: Vec<String>,
    /// Canonical fields absent from the input, filled with defaults
    pub defaulted_fields: Vec<CanonicalField>,
}

/// Normalization output
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub records: Vec<StudentRecord>,
    pub report: NormalizationReport,
}

/// Normalizer for converting raw rows to canonical student records
pub struct Normalizer<'a> {
    header: &'a HeaderConfig,
    aliases: &'a AliasTable,
}

impl<'a> Normalizer<'a> {
    pub fn new(header: &'a HeaderConfig, aliases: &'a AliasTable) -> Self {
        Self { header, aliases }
    }

    /// Normalize a raw grid whose header position is unknown
    pub fn normalize_grid(&self, rows: &[RawRow]) -> Result<Normalized, EngineError> {
        let header = HeaderLocator::new(self.header, self.aliases).locate(rows)?;
        let data = &rows[header.row_index + 1..];

        let empty_columns = (0..header.columns.len())
            .filter(|&col| {
                let header_empty = rows[header.row_index]
                    .get(col)
                    .and_then(cell_text)
                    .is_none();
                header_empty && data.iter().all(|row| row.get(col).and_then(cell_text).is_none())
            })
            .count();

        debug!(
            header_row = header.row_index,
            sentinel = header.sentinel_found,
            data_rows = data.len(),
            "header located"
        );

        let cells = data.iter().map(|row| {
            header
                .columns
                .iter()
                .zip(row.iter())
                .filter_map(|(field, cell)| Some(((*field)?, cell_text(cell)?)))
                .collect::<BTreeMap<_, _>>()
        });
        let present: HashSet<CanonicalField> = header.columns.iter().flatten().copied().collect();

        let mut normalized = self.collect(cells, &present);
        normalized.report.header_row = Some(header.row_index);
        normalized.report.sentinel_found = header.sentinel_found;
        normalized.report.empty_columns = empty_columns;
        normalized.report.unmapped_columns = header.unmapped;
        Ok(normalized)
    }

    /// Normalize rows that already carry column labels
    pub fn normalize_labeled(&self, rows: &[LabeledRow]) -> Normalized {
        let mut present = HashSet::new();
        let mut unmapped = Vec::new();
        for row in rows {
            for label in row.keys() {
                match self.aliases.resolve(label) {
                    Some(field) => {
                        present.insert(field);
                    }
                    None if !unmapped.contains(label) => unmapped.push(label.clone()),
                    None => {}
                }
            }
        }

        let cells = rows.iter().map(|row| {
            let mut values = BTreeMap::new();
            for (label, cell) in row {
                if let (Some(field), Some(text)) = (self.aliases.resolve(label), cell_text(cell)) {
                    values.entry(field).or_insert(text);
                }
            }
            values
        });

        let mut normalized = self.collect(cells, &present);
        normalized.report.unmapped_columns = unmapped;
        normalized
    }

    fn collect(
        &self,
        rows: impl Iterator<Item = BTreeMap<CanonicalField, String>>,
        present: &HashSet<CanonicalField>,
    ) -> Normalized {
        let mut report = NormalizationReport {
            defaulted_fields: CanonicalField::ALL
                .iter()
                .filter(|f| !present.contains(f))
                .copied()
                .collect(),
            ..Default::default()
        };
        let mut seen_ids = HashSet::new();
        let mut records = Vec::new();

        for (index, values) in rows.enumerate() {
            report.rows_seen += 1;
            if values.is_empty() {
                report.blank_rows += 1;
                continue;
            }
            let Some(record) = build_record(index, &values) else {
                report.dropped_missing_id += 1;
                continue;
            };
            if !seen_ids.insert(record.registration_id.clone()) {
                warn!(
                    registration_id = %record.registration_id,
                    row = index,
                    "duplicate registration id, keeping first occurrence"
                );
                report.duplicates_dropped += 1;
                continue;
            }
            records.push(record);
        }

        report.records = records.len();
        Normalized { records, report }
    }
}

/// Build a record from the non-empty cells of one row
///
/// Returns `None` when the row has no registration id.
pub fn build_record(
    input_index: usize,
    values: &BTreeMap<CanonicalField, String>,
) -> Option<StudentRecord> {
    let registration_id = values.get(&CanonicalField::RegistrationId)?.clone();
    let mut record = StudentRecord::with_defaults(input_index, registration_id);

    for field in CanonicalField::ALL {
        if field == CanonicalField::RegistrationId {
            continue;
        }
        let Some(text) = values.get(&field) else {
            record.provenance.push(QualityFlag::Defaulted { field });
            continue;
        };
        match field {
            CanonicalField::RegistrationId => {}
            CanonicalField::Name => record.name = text.clone(),
            CanonicalField::IdentityFlag => record.identity_flag = text.clone(),
            CanonicalField::Course => record.course = text.clone(),
            CanonicalField::CourseCode => record.course_code = text.clone(),
            CanonicalField::Curriculum => record.curriculum = text.clone(),
            CanonicalField::CurrentModule => record.current_module = text.clone(),
            CanonicalField::CurrentClass => record.current_class = text.clone(),
            CanonicalField::CurrentSubjectCode => record.current_subject_code = text.clone(),
            CanonicalField::CurrentSubjectName => record.current_subject_name = text.clone(),
            CanonicalField::CurrentStatus => record.current_status = text.clone(),
            CanonicalField::Sex => record.sex = text.to_uppercase(),
            CanonicalField::AcademicHold => {
                record.academic_hold = parse_hold(field, text, &mut record.provenance)
            }
            CanonicalField::FinancialHold => {
                record.financial_hold = parse_hold(field, text, &mut record.provenance)
            }
            CanonicalField::ConsecutiveAbsences => {
                record.consecutive_absences = parse_absences(text, &mut record.provenance)
            }
        }
    }

    Some(record)
}

fn parse_hold(field: CanonicalField, text: &str, flags: &mut Vec<QualityFlag>) -> HoldFlag {
    match HoldFlag::parse(text) {
        Some(HoldFlag::Unknown) => {
            flags.push(QualityFlag::UnrecognizedHold { field });
            HoldFlag::Unknown
        }
        Some(flag) => flag,
        None => HoldFlag::No,
    }
}

/// Parse an absence count, clamping out-of-range values instead of failing
fn parse_absences(text: &str, flags: &mut Vec<QualityFlag>) -> u32 {
    let raw = match text.trim().replace(',', ".").parse::<f64>() {
        Ok(value) if value.is_finite() => value.trunc() as i64,
        _ => {
            flags.push(QualityFlag::AbsencesUnparseable);
            return 0;
        }
    };

    let clamped = raw.clamp(0, u32::MAX as i64) as u32;
    if clamped as i64 != raw {
        warn!(raw, clamped, "consecutive absences out of range, clamped");
        flags.push(QualityFlag::AbsencesClamped { raw, clamped });
    }
    clamped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DEFAULT_SEX, DEFAULT_TEXT};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn grid(rows: serde_json::Value) -> Vec<RawRow> {
        serde_json::from_value(rows).unwrap()
    }

    fn normalize(rows: &[RawRow]) -> Result<Normalized, EngineError> {
        let header = HeaderConfig::default();
        let aliases = AliasTable::default();
        Normalizer::new(&header, &aliases).normalize_grid(rows)
    }

    fn make_test_grid() -> Vec<RawRow> {
        grid(json!([
            ["Base de dados", null, null, null, null, null, null],
            [null, null, null, null, null, null, null],
            ["Matrícula", "Nome", "Situação", "Curso", "Pend.Financ.", "Faltas Consecutivas", null],
            ["ELT250051", "Ana Souza", "MT", "Eletrotécnica", "S", 2, null],
            [null, "Sem matrícula", "MT", "Enfermagem", "N", 0, null],
            ["ENF200087", "Bruno Lima", "TR", "Enfermagem", "N", -3, null],
            ["ELT250051", "Ana Duplicada", "MT", "Eletrotécnica", "N", 0, null],
            [null, null, null, null, null, null, null]
        ]))
    }

    #[test]
    fn test_normalize_grid() {
        let normalized = normalize(&make_test_grid()).unwrap();
        let records = &normalized.records;

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].registration_id, "ELT250051");
        assert_eq!(records[0].name, "Ana Souza");
        assert_eq!(records[0].financial_hold, HoldFlag::Yes);
        assert_eq!(records[0].consecutive_absences, 2);
        assert_eq!(records[1].registration_id, "ENF200087");
        assert_eq!(records[1].current_status, "TR");

        let report = &normalized.report;
        assert_eq!(report.header_row, Some(2));
        assert!(report.sentinel_found);
        assert_eq!(report.rows_seen, 5);
        assert_eq!(report.dropped_missing_id, 1);
        assert_eq!(report.duplicates_dropped, 1);
        assert_eq!(report.blank_rows, 1);
        assert_eq!(report.empty_columns, 1);
    }

    #[test]
    fn test_duplicate_keeps_first_occurrence() {
        let normalized = normalize(&make_test_grid()).unwrap();
        let ana: Vec<_> = normalized
            .records
            .iter()
            .filter(|r| r.registration_id == "ELT250051")
            .collect();
        assert_eq!(ana.len(), 1);
        assert_eq!(ana[0].name, "Ana Souza");
    }

    #[test]
    fn test_negative_absences_clamped_to_zero() {
        let normalized = normalize(&make_test_grid()).unwrap();
        let bruno = &normalized.records[1];

        assert_eq!(bruno.consecutive_absences, 0);
        assert!(bruno
            .provenance
            .contains(&QualityFlag::AbsencesClamped { raw: -3, clamped: 0 }));
    }

    #[test]
    fn test_missing_columns_get_defaults() {
        let rows = grid(json!([
            ["Matrícula", "Nome", "Curso"],
            ["ADM190001", null, null]
        ]));
        let header = HeaderConfig {
            min_matches: 1,
            ..HeaderConfig::default()
        };
        let aliases = AliasTable::default();
        let normalized = Normalizer::new(&header, &aliases)
            .normalize_grid(&rows)
            .unwrap();
        let record = &normalized.records[0];

        assert_eq!(record.name, DEFAULT_TEXT);
        assert_eq!(record.course, DEFAULT_TEXT);
        assert_eq!(record.sex, DEFAULT_SEX);
        assert_eq!(record.consecutive_absences, 0);
        assert_eq!(record.academic_hold, HoldFlag::No);
        assert_eq!(record.financial_hold, HoldFlag::No);
        assert_eq!(record.identity_flag, "N");
        assert!(record.provenance.contains(&QualityFlag::Defaulted {
            field: CanonicalField::Sex
        }));
        assert!(normalized
            .report
            .defaulted_fields
            .contains(&CanonicalField::FinancialHold));
        assert!(!normalized
            .report
            .defaulted_fields
            .contains(&CanonicalField::Course));
    }

    #[test]
    fn test_unparseable_values_are_flagged() {
        let mut values = BTreeMap::new();
        values.insert(CanonicalField::RegistrationId, "X1".to_string());
        values.insert(CanonicalField::ConsecutiveAbsences, "muitas".to_string());
        values.insert(CanonicalField::AcademicHold, "talvez".to_string());
        let record = build_record(0, &values).unwrap();

        assert_eq!(record.consecutive_absences, 0);
        assert_eq!(record.academic_hold, HoldFlag::Unknown);
        assert!(record.provenance.contains(&QualityFlag::AbsencesUnparseable));
        assert!(record.provenance.contains(&QualityFlag::UnrecognizedHold {
            field: CanonicalField::AcademicHold
        }));
    }

    #[test]
    fn test_normalize_labeled_rows() {
        let rows: Vec<LabeledRow> = serde_json::from_value(json!([
            {"Matricula": "ELT250051", "Pend. Financ.": "S", "Faltas": "7"},
            {"Matricula": "", "Nome": "Sem id"},
            {"matrícula": "ENF200087", "Sexo": "f", "Extra": 1}
        ]))
        .unwrap();
        let header = HeaderConfig::default();
        let aliases = AliasTable::default();
        let normalized = Normalizer::new(&header, &aliases).normalize_labeled(&rows);

        assert_eq!(normalized.records.len(), 2);
        assert_eq!(normalized.records[0].financial_hold, HoldFlag::Yes);
        assert_eq!(normalized.records[0].consecutive_absences, 7);
        assert_eq!(normalized.records[1].sex, "F");
        assert_eq!(normalized.records[1].input_index, 2);
        assert_eq!(normalized.report.dropped_missing_id, 1);
        assert_eq!(normalized.report.unmapped_columns, vec!["Extra".to_string()]);
        assert_eq!(normalized.report.header_row, None);
    }

    #[test]
    fn test_aliasing_twice_yields_same_records() {
        let rows: Vec<LabeledRow> = serde_json::from_value(json!([
            {"Matricula": "ELT250051", "Pend.Financ.": "S", "Cod Disc atual": "ELT-101"}
        ]))
        .unwrap();
        let header = HeaderConfig::default();
        let aliases = AliasTable::default();
        let normalizer = Normalizer::new(&header, &aliases);

        let renamed: Vec<LabeledRow> = rows.iter().map(|r| aliases.canonicalize_labels(r)).collect();
        let direct = normalizer.normalize_labeled(&rows);
        let aliased = normalizer.normalize_labeled(&renamed);

        assert_eq!(direct.records, aliased.records);
        assert_eq!(direct.records[0].current_subject_code, "ELT-101");
    }

    #[test]
    fn test_no_header_is_fatal() {
        let rows = grid(json!([["Relatório"], ["Nome", "Curso"]]));
        assert!(matches!(
            normalize(&rows),
            Err(EngineError::SchemaDetection { .. })
        ));
    }
}
