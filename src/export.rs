//! Dashboard export
//!
//! Flattens predictions into rows with a stable column order and encodes them
//! as CSV, JSON or NDJSON for a reporting dashboard. Every export carries run
//! metadata so a dashboard refresh can tell runs apart.

use crate::error::EngineError;
use crate::types::Prediction;
use crate::{ENGINE_NAME, ENGINE_VERSION};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Column order of the flat projection
pub const COLUMNS: [&str; 11] = [
    "registration_id",
    "name",
    "current_status",
    "course",
    "predicted_status",
    "evasion_probability",
    "raw_probability",
    "urgency_tier",
    "dominant_factor",
    "confidence",
    "fired_rules",
];

/// Columns appended to every CSV row when metadata is attached
pub const METADATA_COLUMNS: [&str; 3] = ["processed_at", "total_records", "source_file"];

/// Prefix of the default export file name
pub const EXPORT_FILE_PREFIX: &str = "predicoes_evasao";

/// Flat, dashboard-friendly projection of a prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRow {
    pub registration_id: String,
    pub name: String,
    pub current_status: String,
    pub course: String,
    pub predicted_status: String,
    pub evasion_probability: f64,
    pub raw_probability: f64,
    pub urgency_tier: String,
    pub dominant_factor: String,
    pub confidence: f64,
    /// Fired rule ids joined by `;`
    pub fired_rules: String,
}

impl From<&Prediction> for PredictionRow {
    fn from(p: &Prediction) -> Self {
        Self {
            registration_id: p.registration_id.clone(),
            name: p.name.clone(),
            current_status: p.current_status.clone(),
            course: p.course.clone(),
            predicted_status: p.predicted_status.as_str().to_string(),
            evasion_probability: p.evasion_probability,
            raw_probability: p.raw_probability,
            urgency_tier: p.urgency_tier.as_str().to_string(),
            dominant_factor: p.dominant_factor.clone(),
            confidence: p.confidence,
            fired_rules: p
                .fired_rules
                .iter()
                .map(|r| r.as_str())
                .collect::<Vec<_>>()
                .join(";"),
        }
    }
}

impl PredictionRow {
    /// Cell values in [`COLUMNS`] order
    fn cells(&self) -> [String; 11] {
        [
            self.registration_id.clone(),
            self.name.clone(),
            self.current_status.clone(),
            self.course.clone(),
            self.predicted_status.clone(),
            format_probability(self.evasion_probability),
            format_probability(self.raw_probability),
            self.urgency_tier.clone(),
            self.dominant_factor.clone(),
            format_probability(self.confidence),
            self.fired_rules.clone(),
        ]
    }
}

/// Metadata describing one export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub record_count: usize,
    pub source_filename: Option<String>,
    pub engine_name: String,
    pub engine_version: String,
}

/// Full JSON export document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDocument {
    pub metadata: ExportMetadata,
    pub rows: Vec<PredictionRow>,
}

/// Encoder for dashboard exports
pub struct DashboardEncoder {
    run_id: Uuid,
    source_filename: Option<String>,
}

impl Default for DashboardEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl DashboardEncoder {
    /// Create an encoder with a fresh run id
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            source_filename: None,
        }
    }

    /// Create an encoder with a specific run id
    pub fn with_run_id(run_id: Uuid) -> Self {
        Self {
            run_id,
            source_filename: None,
        }
    }

    /// Name of the spreadsheet the predictions came from
    pub fn with_source_filename(mut self, name: impl Into<String>) -> Self {
        self.source_filename = Some(name.into());
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn rows(predictions: &[Prediction]) -> Vec<PredictionRow> {
        predictions.iter().map(PredictionRow::from).collect()
    }

    pub fn metadata(&self, record_count: usize, generated_at: DateTime<Utc>) -> ExportMetadata {
        ExportMetadata {
            run_id: self.run_id,
            generated_at,
            record_count,
            source_filename: self.source_filename.clone(),
            engine_name: ENGINE_NAME.to_string(),
            engine_version: ENGINE_VERSION.to_string(),
        }
    }

    /// Encode predictions as CSV with a header line.
    ///
    /// When metadata is given, processing time, record count and source file
    /// are repeated on every row so a flat dashboard table can filter by run.
    pub fn to_csv(&self, predictions: &[Prediction], metadata: Option<&ExportMetadata>) -> String {
        let mut out = String::new();
        let mut header: Vec<&str> = COLUMNS.to_vec();
        if metadata.is_some() {
            header.extend(METADATA_COLUMNS);
        }
        push_csv_line(&mut out, header.iter().map(|s| s.to_string()));

        let trailer = metadata.map(|m| {
            [
                m.generated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                m.record_count.to_string(),
                m.source_filename.clone().unwrap_or_default(),
            ]
        });

        for row in Self::rows(predictions) {
            let cells = row.cells().into_iter();
            match &trailer {
                Some(extra) => push_csv_line(&mut out, cells.chain(extra.iter().cloned())),
                None => push_csv_line(&mut out, cells),
            }
        }
        out
    }

    /// Encode predictions as a JSON document with metadata
    pub fn to_json(
        &self,
        predictions: &[Prediction],
        generated_at: DateTime<Utc>,
    ) -> Result<String, EngineError> {
        let document = ExportDocument {
            metadata: self.metadata(predictions.len(), generated_at),
            rows: Self::rows(predictions),
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }

    /// Encode predictions as newline-delimited JSON, one row per line
    pub fn to_ndjson(&self, predictions: &[Prediction]) -> Result<String, EngineError> {
        let mut out = String::new();
        for row in Self::rows(predictions) {
            out.push_str(&serde_json::to_string(&row)?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Default file name for a CSV export made at `at`
    pub fn default_file_name(at: DateTime<Utc>) -> String {
        Self::default_file_name_with_extension(at, "csv")
    }

    /// Default file name for an export made at `at` in any format
    pub fn default_file_name_with_extension(at: DateTime<Utc>, extension: &str) -> String {
        format!("{EXPORT_FILE_PREFIX}_{}.{extension}", at.format("%Y%m%d_%H%M%S"))
    }
}

fn format_probability(value: f64) -> String {
    format!("{value:.4}")
}

fn push_csv_line(out: &mut String, cells: impl Iterator<Item = String>) {
    for (i, cell) in cells.enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&escape_csv(&cell));
    }
    out.push_str("\r\n");
}

/// Quote a cell when it contains a delimiter, quote or line break
fn escape_csv(cell: &str) -> String {
    if cell.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PredictedStatus, RuleId, UrgencyTier};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn make_test_prediction() -> Prediction {
        Prediction {
            input_index: 0,
            registration_id: "2023001".to_string(),
            name: "Silva, Ana \"Aninha\"".to_string(),
            current_status: "CURSANDO".to_string(),
            course: "Enfermagem".to_string(),
            predicted_status: PredictedStatus::AtRisk,
            evasion_probability: 0.5,
            raw_probability: 0.2,
            urgency_tier: UrgencyTier::Medium,
            dominant_factor: "financial_hold".to_string(),
            confidence: 0.7,
            fired_rules: vec![RuleId::FinancialHold, RuleId::ConsecutiveAbsences],
            quality_flags: Vec::new(),
        }
    }

    fn timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap()
    }

    #[test]
    fn test_csv_quoting() {
        assert_eq!(escape_csv("plain"), "plain");
        assert_eq!(escape_csv("a,b"), "\"a,b\"");
        assert_eq!(escape_csv("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_csv("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn test_to_csv() {
        let encoder = DashboardEncoder::with_run_id(Uuid::nil());
        let csv = encoder.to_csv(&[make_test_prediction()], None);
        let lines: Vec<&str> = csv.split("\r\n").collect();

        assert_eq!(lines[0], COLUMNS.join(","));
        assert_eq!(
            lines[1],
            "2023001,\"Silva, Ana \"\"Aninha\"\"\",CURSANDO,Enfermagem,at_risk,0.5000,0.2000,medium,financial_hold,0.7000,financial_hold;consecutive_absences"
        );
        assert_eq!(lines[2], "");
    }

    #[test]
    fn test_to_csv_with_metadata() {
        let encoder =
            DashboardEncoder::with_run_id(Uuid::nil()).with_source_filename("turma_2024.xlsx");
        let metadata = encoder.metadata(1, timestamp());
        let csv = encoder.to_csv(&[make_test_prediction()], Some(&metadata));
        let lines: Vec<&str> = csv.split("\r\n").collect();

        assert!(lines[0].ends_with("processed_at,total_records,source_file"));
        assert!(lines[1].ends_with("2024-03-05 14:07:09,1,turma_2024.xlsx"));
    }

    #[test]
    fn test_to_json_carries_metadata() {
        let encoder = DashboardEncoder::with_run_id(Uuid::nil());
        let json = encoder.to_json(&[make_test_prediction()], timestamp()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["metadata"]["record_count"], 1);
        assert_eq!(parsed["metadata"]["engine_version"], ENGINE_VERSION);
        assert_eq!(parsed["metadata"]["run_id"], Uuid::nil().to_string());
        assert_eq!(parsed["rows"][0]["urgency_tier"], "medium");
    }

    #[test]
    fn test_to_ndjson() {
        let encoder = DashboardEncoder::new();
        let predictions = vec![make_test_prediction(), make_test_prediction()];
        let ndjson = encoder.to_ndjson(&predictions).unwrap();

        assert_eq!(ndjson.lines().count(), 2);
        for line in ndjson.lines() {
            let row: PredictionRow = serde_json::from_str(line).unwrap();
            assert_eq!(row.fired_rules, "financial_hold;consecutive_absences");
        }
    }

    #[test]
    fn test_default_file_name() {
        assert_eq!(
            DashboardEncoder::default_file_name(timestamp()),
            "predicoes_evasao_20240305_140709.csv"
        );
    }

    #[test]
    fn test_default_file_name_follows_extension() {
        assert_eq!(
            DashboardEncoder::default_file_name_with_extension(timestamp(), "json"),
            "predicoes_evasao_20240305_140709.json"
        );
        assert_eq!(
            DashboardEncoder::default_file_name_with_extension(timestamp(), "ndjson"),
            "predicoes_evasao_20240305_140709.ndjson"
        );
    }

    #[test]
    fn test_unique_run_ids() {
        assert_ne!(DashboardEncoder::new().run_id(), DashboardEncoder::new().run_id());
    }
}
