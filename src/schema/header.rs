//! Header row detection
//!
//! Exports from the student-information system start with a title block
//! ("Base de dados", report date, blank lines) before the real header. The
//! locator scans a bounded window for the header row.

use crate::error::EngineError;
use crate::schema::{cell_text, AliasTable, RawRow};
use crate::types::CanonicalField;
use serde::{Deserialize, Serialize};

/// Title cell the source system writes above its data export
pub const DEFAULT_SENTINEL: &str = "Base de dados";

/// Rows searched for a header before giving up
pub const DEFAULT_SCAN_WINDOW: usize = 10;

/// Canonical columns a row must name to count as a header
pub const DEFAULT_MIN_HEADER_MATCHES: usize = 3;

/// Header search settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderConfig {
    /// Title text marking the start of the export; the header is searched
    /// below it when present
    pub sentinel: Option<String>,
    pub scan_window: usize,
    pub min_matches: usize,
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            sentinel: Some(DEFAULT_SENTINEL.to_string()),
            scan_window: DEFAULT_SCAN_WINDOW,
            min_matches: DEFAULT_MIN_HEADER_MATCHES,
        }
    }
}

/// Located header and the field each column carries
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderMatch {
    /// Grid index of the header row
    pub row_index: usize,
    /// Whether the sentinel title was seen above the header
    pub sentinel_found: bool,
    /// Canonical field per column; `None` for unmapped or repeated columns
    pub columns: Vec<Option<CanonicalField>>,
    /// Labels of non-empty header cells that no alias resolves
    pub unmapped: Vec<String>,
}

/// Finds the header row of a raw grid
pub struct HeaderLocator<'a> {
    config: &'a HeaderConfig,
    aliases: &'a AliasTable,
}

impl<'a> HeaderLocator<'a> {
    pub fn new(config: &'a HeaderConfig, aliases: &'a AliasTable) -> Self {
        Self { config, aliases }
    }

    /// Locate the header within the scan window
    pub fn locate(&self, rows: &[RawRow]) -> Result<HeaderMatch, EngineError> {
        let window = self.config.scan_window.min(rows.len());
        let sentinel_row = self.find_sentinel(&rows[..window]);
        let start = sentinel_row.map_or(0, |i| i + 1);

        for (offset, row) in rows[start..window].iter().enumerate() {
            if let Some(header) = self.match_header(row) {
                return Ok(HeaderMatch {
                    row_index: start + offset,
                    sentinel_found: sentinel_row.is_some(),
                    ..header
                });
            }
        }

        Err(EngineError::SchemaDetection {
            window: self.config.scan_window,
            scanned: rows[..window].iter().map(render_row).collect(),
        })
    }

    fn find_sentinel(&self, rows: &[RawRow]) -> Option<usize> {
        let sentinel = self.config.sentinel.as_deref()?.trim().to_lowercase();
        if sentinel.is_empty() {
            return None;
        }
        rows.iter().position(|row| {
            row.iter()
                .filter_map(cell_text)
                .any(|text| text.to_lowercase().contains(&sentinel))
        })
    }

    fn match_header(&self, row: &RawRow) -> Option<HeaderMatch> {
        let mut columns = Vec::with_capacity(row.len());
        let mut seen: Vec<CanonicalField> = Vec::new();
        let mut unmapped = Vec::new();

        for cell in row {
            let field = match cell_text(cell) {
                Some(label) => match self.aliases.resolve(&label) {
                    Some(field) if !seen.contains(&field) => {
                        seen.push(field);
                        Some(field)
                    }
                    Some(_) => None,
                    None => {
                        unmapped.push(label);
                        None
                    }
                },
                None => None,
            };
            columns.push(field);
        }

        let has_identity = seen.contains(&CanonicalField::RegistrationId);
        if has_identity && seen.len() >= self.config.min_matches.max(1) {
            Some(HeaderMatch {
                row_index: 0,
                sentinel_found: false,
                columns,
                unmapped,
            })
        } else {
            None
        }
    }
}

fn render_row(row: &RawRow) -> String {
    row.iter()
        .map(|cell| cell_text(cell).unwrap_or_default())
        .collect::<Vec<_>>()
        .join(",")
        .trim_end_matches(',')
        .to_string()
}
