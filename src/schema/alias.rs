//! Column alias table
//!
//! Maps the many spellings a source system uses for a column onto one
//! canonical field. The table is data: it can be loaded or extended from JSON
//! without touching normalization logic.

use crate::error::EngineError;
use crate::schema::LabeledRow;
use crate::types::CanonicalField;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the built-in alias table
pub const ALIAS_TABLE_VERSION: u32 = 1;

/// Spellings seen in exports besides each field's source label and
/// snake_case name. Accents, case, and spacing around dots are folded before
/// lookup, so only genuinely different spellings belong here.
const BUILTIN_ALIASES: &[(&str, CanonicalField)] = &[
    ("Matric.", CanonicalField::RegistrationId),
    ("RA", CanonicalField::RegistrationId),
    ("Registro Acadêmico", CanonicalField::RegistrationId),
    ("Aluno", CanonicalField::Name),
    ("Nome do Aluno", CanonicalField::Name),
    ("Código Curso", CanonicalField::CourseCode),
    ("Cod Curso", CanonicalField::CourseCode),
    ("Turma", CanonicalField::CurrentClass),
    ("Módulo", CanonicalField::CurrentModule),
    ("Código Disc atual", CanonicalField::CurrentSubjectCode),
    ("Cod Disc atual", CanonicalField::CurrentSubjectCode),
    ("Disciplina", CanonicalField::CurrentSubjectName),
    ("Situação Atual", CanonicalField::CurrentStatus),
    ("Status", CanonicalField::CurrentStatus),
    ("Pendência Acadêmica", CanonicalField::AcademicHold),
    ("Pend Acad", CanonicalField::AcademicHold),
    ("Pendência Financeira", CanonicalField::FinancialHold),
    ("Pend Financ", CanonicalField::FinancialHold),
    ("Faltas", CanonicalField::ConsecutiveAbsences),
    ("Faltas Consec.", CanonicalField::ConsecutiveAbsences),
    ("Gênero", CanonicalField::Sex),
];

/// Many-to-one mapping from column label to canonical field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "AliasFile")]
pub struct AliasTable {
    pub version: u32,
    /// Folded label to canonical field
    aliases: BTreeMap<String, CanonicalField>,
}

/// On-disk shape of an alias table; labels are folded on load
#[derive(Deserialize)]
struct AliasFile {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    aliases: BTreeMap<String, CanonicalField>,
}

fn default_version() -> u32 {
    ALIAS_TABLE_VERSION
}

impl From<AliasFile> for AliasTable {
    fn from(file: AliasFile) -> Self {
        let mut table = AliasTable {
            version: file.version,
            aliases: BTreeMap::new(),
        };
        for (label, field) in file.aliases {
            table.insert(&label, field);
        }
        table
    }
}

impl Default for AliasTable {
    fn default() -> Self {
        let mut table = AliasTable {
            version: ALIAS_TABLE_VERSION,
            aliases: BTreeMap::new(),
        };
        for field in CanonicalField::ALL {
            table.insert(field.source_label(), field);
            table.insert(field.as_str(), field);
        }
        for (label, field) in BUILTIN_ALIASES {
            table.insert(label, *field);
        }
        table
    }
}

impl AliasTable {
    /// Load a table from JSON: `{"version": 2, "aliases": {"Label": "field"}}`
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Add or replace one alias
    pub fn insert(&mut self, label: &str, field: CanonicalField) {
        self.aliases.insert(fold_label(label), field);
    }

    /// Merge another table into this one; entries from `other` win
    pub fn extend(&mut self, other: &AliasTable) {
        for (label, field) in &other.aliases {
            self.aliases.insert(label.clone(), *field);
        }
        self.version = self.version.max(other.version);
    }

    /// Resolve a column label
    pub fn resolve(&self, label: &str) -> Option<CanonicalField> {
        self.aliases.get(&fold_label(label)).copied()
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// Rename the columns of a labeled row to canonical source labels.
    ///
    /// Unresolved columns keep their label. When two columns resolve to the
    /// same field the first one in the row wins.
    pub fn canonicalize_labels(&self, row: &LabeledRow) -> LabeledRow {
        let mut out = LabeledRow::new();
        for (label, value) in row {
            let key = match self.resolve(label) {
                Some(field) => field.source_label().to_string(),
                None => label.clone(),
            };
            if !out.contains_key(&key) {
                out.insert(key, value.clone());
            }
        }
        out
    }
}

/// Fold a label for lookup: trim, lowercase, strip Portuguese accents, drop
/// spaces next to dots, and collapse runs of whitespace.
pub fn fold_label(label: &str) -> String {
    let mut folded = String::with_capacity(label.len());
    let mut pending_space = false;

    for ch in label.trim().chars().flat_map(char::to_lowercase) {
        if ch.is_whitespace() || ch == '_' {
            pending_space = true;
            continue;
        }
        if ch == '.' {
            pending_space = false;
            folded.push('.');
            continue;
        }
        if pending_space && !folded.is_empty() && !folded.ends_with('.') {
            folded.push(' ');
        }
        pending_space = false;
        folded.push(strip_accent(ch));
    }

    folded
}

fn strip_accent(ch: char) -> char {
    match ch {
        'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        other => other,
    }
}
