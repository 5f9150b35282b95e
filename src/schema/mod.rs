//! Spreadsheet schema handling
//!
//! This module resolves the inconsistent column labels of academic-records
//! exports to canonical fields and locates the real header row inside a raw
//! cell grid.

mod alias;
mod header;

pub use alias::*;
pub use header::*;

use serde_json::Value;

/// One spreadsheet row as a positional list of cells
pub type RawRow = Vec<Value>;

/// One row keyed by column label
pub type LabeledRow = serde_json::Map<String, Value>;

/// Render a cell as trimmed text; `None` for empty cells
///
/// Spreadsheet exports store integer codes as floats, so integral numbers
/// render without a fractional part (`12.0` becomes `"12"`).
pub fn cell_text(cell: &Value) -> Option<String> {
    let text = match cell {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(&json!(null)), None);
        assert_eq!(cell_text(&json!("  ")), None);
        assert_eq!(cell_text(&json!(" MT ")), Some("MT".to_string()));
        assert_eq!(cell_text(&json!(12.0)), Some("12".to_string()));
        assert_eq!(cell_text(&json!(-3)), Some("-3".to_string()));
        assert_eq!(cell_text(&json!(2.5)), Some("2.5".to_string()));
        assert_eq!(cell_text(&json!(true)), Some("true".to_string()));
    }
}
