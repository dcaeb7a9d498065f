//! Tabular sinks.
//!
//! A sink is a set of named sheets addressed in A1 notation. The logger only ever needs four
//! things from it: resolve a sheet by name, read one cell, read a rectangle and write a
//! rectangle. Everything spreadsheet-specific (workbooks, COM, files) lives behind
//! [`TabularSink`].
//!
//! - [`MemoryWorkbook`]: in-process sheets, used by tests and embedding applications
//! - [`CsvWorkbook`]: one CSV file per sheet in a directory (feature `storage_csv`)
//!
//! Sinks are shared mutable resources without transactions. Callers serialize access to any
//! given sheet themselves; the row writer does this by taking `&mut self`.

pub mod address;
#[cfg(feature = "storage_csv")]
pub mod csv;
pub mod memory;

pub use address::{CellRange, CellRef, Column};
#[cfg(feature = "storage_csv")]
pub use self::csv::CsvWorkbook;
pub use memory::MemoryWorkbook;

use crate::error::{AppResult, LoggerError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    /// Blank cell, also used as the placeholder for absent instruments
    #[default]
    Empty,
    /// Boolean
    Bool(bool),
    /// Integer, including raw register values and decoded bits
    Int(i64),
    /// Floating point
    Float(f64),
    /// Free text
    Text(String),
}

impl CellValue {
    /// Empty, or text that is only whitespace.
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Interpret stored text the way a spreadsheet would on import.
    pub fn parse_text(raw: &str) -> Self {
        if raw.is_empty() {
            return CellValue::Empty;
        }
        if let Ok(i) = raw.parse::<i64>() {
            return CellValue::Int(i);
        }
        if let Ok(f) = raw.parse::<f64>() {
            if f.is_finite() {
                return CellValue::Float(f);
            }
        }
        match raw {
            "TRUE" | "true" => CellValue::Bool(true),
            "FALSE" | "false" => CellValue::Bool(false),
            _ => CellValue::Text(raw.to_string()),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            CellValue::Int(i) => write!(f, "{i}"),
            CellValue::Float(x) => write!(f, "{x}"),
            CellValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<u16> for CellValue {
    fn from(value: u16) -> Self {
        CellValue::Int(i64::from(value))
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Int(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Float(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Bool(value)
    }
}

/// Row-major 2-D block of cells.
pub type Grid = Vec<Vec<CellValue>>;

/// Range-addressable table keyed by sheet name.
#[async_trait]
pub trait TabularSink: Send + Sync {
    /// Resolve `name` case-insensitively, returning the stored sheet name.
    async fn find_sheet(&self, name: &str) -> AppResult<Option<String>>;

    /// Read a rectangle. The grid always has the exact shape of `range`.
    async fn read_range(&self, sheet: &str, range: CellRange) -> AppResult<Grid>;

    /// Write a rectangle. Fails with `ShapeMismatch` unless `grid` is exactly `range`-shaped.
    async fn write_range(&self, sheet: &str, range: CellRange, grid: Grid) -> AppResult<()>;

    /// Read one cell.
    async fn read_cell(&self, sheet: &str, cell: CellRef) -> AppResult<CellValue> {
        let grid = self.read_range(sheet, CellRange::cell(cell)).await?;
        Ok(grid
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .unwrap_or_default())
    }

    /// Resolve a sheet or fail with `SheetNotFound`.
    async fn require_sheet(&self, name: &str) -> AppResult<String> {
        self.find_sheet(name)
            .await?
            .ok_or_else(|| LoggerError::SheetNotFound(name.to_string()))
    }
}

/// Reject grids whose shape differs from `range`.
pub fn ensure_shape(range: CellRange, grid: &Grid) -> AppResult<()> {
    let expected = (range.height(), range.width());
    let rows = grid.len();
    let ragged = grid.iter().find(|row| row.len() != range.width());
    let columns = match ragged {
        Some(row) => row.len(),
        None => grid.first().map_or(0, Vec::len),
    };
    if rows != expected.0 || ragged.is_some() || columns != expected.1 {
        return Err(LoggerError::ShapeMismatch {
            range: range.to_string(),
            expected,
            actual: (rows, columns),
        });
    }
    Ok(())
}

/// Case-insensitive, whitespace-trimmed comparison used for sheet names and header labels.
pub fn names_match(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_cells() {
        assert!(CellValue::Empty.is_blank());
        assert!(CellValue::from("  ").is_blank());
        assert!(!CellValue::Int(0).is_blank());
        assert!(!CellValue::from("2024-01-01").is_blank());
    }

    #[test]
    fn text_import() {
        assert_eq!(CellValue::parse_text(""), CellValue::Empty);
        assert_eq!(CellValue::parse_text("42"), CellValue::Int(42));
        assert_eq!(CellValue::parse_text("1.5"), CellValue::Float(1.5));
        assert_eq!(CellValue::parse_text("TRUE"), CellValue::Bool(true));
        assert_eq!(
            CellValue::parse_text("2024-05-01 10:00:00.123456"),
            CellValue::Text("2024-05-01 10:00:00.123456".into())
        );
    }

    #[test]
    fn shape_check() {
        let range: CellRange = "A1:C2".parse().unwrap();
        let good = vec![vec![CellValue::Empty; 3]; 2];
        assert!(ensure_shape(range, &good).is_ok());

        let short = vec![vec![CellValue::Empty; 2]; 2];
        match ensure_shape(range, &short) {
            Err(LoggerError::ShapeMismatch {
                expected, actual, ..
            }) => {
                assert_eq!(expected, (2, 3));
                assert_eq!(actual, (2, 2));
            }
            other => panic!("unexpected: {other:?}"),
        }

        let ragged = vec![vec![CellValue::Empty; 3], vec![CellValue::Empty; 1]];
        assert!(ensure_shape(range, &ragged).is_err());
    }

    #[test]
    fn sheet_name_matching() {
        assert!(names_match("Inputs", " inputs "));
        assert!(!names_match("inputs", "outputs"));
    }
}
