//! A1-style addressing: column letters, single cells and rectangular ranges.

use crate::error::{AppResult, LoggerError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Zero-based column offset, displayed as spreadsheet letters (A, B, .., Z, AA, AB, ..).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Column(pub u32);

impl Column {
    /// Column `A`.
    pub const FIRST: Column = Column(0);

    /// Zero-based offset.
    pub fn index(self) -> u32 {
        self.0
    }

    /// Letter code for this column.
    pub fn name(self) -> String {
        // Bijective base-26: there is no zero digit, so "A" follows "Z" as "AA".
        let mut n = u64::from(self.0) + 1;
        let mut letters = Vec::new();
        while n > 0 {
            let rem = ((n - 1) % 26) as u8;
            letters.push(b'A' + rem);
            n = (n - 1) / 26;
        }
        letters.reverse();
        String::from_utf8_lossy(&letters).into_owned()
    }

    /// Column `offset` places to the right.
    ///
    /// # Errors
    /// `InvalidAddress` past the last addressable column.
    pub fn offset(self, offset: u32) -> AppResult<Column> {
        self.0
            .checked_add(offset)
            .map(Column)
            .ok_or_else(|| LoggerError::InvalidAddress(format!("{self} + {offset} columns")))
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl TryFrom<String> for Column {
    type Error = LoggerError;

    fn try_from(value: String) -> AppResult<Self> {
        value.parse()
    }
}

impl From<Column> for String {
    fn from(value: Column) -> Self {
        value.name()
    }
}

impl FromStr for Column {
    type Err = LoggerError;

    fn from_str(s: &str) -> AppResult<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(LoggerError::InvalidAddress(s.to_string()));
        }
        let mut n: u64 = 0;
        for ch in trimmed.chars() {
            if !ch.is_ascii_alphabetic() {
                return Err(LoggerError::InvalidAddress(s.to_string()));
            }
            let digit = u64::from(ch.to_ascii_uppercase() as u8 - b'A') + 1;
            n = n * 26 + digit;
            if n > u64::from(u32::MAX) {
                return Err(LoggerError::InvalidAddress(s.to_string()));
            }
        }
        Ok(Column((n - 1) as u32))
    }
}

/// One cell, `column` + 1-based `row`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CellRef {
    /// Column of the cell
    pub column: Column,
    /// 1-based row
    pub row: u32,
}

impl CellRef {
    /// Build a reference, rejecting row 0.
    pub fn new(column: Column, row: u32) -> AppResult<Self> {
        if row == 0 {
            return Err(LoggerError::InvalidAddress(format!("{column}0")));
        }
        Ok(Self { column, row })
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.column, self.row)
    }
}

impl TryFrom<String> for CellRef {
    type Error = LoggerError;

    fn try_from(value: String) -> AppResult<Self> {
        value.parse()
    }
}

impl From<CellRef> for String {
    fn from(value: CellRef) -> Self {
        value.to_string()
    }
}

impl FromStr for CellRef {
    type Err = LoggerError;

    fn from_str(s: &str) -> AppResult<Self> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(|| LoggerError::InvalidAddress(s.to_string()))?;
        let (letters, digits) = trimmed.split_at(split);
        let column: Column = letters.parse()?;
        let row: u32 = digits
            .parse()
            .map_err(|_| LoggerError::InvalidAddress(s.to_string()))?;
        CellRef::new(column, row)
    }
}

/// Inclusive rectangle `start:end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRange {
    /// Top-left cell
    pub start: CellRef,
    /// Bottom-right cell
    pub end: CellRef,
}

impl CellRange {
    /// Build a range; `start` must be above and left of (or equal to) `end`.
    pub fn new(start: CellRef, end: CellRef) -> AppResult<Self> {
        if end.column < start.column || end.row < start.row {
            return Err(LoggerError::InvalidAddress(format!("{start}:{end}")));
        }
        Ok(Self { start, end })
    }

    /// `width` cells of `row`, starting at `first`.
    pub fn row_span(row: u32, first: Column, width: u32) -> AppResult<Self> {
        if width == 0 {
            return Err(LoggerError::InvalidAddress(format!(
                "empty span at {first}{row}"
            )));
        }
        CellRange::new(
            CellRef::new(first, row)?,
            CellRef::new(first.offset(width - 1)?, row)?,
        )
    }

    /// A single cell as a 1x1 range.
    pub fn cell(cell: CellRef) -> Self {
        Self {
            start: cell,
            end: cell,
        }
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        (self.end.column.0 - self.start.column.0) as usize + 1
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        (self.end.row - self.start.row) as usize + 1
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

impl FromStr for CellRange {
    type Err = LoggerError;

    fn from_str(s: &str) -> AppResult<Self> {
        match s.split_once(':') {
            Some((start, end)) => CellRange::new(start.parse()?, end.parse()?),
            None => Ok(CellRange::cell(s.parse()?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn column_names() {
        assert_eq!(Column(0).name(), "A");
        assert_eq!(Column(25).name(), "Z");
        assert_eq!(Column(26).name(), "AA");
        assert_eq!(Column(27).name(), "AB");
        assert_eq!(Column(701).name(), "ZZ");
        assert_eq!(Column(702).name(), "AAA");
    }

    #[test]
    fn column_parsing() {
        assert_eq!("A".parse::<Column>().unwrap(), Column(0));
        assert_eq!("cc".parse::<Column>().unwrap(), Column(80));
        assert_eq!("AW".parse::<Column>().unwrap(), Column(48));
        assert!("".parse::<Column>().is_err());
        assert!("A1".parse::<Column>().is_err());
    }

    #[test]
    fn ranges_parse_and_display() {
        let range: CellRange = "A6:CC6".parse().unwrap();
        assert_eq!(range.width(), 81);
        assert_eq!(range.height(), 1);
        assert_eq!(range.to_string(), "A6:CC6");

        let cell: CellRange = "AW3".parse().unwrap();
        assert_eq!(cell.width(), 1);
        assert_eq!(cell.to_string(), "AW3:AW3");
    }

    #[test]
    fn malformed_ranges_are_rejected() {
        assert!("B6:A6".parse::<CellRange>().is_err());
        assert!("A0".parse::<CellRef>().is_err());
        assert!("6".parse::<CellRef>().is_err());
        assert!("A6:".parse::<CellRange>().is_err());
    }

    #[test]
    fn row_span_bounds() {
        let span = CellRange::row_span(6, Column(0), 25).unwrap();
        assert_eq!(span.to_string(), "A6:Y6");
        assert!(CellRange::row_span(6, Column(0), 0).is_err());
    }

    #[test]
    fn span_past_the_last_column_is_rejected() {
        let last: Column = "MWLQKWU".parse().unwrap();
        assert_eq!(last, Column(u32::MAX - 1));
        assert!(matches!(
            CellRange::row_span(6, last, 8),
            Err(LoggerError::InvalidAddress(_))
        ));
        assert_eq!(Column(0).offset(3).unwrap(), Column(3));
    }

    proptest! {
        #[test]
        fn column_bijection(k in 0u32..1_000_000) {
            let name = Column(k).name();
            prop_assert_eq!(name.parse::<Column>().unwrap(), Column(k));
        }

        #[test]
        fn column_names_increase(k in 0u32..100_000) {
            let (a, b) = (Column(k).name(), Column(k + 1).name());
            prop_assert!(a.len() < b.len() || (a.len() == b.len() && a < b));
        }
    }
}
