//! Append cursor for row-oriented sheets.
//!
//! Sheets are append-only: the first row whose sentinel cell is blank is the next free row.
//! The cursor remembers where the last scan ended so later scans only look forward.

use crate::error::{AppResult, LoggerError};
use crate::sink::{CellRange, CellRef, Column, TabularSink};

/// First data row, below the five header rows.
pub const DEFAULT_FIRST_ROW: u32 = 6;

/// Exclusive scan limit.
pub const DEFAULT_ROW_LIMIT: u32 = 60_000;

/// Rows fetched per sink read while scanning.
const SCAN_CHUNK: u32 = 256;

/// Tracks the next free row of one sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendCursor {
    next: u32,
    limit: u32,
}

impl Default for AppendCursor {
    fn default() -> Self {
        Self::new(DEFAULT_FIRST_ROW, DEFAULT_ROW_LIMIT)
    }
}

impl AppendCursor {
    /// Cursor starting at `first_row`; rows at or beyond `limit` are never returned.
    pub fn new(first_row: u32, limit: u32) -> Self {
        Self {
            next: first_row.max(1),
            limit,
        }
    }

    /// Row the next scan starts from.
    pub fn position(&self) -> u32 {
        self.next
    }

    /// Exclusive row limit.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Find the first blank row at or after the stored position and remember it.
    ///
    /// # Errors
    /// `SheetFull` when no blank row exists below the limit; sink errors propagate.
    pub async fn next_row(
        &mut self,
        sink: &dyn TabularSink,
        sheet: &str,
        sentinel: Column,
    ) -> AppResult<u32> {
        let row = scan_for_blank(sink, sheet, sentinel, self.next, self.limit).await?;
        self.next = row;
        Ok(row)
    }
}

/// First row in `start_from..limit` whose `sentinel` cell is blank.
pub async fn scan_for_blank(
    sink: &dyn TabularSink,
    sheet: &str,
    sentinel: Column,
    start_from: u32,
    limit: u32,
) -> AppResult<u32> {
    let mut row = start_from.max(1);
    while row < limit {
        let last = row.saturating_add(SCAN_CHUNK - 1).min(limit - 1);
        let range = CellRange::new(CellRef::new(sentinel, row)?, CellRef::new(sentinel, last)?)?;
        let grid = sink.read_range(sheet, range).await?;
        for (offset, cells) in grid.iter().enumerate() {
            if cells.first().map_or(true, |cell| cell.is_blank()) {
                let found = row + offset as u32;
                tracing::trace!(sheet, row = found, "Found blank row");
                return Ok(found);
            }
        }
        row = last + 1;
    }
    Err(LoggerError::SheetFull {
        sheet: sheet.to_string(),
        limit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{CellValue, MemoryWorkbook};

    fn sheet_with_rows(rows: u32) -> MemoryWorkbook {
        let book = MemoryWorkbook::with_sheets(["inputs"]);
        for row in 1..=rows {
            book.set("inputs", &format!("A{row}"), "x").unwrap();
        }
        book
    }

    #[tokio::test]
    async fn finds_first_blank_after_headers() {
        let book = sheet_with_rows(5);
        let mut cursor = AppendCursor::default();
        assert_eq!(cursor.next_row(&book, "inputs", Column::FIRST).await.unwrap(), 6);
        assert_eq!(cursor.position(), 6);
    }

    #[tokio::test]
    async fn whitespace_counts_as_blank() {
        let book = sheet_with_rows(7);
        book.set("inputs", "A7", "   ").unwrap();
        let mut cursor = AppendCursor::default();
        assert_eq!(cursor.next_row(&book, "inputs", Column::FIRST).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn zero_is_not_blank() {
        let book = sheet_with_rows(5);
        book.set("inputs", "A6", 0i64).unwrap();
        let mut cursor = AppendCursor::default();
        assert_eq!(cursor.next_row(&book, "inputs", Column::FIRST).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn scans_across_chunks() {
        let book = sheet_with_rows(600);
        let mut cursor = AppendCursor::default();
        assert_eq!(cursor.next_row(&book, "inputs", Column::FIRST).await.unwrap(), 601);
    }

    #[tokio::test]
    async fn positions_never_move_backwards() {
        let book = sheet_with_rows(5);
        let mut cursor = AppendCursor::default();
        let mut previous = 0;
        for _ in 0..10 {
            let row = cursor.next_row(&book, "inputs", Column::FIRST).await.unwrap();
            assert!(row >= previous);
            book.set("inputs", &format!("A{row}"), "sample").unwrap();
            previous = row;
        }
        assert_eq!(previous, 15);

        // A hole behind the cursor is not revisited.
        book.set("inputs", "A8", CellValue::Empty).unwrap();
        let row = cursor.next_row(&book, "inputs", Column::FIRST).await.unwrap();
        assert_eq!(row, 16);
    }

    #[tokio::test]
    async fn full_sheet_is_reported() {
        let book = sheet_with_rows(20);
        let mut cursor = AppendCursor::new(6, 20);
        let err = cursor
            .next_row(&book, "inputs", Column::FIRST)
            .await
            .unwrap_err();
        assert!(matches!(err, LoggerError::SheetFull { limit: 20, .. }));
        assert_eq!(cursor.position(), 6);
    }

    #[tokio::test]
    async fn missing_sheet_propagates() {
        let book = MemoryWorkbook::new();
        let mut cursor = AppendCursor::default();
        assert!(matches!(
            cursor.next_row(&book, "inputs", Column::FIRST).await,
            Err(LoggerError::SheetNotFound(_))
        ));
    }
}
