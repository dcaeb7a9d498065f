//! In-memory workbook.

use super::{ensure_shape, names_match, CellRange, CellRef, CellValue, Column, Grid, TabularSink};
use crate::error::{AppResult, LoggerError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

type Sheet = HashMap<(u32, u32), CellValue>;

/// Sparse sheets held in memory.
///
/// Only non-empty cells are stored; writing `CellValue::Empty` clears a cell.
#[derive(Debug, Default)]
pub struct MemoryWorkbook {
    sheets: RwLock<BTreeMap<String, Sheet>>,
}

impl MemoryWorkbook {
    /// Workbook without sheets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Workbook with the given empty sheets.
    pub fn with_sheets<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let book = Self::new();
        for name in names {
            book.add_sheet(name);
        }
        book
    }

    /// Add an empty sheet; an existing sheet of the same name is left untouched.
    pub fn add_sheet(&self, name: impl Into<String>) {
        self.sheets.write().entry(name.into()).or_default();
    }

    /// Names of all sheets, sorted.
    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.read().keys().cloned().collect()
    }

    /// Set one cell by A1 reference.
    pub fn set(&self, sheet: &str, cell: &str, value: impl Into<CellValue>) -> AppResult<()> {
        let cell: CellRef = cell.parse()?;
        let mut sheets = self.sheets.write();
        let data = sheets
            .get_mut(sheet)
            .ok_or_else(|| LoggerError::SheetNotFound(sheet.to_string()))?;
        store(data, cell.row, cell.column.0, value.into());
        Ok(())
    }

    /// Current value of one cell; `None` for unknown sheets or malformed references.
    pub fn get(&self, sheet: &str, cell: &str) -> Option<CellValue> {
        let cell: CellRef = cell.parse().ok()?;
        let sheets = self.sheets.read();
        let data = sheets.get(sheet)?;
        Some(
            data.get(&(cell.row, cell.column.0))
                .cloned()
                .unwrap_or_default(),
        )
    }

    /// Dense copy of a sheet from `A1` to its last used cell.
    pub fn sheet_rows(&self, sheet: &str) -> AppResult<Grid> {
        let sheets = self.sheets.read();
        let data = sheets
            .get(sheet)
            .ok_or_else(|| LoggerError::SheetNotFound(sheet.to_string()))?;
        let max_row = data.keys().map(|(row, _)| *row).max().unwrap_or(0);
        let max_col = data.keys().map(|(_, col)| *col + 1).max().unwrap_or(0);
        Ok((1..=max_row)
            .map(|row| {
                (0..max_col)
                    .map(|col| data.get(&(row, col)).cloned().unwrap_or_default())
                    .collect()
            })
            .collect())
    }

    /// Replace a sheet with dense rows starting at `A1`.
    pub fn load_sheet(&self, sheet: impl Into<String>, rows: Grid) {
        let mut data = Sheet::new();
        for (r, row) in rows.into_iter().enumerate() {
            for (c, value) in row.into_iter().enumerate() {
                store(&mut data, r as u32 + 1, c as u32, value);
            }
        }
        self.sheets.write().insert(sheet.into(), data);
    }
}

fn store(data: &mut Sheet, row: u32, col: u32, value: CellValue) {
    if value == CellValue::Empty {
        data.remove(&(row, col));
    } else {
        data.insert((row, col), value);
    }
}

#[async_trait]
impl TabularSink for MemoryWorkbook {
    async fn find_sheet(&self, name: &str) -> AppResult<Option<String>> {
        Ok(self
            .sheets
            .read()
            .keys()
            .find(|stored| names_match(stored, name))
            .cloned())
    }

    async fn read_range(&self, sheet: &str, range: CellRange) -> AppResult<Grid> {
        let sheets = self.sheets.read();
        let data = sheets
            .get(sheet)
            .ok_or_else(|| LoggerError::SheetNotFound(sheet.to_string()))?;
        Ok((range.start.row..=range.end.row)
            .map(|row| {
                (range.start.column.0..=range.end.column.0)
                    .map(|col| data.get(&(row, col)).cloned().unwrap_or_default())
                    .collect()
            })
            .collect())
    }

    async fn write_range(&self, sheet: &str, range: CellRange, grid: Grid) -> AppResult<()> {
        ensure_shape(range, &grid)?;
        let mut sheets = self.sheets.write();
        let data = sheets
            .get_mut(sheet)
            .ok_or_else(|| LoggerError::SheetNotFound(sheet.to_string()))?;
        for (r, row) in grid.into_iter().enumerate() {
            for (c, value) in row.into_iter().enumerate() {
                let column = Column(range.start.column.0 + c as u32);
                store(data, range.start.row + r as u32, column.0, value);
            }
        }
        Ok(())
    }
}
