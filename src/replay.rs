//! Replays recorded rows from a testing sheet into the inputs sheet.
//!
//! Lets downstream formulas be exercised without instruments attached: each call copies the
//! testing sheet's row at the inputs sheet's next free row into that same row.

use crate::cursor::AppendCursor;
use crate::error::AppResult;
use crate::sink::{CellRange, CellRef, Column, TabularSink};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Replay settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Sheet rows are copied from
    pub testing_sheet: String,
    /// Sheet rows are copied to
    pub inputs_sheet: String,
    /// Last copied column
    pub last_column: Column,
    /// Column tested for blank on the inputs sheet
    pub sentinel: Column,
    /// First data row
    pub first_row: u32,
    /// Exclusive row limit
    pub row_limit: u32,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            testing_sheet: "testing".into(),
            inputs_sheet: "inputs".into(),
            // CC
            last_column: Column(80),
            sentinel: Column::FIRST,
            first_row: crate::cursor::DEFAULT_FIRST_ROW,
            row_limit: crate::cursor::DEFAULT_ROW_LIMIT,
        }
    }
}

/// Copies one testing row per call.
pub struct ReplayWriter {
    sink: Arc<dyn TabularSink>,
    config: ReplayConfig,
    cursor: AppendCursor,
}

impl ReplayWriter {
    /// Replay from `config.testing_sheet` into `config.inputs_sheet`.
    pub fn new(sink: Arc<dyn TabularSink>, config: ReplayConfig) -> Self {
        let cursor = AppendCursor::new(config.first_row, config.row_limit);
        Self {
            sink,
            config,
            cursor,
        }
    }

    /// Append cursor state.
    pub fn cursor(&self) -> &AppendCursor {
        &self.cursor
    }

    /// Copy the next row, returning its number.
    ///
    /// # Errors
    /// `SheetFull` on the inputs sheet, `SheetNotFound` for either sheet.
    pub async fn copy_next(&mut self) -> AppResult<u32> {
        let inputs = self.sink.require_sheet(&self.config.inputs_sheet).await?;
        let testing = self.sink.require_sheet(&self.config.testing_sheet).await?;
        let row = self
            .cursor
            .next_row(self.sink.as_ref(), &inputs, self.config.sentinel)
            .await?;
        let range = CellRange::new(
            CellRef::new(Column::FIRST, row)?,
            CellRef::new(self.config.last_column, row)?,
        )?;
        let grid = self.sink.read_range(&testing, range).await?;
        self.sink.write_range(&inputs, range, grid).await?;
        tracing::debug!(row, %range, "Replayed testing row");
        Ok(row)
    }
}
