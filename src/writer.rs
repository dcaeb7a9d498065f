//! Row writer: one assembled sample per call, appended to the inputs sheet.
//!
//! Each successful [`RowWriter::append_sample`] produces one row laid out as
//!
//! ```text
//! A .. col(w-1)      col(w)         col(w+1) .. col(w+k)
//! sample row         sensitivity    derived lookups (mode, limit, ..)
//! ```
//!
//! where `w` is the width of the current sample. Pinned blocks land at their own columns on
//! the same row. The sensitivity value is copied from the results sheet one row above the
//! target row, in the column whose header matches the configured label.

use crate::acquisition::SampleAssembler;
use crate::cursor::{AppendCursor, DEFAULT_FIRST_ROW, DEFAULT_ROW_LIMIT};
use crate::error::{AppResult, ErrorKind, LoggerError};
use crate::sink::{names_match, CellRange, CellRef, CellValue, Column, TabularSink};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Last column searched for the sensitivity header (`ZZ`).
const HEADER_SCAN_WIDTH: u32 = 702;

/// A cell copied from another sheet into every appended row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellLookup {
    /// Source sheet, matched case-insensitively
    pub sheet: String,
    /// Source cell
    pub cell: CellRef,
}

impl CellLookup {
    /// Lookup of `sheet!cell`.
    pub fn new(sheet: impl Into<String>, cell: CellRef) -> Self {
        Self {
            sheet: sheet.into(),
            cell,
        }
    }
}

/// Where and how rows are written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Sheet receiving samples
    pub inputs_sheet: String,
    /// Sheet holding the sensitivity column
    pub results_sheet: String,
    /// Column tested for blank when looking for the next row
    pub sentinel: Column,
    /// Row of the results sheet holding column headers
    pub header_row: u32,
    /// Header label of the sensitivity column; `None` disables the sensitivity cell
    pub sensitivity_label: Option<String>,
    /// Cells appended after the sensitivity cell, in order
    pub lookups: Vec<CellLookup>,
    /// First data row of the inputs sheet
    pub first_row: u32,
    /// Exclusive row limit of the inputs sheet
    pub row_limit: u32,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            inputs_sheet: "inputs".into(),
            results_sheet: "results".into(),
            sentinel: Column::FIRST,
            header_row: 5,
            sensitivity_label: Some("sensitivity".into()),
            lookups: vec![
                // mode
                CellLookup::new("results", CellRef { column: Column(48), row: 3 }),
                // limit
                CellLookup::new("compiled data", CellRef { column: Column(101), row: 4 }),
            ],
            first_row: DEFAULT_FIRST_ROW,
            row_limit: DEFAULT_ROW_LIMIT,
        }
    }
}

impl WriterConfig {
    /// Samples only: no sensitivity cell and no lookups.
    pub fn samples_only() -> Self {
        Self {
            sensitivity_label: None,
            lookups: Vec::new(),
            ..Self::default()
        }
    }
}

/// Cached result of the sensitivity header search. When the label appears more than once,
/// the rightmost match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderLookup {
    /// Not searched yet
    #[default]
    Unresolved,
    /// Header found at this column
    Found(Column),
    /// Header row has no matching label
    Missing,
}

#[derive(Debug, Clone)]
struct Targets {
    inputs: String,
    results: Option<String>,
    lookups: Vec<(String, CellRef)>,
}

/// Appends one sample row per call.
pub struct RowWriter {
    sink: Arc<dyn TabularSink>,
    assembler: SampleAssembler,
    config: WriterConfig,
    cursor: AppendCursor,
    targets: Option<Targets>,
    sensitivity: HeaderLookup,
}

impl RowWriter {
    /// Writer over `sink`, reading samples from `assembler`.
    pub fn new(sink: Arc<dyn TabularSink>, assembler: SampleAssembler, config: WriterConfig) -> Self {
        let cursor = AppendCursor::new(config.first_row, config.row_limit);
        Self {
            sink,
            assembler,
            config,
            cursor,
            targets: None,
            sensitivity: HeaderLookup::Unresolved,
        }
    }

    /// Writer settings.
    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Append cursor state.
    pub fn cursor(&self) -> &AppendCursor {
        &self.cursor
    }

    /// Cached sensitivity header state.
    pub fn sensitivity(&self) -> HeaderLookup {
        self.sensitivity
    }

    /// The sample source.
    pub fn assembler(&self) -> &SampleAssembler {
        &self.assembler
    }

    /// Forget resolved sheet names and the sensitivity column.
    pub fn reset(&mut self) {
        self.targets = None;
        self.sensitivity = HeaderLookup::Unresolved;
    }

    /// Acquire one sample and append it.
    ///
    /// Returns `Ok(false)` when the sample could not be acquired; nothing is written and the
    /// cursor stays put.
    ///
    /// # Errors
    /// `SheetFull`, `SheetNotFound` and other sink failures.
    pub async fn append_sample(&mut self) -> AppResult<bool> {
        let targets = self.resolve().await?;
        let row = self
            .cursor
            .next_row(self.sink.as_ref(), &targets.inputs, self.config.sentinel)
            .await?;

        let sample = match self.assembler.assemble().await {
            Ok(sample) => sample,
            Err(err) if err.kind() == ErrorKind::Acquisition => {
                tracing::warn!(row, error = %err, "Sample not acquired, skipping row");
                return Ok(false);
            }
            Err(err) => return Err(err),
        };

        let width = u32::try_from(sample.width())
            .map_err(|_| LoggerError::Configuration("sample row is too wide".into()))?;
        let inputs = targets.inputs.as_str();

        self.write_span(inputs, row, Column::FIRST, sample.cells).await?;
        for block in sample.pinned {
            self.write_span(inputs, row, block.column, block.cells).await?;
        }

        let mut derived = Vec::with_capacity(targets.lookups.len());
        for (sheet, cell) in &targets.lookups {
            derived.push(self.sink.read_cell(sheet, *cell).await?);
        }
        self.write_span(inputs, row, Column(width + 1), derived).await?;

        if self.config.sensitivity_label.is_some() {
            let value = self.sensitivity_value(&targets, row).await?;
            self.write_span(inputs, row, Column(width), vec![value]).await?;
        }

        tracing::debug!(sheet = inputs, row, width, "Appended sample");
        Ok(true)
    }

    async fn write_span(
        &self,
        sheet: &str,
        row: u32,
        first: Column,
        cells: Vec<CellValue>,
    ) -> AppResult<()> {
        if cells.is_empty() {
            return Ok(());
        }
        let width = u32::try_from(cells.len())
            .map_err(|_| LoggerError::Configuration("span is too wide".into()))?;
        let range = CellRange::row_span(row, first, width)?;
        self.sink.write_range(sheet, range, vec![cells]).await
    }

    async fn sensitivity_value(&self, targets: &Targets, row: u32) -> AppResult<CellValue> {
        let (HeaderLookup::Found(column), Some(results)) = (self.sensitivity, &targets.results)
        else {
            return Ok(CellValue::Empty);
        };
        if row <= 1 {
            return Ok(CellValue::Empty);
        }
        self.sink
            .read_cell(results, CellRef::new(column, row - 1)?)
            .await
    }

    async fn resolve(&mut self) -> AppResult<Targets> {
        if let Some(targets) = &self.targets {
            return Ok(targets.clone());
        }

        let inputs = self.sink.require_sheet(&self.config.inputs_sheet).await?;
        let mut lookups = Vec::with_capacity(self.config.lookups.len());
        for lookup in &self.config.lookups {
            lookups.push((self.sink.require_sheet(&lookup.sheet).await?, lookup.cell));
        }

        let results = match &self.config.sensitivity_label {
            Some(label) => {
                let results = self.sink.require_sheet(&self.config.results_sheet).await?;
                self.sensitivity = self.find_header(&results, label).await?;
                Some(results)
            }
            None => None,
        };

        let targets = Targets {
            inputs,
            results,
            lookups,
        };
        tracing::info!(
            inputs = %targets.inputs,
            sensitivity = ?self.sensitivity,
            lookups = targets.lookups.len(),
            "Resolved target sheets"
        );
        self.targets = Some(targets.clone());
        Ok(targets)
    }

    async fn find_header(&self, results: &str, label: &str) -> AppResult<HeaderLookup> {
        let range = CellRange::row_span(self.config.header_row, Column::FIRST, HEADER_SCAN_WIDTH)?;
        let grid = self.sink.read_range(results, range).await?;
        let found = grid
            .first()
            .and_then(|row| row.iter().rposition(|cell| names_match(&cell.to_string(), label)));
        match found {
            Some(index) => Ok(HeaderLookup::Found(Column(index as u32))),
            None => {
                tracing::warn!(
                    sheet = results,
                    row = self.config.header_row,
                    label,
                    "Sensitivity header not found, column will be left empty"
                );
                Ok(HeaderLookup::Missing)
            }
        }
    }
}
