//! CSV-directory workbook: one `<sheet>.csv` file per sheet.
use super::{names_match, CellRange, Grid, MemoryWorkbook, TabularSink};
use crate::error::{AppResult, LoggerError};
use async_trait::async_trait;
use std::fs::File;
use std::path::{Path, PathBuf};

/// A workbook persisted as CSV files in a directory.
///
/// Sheets are loaded into memory on open. Every range write rewrites the touched sheet's file,
/// so the directory always reflects the last completed write.
pub struct CsvWorkbook {
    dir: PathBuf,
    book: MemoryWorkbook,
}

impl CsvWorkbook {
    /// Open `dir`, creating it if needed, and load every `*.csv` in it as a sheet.
    pub fn open(dir: impl AsRef<Path>) -> AppResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }
        let book = MemoryWorkbook::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            book.load_sheet(name, read_sheet(&path)?);
            tracing::debug!(sheet = name, path = %path.display(), "Loaded CSV sheet");
        }
        tracing::info!(dir = %dir.display(), sheets = book.sheet_names().len(), "CSV workbook opened");
        Ok(Self { dir, book })
    }

    /// Create an empty sheet file unless a sheet with that name (in any case) already exists.
    pub fn ensure_sheet(&self, name: &str) -> AppResult<()> {
        if self.book.sheet_names().iter().any(|s| names_match(s, name)) {
            return Ok(());
        }
        self.book.add_sheet(name);
        self.persist(name)
    }

    /// Directory backing this workbook.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn sheet_path(&self, sheet: &str) -> PathBuf {
        self.dir.join(format!("{sheet}.csv"))
    }

    fn persist(&self, sheet: &str) -> AppResult<()> {
        let rows = self.book.sheet_rows(sheet)?;
        let file = File::create(self.sheet_path(sheet))?;
        let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(file);
        for row in rows {
            writer.write_record(row.iter().map(ToString::to_string))?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn read_sheet(path: &Path) -> AppResult<Grid> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut rows = Grid::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(super::CellValue::parse_text).collect());
    }
    Ok(rows)
}

#[async_trait]
impl TabularSink for CsvWorkbook {
    async fn find_sheet(&self, name: &str) -> AppResult<Option<String>> {
        self.book.find_sheet(name).await
    }

    async fn read_range(&self, sheet: &str, range: CellRange) -> AppResult<Grid> {
        self.book.read_range(sheet, range).await
    }

    async fn write_range(&self, sheet: &str, range: CellRange, grid: Grid) -> AppResult<()> {
        self.book.write_range(sheet, range, grid).await?;
        self.persist(sheet).map_err(|e| match e {
            LoggerError::Io(io) => LoggerError::Io(std::io::Error::new(
                io.kind(),
                format!("failed to persist sheet '{sheet}': {io}"),
            )),
            other => other,
        })
    }
}
