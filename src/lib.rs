//! # Sheet Logger Core Library
//!
//! Polls register-based instruments over a serial bus and appends one decoded sample row
//! per tick to an append-only tabular log (a workbook of named sheets).
//!
//! ## Crate Structure
//!
//! - **`bits`**: text/bit/integer conversions used to decode packed status words.
//! - **`instrument`**: the `RegisterDevice` trait, Modbus RTU and mock implementations.
//! - **`retry`**: bounded, filtered retry for device operations.
//! - **`acquisition`**: declarative sample layouts and the `SampleAssembler`.
//! - **`sink`**: A1 addressing, the `TabularSink` trait, in-memory and CSV workbooks.
//! - **`cursor`**: finding the next free row of an append-only sheet.
//! - **`writer`**: `RowWriter`, which turns samples into rows with derived columns.
//! - **`replay`**: copies recorded rows from a testing sheet, for dry runs.
//! - **`strobe`**: on/off schedules for a status output bit.
//! - **`poller`**: the fixed-interval loop driving the writer.
//! - **`app`**: wiring a configuration into a ready `Poller`.
//! - **`config`** / **`logging`**: Figment configuration and tracing setup.
//! - **`error`**: the `LoggerError` enum shared by everything above.

pub mod acquisition;
pub mod app;
pub mod bits;
pub mod config;
pub mod cursor;
pub mod error;
pub mod instrument;
pub mod logging;
pub mod poller;
pub mod replay;
pub mod retry;
pub mod sink;
pub mod strobe;
pub mod writer;

pub use error::{AppResult, LoggerError};
