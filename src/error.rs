//! Custom error types for the logger.
//!
//! This module defines the primary error type, `LoggerError`, shared by every layer of the
//! crate. Using the `thiserror` crate, it gives a single place to classify what went wrong,
//! from a noisy serial line to a range write whose shape does not match its bounds.
//!
//! ## Error Hierarchy
//!
//! - **`Communication`**: A transient device I/O fault (timeout, CRC mismatch, line error).
//!   These are the only errors the acquisition retry policy retries by default.
//! - **`Decode`**: A device answered, but the payload is malformed. Usually a firmware defect,
//!   so retrying does not help.
//! - **`Acquisition`**: Wraps the first unrecoverable read of a sample. The whole sample row is
//!   discarded when this happens.
//! - **`SheetFull`**, **`ShapeMismatch`**, **`SheetNotFound`**, **`InvalidAddress`**: Sink
//!   addressing problems. They abort the current append.
//! - **`Config`** / **`Configuration`**: Parse errors from `figment` and semantic validation
//!   errors respectively.
//! - **`FeatureNotEnabled`**: Functionality that was left out at compile time.
//!
//! `ErrorKind` is a fieldless mirror of the variants, used by `retry::ErrorFilter` to decide
//! which failures are worth another attempt.

use thiserror::Error;

/// Convenience alias for results using the logger error type.
pub type AppResult<T> = std::result::Result<T, LoggerError>;

/// Primary error type for the logger.
#[derive(Error, Debug)]
pub enum LoggerError {
    /// Transient device I/O failure.
    #[error("Communication error with {device}: {message}")]
    Communication {
        /// Device label
        device: String,
        /// What failed on the line
        message: String,
    },

    /// Malformed payload from a device.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A present device's read plan failed after retries.
    #[error("Acquisition failed on {device}: {source}")]
    Acquisition {
        /// Device label
        device: String,
        /// The read error that ended the attempt
        #[source]
        source: Box<LoggerError>,
    },

    /// The append cursor reached its row limit.
    #[error("Sheet '{sheet}' is full: no blank row below {limit}")]
    SheetFull {
        /// Sheet name
        sheet: String,
        /// Exclusive row limit of the scan
        limit: u32,
    },

    /// A grid did not match the bounds of the range it was written to.
    #[error("Shape mismatch writing {range}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Target range in A1 notation
        range: String,
        /// (rows, columns) of the range
        expected: (usize, usize),
        /// (rows, columns) of the supplied grid
        actual: (usize, usize),
    },

    /// No sheet matched the requested name.
    #[error("Sheet not found: {0}")]
    SheetNotFound(String),

    /// A cell or range reference could not be parsed.
    #[error("Invalid cell address: {0}")]
    InvalidAddress(String),

    /// Configuration parse error.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration validation error.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File or port I/O.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding or decoding.
    #[cfg(feature = "storage_csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Functionality compiled out.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

/// Fieldless classification of [`LoggerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [`LoggerError::Communication`]
    Communication,
    /// See [`LoggerError::Decode`]
    Decode,
    /// See [`LoggerError::Acquisition`]
    Acquisition,
    /// See [`LoggerError::SheetFull`]
    SheetFull,
    /// See [`LoggerError::ShapeMismatch`]
    ShapeMismatch,
    /// See [`LoggerError::SheetNotFound`]
    SheetNotFound,
    /// See [`LoggerError::InvalidAddress`]
    InvalidAddress,
    /// Parse or validation errors
    Configuration,
    /// File, port or CSV I/O
    Io,
    /// See [`LoggerError::FeatureNotEnabled`]
    FeatureNotEnabled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Communication => "communication",
            ErrorKind::Decode => "decode",
            ErrorKind::Acquisition => "acquisition",
            ErrorKind::SheetFull => "sheet_full",
            ErrorKind::ShapeMismatch => "shape_mismatch",
            ErrorKind::SheetNotFound => "sheet_not_found",
            ErrorKind::InvalidAddress => "invalid_address",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Io => "io",
            ErrorKind::FeatureNotEnabled => "feature_not_enabled",
        };
        write!(f, "{}", label)
    }
}

impl LoggerError {
    /// Shorthand for a [`LoggerError::Communication`].
    pub fn communication(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Communication {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoggerError::Communication { .. } => ErrorKind::Communication,
            LoggerError::Decode(_) => ErrorKind::Decode,
            LoggerError::Acquisition { .. } => ErrorKind::Acquisition,
            LoggerError::SheetFull { .. } => ErrorKind::SheetFull,
            LoggerError::ShapeMismatch { .. } => ErrorKind::ShapeMismatch,
            LoggerError::SheetNotFound(_) => ErrorKind::SheetNotFound,
            LoggerError::InvalidAddress(_) => ErrorKind::InvalidAddress,
            LoggerError::Config(_) | LoggerError::Configuration(_) => ErrorKind::Configuration,
            LoggerError::Io(_) => ErrorKind::Io,
            #[cfg(feature = "storage_csv")]
            LoggerError::Csv(_) => ErrorKind::Io,
            LoggerError::FeatureNotEnabled(_) => ErrorKind::FeatureNotEnabled,
        }
    }

    /// Whether the polling loop can simply try again on the next tick.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Communication | ErrorKind::Decode | ErrorKind::Acquisition
        )
    }
}

impl From<figment::Error> for LoggerError {
    fn from(value: figment::Error) -> Self {
        LoggerError::Config(Box::new(value))
    }
}
