//! Tracing setup.
//!
//! One `fmt` layer in the selected [`OutputFormat`], filtered by `RUST_LOG` when it is set and
//! by the configured level otherwise. [`init`] may be called more than once; later calls keep
//! the subscriber that is already installed.
//!
//! ```no_run
//! use sheet_logger::{config::LoggerConfig, logging::{self, OutputFormat, TracingConfig}};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LoggerConfig::load_from("config/sheet_logger.toml")?;
//! logging::init(TracingConfig::from_logger_config(&config)?.with_format(OutputFormat::Json))?;
//! tracing::info!("Logger started");
//! # Ok(())
//! # }
//! ```

use crate::config::LoggerConfig;
use crate::error::{AppResult, LoggerError};
use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError, EnvFilter, Layer,
    Registry,
};

/// Log line layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Multi-line, coloured (interactive use)
    #[default]
    Pretty,
    /// One line per event (services)
    Compact,
    /// JSON lines (log shipping)
    Json,
}

/// How the global subscriber is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    /// Level used when `RUST_LOG` is unset
    pub level: Level,
    /// Output layout
    pub format: OutputFormat,
    /// ANSI colours for the pretty and compact layouts
    pub ansi: bool,
    /// Source file and line on every event
    pub locations: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            ansi: true,
            locations: false,
        }
    }
}

impl TracingConfig {
    /// Level taken from `[application] log_level`.
    pub fn from_logger_config(config: &LoggerConfig) -> AppResult<Self> {
        Ok(Self {
            level: parse_log_level(&config.application.log_level)?,
            ..Self::default()
        })
    }

    /// Set the output layout.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable colours.
    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    /// Enable or disable source locations.
    pub fn with_locations(mut self, locations: bool) -> Self {
        self.locations = locations;
        self
    }

    fn layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let base = fmt::layer()
            .with_file(self.locations)
            .with_line_number(self.locations);
        match self.format {
            OutputFormat::Pretty => base.pretty().with_ansi(self.ansi).boxed(),
            OutputFormat::Compact => base.compact().with_ansi(self.ansi).boxed(),
            OutputFormat::Json => base.json().with_ansi(false).boxed(),
        }
    }
}

/// Install the global subscriber.
///
/// Returns `Ok(())` if one is already installed.
pub fn init(config: TracingConfig) -> AppResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));
    let result = tracing_subscriber::registry()
        .with(config.layer())
        .with(filter)
        .try_init();
    tolerate_reinit(result)
}

fn tolerate_reinit(result: Result<(), TryInitError>) -> AppResult<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("already been set") => Ok(()),
        Err(e) => Err(LoggerError::Configuration(format!(
            "cannot install tracing subscriber: {e}"
        ))),
    }
}

/// Parse `trace`, `debug`, `info`, `warn` or `error`, ignoring case.
pub fn parse_log_level(level: &str) -> AppResult<Level> {
    match level.trim().to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(LoggerError::Configuration(format!(
            "invalid log level '{level}', expected trace, debug, info, warn or error"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_levels() {
        assert_eq!(parse_log_level(" Debug ").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("warn").unwrap(), Level::WARN);
        assert!(matches!(
            parse_log_level("verbose"),
            Err(LoggerError::Configuration(_))
        ));
    }

    #[test]
    fn level_comes_from_application_section() {
        let mut config = LoggerConfig::default();
        config.application.log_level = "error".into();
        let tracing = TracingConfig::from_logger_config(&config)
            .unwrap()
            .with_format(OutputFormat::Compact)
            .with_ansi(false)
            .with_locations(true);
        assert_eq!(
            tracing,
            TracingConfig {
                level: Level::ERROR,
                format: OutputFormat::Compact,
                ansi: false,
                locations: true,
            }
        );
    }
}
