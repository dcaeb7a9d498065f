//! Configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. Environment variables prefixed with `SHEET_LOGGER_`, nested keys separated by `__`
//!
//! # Example
//! ```no_run
//! use sheet_logger::config::LoggerConfig;
//!
//! let config = LoggerConfig::load_from("config/sheet_logger.toml")?;
//! config.validate()?;
//! println!("Application: {}", config.application.name);
//! # Ok::<(), sheet_logger::error::LoggerError>(())
//! ```

use crate::acquisition::{BlockSpec, SampleLayout};
use crate::error::{AppResult, LoggerError};
use crate::instrument::{DeviceSlot, RegisterDevice};
use crate::poller::DEFAULT_STATUS_REGISTER;
use crate::replay::ReplayConfig;
use crate::retry::RetryPolicy;
use crate::strobe::StrobeMode;
use crate::writer::WriterConfig;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SHEET_LOGGER_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Serial bus settings
    pub bus: BusConfig,
    /// Polling cadence and retries
    pub poll: PollConfig,
    /// Where the workbook lives
    pub workbook: WorkbookConfig,
    /// Row layout on the inputs sheet
    pub writer: WriterConfig,
    /// Testing-sheet replay
    pub replay: ReplayConfig,
    /// Which registers make up a sample
    pub layout: LayoutConfig,
    /// Instruments on the bus
    pub devices: Vec<DeviceDefinition>,
    /// Optional strobe-driven status bit
    pub status: Option<StatusConfig>,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "sheet-logger".into(),
            log_level: "info".into(),
        }
    }
}

/// Serial bus configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Serial port path (e.g. `/dev/ttyUSB0`, `COM3`)
    pub port: String,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Per-request reply timeout
    #[serde(default = "default_bus_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".into(),
            baud_rate: default_baud_rate(),
            timeout: default_bus_timeout(),
        }
    }
}

/// Polling configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Time between samples
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub interval: Duration,
    /// Per-read retry settings
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: default_poll_interval(),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry settings for device reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per read, the first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Pause between attempts
    #[serde(default = "default_backoff", with = "humantime_serde")]
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: default_backoff(),
        }
    }
}

impl RetryConfig {
    /// Policy built from these settings.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.backoff)
    }
}

/// Workbook location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkbookConfig {
    /// Directory holding one CSV file per sheet
    pub dir: PathBuf,
}

impl Default for WorkbookConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/workbook"),
        }
    }
}

/// Built-in layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutPreset {
    /// Seven-instrument rig
    #[default]
    Ignis,
    /// Four-instrument rig with pinned status bits
    Icarus,
}

/// Layout selection: a preset, or explicit blocks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Built-in layout, used when `blocks` is empty
    pub preset: Option<LayoutPreset>,
    /// Custom block list
    pub blocks: Vec<BlockSpec>,
}

impl LayoutConfig {
    /// The layout to sample.
    pub fn layout(&self) -> SampleLayout {
        if !self.blocks.is_empty() {
            return SampleLayout::new(self.blocks.clone());
        }
        match self.preset.unwrap_or_default() {
            LayoutPreset::Ignis => SampleLayout::ignis(),
            LayoutPreset::Icarus => SampleLayout::icarus(),
        }
    }
}

/// Instrument definition in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDefinition {
    /// Slot name referenced by the layout
    pub name: String,
    /// Modbus slave address
    pub slave: u8,
    /// Whether this instrument is attached
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Strobe-driven status output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Device receiving the status bit
    pub device: String,
    /// Target register
    #[serde(default = "default_status_register")]
    pub register: u16,
    /// Schedule, e.g. `on`, `t30`, `s10,1`
    pub strobe: StrobeMode,
}

// Default value functions
fn default_baud_rate() -> u32 {
    9600
}

fn default_bus_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff() -> Duration {
    Duration::from_millis(50)
}

fn default_enabled() -> bool {
    true
}

fn default_status_register() -> u16 {
    DEFAULT_STATUS_REGISTER
}

impl LoggerConfig {
    /// Load configuration from a TOML file and environment variables
    ///
    /// Environment variables override the file, e.g. `SHEET_LOGGER_POLL__INTERVAL=250ms`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Self::figment(path).extract()?)
    }

    /// The merged provider stack.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.poll.interval.is_zero() {
            return Err(invalid("poll.interval must be greater than zero"));
        }
        if self.bus.baud_rate == 0 {
            return Err(invalid("bus.baud_rate must be greater than zero"));
        }

        if self.layout.preset.is_some() && !self.layout.blocks.is_empty() {
            return Err(invalid(
                "layout.preset and layout.blocks are mutually exclusive",
            ));
        }

        let writer = &self.writer;
        if writer.first_row == 0 || writer.first_row >= writer.row_limit {
            return Err(invalid(format!(
                "writer.first_row {} must be in 1..{}",
                writer.first_row, writer.row_limit
            )));
        }
        if writer.header_row == 0 {
            return Err(invalid("writer.header_row must be at least 1"));
        }

        let mut names = HashSet::new();
        for device in &self.devices {
            if !names.insert(device.name.as_str()) {
                return Err(invalid(format!("Duplicate device name: {}", device.name)));
            }
            if !(1..=247).contains(&device.slave) {
                return Err(invalid(format!(
                    "Device '{}' has slave address {}, must be 1-247",
                    device.name, device.slave
                )));
            }
        }

        if let Some(status) = &self.status {
            if !self.devices.iter().any(|d| d.name == status.device) {
                return Err(invalid(format!(
                    "status.device '{}' is not a configured device",
                    status.device
                )));
            }
        }

        Ok(())
    }

    /// Definition of an enabled device.
    pub fn enabled_device(&self, name: &str) -> Option<&DeviceDefinition> {
        self.devices.iter().find(|d| d.enabled && d.name == name)
    }

    /// One slot per device the layout reads from.
    ///
    /// Enabled devices are opened with `open`; disabled or unlisted ones become absent slots.
    pub fn device_slots<F>(&self, layout: &SampleLayout, mut open: F) -> AppResult<Vec<DeviceSlot>>
    where
        F: FnMut(&DeviceDefinition) -> AppResult<Arc<dyn RegisterDevice>>,
    {
        layout
            .device_names()
            .into_iter()
            .map(|name| match self.enabled_device(name) {
                Some(definition) => Ok(DeviceSlot::present(name, open(definition)?)),
                None => {
                    tracing::info!(device = name, "No enabled device, writing placeholders");
                    Ok(DeviceSlot::absent(name))
                }
            })
            .collect()
    }
}

fn invalid(message: impl Into<String>) -> LoggerError {
    LoggerError::Configuration(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::MockRegisterDevice;
    use figment::Jail;

    fn config() -> LoggerConfig {
        LoggerConfig {
            devices: vec![
                DeviceDefinition {
                    name: "ins1".into(),
                    slave: 1,
                    enabled: true,
                },
                DeviceDefinition {
                    name: "ins2".into(),
                    slave: 2,
                    enabled: false,
                },
            ],
            ..LoggerConfig::default()
        }
    }

    #[test]
    fn test_defaults_validate() {
        let config = config();
        assert!(config.validate().is_ok());
        assert_eq!(config.bus.baud_rate, 9600);
        assert_eq!(config.poll.retry.policy(), RetryPolicy::default());
        assert_eq!(config.layout.layout(), SampleLayout::ignis());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = config();
        config.application.log_level = "loud".into();
        assert!(matches!(
            config.validate(),
            Err(LoggerError::Configuration(_))
        ));
    }

    #[test]
    fn test_duplicate_devices() {
        let mut config = config();
        config.devices.push(config.devices[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_slave_range() {
        let mut config = config();
        config.devices[0].slave = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_status_device_must_exist() {
        let mut config = config();
        config.status = Some(StatusConfig {
            device: "ins9".into(),
            register: 320,
            strobe: StrobeMode::On,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_preset_and_blocks_conflict() {
        let mut config = config();
        config.layout = LayoutConfig {
            preset: Some(LayoutPreset::Icarus),
            blocks: vec![BlockSpec::registers("ins1", 0, 1)],
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_device_slots() {
        let config = config();
        let layout = SampleLayout::icarus();
        let slots = config
            .device_slots(&layout, |def| {
                Ok(Arc::new(MockRegisterDevice::new(def.name.clone())) as Arc<dyn RegisterDevice>)
            })
            .unwrap();
        let present: Vec<(&str, bool)> = slots.iter().map(|s| (s.name(), s.is_present())).collect();
        assert_eq!(
            present,
            vec![("ins2", false), ("ins3", false), ("ins4", false), ("ins1", true)]
        );
    }

    #[test]
    fn test_load_file_and_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "logger.toml",
                r#"
                [application]
                name = "bench"
                log_level = "debug"

                [bus]
                port = "COM3"
                timeout = "500ms"

                [poll]
                interval = "2s"

                [layout]
                preset = "icarus"

                [[devices]]
                name = "ins1"
                slave = 1

                [status]
                device = "ins1"
                strobe = "s10,1"
                "#,
            )?;
            jail.set_env("SHEET_LOGGER_POLL__INTERVAL", "250ms");

            let config = LoggerConfig::load_from("logger.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.application.name, "bench");
            assert_eq!(config.bus.port, "COM3");
            assert_eq!(config.bus.baud_rate, 9600);
            assert_eq!(config.bus.timeout, Duration::from_millis(500));
            assert_eq!(config.poll.interval, Duration::from_millis(250));
            assert_eq!(config.layout.layout(), SampleLayout::icarus());
            assert_eq!(config.status.as_ref().map(|s| s.register), Some(320));
            assert!(config.validate().is_ok());
            Ok(())
        });
    }

    #[test]
    fn test_bad_strobe_fails_to_load() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "logger.toml",
                r#"
                [status]
                device = "ins1"
                strobe = "blink"
                "#,
            )?;
            assert!(LoggerConfig::load_from("logger.toml").is_err());
            Ok(())
        });
    }
}
