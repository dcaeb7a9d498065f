//! Time-based on/off schedules for a status output bit.
//!
//! | Input | Meaning |
//! |---|---|
//! | `on`, `true`, non-zero number | always on |
//! | `off`, `false`, `0` | always off |
//! | `t<width>` | on for `width` seconds after the schedule starts |
//! | `s<period>,<width>` | on for the first `width` seconds of every `period` |
//!
//! Input is trimmed and case-insensitive. A zero period is raised to 50 ms.
//!
//! Square waves are phased to the Unix epoch, so `s60,10` is on during the first ten seconds
//! of every wall-clock minute on every host. Pulses count from when the [`Strobe`] starts.

use crate::error::{AppResult, LoggerError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Smallest period of a square wave.
pub const MIN_PERIOD: Duration = Duration::from_millis(50);

/// Shape of a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StrobeMode {
    /// Always on
    On,
    /// Always off
    Off,
    /// On for `width` after start
    Pulse {
        /// On time
        width: Duration,
    },
    /// Repeating on/off
    Square {
        /// Cycle length
        period: Duration,
        /// On time at the start of each cycle
        width: Duration,
    },
}

impl StrobeMode {
    /// Whether the output is on at `elapsed`: time since start for a pulse, time since the
    /// Unix epoch for a square wave.
    pub fn is_on_at(&self, elapsed: Duration) -> bool {
        match *self {
            StrobeMode::On => true,
            StrobeMode::Off => false,
            StrobeMode::Pulse { width } => elapsed < width,
            StrobeMode::Square { period, width } => {
                let phase = elapsed.as_nanos() % period.as_nanos().max(1);
                phase < width.as_nanos()
            }
        }
    }
}

fn seconds(raw: &str, input: &str) -> AppResult<Duration> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| invalid(input))?;
    Duration::try_from_secs_f64(value).map_err(|_| invalid(input))
}

fn invalid(input: &str) -> LoggerError {
    LoggerError::Configuration(format!(
        "invalid strobe '{input}', expected on, off, t<width> or s<period>,<width>"
    ))
}

impl FromStr for StrobeMode {
    type Err = LoggerError;

    fn from_str(input: &str) -> AppResult<Self> {
        let schedule = input.trim().to_lowercase();
        match schedule.as_str() {
            "on" | "true" => return Ok(StrobeMode::On),
            "off" | "false" => return Ok(StrobeMode::Off),
            _ => {}
        }
        if let Ok(number) = schedule.parse::<f64>() {
            return Ok(if number != 0.0 {
                StrobeMode::On
            } else {
                StrobeMode::Off
            });
        }
        if let Some(width) = schedule.strip_prefix('t') {
            return Ok(StrobeMode::Pulse {
                width: seconds(width, input)?,
            });
        }
        if let Some(rest) = schedule.strip_prefix('s') {
            let (period, width) = rest.split_once(',').ok_or_else(|| invalid(input))?;
            let mut period = seconds(period, input)?;
            if period.is_zero() {
                period = MIN_PERIOD;
            }
            return Ok(StrobeMode::Square {
                period,
                width: seconds(width, input)?,
            });
        }
        Err(invalid(input))
    }
}

impl TryFrom<String> for StrobeMode {
    type Error = LoggerError;

    fn try_from(value: String) -> AppResult<Self> {
        value.parse()
    }
}

impl fmt::Display for StrobeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrobeMode::On => f.write_str("on"),
            StrobeMode::Off => f.write_str("off"),
            StrobeMode::Pulse { width } => write!(f, "t{}", width.as_secs_f64()),
            StrobeMode::Square { period, width } => {
                write!(f, "s{},{}", period.as_secs_f64(), width.as_secs_f64())
            }
        }
    }
}

impl From<StrobeMode> for String {
    fn from(value: StrobeMode) -> Self {
        value.to_string()
    }
}

/// A running schedule.
#[derive(Debug, Clone, Copy)]
pub struct Strobe {
    mode: StrobeMode,
    started: Instant,
}

impl Strobe {
    /// Start `mode` now.
    pub fn new(mode: StrobeMode) -> Self {
        Self {
            mode,
            started: Instant::now(),
        }
    }

    /// Parse and start a schedule.
    pub fn parse(schedule: &str) -> AppResult<Self> {
        Ok(Self::new(schedule.parse()?))
    }

    /// Schedule shape.
    pub fn mode(&self) -> StrobeMode {
        self.mode
    }

    /// See [`StrobeMode::is_on_at`].
    pub fn is_on_at(&self, elapsed: Duration) -> bool {
        self.mode.is_on_at(elapsed)
    }

    /// Whether the output is on right now.
    pub fn is_on(&self) -> bool {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        self.is_on_at(self.clock(since_epoch))
    }

    fn clock(&self, since_epoch: Duration) -> Duration {
        match self.mode {
            StrobeMode::Square { .. } => since_epoch,
            _ => self.started.elapsed(),
        }
    }
}
