//! CLI entry point for sheet-logger
//!
//! ```bash
//! # poll instruments into the workbook until Ctrl+C
//! sheet-logger run --config config/sheet_logger.toml
//!
//! # same, with simulated instruments
//! sheet-logger run --config config/sheet_logger.toml --simulate
//!
//! # write one register (hex, octal, binary, decimal or a bit list)
//! sheet-logger write --port /dev/ttyUSB0 --slave 1 --register 320 1,0,1
//!
//! # copy 10 recorded rows from the testing sheet
//! sheet-logger replay --config config/sheet_logger.toml --rows 10
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sheet_logger::config::{DeviceDefinition, LoggerConfig};
use sheet_logger::instrument::{parse_register_value, MockRegisterDevice, RegisterDevice};
use sheet_logger::logging::{self, OutputFormat, TracingConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "sheet-logger")]
#[command(about = "Polls register instruments and appends sample rows to a workbook", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Pretty, global = true)]
    log_format: OutputFormat,

    /// Disable coloured log output
    #[arg(long, global = true)]
    no_color: bool,

    /// Include source file and line in log events
    #[arg(long, global = true)]
    log_locations: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll instruments and append rows until interrupted
    Run {
        /// Configuration file
        #[arg(long)]
        config: PathBuf,

        /// Use simulated instruments instead of the serial bus
        #[arg(long)]
        simulate: bool,
    },

    /// Write a single register
    Write {
        /// Serial port
        #[arg(long)]
        port: String,

        /// Modbus slave address
        #[arg(long)]
        slave: u8,

        /// Register address
        #[arg(long)]
        register: u16,

        /// Value: 320, 0x140, 0b101, 12.7 or a bit list like 1,0,1
        value: String,

        /// Baud rate
        #[arg(long, default_value_t = 9600)]
        baud_rate: u32,
    },

    /// Copy recorded rows from the testing sheet into the inputs sheet
    Replay {
        /// Configuration file
        #[arg(long)]
        config: PathBuf,

        /// Number of rows to copy
        #[arg(long, default_value_t = 1)]
        rows: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_setup = TracingConfig::default()
        .with_format(cli.log_format)
        .with_ansi(!cli.no_color)
        .with_locations(cli.log_locations);

    match cli.command {
        Commands::Run { config, simulate } => run(config, simulate, log_setup).await,
        Commands::Write {
            port,
            slave,
            register,
            value,
            baud_rate,
        } => {
            logging::init(log_setup)?;
            write_register(&port, baud_rate, slave, register, &value).await
        }
        Commands::Replay { config, rows } => replay(config, rows, log_setup).await,
    }
}

/// Load and validate the config, then start logging at its level.
fn load_config(path: &Path, log_setup: TracingConfig) -> Result<LoggerConfig> {
    let config = LoggerConfig::load_from(path)
        .with_context(|| format!("loading {}", path.display()))?;
    config.validate()?;
    let level = TracingConfig::from_logger_config(&config)?.level;
    logging::init(TracingConfig { level, ..log_setup })?;
    Ok(config)
}

#[cfg(feature = "storage_csv")]
fn open_workbook(config: &LoggerConfig, create: &[&str]) -> Result<Arc<sheet_logger::sink::CsvWorkbook>> {
    let workbook = sheet_logger::sink::CsvWorkbook::open(&config.workbook.dir)?;
    for sheet in create {
        workbook.ensure_sheet(sheet)?;
    }
    Ok(Arc::new(workbook))
}

#[cfg(not(feature = "storage_csv"))]
fn open_workbook(_config: &LoggerConfig, _create: &[&str]) -> Result<Arc<sheet_logger::sink::MemoryWorkbook>> {
    Err(sheet_logger::LoggerError::FeatureNotEnabled("storage_csv".into()).into())
}

async fn run(path: PathBuf, simulate: bool, log_setup: TracingConfig) -> Result<()> {
    let config = load_config(&path, log_setup)?;

    let mut create = vec![config.writer.inputs_sheet.as_str()];
    if simulate {
        // A simulated run should work against an empty directory.
        create.push(config.writer.results_sheet.as_str());
        create.extend(config.writer.lookups.iter().map(|l| l.sheet.as_str()));
    }
    let workbook = open_workbook(&config, &create)?;

    let mut poller = if simulate {
        tracing::info!("Using simulated instruments");
        sheet_logger::app::build_poller(&config, workbook, simulated_device)?
    } else {
        let opener = serial_opener(&config)?;
        sheet_logger::app::build_poller(&config, workbook, opener)?
    };

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };
    let stats = poller.run_until(shutdown).await?;
    tracing::info!(written = stats.written, skipped = stats.skipped, "Done");
    Ok(())
}

fn simulated_device(definition: &DeviceDefinition) -> sheet_logger::AppResult<Arc<dyn RegisterDevice>> {
    let device = MockRegisterDevice::new(definition.name.clone()).with_drift();
    device.set_registers(512, &[u16::from(definition.slave) * 100; 16]);
    device.set_registers(1, &[u16::from(definition.slave) * 10; 8]);
    device.set_string(320, "\u{0}\u{5}")?;
    Ok(Arc::new(device))
}

#[cfg(feature = "tokio_serial")]
fn serial_opener(
    config: &LoggerConfig,
) -> Result<impl FnMut(&DeviceDefinition) -> sheet_logger::AppResult<Arc<dyn RegisterDevice>>> {
    use sheet_logger::instrument::ModbusBus;

    let bus = ModbusBus::open_serial(&config.bus.port, config.bus.baud_rate, config.bus.timeout)?;
    Ok(
        move |definition: &DeviceDefinition| -> sheet_logger::AppResult<Arc<dyn RegisterDevice>> {
            Ok(Arc::new(bus.device(definition.name.clone(), definition.slave)))
        },
    )
}

#[cfg(not(feature = "tokio_serial"))]
fn serial_opener(
    _config: &LoggerConfig,
) -> Result<fn(&DeviceDefinition) -> sheet_logger::AppResult<Arc<dyn RegisterDevice>>> {
    Err(sheet_logger::LoggerError::FeatureNotEnabled(
        "tokio_serial (rebuild with --features tokio_serial, or pass --simulate)".into(),
    )
    .into())
}

#[cfg(feature = "tokio_serial")]
async fn write_register(port: &str, baud_rate: u32, slave: u8, register: u16, value: &str) -> Result<()> {
    use sheet_logger::instrument::ModbusBus;

    let value = parse_register_value(value)?;
    let bus = ModbusBus::open_serial(port, baud_rate, std::time::Duration::from_secs(1))?;
    let device = bus.device(format!("slave {slave}"), slave);
    let word = value.pack()?;
    device.write_single(register, word).await?;
    tracing::info!(port, slave, register, value = word, "Register written");
    Ok(())
}

#[cfg(not(feature = "tokio_serial"))]
async fn write_register(_port: &str, _baud_rate: u32, _slave: u8, _register: u16, value: &str) -> Result<()> {
    // Validate the value first so typos are reported even without serial support.
    parse_register_value(value)?;
    Err(sheet_logger::LoggerError::FeatureNotEnabled("tokio_serial".into()).into())
}

async fn replay(path: PathBuf, rows: u32, log_setup: TracingConfig) -> Result<()> {
    let config = load_config(&path, log_setup)?;
    let workbook = open_workbook(&config, &[])?;
    let mut replay = sheet_logger::replay::ReplayWriter::new(workbook, config.replay.clone());
    for _ in 0..rows {
        let row = replay.copy_next().await?;
        tracing::info!(row, "Replayed row");
    }
    Ok(())
}
