//! Modbus RTU register devices.
//!
//! Implements the two function codes the logger needs on top of any async byte stream:
//!
//! - `0x03` read holding registers
//! - `0x06` write single register
//!
//! Frames are `[slave, function, payload.., crc_lo, crc_hi]` with CRC-16/MODBUS. Several
//! slaves share one [`ModbusBus`]; the bus mutex guarantees one request/response exchange
//! on the wire at a time. Buffered input is dropped before every request, and after a
//! timeout or malformed reply the bus stays locked until the line has been quiet for one
//! timeout, so a late reply is never taken for the answer to the next request.
//!
//! # Error mapping
//!
//! | Condition                                   | Error           |
//! |---------------------------------------------|-----------------|
//! | timeout, I/O failure, CRC mismatch          | `Communication` |
//! | reply from another slave                    | `Communication` |
//! | exception "busy"/"acknowledge"/"gateway"    | `Communication` |
//! | other exceptions, wrong function/byte count | `Decode`        |

use super::RegisterDevice;
use crate::error::{AppResult, LoggerError};
use async_trait::async_trait;
use crc::{Crc, CRC_16_MODBUS};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

const MODBUS_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

const READ_HOLDING_REGISTERS: u8 = 0x03;
const WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Largest register count a single `0x03` request may ask for.
pub const MAX_READ_REGISTERS: u16 = 125;

/// Append the CRC to `frame`, low byte first.
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = MODBUS_CRC.checksum(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Whether the trailing two bytes of `frame` are its CRC.
pub fn crc_matches(frame: &[u8]) -> bool {
    if frame.len() < 3 {
        return false;
    }
    let (body, crc) = frame.split_at(frame.len() - 2);
    MODBUS_CRC.checksum(body).to_le_bytes() == [crc[0], crc[1]]
}

/// Build a read-holding-registers request.
pub fn read_request(slave: u8, address: u16, count: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8);
    frame.push(slave);
    frame.push(READ_HOLDING_REGISTERS);
    frame.extend_from_slice(&address.to_be_bytes());
    frame.extend_from_slice(&count.to_be_bytes());
    append_crc(&mut frame);
    frame
}

/// Build a write-single-register request.
pub fn write_request(slave: u8, address: u16, value: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8);
    frame.push(slave);
    frame.push(WRITE_SINGLE_REGISTER);
    frame.extend_from_slice(&address.to_be_bytes());
    frame.extend_from_slice(&value.to_be_bytes());
    append_crc(&mut frame);
    frame
}

/// A shared serial line carrying one or more slaves.
pub struct ModbusBus<T> {
    port: Mutex<T>,
    timeout: Duration,
    name: String,
}

impl<T> ModbusBus<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an open stream. `timeout` bounds each request/response exchange.
    pub fn new(name: impl Into<String>, port: T, timeout: Duration) -> Self {
        Self {
            port: Mutex::new(port),
            timeout,
            name: name.into(),
        }
    }

    /// Bus name, usually the port path.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A device handle for `slave` on this bus.
    pub fn device(self: &Arc<Self>, label: impl Into<String>, slave: u8) -> ModbusRtuDevice<T> {
        ModbusRtuDevice {
            label: label.into(),
            slave,
            bus: Arc::clone(self),
        }
    }

    async fn exchange(&self, label: &str, request: &[u8], expected_fn: u8) -> AppResult<Vec<u8>> {
        let mut port = self.port.lock().await;

        let stale = discard_input(&mut *port, Duration::ZERO).await;
        if stale > 0 {
            tracing::debug!(bus = %self.name, device = label, bytes = stale, "Discarded stale input");
        }

        let result =
            tokio::time::timeout(self.timeout, transact(&mut *port, request, expected_fn)).await;
        let outcome: AppResult<Vec<u8>> = match result {
            Err(_) => Err(LoggerError::communication(
                label,
                format!("no response within {:?}", self.timeout),
            )),
            Ok(Err(ReplyError::Io(err))) => Err(LoggerError::communication(label, err.to_string())),
            Ok(Err(ReplyError::Frame(err))) => Err(err.into_error(label)),
            Ok(Ok(frame)) => {
                if !crc_matches(&frame) {
                    Err(LoggerError::communication(label, "CRC mismatch"))
                } else if frame[0] != request[0] {
                    Err(LoggerError::communication(
                        label,
                        format!("reply from slave {} instead of {}", frame[0], request[0]),
                    ))
                } else if frame[1] & 0x80 != 0 {
                    return Err(exception_error(label, frame[2]));
                } else {
                    return Ok(frame);
                }
            }
        };

        // The line is out of step: a late or partial reply may still be arriving. Wait for a
        // full quiet period before the next exchange may start.
        let late = discard_input(&mut *port, self.timeout).await;
        if late > 0 {
            tracing::debug!(bus = %self.name, device = label, bytes = late, "Discarded late reply");
        }
        outcome
    }
}

/// Read and drop input until nothing arrives for `quiet`. With a zero `quiet` this only takes
/// what is already buffered. Returns the number of bytes dropped.
async fn discard_input<R>(port: &mut R, quiet: Duration) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 64];
    let mut discarded = 0;
    loop {
        match tokio::time::timeout(quiet, port.read(&mut buf)).await {
            Ok(Ok(n)) if n > 0 => discarded += n,
            _ => return discarded,
        }
    }
}

#[cfg(feature = "tokio_serial")]
impl ModbusBus<tokio_serial::SerialStream> {
    /// Open a serial port as a Modbus bus (8 data bits, no parity, 1 stop bit).
    pub fn open_serial(port: &str, baud_rate: u32, timeout: Duration) -> AppResult<Arc<Self>> {
        use tokio_serial::SerialPortBuilderExt;

        let stream = tokio_serial::new(port, baud_rate)
            .timeout(timeout)
            .open_native_async()
            .map_err(|e| LoggerError::communication(port, e.to_string()))?;
        tracing::info!(port, baud_rate, "Opened Modbus serial bus");
        Ok(Arc::new(Self::new(port, stream, timeout)))
    }
}

enum ReplyError {
    Io(std::io::Error),
    Frame(FrameError),
}

impl From<std::io::Error> for ReplyError {
    fn from(value: std::io::Error) -> Self {
        ReplyError::Io(value)
    }
}

enum FrameError {
    UnexpectedFunction { expected: u8, got: u8 },
}

impl FrameError {
    fn into_error(self, label: &str) -> LoggerError {
        match self {
            FrameError::UnexpectedFunction { expected, got } => LoggerError::Decode(format!(
                "{label}: expected function 0x{expected:02X}, got 0x{got:02X}"
            )),
        }
    }
}

async fn transact<P>(port: &mut P, request: &[u8], expected_fn: u8) -> Result<Vec<u8>, ReplyError>
where
    P: AsyncRead + AsyncWrite + Unpin,
{
    port.write_all(request).await?;
    port.flush().await?;
    read_reply(port, expected_fn).await
}

/// Read one reply frame, sized from its header.
async fn read_reply<R>(port: &mut R, expected_fn: u8) -> Result<Vec<u8>, ReplyError>
where
    R: AsyncRead + Unpin,
{
    let mut frame = vec![0u8; 2];
    port.read_exact(&mut frame).await?;
    let function = frame[1];

    let remaining = if function & 0x80 != 0 {
        // exception code + crc
        3
    } else if function != expected_fn {
        return Err(ReplyError::Frame(FrameError::UnexpectedFunction {
            expected: expected_fn,
            got: function,
        }));
    } else if function == READ_HOLDING_REGISTERS {
        let byte_count = port.read_u8().await?;
        frame.push(byte_count);
        usize::from(byte_count) + 2
    } else {
        // address + value echo + crc
        6
    };

    let start = frame.len();
    frame.resize(start + remaining, 0);
    port.read_exact(&mut frame[start..]).await?;
    Ok(frame)
}

fn exception_error(label: &str, code: u8) -> LoggerError {
    let description = match code {
        0x01 => "illegal function",
        0x02 => "illegal data address",
        0x03 => "illegal data value",
        0x04 => "slave device failure",
        0x05 => "acknowledge",
        0x06 => "slave device busy",
        0x0B => "gateway target failed to respond",
        _ => "unknown exception",
    };
    let message = format!("Modbus exception 0x{code:02X} ({description})");
    match code {
        0x05 | 0x06 | 0x0B => LoggerError::communication(label, message),
        _ => LoggerError::Decode(format!("{label}: {message}")),
    }
}

/// One Modbus RTU slave on a shared bus.
pub struct ModbusRtuDevice<T> {
    label: String,
    slave: u8,
    bus: Arc<ModbusBus<T>>,
}

impl<T> ModbusRtuDevice<T> {
    /// Slave address of this device.
    pub fn slave(&self) -> u8 {
        self.slave
    }
}

#[async_trait]
impl<T> RegisterDevice for ModbusRtuDevice<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn label(&self) -> &str {
        &self.label
    }

    async fn read_registers(&self, address: u16, count: u16) -> AppResult<Vec<u16>> {
        if count == 0 || count > MAX_READ_REGISTERS {
            return Err(LoggerError::Configuration(format!(
                "cannot read {count} registers in one request (1..={MAX_READ_REGISTERS})"
            )));
        }
        let request = read_request(self.slave, address, count);
        let frame = self
            .bus
            .exchange(&self.label, &request, READ_HOLDING_REGISTERS)
            .await?;

        let byte_count = usize::from(frame[2]);
        if byte_count != usize::from(count) * 2 {
            return Err(LoggerError::Decode(format!(
                "{}: asked for {count} registers, reply carries {byte_count} bytes",
                self.label
            )));
        }
        let words = frame[3..3 + byte_count]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        tracing::trace!(device = %self.label, slave = self.slave, address, count, "Read registers");
        Ok(words)
    }

    async fn write_single(&self, address: u16, value: u16) -> AppResult<()> {
        let request = write_request(self.slave, address, value);
        let frame = self
            .bus
            .exchange(&self.label, &request, WRITE_SINGLE_REGISTER)
            .await?;
        if frame[..6] != request[..6] {
            return Err(LoggerError::Decode(format!(
                "{}: write echo does not match request",
                self.label
            )));
        }
        tracing::debug!(device = %self.label, slave = self.slave, address, value, "Wrote register");
        Ok(())
    }
}
