//! Register-oriented instruments.
//!
//! Every instrument the logger polls looks the same from above: a bank of 16-bit registers
//! that can be read in blocks, a packed text field stored across registers, and a register
//! that accepts status/command writes. [`RegisterDevice`] captures exactly that.
//!
//! - [`modbus::ModbusRtuDevice`] talks Modbus RTU over any async byte stream
//! - [`mock::MockRegisterDevice`] serves scripted values and injected faults for tests and
//!   the `--simulate` mode of the binary
//!
//! # Thread Safety
//! All methods take `&self`; implementations use interior mutability. Several devices usually
//! share one RS-485 bus, which the Modbus implementation serializes with a mutex.

pub mod mock;
pub mod modbus;

pub use mock::MockRegisterDevice;
pub use modbus::{ModbusBus, ModbusRtuDevice};

use crate::bits;
use crate::error::{AppResult, LoggerError};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Value accepted by [`RegisterDevice::write_register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterValue {
    /// Raw register value
    Scalar(u16),
    /// Bit pattern, least significant bit first
    Bits(Vec<bool>),
}

impl RegisterValue {
    /// The register word this value packs into.
    ///
    /// Bit patterns are reversed before packing, so `bits[0]` lands in bit 0 of the register.
    pub fn pack(&self) -> AppResult<u16> {
        match self {
            RegisterValue::Scalar(v) => Ok(*v),
            RegisterValue::Bits(pattern) => {
                if pattern.len() > 16 {
                    return Err(LoggerError::Configuration(format!(
                        "bit pattern of {} bits does not fit in one register",
                        pattern.len()
                    )));
                }
                let msb_first: Vec<bool> = pattern.iter().rev().copied().collect();
                let word = bits::bits_to_uint(&msb_first)?;
                u16::try_from(word).map_err(|_| {
                    LoggerError::Configuration(format!("{word} does not fit in a register"))
                })
            }
        }
    }
}

impl From<u16> for RegisterValue {
    fn from(value: u16) -> Self {
        RegisterValue::Scalar(value)
    }
}

impl From<Vec<bool>> for RegisterValue {
    fn from(value: Vec<bool>) -> Self {
        RegisterValue::Bits(value)
    }
}

impl FromStr for RegisterValue {
    type Err = LoggerError;

    fn from_str(s: &str) -> AppResult<Self> {
        parse_register_value(s)
    }
}

/// Parse a register value typed by a person.
///
/// - `"1,0,1"`: bit list, least significant first
/// - `"0x140"`, `"0o17"`, `"0b101"`: integer with radix prefix
/// - `"12.7"`: decimal, truncated toward zero
/// - `"320"`: plain integer
pub fn parse_register_value(input: &str) -> AppResult<RegisterValue> {
    let text = input.trim();
    let invalid = || LoggerError::Configuration(format!("invalid register value '{input}'"));

    if text.contains(',') {
        let bits = text
            .split(',')
            .map(|item| match item.trim() {
                "1" => Ok(true),
                "0" => Ok(false),
                _ => Err(invalid()),
            })
            .collect::<AppResult<Vec<bool>>>()?;
        return Ok(RegisterValue::Bits(bits));
    }

    let lower = text.to_ascii_lowercase();
    let radix = [("0x", 16), ("0o", 8), ("0b", 2)]
        .into_iter()
        .find_map(|(prefix, radix)| lower.strip_prefix(prefix).map(|digits| (digits, radix)));
    let value: i128 = match radix {
        Some((digits, radix)) => i128::from_str_radix(digits, radix).map_err(|_| invalid())?,
        None if lower.contains('.') => {
            let float: f64 = lower.parse().map_err(|_| invalid())?;
            if !float.is_finite() {
                return Err(invalid());
            }
            float.trunc() as i128
        }
        None => lower.parse().map_err(|_| invalid())?,
    };
    u16::try_from(value)
        .map(RegisterValue::Scalar)
        .map_err(|_| LoggerError::Configuration(format!("{input} does not fit in a register")))
}

/// An addressable register device.
#[async_trait]
pub trait RegisterDevice: Send + Sync {
    /// Name used in logs and errors.
    fn label(&self) -> &str;

    /// Read `count` consecutive registers starting at `address`.
    ///
    /// # Errors
    /// `Communication` on timeout or line faults, `Decode` on malformed replies.
    async fn read_registers(&self, address: u16, count: u16) -> AppResult<Vec<u16>>;

    /// Write one register, propagating failures.
    async fn write_single(&self, address: u16, value: u16) -> AppResult<()>;

    /// Read text stored two characters per register, high byte first.
    async fn read_packed_string(&self, address: u16, registers: u16) -> AppResult<String> {
        let words = self.read_registers(address, registers).await?;
        bits::bits_to_text(&bits::registers_to_bits(&words))
    }

    /// Write one register, reporting success as a boolean.
    ///
    /// Failures are logged and swallowed so that a batch of writes can continue past one
    /// bad device.
    async fn write_register(&self, address: u16, value: RegisterValue) -> bool {
        let word = match value.pack() {
            Ok(word) => word,
            Err(err) => {
                tracing::warn!(device = self.label(), address, error = %err, "Rejected register value");
                return false;
            }
        };
        match self.write_single(address, word).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(device = self.label(), address, value = word, error = %err, "Register write failed");
                false
            }
        }
    }
}

/// One instrument position in the sample layout.
#[derive(Clone)]
pub struct DeviceSlot {
    name: String,
    device: Option<Arc<dyn RegisterDevice>>,
}

impl DeviceSlot {
    /// A slot bound to a live device.
    pub fn present(name: impl Into<String>, device: Arc<dyn RegisterDevice>) -> Self {
        Self {
            name: name.into(),
            device: Some(device),
        }
    }

    /// A slot with nothing attached; its blocks become placeholders.
    pub fn absent(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device: None,
        }
    }

    /// Slot name as used by block specs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The bound device, if any.
    pub fn device(&self) -> Option<&Arc<dyn RegisterDevice>> {
        self.device.as_ref()
    }

    /// Whether a device is attached.
    pub fn is_present(&self) -> bool {
        self.device.is_some()
    }
}

impl fmt::Debug for DeviceSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSlot")
            .field("name", &self.name)
            .field("device", &self.device.as_ref().map(|d| d.label().to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_patterns_pack_lsb_first() {
        assert_eq!(RegisterValue::Bits(vec![true]).pack().unwrap(), 1);
        assert_eq!(
            RegisterValue::Bits(vec![false, true, true]).pack().unwrap(),
            6
        );
        assert_eq!(RegisterValue::Scalar(320).pack().unwrap(), 320);
        assert!(RegisterValue::Bits(vec![true; 17]).pack().is_err());
    }

    #[test]
    fn register_values_parse() {
        assert_eq!(parse_register_value("320").unwrap(), RegisterValue::Scalar(320));
        assert_eq!(parse_register_value("0x10").unwrap(), RegisterValue::Scalar(16));
        assert_eq!(parse_register_value("0O17").unwrap(), RegisterValue::Scalar(15));
        assert_eq!(parse_register_value("0b101").unwrap(), RegisterValue::Scalar(5));
        assert_eq!(parse_register_value(" 12.7 ").unwrap(), RegisterValue::Scalar(12));
        assert_eq!(
            parse_register_value("1, 0,1").unwrap(),
            RegisterValue::Bits(vec![true, false, true])
        );
        assert!(parse_register_value("65536").is_err());
        assert!(parse_register_value("-1").is_err());
        assert!(parse_register_value("1,2").is_err());
        assert!(parse_register_value("ten").is_err());
    }

    #[tokio::test]
    async fn write_failures_become_false() {
        let device = MockRegisterDevice::new("ins1");
        assert!(device.write_register(320, vec![true, false].into()).await);
        assert_eq!(device.register(320), Some(1));

        device.fail_next(1);
        assert!(!device.write_register(320, 7u16.into()).await);
        assert_eq!(device.register(320), Some(1));
    }

    #[tokio::test]
    async fn packed_strings_decode_two_chars_per_register() {
        let device = MockRegisterDevice::new("ins1");
        device.set_string(320, "OK").unwrap();
        assert_eq!(device.read_packed_string(320, 1).await.unwrap(), "OK");
    }
}
