//! Mock register device.
//!
//! Serves values from an in-memory register map and can be told to fail the next N
//! operations, either as line faults or as malformed replies. Used by the test-suite and by
//! `sheet-logger run --simulate`.

use super::RegisterDevice;
use crate::bits::{bits_to_uint, text_to_bits};
use crate::error::{AppResult, LoggerError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy)]
enum Fault {
    Timeout,
    Malformed,
}

#[derive(Debug, Default)]
struct State {
    registers: HashMap<u16, u16>,
    faults: VecDeque<Fault>,
    reads: u32,
    writes: Vec<(u16, u16)>,
}

/// In-memory register device with fault injection.
///
/// # Example
///
/// ```rust,ignore
/// let ins = MockRegisterDevice::new("ins2");
/// ins.set_registers(512, &[1, 2, 3, 4, 5, 6, 7, 8]);
/// ins.fail_next(2);
/// // first two reads time out, the third succeeds
/// ```
#[derive(Debug)]
pub struct MockRegisterDevice {
    label: String,
    drift: bool,
    state: Mutex<State>,
}

impl MockRegisterDevice {
    /// Device with all registers reading zero.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            drift: false,
            state: Mutex::new(State::default()),
        }
    }

    /// Increment every register after it has been read, so successive samples differ.
    pub fn with_drift(mut self) -> Self {
        self.drift = true;
        self
    }

    /// Store consecutive register values starting at `address`.
    pub fn set_registers(&self, address: u16, values: &[u16]) {
        let mut state = self.state.lock();
        for (offset, value) in values.iter().enumerate() {
            state
                .registers
                .insert(address.wrapping_add(offset as u16), *value);
        }
    }

    /// Store Latin-1 text two characters per register, high byte first.
    ///
    /// An odd trailing character is padded with a zero byte.
    ///
    /// # Errors
    /// `Decode` for characters outside Latin-1.
    pub fn set_string(&self, address: u16, text: &str) -> AppResult<()> {
        let mut bits = text_to_bits(text)?;
        bits.resize(bits.len().div_ceil(16) * 16, false);
        let words = bits
            .chunks(16)
            .map(|word| bits_to_uint(word).map(|w| w as u16))
            .collect::<AppResult<Vec<u16>>>()?;
        self.set_registers(address, &words);
        Ok(())
    }

    /// Fail the next `n` operations with a communication timeout.
    pub fn fail_next(&self, n: usize) {
        let mut state = self.state.lock();
        state.faults.extend(std::iter::repeat(Fault::Timeout).take(n));
    }

    /// Answer the next read with a malformed reply.
    pub fn corrupt_next(&self) {
        self.state.lock().faults.push_back(Fault::Malformed);
    }

    /// Current value of one register.
    pub fn register(&self, address: u16) -> Option<u16> {
        self.state.lock().registers.get(&address).copied()
    }

    /// Number of read attempts so far, failed ones included.
    pub fn reads(&self) -> u32 {
        self.state.lock().reads
    }

    /// Successful writes in order, as `(address, value)`.
    pub fn writes(&self) -> Vec<(u16, u16)> {
        self.state.lock().writes.clone()
    }

    fn take_fault(&self, state: &mut State) -> AppResult<()> {
        match state.faults.pop_front() {
            None => Ok(()),
            Some(Fault::Timeout) => Err(LoggerError::communication(
                &self.label,
                "no response within timeout",
            )),
            Some(Fault::Malformed) => Err(LoggerError::Decode(format!(
                "{}: reply byte count does not match request",
                self.label
            ))),
        }
    }
}

#[async_trait]
impl RegisterDevice for MockRegisterDevice {
    fn label(&self) -> &str {
        &self.label
    }

    async fn read_registers(&self, address: u16, count: u16) -> AppResult<Vec<u16>> {
        let mut state = self.state.lock();
        state.reads += 1;
        self.take_fault(&mut state)?;
        let values: Vec<u16> = (0..count)
            .map(|offset| {
                let reg = address.wrapping_add(offset);
                state.registers.get(&reg).copied().unwrap_or(0)
            })
            .collect();
        if self.drift {
            for offset in 0..count {
                let reg = address.wrapping_add(offset);
                let entry = state.registers.entry(reg).or_insert(0);
                *entry = entry.wrapping_add(1);
            }
        }
        Ok(values)
    }

    async fn write_single(&self, address: u16, value: u16) -> AppResult<()> {
        let mut state = self.state.lock();
        self.take_fault(&mut state)?;
        state.registers.insert(address, value);
        state.writes.push((address, value));
        Ok(())
    }
}
