//! Sample assembly.
//!
//! A [`SampleLayout`] is a declarative list of [`BlockSpec`]s: which device slot to read,
//! what to read from it, and where the result goes. The [`SampleAssembler`] walks that list
//! once per tick and produces a [`SampleRow`]:
//!
//! ```text
//! | timestamp | block 0 .. | block 1 .. | ... |        pinned blocks at fixed columns
//! ```
//!
//! Register blocks contribute `count` integers. Packed-bit blocks read a text field, expand
//! it to bits, reverse them and keep the first 8, which leaves the low byte of the last
//! register least-significant bit first.
//!
//! Absent slots contribute `CellValue::Empty` placeholders of the same width, so the column
//! layout does not depend on which devices are attached. A present device that fails (after
//! retries) aborts the whole row; no partial row is ever returned.

use crate::bits;
use crate::error::{AppResult, LoggerError};
use crate::instrument::{DeviceSlot, RegisterDevice};
use crate::retry::{ErrorFilter, RetryPolicy};
use crate::sink::{CellValue, Column};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Width of a decoded bit block.
pub const BIT_BLOCK_WIDTH: usize = 8;

/// Timestamp format of the first column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// What to read from a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadKind {
    /// `count` holding registers starting at `address`
    Registers {
        /// First register
        address: u16,
        /// Number of registers
        count: u16,
    },
    /// A packed text field, decoded to an 8-bit block
    PackedBits {
        /// First register
        address: u16,
        /// Registers holding the text (two characters each)
        #[serde(default = "default_packed_registers")]
        registers: u16,
    },
}

fn default_packed_registers() -> u16 {
    1
}

impl ReadKind {
    /// Number of cells this read contributes.
    pub fn width(&self) -> usize {
        match self {
            ReadKind::Registers { count, .. } => usize::from(*count),
            ReadKind::PackedBits { .. } => BIT_BLOCK_WIDTH,
        }
    }
}

/// Where a block's cells are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "at", rename_all = "snake_case")]
pub enum Placement {
    /// Next in the primary span, after the timestamp
    #[default]
    Primary,
    /// At a fixed column of the same row
    Pinned {
        /// First column of the block
        column: Column,
    },
}

/// One entry of a layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSpec {
    /// Slot name
    pub device: String,
    /// What to read
    pub read: ReadKind,
    /// Where it goes
    #[serde(default)]
    pub placement: Placement,
}

impl BlockSpec {
    /// Register block in the primary span.
    pub fn registers(device: impl Into<String>, address: u16, count: u16) -> Self {
        Self {
            device: device.into(),
            read: ReadKind::Registers { address, count },
            placement: Placement::Primary,
        }
    }

    /// One-register packed-bit block in the primary span.
    pub fn packed_bits(device: impl Into<String>, address: u16) -> Self {
        Self {
            device: device.into(),
            read: ReadKind::PackedBits {
                address,
                registers: 1,
            },
            placement: Placement::Primary,
        }
    }

    /// Move this block to a fixed column.
    pub fn pinned_at(mut self, column: Column) -> Self {
        self.placement = Placement::Pinned { column };
        self
    }
}

/// Ordered block list describing one sample row.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SampleLayout {
    /// Blocks in column order
    pub blocks: Vec<BlockSpec>,
}

impl SampleLayout {
    /// Layout from blocks.
    pub fn new(blocks: Vec<BlockSpec>) -> Self {
        Self { blocks }
    }

    /// Seven-instrument rig: four dual-bank register devices, two status words, and a
    /// seventh register device that is normally not fitted.
    pub fn ignis() -> Self {
        let mut blocks = Vec::new();
        for dev in ["ins2", "ins3"] {
            blocks.push(BlockSpec::registers(dev, 512, 8));
            blocks.push(BlockSpec::registers(dev, 520, 8));
        }
        blocks.push(BlockSpec::packed_bits("ins1", 320));
        for dev in ["ins4", "ins5"] {
            blocks.push(BlockSpec::registers(dev, 512, 8));
            blocks.push(BlockSpec::registers(dev, 520, 8));
        }
        blocks.push(BlockSpec::packed_bits("ins6", 320));
        blocks.push(BlockSpec::registers("ins7", 512, 8));
        blocks.push(BlockSpec::registers("ins7", 520, 8));
        Self { blocks }
    }

    /// Four-instrument rig; the status bits are pinned at `AI..AP`.
    pub fn icarus() -> Self {
        Self {
            blocks: vec![
                BlockSpec::registers("ins2", 512, 8),
                BlockSpec::registers("ins3", 512, 8),
                BlockSpec::registers("ins4", 1, 8),
                BlockSpec::packed_bits("ins1", 320).pinned_at(Column(34)),
            ],
        }
    }

    /// Width of the primary span, timestamp included.
    pub fn primary_width(&self) -> usize {
        1 + self
            .blocks
            .iter()
            .filter(|b| b.placement == Placement::Primary)
            .map(|b| b.read.width())
            .sum::<usize>()
    }

    /// Distinct slot names in first-use order.
    pub fn device_names(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.blocks
            .iter()
            .map(|b| b.device.as_str())
            .filter(|name| seen.insert(*name))
            .collect()
    }
}

/// Cells written at a fixed column.
#[derive(Debug, Clone, PartialEq)]
pub struct PinnedBlock {
    /// First column
    pub column: Column,
    /// Cells, left to right
    pub cells: Vec<CellValue>,
}

/// One assembled sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRow {
    /// Primary span, timestamp first
    pub cells: Vec<CellValue>,
    /// Blocks outside the primary span
    pub pinned: Vec<PinnedBlock>,
}

impl SampleRow {
    /// Width of the primary span.
    pub fn width(&self) -> usize {
        self.cells.len()
    }
}

/// Reads a layout's blocks from its device slots.
pub struct SampleAssembler {
    layout: SampleLayout,
    slots: Vec<DeviceSlot>,
    retry: RetryPolicy,
}

impl SampleAssembler {
    /// Bind a layout to its slots.
    ///
    /// Every device named by the layout must have a slot, present or absent. Line faults are
    /// retried according to `retry`; its filter is narrowed to communication errors so that
    /// malformed replies fail fast.
    pub fn new(layout: SampleLayout, slots: Vec<DeviceSlot>, retry: RetryPolicy) -> AppResult<Self> {
        for name in layout.device_names() {
            if !slots.iter().any(|slot| slot.name() == name) {
                return Err(LoggerError::Configuration(format!(
                    "layout reads from '{name}' but no such device slot is configured"
                )));
            }
        }
        if layout.primary_width() > u32::MAX as usize {
            return Err(LoggerError::Configuration("layout is too wide".into()));
        }
        Ok(Self {
            layout,
            slots,
            retry: retry.with_filter(ErrorFilter::communication()),
        })
    }

    /// The layout in use.
    pub fn layout(&self) -> &SampleLayout {
        &self.layout
    }

    /// The configured slots.
    pub fn slots(&self) -> &[DeviceSlot] {
        &self.slots
    }

    /// Assemble a row stamped with the current local time.
    pub async fn assemble(&self) -> AppResult<SampleRow> {
        self.assemble_at(Local::now()).await
    }

    /// Assemble a row with an explicit timestamp.
    pub async fn assemble_at(&self, timestamp: DateTime<Local>) -> AppResult<SampleRow> {
        let mut cells = Vec::with_capacity(self.layout.primary_width());
        cells.push(CellValue::Text(
            timestamp.format(TIMESTAMP_FORMAT).to_string(),
        ));
        let mut pinned = Vec::new();

        for block in &self.layout.blocks {
            let device = self
                .slots
                .iter()
                .find(|slot| slot.name() == block.device)
                .and_then(DeviceSlot::device);
            let values = match device {
                Some(device) => self.read_block(device, block.read).await.map_err(|source| {
                    LoggerError::Acquisition {
                        device: block.device.clone(),
                        source: Box::new(source),
                    }
                })?,
                None => vec![CellValue::Empty; block.read.width()],
            };
            match block.placement {
                Placement::Primary => cells.extend(values),
                Placement::Pinned { column } => pinned.push(PinnedBlock {
                    column,
                    cells: values,
                }),
            }
        }

        tracing::trace!(width = cells.len(), pinned = pinned.len(), "Assembled sample");
        Ok(SampleRow { cells, pinned })
    }

    async fn read_block(
        &self,
        device: &Arc<dyn RegisterDevice>,
        read: ReadKind,
    ) -> AppResult<Vec<CellValue>> {
        let device: &dyn RegisterDevice = device.as_ref();
        match read {
            ReadKind::Registers { address, count } => {
                let words = self
                    .retry
                    .run(|| device.read_registers(address, count))
                    .await?;
                if words.len() != usize::from(count) {
                    return Err(LoggerError::Decode(format!(
                        "{}: asked for {count} registers at {address}, got {}",
                        device.label(),
                        words.len()
                    )));
                }
                Ok(words.into_iter().map(CellValue::from).collect())
            }
            ReadKind::PackedBits { address, registers } => {
                let text = self
                    .retry
                    .run(|| device.read_packed_string(address, registers))
                    .await?;
                let mut bits = bits::text_to_bits(&text)?;
                bits.reverse();
                bits.resize(BIT_BLOCK_WIDTH, false);
                Ok(bits
                    .into_iter()
                    .map(|bit| CellValue::Int(i64::from(bit)))
                    .collect())
            }
        }
    }
}
