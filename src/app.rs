//! Wiring: configuration + sink + device factory into a ready-to-run [`Poller`].

use crate::acquisition::SampleAssembler;
use crate::config::{DeviceDefinition, LoggerConfig};
use crate::error::{AppResult, LoggerError};
use crate::instrument::RegisterDevice;
use crate::poller::{Poller, StatusOutput};
use crate::sink::TabularSink;
use crate::strobe::Strobe;
use crate::writer::RowWriter;
use std::sync::Arc;

/// Build the polling pipeline described by `config`.
///
/// `open` turns a device definition into a live device; it is called once per enabled
/// device the layout reads from, and once more for the status output if one is configured.
pub fn build_poller<F>(
    config: &LoggerConfig,
    sink: Arc<dyn TabularSink>,
    mut open: F,
) -> AppResult<Poller>
where
    F: FnMut(&DeviceDefinition) -> AppResult<Arc<dyn RegisterDevice>>,
{
    config.validate()?;

    let layout = config.layout.layout();
    let slots = config.device_slots(&layout, &mut open)?;
    let present = slots.iter().filter(|slot| slot.is_present()).count();
    let assembler = SampleAssembler::new(layout, slots, config.poll.retry.policy())?;
    let writer = RowWriter::new(sink, assembler, config.writer.clone());
    let mut poller = Poller::new(config.poll.interval, writer);

    if let Some(status) = &config.status {
        let definition = config.enabled_device(&status.device).ok_or_else(|| {
            LoggerError::Configuration(format!(
                "status device '{}' is disabled",
                status.device
            ))
        })?;
        poller = poller.with_status(StatusOutput::new(
            open(definition)?,
            status.register,
            Strobe::new(status.strobe),
        ));
    }

    tracing::info!(
        app = %config.application.name,
        devices = present,
        interval = ?config.poll.interval,
        "Pipeline ready"
    );
    Ok(poller)
}
