//! Polling loop.
//!
//! Calls [`RowWriter::append_sample`] once per interval until a shutdown future resolves or
//! the writer hits a sink error. Samples that fail to acquire are skipped and polling goes
//! on. An append in progress always runs to completion before shutdown is honoured.

use crate::error::AppResult;
use crate::instrument::{RegisterDevice, RegisterValue};
use crate::strobe::Strobe;
use crate::writer::RowWriter;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Register the status bit is written to unless configured otherwise.
pub const DEFAULT_STATUS_REGISTER: u16 = 320;

/// Counters for one polling run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    /// Rows appended
    pub written: u64,
    /// Ticks whose sample could not be acquired
    pub skipped: u64,
}

/// A status bit driven by a strobe schedule.
pub struct StatusOutput {
    device: Arc<dyn RegisterDevice>,
    register: u16,
    strobe: Strobe,
}

impl StatusOutput {
    /// Drive `register` of `device` from `strobe`.
    pub fn new(device: Arc<dyn RegisterDevice>, register: u16, strobe: Strobe) -> Self {
        Self {
            device,
            register,
            strobe,
        }
    }

    /// Write the current state of the schedule. Failures are logged by the device.
    pub async fn update(&self) -> bool {
        let on = self.strobe.is_on();
        self.device
            .write_register(self.register, RegisterValue::Bits(vec![on]))
            .await
    }
}

/// Drives a [`RowWriter`] at a fixed interval.
pub struct Poller {
    interval: Duration,
    writer: RowWriter,
    status: Option<StatusOutput>,
    stats: PollStats,
}

impl Poller {
    /// Poll `writer` every `interval`.
    pub fn new(interval: Duration, writer: RowWriter) -> Self {
        Self {
            interval,
            writer,
            status: None,
            stats: PollStats::default(),
        }
    }

    /// Also drive a status output on every tick.
    pub fn with_status(mut self, status: StatusOutput) -> Self {
        self.status = Some(status);
        self
    }

    /// Counters so far.
    pub fn stats(&self) -> PollStats {
        self.stats
    }

    /// The underlying writer.
    pub fn writer(&self) -> &RowWriter {
        &self.writer
    }

    /// One tick: update the status output, then append a sample.
    pub async fn tick(&mut self) -> AppResult<bool> {
        if let Some(status) = &self.status {
            status.update().await;
        }
        let written = self.writer.append_sample().await?;
        if written {
            self.stats.written += 1;
            tracing::debug!(written = self.stats.written, "Sample appended");
        } else {
            self.stats.skipped += 1;
            tracing::warn!(skipped = self.stats.skipped, "Tick produced no row");
        }
        Ok(written)
    }

    /// Poll until `shutdown` resolves.
    ///
    /// # Errors
    /// The first sink error; polling stops there.
    pub async fn run_until<F>(&mut self, shutdown: F) -> AppResult<PollStats>
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(interval = ?self.interval, "Polling started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.tick().await {
                        tracing::error!(error = %err, "Polling stopped");
                        return Err(err);
                    }
                }
                () = &mut shutdown => {
                    tracing::info!(
                        written = self.stats.written,
                        skipped = self.stats.skipped,
                        "Polling stopped by shutdown"
                    );
                    return Ok(self.stats);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{BlockSpec, SampleAssembler, SampleLayout};
    use crate::error::LoggerError;
    use crate::instrument::{DeviceSlot, MockRegisterDevice};
    use crate::retry::RetryPolicy;
    use crate::sink::MemoryWorkbook;
    use crate::writer::WriterConfig;

    fn writer(book: Arc<MemoryWorkbook>, device: Arc<MockRegisterDevice>) -> RowWriter {
        let assembler = SampleAssembler::new(
            SampleLayout::new(vec![BlockSpec::registers("ins2", 512, 4)]),
            vec![DeviceSlot::present("ins2", device)],
            RetryPolicy::new(3, Duration::from_millis(10)),
        )
        .unwrap();
        RowWriter::new(book, assembler, WriterConfig::samples_only())
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_shutdown() {
        let book = Arc::new(MemoryWorkbook::with_sheets(["inputs"]));
        let device = Arc::new(MockRegisterDevice::new("ins2").with_drift());
        let mut poller = Poller::new(Duration::from_secs(1), writer(book.clone(), device));

        let stats = poller
            .run_until(tokio::time::sleep(Duration::from_millis(3500)))
            .await
            .unwrap();
        assert_eq!(stats, PollStats { written: 4, skipped: 0 });
        for row in 6..=9 {
            assert!(!book.get("inputs", &format!("A{row}")).unwrap().is_blank());
        }
        assert!(book.get("inputs", "A10").unwrap().is_blank());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_samples_are_counted_and_skipped() {
        let book = Arc::new(MemoryWorkbook::with_sheets(["inputs"]));
        let device = Arc::new(MockRegisterDevice::new("ins2"));
        device.fail_next(3);
        let mut poller = Poller::new(Duration::from_secs(1), writer(book.clone(), device));

        let stats = poller
            .run_until(tokio::time::sleep(Duration::from_millis(1500)))
            .await
            .unwrap();
        assert_eq!(stats, PollStats { written: 1, skipped: 1 });
        assert_eq!(poller.writer().cursor().position(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn sink_errors_stop_polling() {
        let book = Arc::new(MemoryWorkbook::new());
        let device = Arc::new(MockRegisterDevice::new("ins2"));
        let mut poller = Poller::new(Duration::from_secs(1), writer(book, device));
        let result = poller.run_until(std::future::pending()).await;
        assert!(matches!(result, Err(LoggerError::SheetNotFound(_))));
    }

    #[tokio::test]
    async fn status_output_writes_strobe_bit() {
        let book = Arc::new(MemoryWorkbook::with_sheets(["inputs"]));
        let device = Arc::new(MockRegisterDevice::new("ins2"));
        let status_device = Arc::new(MockRegisterDevice::new("ins1"));
        let mut poller = Poller::new(Duration::from_secs(1), writer(book, device)).with_status(
            StatusOutput::new(
                status_device.clone(),
                DEFAULT_STATUS_REGISTER,
                Strobe::parse("on").unwrap(),
            ),
        );

        assert!(poller.tick().await.unwrap());
        assert_eq!(status_device.writes(), vec![(320, 1)]);
    }
}
