//! Per-thread recording handle
//!
//! A [`UnitRecorder`] is owned by exactly one execution unit. It holds the
//! unit's device registry and file session, so enrolling and writing touch
//! nothing shared: the write path takes no lock and performs no I/O.
//! Synchronize and finalize hand the buffered records to the collective I/O
//! layer.

use crate::coordinator::{RecordingCoordinator, RunContext};
use crate::registry::DeviceRegistry;
use crate::session::{allocation_error, FileSession, FlushStats};
use serde::Serialize;
use sionrec_core::{
    DeviceMetadata, Event, RecordingDevice, RecordingError, RecordingResult, RunState, UnitId,
};
use sionrec_durability::encode_record;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Counters reported by a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UnitSummary {
    /// Unit the counters belong to
    pub unit: UnitId,
    /// Enrolled devices
    pub devices: usize,
    /// Records written across all devices
    pub records_written: u64,
    /// Collective writes issued
    pub flushes: u64,
    /// Payload bytes flushed
    pub bytes_flushed: u64,
}

/// Recording handle of one execution unit.
///
/// Obtained from [`RecordingCoordinator::open_unit`]. Any collective failure
/// aborts the unit: every later call returns a lifecycle error.
pub struct UnitRecorder {
    coordinator: Arc<RecordingCoordinator>,
    unit: UnitId,
    run_id: [u8; 16],
    context: RunContext,
    timeout: Duration,
    session: Option<FileSession>,
    registry: DeviceRegistry,
    state: RunState,
    closed_stats: FlushStats,
}

impl std::fmt::Debug for UnitRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitRecorder")
            .field("unit", &self.unit)
            .field("context", &self.context)
            .field("timeout", &self.timeout)
            .field("registry", &self.registry)
            .field("state", &self.state)
            .field("closed_stats", &self.closed_stats)
            .finish_non_exhaustive()
    }
}

impl UnitRecorder {
    pub(crate) fn new(
        coordinator: Arc<RecordingCoordinator>,
        unit: UnitId,
        run_id: [u8; 16],
        context: RunContext,
        timeout: Duration,
        session: FileSession,
    ) -> Self {
        UnitRecorder {
            coordinator,
            unit,
            run_id,
            context,
            timeout,
            session: Some(session),
            registry: DeviceRegistry::new(unit),
            state: RunState::Initialized,
            closed_stats: FlushStats::default(),
        }
    }

    /// Identity of this unit.
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// State of this unit.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Shared output file.
    pub fn path(&self) -> &Path {
        &self.context.path
    }

    /// Run settings.
    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Metadata of an enrolled device.
    pub fn device(&self, device: &dyn RecordingDevice) -> Option<&DeviceMetadata> {
        self.registry.get(device.node_id())
    }

    /// Every enrolled device, in identity order.
    pub fn devices(&self) -> Vec<DeviceMetadata> {
        self.registry.snapshot()
    }

    /// Bytes buffered since the last synchronize.
    pub fn buffered_bytes(&self) -> usize {
        self.session.as_ref().map_or(0, FileSession::buffered_bytes)
    }

    /// Current counters.
    pub fn summary(&self) -> UnitSummary {
        let stats = self
            .session
            .as_ref()
            .map_or(self.closed_stats, FileSession::stats);
        UnitSummary {
            unit: self.unit,
            devices: self.registry.len(),
            records_written: self.registry.total_records(),
            flushes: stats.flushes,
            bytes_flushed: stats.bytes_flushed,
        }
    }

    fn require(&self, operation: &'static str, allowed: &[RunState]) -> RecordingResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(RecordingError::lifecycle(self.unit, operation, self.state))
        }
    }

    /// Mark the unit aborted if `err` is fatal, then hand it back.
    fn fail(&mut self, err: RecordingError) -> RecordingError {
        if err.is_fatal() && self.state != RunState::Aborted {
            error!(target: "sionrec::run", unit = %self.unit, error = %err, "Unit aborted");
            self.state = RunState::Aborted;
            if let Some(session) = self.session.take() {
                self.release(session, &err);
            }
            self.coordinator.abort(self.unit, self.run_id, &err);
        }
        err
    }

    /// Abandon the collective session so peers and later runs are not left
    /// waiting on it.
    fn release(&self, session: FileSession, reason: &RecordingError) {
        let io = self.coordinator.io();
        if let Err(e) = session.abandon(io.as_ref(), &reason.to_string()) {
            warn!(target: "sionrec::io", unit = %self.unit, error = %e, "Session release failed");
        }
    }

    /// Enroll a device that records events without values.
    pub fn enroll<D>(&mut self, device: &D) -> RecordingResult<()>
    where
        D: RecordingDevice + ?Sized,
    {
        self.enroll_with_values(device, std::iter::empty::<String>())
    }

    /// Enroll a device with ordered value channel names.
    ///
    /// Allocates no file resources. The first enrollment on a unit moves the
    /// run to Running.
    pub fn enroll_with_values<D, I, S>(&mut self, device: &D, value_names: I) -> RecordingResult<()>
    where
        D: RecordingDevice + ?Sized,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.require("enroll", &[RunState::Initialized, RunState::Running])?;
        self.registry.enroll(device, value_names)?;

        if self.state == RunState::Initialized {
            if let Err(e) = self.coordinator.enter_running(self.unit) {
                return Err(self.fail(e));
            }
            self.state = RunState::Running;
        }
        Ok(())
    }

    /// Record an event without values.
    pub fn write<D>(&mut self, device: &D, event: &Event) -> RecordingResult<()>
    where
        D: RecordingDevice + ?Sized,
    {
        self.write_values(device, event, &[])
    }

    /// Record an event with one value per declared channel.
    ///
    /// Serializes into this unit's buffer only; never performs I/O.
    pub fn write_values<D>(&mut self, device: &D, event: &Event, values: &[f64]) -> RecordingResult<()>
    where
        D: RecordingDevice + ?Sized,
    {
        self.require("write", &[RunState::Initialized, RunState::Running])?;
        let id = device.node_id();
        let unit = self.unit;

        let meta = self
            .registry
            .get_mut(id)
            .ok_or(RecordingError::UnenrolledDevice { unit, device: id })?;
        if meta.channel_count() != values.len() {
            return Err(RecordingError::ValueCountMismatch {
                unit,
                device: id,
                expected: meta.channel_count(),
                actual: values.len(),
            });
        }

        let session = match self.session.as_mut() {
            Some(session) => session,
            None => return Err(RecordingError::lifecycle(unit, "write", self.state)),
        };
        if let Err(e) = encode_record(session.buffer_mut(), id, event, values) {
            let err = allocation_error(unit, e);
            return Err(self.fail(err));
        }
        meta.record_count += 1;
        Ok(())
    }

    /// Flush the buffered records into the shared file.
    ///
    /// In collective mode every unit must call this the same number of times,
    /// with or without buffered records. Returns the bytes written.
    pub fn synchronize(&mut self) -> RecordingResult<usize> {
        self.require("synchronize", &[RunState::Initialized, RunState::Running])?;
        let io = self.coordinator.io();
        let collective = self.context.collective;

        let result = match self.session.as_mut() {
            Some(session) => session.flush(io.as_ref(), collective),
            None => return Err(RecordingError::lifecycle(self.unit, "synchronize", self.state)),
        };
        match result {
            Ok(bytes) => {
                debug!(target: "sionrec::io", unit = %self.unit, bytes, "Buffer synchronized");
                Ok(bytes)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Complete the run on this unit.
    ///
    /// Flushes what is left, exchanges device metadata with every other unit,
    /// lets the designated writer append the metadata header, and closes the
    /// file collectively. Every unit of every process must call this.
    pub fn finalize(&mut self) -> RecordingResult<UnitSummary> {
        self.require("finalize", &[RunState::Initialized, RunState::Running])?;
        self.synchronize()?;

        let gathered =
            match self
                .coordinator
                .exchange_metadata(self.unit, self.registry.snapshot(), self.timeout)
            {
                Ok(gathered) => gathered,
                Err(e) => return Err(self.fail(e)),
            };

        let io = self.coordinator.io();
        let session = match self.session.take() {
            Some(session) => session,
            None => return Err(RecordingError::lifecycle(self.unit, "finalize", self.state)),
        };

        if self.context.is_metadata_writer(self.unit) {
            let metadata = self.context.run_metadata(&gathered);
            if let Err(e) = session.write_metadata(io.as_ref(), &metadata.to_bytes()) {
                self.session = Some(session);
                return Err(self.fail(e));
            }
            debug!(
                target: "sionrec::io",
                unit = %self.unit,
                devices = metadata.devices.len(),
                "Run metadata written"
            );
        }

        match session.close(io.as_ref()) {
            Ok(stats) => self.closed_stats = stats,
            Err(e) => return Err(self.fail(e)),
        }

        self.state = RunState::Finalized;
        let summary = self.summary();
        self.coordinator.unit_finished(&summary);
        info!(
            target: "sionrec::run",
            unit = %self.unit,
            records = summary.records_written,
            bytes = summary.bytes_flushed,
            "Unit finalized"
        );
        Ok(summary)
    }
}

impl Drop for UnitRecorder {
    /// A unit that goes away without finalizing aborts the run.
    fn drop(&mut self) {
        if self.session.is_some() {
            let err = RecordingError::lifecycle(self.unit, "skip finalize", self.state);
            self.fail(err);
        }
    }
}
