//! Recording coordinator for managing the run lifecycle
//!
//! One coordinator exists per process and is shared by every execution unit
//! through an `Arc`. It owns the process-wide part of a run:
//! - Parameters and the resolved output file
//! - Run identity and start time, agreed across the process group
//! - The metadata exchange at finalize
//! - Run metrics (records written, bytes flushed)
//!
//! The per-thread hot path lives in [`UnitRecorder`] and never takes the
//! coordinator lock.
//!
//! # State machine
//!
//! ```text
//! Uninitialized ──initialize──▶ Initialized ──first enroll──▶ Running
//!       ▲                                                        │
//!       │                          last unit finalized           ▼
//!       └──────────── initialize ◀───────────────────────── Finalized
//! ```
//!
//! A fatal failure on any unit moves the run to `Aborted`, from which a new
//! run can be initialized.

use crate::config::{BackendParameters, ParameterUpdate};
use crate::paths::{FileGroup, FilenameBuilder};
use crate::session::FileSession;
use crate::unit::{UnitRecorder, UnitSummary};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use sionrec_core::{
    CollectiveOp, DeviceMetadata, Origin, RecordingError, RecordingResult, RunClock, RunState,
    UnitId,
};
use sionrec_durability::{
    decode_devices, encode_devices, CollectiveIo, OpenRequest, ProcessGroup, RunMetadata,
    SingleProcess,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Size of the run agreement broadcast: run id + start time
const AGREEMENT_SIZE: usize = 24;

/// Snapshot of the backend status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendStatus {
    /// Current parameters
    pub params: BackendParameters,
    /// Output file of this process, once initialized
    pub filename: Option<PathBuf>,
    /// File group of this process, once initialized
    pub file_group: Option<FileGroup>,
    /// Run state
    pub state: RunState,
}

/// Per-run settings handed to every unit at open.
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    /// Shared output file
    pub path: PathBuf,
    /// File group of this process
    pub file_group: FileGroup,
    /// Number of processes in the process group
    pub process_count: u32,
    /// Agreed simulation clock
    pub clock: RunClock,
    /// Collective mode
    pub collective: bool,
    /// Initial buffer capacity
    pub buffer_size: usize,
}

impl RunContext {
    /// Whether `unit` writes the run metadata of its file.
    ///
    /// The writer is thread 0 of the lowest rank of the file group.
    pub fn is_metadata_writer(&self, unit: UnitId) -> bool {
        unit.thread == 0 && unit.rank == self.file_group.first_rank
    }

    /// Build the metadata header of this file from the devices gathered
    /// across the process group.
    pub fn run_metadata(&self, gathered: &[DeviceMetadata]) -> RunMetadata {
        let mut devices: Vec<DeviceMetadata> = gathered
            .iter()
            .filter(|d| self.file_group.contains(d.unit.rank))
            .cloned()
            .collect();
        devices.sort_by_key(|d| (d.unit, d.id));

        RunMetadata {
            t_start: self.clock.start_ms,
            resolution: self.clock.resolution_ms,
            process_count: self.process_count,
            file_group: self.file_group.index,
            file_group_count: self.file_group.count,
            devices,
        }
    }
}

/// Recording coordinator for one process
///
/// # Memory Ordering
///
/// The metric counters use Relaxed ordering: they are observational and do
/// not synchronize any other memory.
pub struct RecordingCoordinator {
    /// Collective I/O capability shared by all units
    io: Arc<dyn CollectiveIo>,
    /// Process group this process belongs to
    group: Arc<dyn ProcessGroup>,
    /// Execution units (threads) per process
    threads: u32,
    /// Run state, guarded for the lifecycle boundaries only
    state: Mutex<CoordinatorState>,
    /// Wakes units waiting in the metadata exchange
    arrivals: Condvar,
    /// Records written by finalized units
    records_written: AtomicU64,
    /// Bytes flushed by finalized units
    bytes_flushed: AtomicU64,
}

struct CoordinatorState {
    params: BackendParameters,
    run: RunState,
    context: Option<RunContext>,
    run_id: [u8; 16],
    opened: Vec<bool>,
    finished: u32,
    pending: Vec<DeviceMetadata>,
    arrived: u32,
    generation: u64,
    gathered: Option<Arc<Vec<DeviceMetadata>>>,
    failure: Option<String>,
    initializing: bool,
}

impl RecordingCoordinator {
    /// Create a coordinator for a process with `threads` execution units.
    pub fn new(
        io: Arc<dyn CollectiveIo>,
        group: Arc<dyn ProcessGroup>,
        threads: u32,
        params: BackendParameters,
    ) -> RecordingResult<Arc<Self>> {
        if threads == 0 {
            return Err(RecordingError::Configuration(
                "at least one execution unit per process is required".to_string(),
            ));
        }
        params.validate()?;

        Ok(Arc::new(Self {
            io,
            group,
            threads,
            state: Mutex::new(CoordinatorState {
                params,
                run: RunState::Uninitialized,
                context: None,
                run_id: [0; 16],
                opened: vec![false; threads as usize],
                finished: 0,
                pending: Vec::new(),
                arrived: 0,
                generation: 0,
                gathered: None,
                failure: None,
                initializing: false,
            }),
            arrivals: Condvar::new(),
            records_written: AtomicU64::new(0),
            bytes_flushed: AtomicU64::new(0),
        }))
    }

    /// Create a coordinator for the only process of the run.
    pub fn single_process(
        io: Arc<dyn CollectiveIo>,
        threads: u32,
        params: BackendParameters,
    ) -> RecordingResult<Arc<Self>> {
        Self::new(io, Arc::new(SingleProcess), threads, params)
    }

    /// Rank of this process.
    pub fn rank(&self) -> u32 {
        self.group.rank()
    }

    /// Execution units per process.
    pub fn threads(&self) -> u32 {
        self.threads
    }

    /// Current run state.
    pub fn state(&self) -> RunState {
        self.state.lock().run
    }

    /// Settings of the current run, once initialized.
    pub fn context(&self) -> Option<RunContext> {
        self.state.lock().context.clone()
    }

    /// Run identity agreed at initialize.
    pub fn run_id(&self) -> uuid::Uuid {
        uuid::Uuid::from_bytes(self.state.lock().run_id)
    }

    /// Records written by the units finalized so far.
    pub fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }

    /// Bytes flushed by the units finalized so far.
    pub fn bytes_flushed(&self) -> u64 {
        self.bytes_flushed.load(Ordering::Relaxed)
    }

    /// Current parameters, output file and state.
    pub fn get_status(&self) -> BackendStatus {
        let state = self.state.lock();
        BackendStatus {
            params: state.params.clone(),
            filename: state.context.as_ref().map(|c| c.path.clone()),
            file_group: state.context.as_ref().map(|c| c.file_group),
            state: state.run,
        }
    }

    /// Apply a partial parameter update.
    ///
    /// Rejected while a run is active; the update is all-or-nothing.
    pub fn set_status(&self, update: &ParameterUpdate) -> RecordingResult<()> {
        let mut state = self.state.lock();
        if state.run.is_active() || state.initializing {
            return Err(RecordingError::lifecycle(
                Origin::Process(self.rank()),
                "set parameters",
                state.run,
            ));
        }
        state.params.apply(update)?;
        debug!(target: "sionrec::run", rank = self.rank(), ?update, "Parameters updated");
        Ok(())
    }

    /// Start a new run on this process.
    ///
    /// Validates the parameters, resolves the output file, and agrees on run
    /// identity and start time across the process group (broadcast from rank
    /// 0, so every process must call this). Clears all per-run state.
    pub fn initialize(&self, clock: RunClock) -> RecordingResult<()> {
        let rank = self.rank();
        let origin = Origin::Process(rank);
        let size = self.group.size();

        // The broadcast blocks until every rank joins, so it runs unlocked;
        // the `initializing` flag keeps parameters and the state machine
        // frozen meanwhile.
        let (file_group, path, collective, buffer_size) = {
            let mut state = self.state.lock();
            if state.initializing {
                return Err(RecordingError::lifecycle(origin, "initialize twice", state.run));
            }
            match state.run {
                RunState::Uninitialized | RunState::Finalized | RunState::Aborted => {}
                other => return Err(RecordingError::lifecycle(origin, "initialize", other)),
            }
            state.params.validate()?;

            let file_group = FileGroup::for_rank(rank, size, state.params.num_files);
            let path = FilenameBuilder::from_params(&state.params).build(&file_group);
            state.initializing = true;
            (file_group, path, state.params.collective, state.params.buffer_size)
        };

        let agreed = self.agree_on_run(origin, &clock);
        let mut state = self.state.lock();
        state.initializing = false;
        let (run_id, start_ms) = agreed?;

        let context = RunContext {
            path,
            file_group,
            process_count: size,
            clock: RunClock::new(start_ms, clock.resolution_ms),
            collective,
            buffer_size,
        };

        info!(
            target: "sionrec::run",
            rank,
            run_id = %uuid::Uuid::from_bytes(run_id),
            path = %context.path.display(),
            file_group = file_group.index,
            collective = context.collective,
            "Recording run initialized"
        );

        state.run = RunState::Initialized;
        state.context = Some(context);
        state.run_id = run_id;
        state.opened = vec![false; self.threads as usize];
        state.finished = 0;
        state.pending.clear();
        state.arrived = 0;
        state.gathered = None;
        state.failure = None;
        self.records_written.store(0, Ordering::Relaxed);
        self.bytes_flushed.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Broadcast rank 0's run id and start time to every process.
    fn agree_on_run(
        &self,
        origin: Origin,
        clock: &RunClock,
    ) -> RecordingResult<([u8; 16], f64)> {
        let mut proposal = Vec::with_capacity(AGREEMENT_SIZE);
        if self.rank() == 0 {
            proposal.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
            proposal.extend_from_slice(&clock.start_ms.to_le_bytes());
        }
        let agreed = self
            .group
            .broadcast(0, proposal)
            .map_err(|e| RecordingError::collective(origin, CollectiveOp::Broadcast, e))?;
        if agreed.len() != AGREEMENT_SIZE {
            return Err(RecordingError::Corruption(format!(
                "run agreement carries {} bytes, expected {}",
                agreed.len(),
                AGREEMENT_SIZE
            )));
        }
        let mut run_id = [0u8; 16];
        run_id.copy_from_slice(&agreed[..16]);
        let mut start = [0u8; 8];
        start.copy_from_slice(&agreed[16..]);
        Ok((run_id, f64::from_le_bytes(start)))
    }

    /// Open the execution unit `thread` of this process.
    ///
    /// Collective: every unit of every process in the file group must call
    /// this before any of them returns.
    pub fn open_unit(self: &Arc<Self>, thread: u32) -> RecordingResult<UnitRecorder> {
        let unit = UnitId::new(self.rank(), thread);
        let (request, context, timeout) = {
            let mut state = self.state.lock();
            match state.run {
                RunState::Initialized | RunState::Running => {}
                other => return Err(RecordingError::lifecycle(unit, "open unit", other)),
            }
            if thread >= self.threads {
                return Err(RecordingError::Configuration(format!(
                    "thread {} outside 0..{}",
                    thread, self.threads
                )));
            }
            if state.opened[thread as usize] {
                return Err(RecordingError::lifecycle(unit, "open unit twice", state.run));
            }
            let context = match &state.context {
                Some(context) => context.clone(),
                None => return Err(RecordingError::lifecycle(unit, "open unit", state.run)),
            };
            state.opened[thread as usize] = true;

            let request = OpenRequest {
                path: context.path.clone(),
                unit,
                participants: context.file_group.members * self.threads,
                process_count: context.file_group.members,
                chunk_size: state.params.chunk_size,
                collective: context.collective,
                run_id: state.run_id,
                rendezvous_timeout: state.params.rendezvous_timeout(),
            };
            (request, context, state.params.rendezvous_timeout())
        };

        let session = match FileSession::open(self.io.as_ref(), &request, context.buffer_size) {
            Ok(session) => session,
            Err(e) => {
                self.abort(unit, request.run_id, &e);
                return Err(e);
            }
        };

        info!(
            target: "sionrec::run",
            unit = %unit,
            path = %context.path.display(),
            "Unit opened"
        );
        Ok(UnitRecorder::new(
            Arc::clone(self),
            unit,
            request.run_id,
            context,
            timeout,
            session,
        ))
    }

    pub(crate) fn io(&self) -> Arc<dyn CollectiveIo> {
        Arc::clone(&self.io)
    }

    /// First enrollment on a unit moves the run to Running.
    pub(crate) fn enter_running(&self, unit: UnitId) -> RecordingResult<()> {
        let mut state = self.state.lock();
        match state.run {
            RunState::Initialized => {
                state.run = RunState::Running;
                debug!(target: "sionrec::run", unit = %unit, "Recording run started");
                Ok(())
            }
            RunState::Running => Ok(()),
            other => Err(RecordingError::lifecycle(unit, "enroll", other)),
        }
    }

    /// Metadata exchange at finalize.
    ///
    /// Every unit of the process submits its devices and waits for the
    /// others. The last unit to arrive gathers the devices of all processes;
    /// every unit gets the combined list.
    pub(crate) fn exchange_metadata(
        &self,
        unit: UnitId,
        devices: Vec<DeviceMetadata>,
        timeout: std::time::Duration,
    ) -> RecordingResult<Arc<Vec<DeviceMetadata>>> {
        let mut state = self.state.lock();
        if let Some(failure) = &state.failure {
            return Err(RecordingError::collective(unit, CollectiveOp::Barrier, failure));
        }

        state.pending.extend(devices);
        let generation = state.generation;
        state.arrived += 1;

        if state.arrived == self.threads {
            state.arrived = 0;
            state.generation += 1;

            let local = encode_devices(&state.pending);
            let gathered = self
                .group
                .all_gather(local)
                .map_err(|e| RecordingError::collective(unit, CollectiveOp::Gather, e))
                .and_then(|parts| {
                    let mut all = Vec::new();
                    for part in parts {
                        all.extend(
                            decode_devices(&part)
                                .map_err(|e| RecordingError::Corruption(e.to_string()))?,
                        );
                    }
                    Ok(all)
                });

            return match gathered {
                Ok(all) => {
                    let all = Arc::new(all);
                    state.gathered = Some(Arc::clone(&all));
                    self.arrivals.notify_all();
                    Ok(all)
                }
                Err(e) => {
                    state.fail(&e);
                    self.arrivals.notify_all();
                    Err(e)
                }
            };
        }

        let deadline = Instant::now() + timeout;
        while state.generation == generation {
            if let Some(failure) = &state.failure {
                return Err(RecordingError::collective(unit, CollectiveOp::Barrier, failure));
            }
            if self.arrivals.wait_until(&mut state, deadline).timed_out()
                && state.generation == generation
            {
                let err = RecordingError::collective(
                    unit,
                    CollectiveOp::Barrier,
                    format!(
                        "timed out with {} of {} units",
                        state.arrived, self.threads
                    ),
                );
                state.fail(&err);
                self.arrivals.notify_all();
                return Err(err);
            }
        }

        if let Some(failure) = &state.failure {
            return Err(RecordingError::collective(unit, CollectiveOp::Barrier, failure));
        }
        state.gathered.clone().ok_or_else(|| {
            RecordingError::collective(unit, CollectiveOp::Gather, "no device list gathered")
        })
    }

    /// A unit completed finalize.
    pub(crate) fn unit_finished(&self, summary: &UnitSummary) {
        self.records_written
            .fetch_add(summary.records_written, Ordering::Relaxed);
        self.bytes_flushed
            .fetch_add(summary.bytes_flushed, Ordering::Relaxed);

        let mut state = self.state.lock();
        state.finished += 1;
        if state.finished == self.threads && state.run != RunState::Aborted {
            state.run = RunState::Finalized;
            info!(
                target: "sionrec::run",
                rank = self.rank(),
                records = self.records_written(),
                bytes = self.bytes_flushed(),
                "Recording run finalized"
            );
        }
    }

    /// A unit hit a fatal error; the run cannot complete.
    ///
    /// Ignored when `run_id` belongs to an earlier run.
    pub(crate) fn abort(&self, unit: UnitId, run_id: [u8; 16], cause: &RecordingError) {
        let mut state = self.state.lock();
        if state.run_id != run_id {
            debug!(target: "sionrec::run", unit = %unit, error = %cause, "Failure of a stale unit");
            return;
        }
        error!(target: "sionrec::run", unit = %unit, error = %cause, "Recording run aborted");
        state.fail(cause);
        self.arrivals.notify_all();
    }
}

impl CoordinatorState {
    fn fail(&mut self, cause: &RecordingError) {
        if self.failure.is_none() {
            self.failure = Some(cause.to_string());
        }
        self.run = RunState::Aborted;
    }
}
