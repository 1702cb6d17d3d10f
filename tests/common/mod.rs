//! Shared test utilities for the integration test suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]
#![allow(unused_imports)]

use sionrec::{
    BackendParameters, CollectiveIo, DeviceDescriptor, DeviceKind, LocalCluster, ProcessGroup,
    RecordingCoordinator, RecordingResult, RunClock, UnitId, UnitRecorder,
};
use std::path::Path;
use std::sync::{Arc, Once};
use std::thread;
use tempfile::TempDir;

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output through the test harness writer.
///
/// Set `RUST_LOG=sionrec=debug` to see the run lifecycle of a failing test.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Clock used by every suite: start at 0 ms, 0.1 ms resolution.
pub fn clock() -> RunClock {
    RunClock::new(0.0, 0.1)
}

// ============================================================================
// Devices
// ============================================================================

pub fn multimeter(id: u64) -> DeviceDescriptor {
    DeviceDescriptor::new(id, DeviceKind::Multimeter, "multimeter")
}

pub fn spike_recorder(id: u64) -> DeviceDescriptor {
    DeviceDescriptor::new(id, DeviceKind::SpikeRecorder, "spike_recorder")
}

/// Device ids that never collide across ranks and threads.
pub fn device_id(unit: UnitId, local: u64) -> u64 {
    (unit.rank as u64 + 1) * 10_000 + unit.thread as u64 * 100 + local
}

// ============================================================================
// Parameters
// ============================================================================

/// Default parameters writing into `dir`.
pub fn params_in(dir: &Path) -> BackendParameters {
    BackendParameters {
        data_path: dir.to_path_buf(),
        rendezvous_timeout_ms: 10_000,
        ..BackendParameters::default()
    }
}

/// Temporary output directory plus parameters pointing at it.
pub fn temp_params() -> (TempDir, BackendParameters) {
    let dir = TempDir::new().unwrap();
    let params = params_in(dir.path());
    (dir, params)
}

// ============================================================================
// Driving units
// ============================================================================

/// Open every unit of `coordinator` on its own thread and run `body` on it.
///
/// Opening is collective, so each unit is opened from the thread that
/// drives it. Results come back in thread order.
pub fn run_units<F, T>(coordinator: &Arc<RecordingCoordinator>, body: F) -> Vec<T>
where
    F: Fn(&mut UnitRecorder) -> T + Sync,
    T: Send,
{
    let body = &body;
    thread::scope(|scope| {
        let handles: Vec<_> = (0..coordinator.threads())
            .map(|thread| {
                let coordinator = Arc::clone(coordinator);
                scope.spawn(move || {
                    let mut unit = coordinator.open_unit(thread).unwrap();
                    body(&mut unit)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// Simulate `ranks` processes with `threads` units each, all sharing `io`.
///
/// Every rank initializes its own coordinator, then runs `body` on each of
/// its units. Returns the coordinators in rank order.
pub fn run_cluster<F>(
    ranks: u32,
    threads: u32,
    params: &BackendParameters,
    io: Arc<dyn CollectiveIo>,
    body: F,
) -> Vec<Arc<RecordingCoordinator>>
where
    F: Fn(&mut UnitRecorder) + Sync,
{
    let body = &body;
    thread::scope(|scope| {
        let handles: Vec<_> = LocalCluster::new(ranks)
            .into_iter()
            .map(|process| {
                let io = Arc::clone(&io);
                let params = params.clone();
                scope.spawn(move || {
                    let coordinator =
                        RecordingCoordinator::new(io, Arc::new(process), threads, params).unwrap();
                    coordinator.initialize(clock()).unwrap();
                    run_units(&coordinator, body);
                    coordinator
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// Enroll one multimeter and record `events` readings on it, synchronizing
/// every `sync_every` events, then finalize.
pub fn record_and_finalize(
    unit: &mut UnitRecorder,
    events: i64,
    sync_every: i64,
) -> RecordingResult<u64> {
    let meter = multimeter(device_id(unit.unit(), 1));
    unit.enroll_with_values(&meter, ["V_m"])?;
    for step in 0..events {
        let value = unit.unit().thread as f64 * 1000.0 + step as f64;
        unit.write_values(&meter, &sionrec::Event::new(1, step, 0.0), &[value])?;
        if sync_every > 0 && (step + 1) % sync_every == 0 {
            unit.synchronize()?;
        }
    }
    Ok(unit.finalize()?.records_written)
}
