//! Lifecycle rules, parameter updates and failure handling.

use crate::common::*;
use sionrec::{
    BackendParameters, CollectiveOp, Event, FaultPoint, MemoryCollective, ParameterUpdate,
    RecordingCoordinator, RecordingError, RecordingReader, RunState, SharedFileIo,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn memory_run(threads: u32) -> (Arc<MemoryCollective>, Arc<RecordingCoordinator>) {
    let io = Arc::new(MemoryCollective::new());
    let coordinator =
        RecordingCoordinator::single_process(io.clone(), threads, BackendParameters::default())
            .unwrap();
    coordinator.initialize(clock()).unwrap();
    (io, coordinator)
}

#[test]
fn test_parameters_frozen_while_running() {
    init_tracing();
    let io = Arc::new(MemoryCollective::new());
    let coordinator =
        RecordingCoordinator::single_process(io, 1, BackendParameters::default()).unwrap();

    let update = ParameterUpdate::from_json(r#"{"buffer_size": 4096, "data_prefix": "a_"}"#)
        .unwrap();
    coordinator.set_status(&update).unwrap();
    let status = coordinator.get_status();
    assert_eq!(status.params.buffer_size, 4096);
    assert_eq!(status.state, RunState::Uninitialized);

    coordinator.initialize(clock()).unwrap();
    assert_eq!(
        coordinator.get_status().filename.unwrap().to_str(),
        Some("a_output.sion")
    );
    let mut unit = coordinator.open_unit(0).unwrap();
    unit.enroll(&spike_recorder(1)).unwrap();
    assert!(matches!(
        coordinator.set_status(&update),
        Err(RecordingError::Lifecycle { .. })
    ));

    unit.finalize().unwrap();
    coordinator.set_status(&ParameterUpdate::default()).unwrap();
}

#[test]
fn test_unknown_parameter_rejected() {
    assert!(ParameterUpdate::from_json(r#"{"buffer_sise": 10}"#).is_err());
}

#[test]
fn test_calls_after_finalize_rejected() {
    init_tracing();
    let (_io, coordinator) = memory_run(1);
    let mut unit = coordinator.open_unit(0).unwrap();
    let meter = multimeter(4);
    unit.enroll_with_values(&meter, ["V_m"]).unwrap();
    unit.finalize().unwrap();

    assert!(matches!(
        unit.write_values(&meter, &Event::new(1, 1, 0.0), &[0.0]),
        Err(RecordingError::Lifecycle {
            state: RunState::Finalized,
            ..
        })
    ));
    assert!(matches!(
        unit.synchronize(),
        Err(RecordingError::Lifecycle { .. })
    ));
    assert!(matches!(unit.finalize(), Err(RecordingError::Lifecycle { .. })));
    assert!(matches!(
        coordinator.open_unit(0),
        Err(RecordingError::Lifecycle { .. })
    ));
}

#[test]
fn test_write_failure_aborts_run() {
    init_tracing();
    let (io, coordinator) = memory_run(1);
    let mut unit = coordinator.open_unit(0).unwrap();
    let meter = multimeter(4);
    unit.enroll_with_values(&meter, ["V_m"]).unwrap();
    unit.write_values(&meter, &Event::new(1, 1, 0.0), &[1.0]).unwrap();

    io.fail_on(FaultPoint::Write);
    let err = unit.synchronize().unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(
        err,
        RecordingError::CollectiveIo {
            operation: CollectiveOp::Write,
            ..
        }
    ));
    assert_eq!(unit.state(), RunState::Aborted);
    assert_eq!(coordinator.state(), RunState::Aborted);
    assert!(matches!(
        unit.write_values(&meter, &Event::new(1, 2, 0.0), &[1.0]),
        Err(RecordingError::Lifecycle { .. })
    ));

    // The process can start over once the fault is gone.
    io.clear_fault();
    coordinator.initialize(clock()).unwrap();
    let mut unit = coordinator.open_unit(0).unwrap();
    unit.enroll_with_values(&meter, ["V_m"]).unwrap();
    unit.write_values(&meter, &Event::new(1, 1, 0.0), &[1.0]).unwrap();
    unit.finalize().unwrap();
    assert_eq!(coordinator.state(), RunState::Finalized);
}

#[test]
fn test_close_failure_reported_by_finalize() {
    init_tracing();
    let (io, coordinator) = memory_run(1);
    let mut unit = coordinator.open_unit(0).unwrap();
    unit.enroll(&spike_recorder(2)).unwrap();

    io.fail_on(FaultPoint::Close);
    assert!(matches!(
        unit.finalize(),
        Err(RecordingError::CollectiveIo {
            operation: CollectiveOp::Close,
            ..
        })
    ));
    assert_eq!(coordinator.state(), RunState::Aborted);
}

#[test]
fn test_open_failure_aborts_run() {
    init_tracing();
    let (io, coordinator) = memory_run(1);
    io.fail_on(FaultPoint::Open);
    assert!(matches!(
        coordinator.open_unit(0),
        Err(RecordingError::CollectiveIo {
            operation: CollectiveOp::Open,
            ..
        })
    ));
    assert_eq!(coordinator.state(), RunState::Aborted);
}

#[test]
fn test_missing_unit_times_out_then_recovers() {
    init_tracing();
    let (dir, params) = temp_params();
    let params = BackendParameters {
        rendezvous_timeout_ms: 100,
        ..params
    };
    let coordinator =
        RecordingCoordinator::single_process(Arc::new(SharedFileIo::new()), 2, params).unwrap();
    coordinator.initialize(clock()).unwrap();

    // Thread 1 never shows up.
    let err = coordinator.open_unit(0).unwrap_err();
    assert!(matches!(
        err,
        RecordingError::CollectiveIo {
            operation: CollectiveOp::Open,
            ..
        }
    ));
    assert_eq!(coordinator.state(), RunState::Aborted);

    coordinator.initialize(clock()).unwrap();
    let written = run_units(&coordinator, |unit| record_and_finalize(unit, 5, 0).unwrap());
    assert_eq!(written, vec![5, 5]);
    let file = RecordingReader::open(dir.path().join("output.sion")).unwrap();
    assert_eq!(file.record_count(), 10);
}

#[test]
fn test_collective_synchronize_mismatch_times_out() {
    init_tracing();
    let (_dir, params) = temp_params();
    let params = BackendParameters {
        collective: true,
        rendezvous_timeout_ms: 100,
        ..params
    };
    let coordinator =
        RecordingCoordinator::single_process(Arc::new(SharedFileIo::new()), 2, params).unwrap();
    coordinator.initialize(clock()).unwrap();

    let outcomes = run_units(&coordinator, |unit| {
        if unit.unit().thread == 0 {
            // One extra collective write nobody else joins.
            unit.synchronize().map(|_| ())
        } else {
            Ok(())
        }
    });
    assert!(outcomes[0].is_err());
    assert_eq!(coordinator.state(), RunState::Aborted);
}

/// Two units writing into a shared file with a short rendezvous timeout.
fn impatient_shared_run() -> (tempfile::TempDir, Arc<SharedFileIo>, Arc<RecordingCoordinator>) {
    let (dir, params) = temp_params();
    let params = BackendParameters {
        rendezvous_timeout_ms: 200,
        ..params
    };
    let io = Arc::new(SharedFileIo::new());
    let coordinator = RecordingCoordinator::single_process(io.clone(), 2, params).unwrap();
    coordinator.initialize(clock()).unwrap();
    (dir, io, coordinator)
}

fn assert_next_run_succeeds(
    dir: &tempfile::TempDir,
    io: &SharedFileIo,
    coordinator: &Arc<RecordingCoordinator>,
) {
    coordinator.initialize(clock()).unwrap();
    let written = run_units(coordinator, |unit| record_and_finalize(unit, 6, 2).unwrap());
    assert_eq!(written, vec![6, 6]);
    assert_eq!(coordinator.state(), RunState::Finalized);
    assert_eq!(io.open_sessions(), 0);

    let file = RecordingReader::open(dir.path().join("output.sion")).unwrap();
    assert_eq!(file.preamble.run_id, *coordinator.run_id().as_bytes());
    assert_eq!(file.record_count(), 12);
    file.verify_record_counts().unwrap();
}

#[test]
fn test_finalize_barrier_timeout_releases_file_for_next_run() {
    init_tracing();
    let (dir, io, coordinator) = impatient_shared_run();

    let outcomes = run_units(&coordinator, |unit| {
        if unit.unit().thread == 0 {
            unit.enroll(&spike_recorder(1))
                .and_then(|()| unit.finalize())
                .map(|_| ())
        } else {
            // Stays open past the exchange timeout without finalizing.
            thread::sleep(Duration::from_millis(500));
            Ok(())
        }
    });
    assert!(matches!(
        outcomes[0],
        Err(RecordingError::CollectiveIo {
            operation: CollectiveOp::Barrier,
            ..
        })
    ));
    assert_eq!(coordinator.state(), RunState::Aborted);
    assert_eq!(io.open_sessions(), 0, "no session of the aborted run survives");

    assert_next_run_succeeds(&dir, &io, &coordinator);
}

#[test]
fn test_dropped_unit_aborts_run_and_releases_file() {
    init_tracing();
    let (dir, io, coordinator) = impatient_shared_run();

    let outcomes = run_units(&coordinator, |unit| {
        if unit.unit().thread == 0 {
            unit.enroll(&spike_recorder(1))
                .and_then(|()| unit.finalize())
                .map(|_| ())
        } else {
            // Returning drops the unit without finalize.
            Ok(())
        }
    });
    let err = outcomes[0].as_ref().unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(coordinator.state(), RunState::Aborted);
    assert_eq!(io.open_sessions(), 0);

    assert_next_run_succeeds(&dir, &io, &coordinator);
}
