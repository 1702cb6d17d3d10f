//! Several execution units of one process sharing a file.

use crate::common::*;
use sionrec::{
    BackendParameters, DeviceId, Event, RecordingCoordinator, RecordingReader, RunState,
    SharedFileIo, UnitId,
};
use std::collections::BTreeMap;
use std::sync::Arc;

fn coordinator(threads: u32, params: BackendParameters) -> Arc<RecordingCoordinator> {
    let coordinator =
        RecordingCoordinator::single_process(Arc::new(SharedFileIo::new()), threads, params)
            .unwrap();
    coordinator.initialize(clock()).unwrap();
    coordinator
}

#[test]
fn test_two_units_with_disjoint_devices() {
    init_tracing();
    let (dir, params) = temp_params();
    let coordinator = coordinator(2, params);

    let summaries = run_units(&coordinator, |unit| {
        let meter = multimeter(device_id(unit.unit(), 1));
        unit.enroll_with_values(&meter, ["V_m"]).unwrap();
        for step in 0..50 {
            unit.write_values(&meter, &Event::new(1, step, 0.0), &[step as f64])
                .unwrap();
        }
        unit.synchronize().unwrap();
        unit.finalize().unwrap()
    });
    assert!(summaries.iter().all(|s| s.records_written == 50));
    assert_eq!(coordinator.state(), RunState::Finalized);
    assert_eq!(coordinator.records_written(), 100);

    let file = RecordingReader::open(dir.path().join("output.sion")).unwrap();
    assert_eq!(file.preamble.participant_count, 2);
    assert_eq!(file.units(), vec![UnitId::new(0, 0), UnitId::new(0, 1)]);
    assert_eq!(file.metadata.as_ref().unwrap().devices.len(), 2);

    for thread in 0..2 {
        let unit = UnitId::new(0, thread);
        let device = DeviceId::new(device_id(unit, 1));
        let records = file.records_for_unit(unit);
        assert_eq!(records.len(), 50);
        assert!(records.iter().all(|r| r.device == device));
        let steps: Vec<i64> = records.iter().map(|r| r.step).collect();
        assert_eq!(steps, (0..50).collect::<Vec<_>>(), "per-unit order kept");
    }
    file.verify_record_counts().unwrap();
}

#[test]
fn test_uneven_synchronize_in_independent_mode() {
    init_tracing();
    let (dir, params) = temp_params();
    let coordinator = coordinator(4, params);

    let written = run_units(&coordinator, |unit| {
        let thread = unit.unit().thread as i64;
        record_and_finalize(unit, 40 + thread * 10, 3 + thread).unwrap()
    });
    assert_eq!(written, vec![40, 50, 60, 70]);

    let file = RecordingReader::open(dir.path().join("output.sion")).unwrap();
    assert_eq!(file.record_count(), 220);

    let mut per_unit: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    for block in &file.blocks {
        for record in &block.records {
            per_unit
                .entry(block.unit.thread)
                .or_default()
                .push(record.values[0]);
        }
    }
    for (thread, values) in per_unit {
        let base = thread as f64 * 1000.0;
        let expected: Vec<f64> = (0..values.len()).map(|i| base + i as f64).collect();
        assert_eq!(values, expected);
    }
    file.verify_record_counts().unwrap();
}

#[test]
fn test_collective_mode_with_idle_units() {
    init_tracing();
    let (dir, params) = temp_params();
    let params = BackendParameters {
        collective: true,
        ..params
    };
    let coordinator = coordinator(3, params);

    run_units(&coordinator, |unit| {
        // Only thread 1 records; the others still join every synchronize.
        if unit.unit().thread == 1 {
            let meter = multimeter(5);
            unit.enroll_with_values(&meter, ["V_m"]).unwrap();
            for round in 0..4 {
                unit.write_values(&meter, &Event::new(1, round, 0.0), &[round as f64])
                    .unwrap();
                unit.synchronize().unwrap();
            }
        } else {
            for _ in 0..4 {
                assert_eq!(unit.synchronize().unwrap(), 0);
            }
        }
        unit.finalize().unwrap();
    });

    let file = RecordingReader::open(dir.path().join("output.sion")).unwrap();
    assert!(file.preamble.is_collective());
    assert_eq!(file.units(), vec![UnitId::new(0, 1)]);
    assert_eq!(file.blocks.len(), 4, "empty collective writes leave no block");
    file.verify_record_counts().unwrap();
}

#[test]
fn test_small_buffers_grow_under_load() {
    init_tracing();
    let (dir, params) = temp_params();
    let params = BackendParameters {
        buffer_size: 8,
        ..params
    };
    let coordinator = coordinator(4, params);

    run_units(&coordinator, |unit| {
        let meter = multimeter(device_id(unit.unit(), 2));
        unit.enroll_with_values(&meter, ["a", "b", "c", "d"]).unwrap();
        for step in 0..500 {
            unit.write_values(&meter, &Event::new(2, step, 0.0), &[1.0, 2.0, 3.0, 4.0])
                .unwrap();
        }
        assert!(unit.buffered_bytes() >= 500 * 68);
        unit.finalize().unwrap();
    });

    let file = RecordingReader::open(dir.path().join("output.sion")).unwrap();
    assert_eq!(file.record_count(), 2000);
    assert!(file
        .records()
        .all(|r| r.values == vec![1.0, 2.0, 3.0, 4.0]));
}
