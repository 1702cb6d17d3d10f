//! Simulated process groups sharing or splitting output files.

use crate::common::*;
use sionrec::{
    BackendParameters, CollectiveIo, DeviceId, Event, RecordingReader, RunState, SharedFileIo,
    UnitId,
};
use std::sync::Arc;

#[test]
fn test_collective_cluster_writes_one_file() {
    init_tracing();
    let (dir, params) = temp_params();
    let params = BackendParameters {
        collective: true,
        ..params
    };
    let io: Arc<dyn CollectiveIo> = Arc::new(SharedFileIo::new());

    let coordinators = run_cluster(3, 2, &params, io, |unit| {
        record_and_finalize(unit, 25, 5).unwrap();
    });
    assert!(coordinators
        .iter()
        .all(|c| c.state() == RunState::Finalized));
    let run_id = coordinators[0].run_id();
    assert!(coordinators.iter().all(|c| c.run_id() == run_id));

    let file = RecordingReader::open(dir.path().join("output.sion")).unwrap();
    assert_eq!(file.preamble.process_count, 3);
    assert_eq!(file.preamble.participant_count, 6);
    assert_eq!(file.preamble.run_id, *run_id.as_bytes());
    assert_eq!(file.record_count(), 150);

    let metadata = file.metadata.as_ref().unwrap();
    assert_eq!(metadata.process_count, 3);
    assert_eq!(metadata.devices.len(), 6);
    let units: Vec<UnitId> = metadata.devices.iter().map(|d| d.unit).collect();
    let mut sorted = units.clone();
    sorted.sort();
    assert_eq!(units, sorted, "metadata lists devices by unit");

    for rank in 0..3 {
        for thread in 0..2 {
            let unit = UnitId::new(rank, thread);
            let device = DeviceId::new(device_id(unit, 1));
            assert_eq!(metadata.device(device).unwrap().record_count, 25);
            assert_eq!(file.records_for_unit(unit).len(), 25);
        }
    }
    file.verify_record_counts().unwrap();
}

#[test]
fn test_num_files_splits_process_group() {
    init_tracing();
    let (dir, params) = temp_params();
    let params = BackendParameters {
        num_files: 2,
        ..params
    };
    let io: Arc<dyn CollectiveIo> = Arc::new(SharedFileIo::new());

    let coordinators = run_cluster(4, 1, &params, io, |unit| {
        let rank = unit.unit().rank as i64;
        record_and_finalize(unit, 10 + rank, 0).unwrap();
    });
    let statuses: Vec<_> = coordinators.iter().map(|c| c.get_status()).collect();
    assert_eq!(statuses[0].filename, statuses[1].filename);
    assert_ne!(statuses[1].filename, statuses[2].filename);

    let first = RecordingReader::open(dir.path().join("output-0000.sion")).unwrap();
    let second = RecordingReader::open(dir.path().join("output-0001.sion")).unwrap();

    assert_eq!(first.preamble.process_count, 2);
    assert_eq!(first.units(), vec![UnitId::new(0, 0), UnitId::new(1, 0)]);
    assert_eq!(first.record_count(), 10 + 11);
    assert_eq!(second.units(), vec![UnitId::new(2, 0), UnitId::new(3, 0)]);
    assert_eq!(second.record_count(), 12 + 13);

    for (index, file) in [&first, &second].into_iter().enumerate() {
        let metadata = file.metadata.as_ref().unwrap();
        assert_eq!(metadata.file_group, index as u32);
        assert_eq!(metadata.file_group_count, 2);
        assert_eq!(metadata.process_count, 4);
        assert_eq!(metadata.devices.len(), 2, "only devices of the group's ranks");
        file.verify_record_counts().unwrap();
    }
}

#[test]
fn test_devices_on_one_rank_only() {
    init_tracing();
    let (dir, params) = temp_params();
    let io: Arc<dyn CollectiveIo> = Arc::new(SharedFileIo::new());

    run_cluster(2, 2, &params, io, |unit| {
        if unit.unit() == UnitId::new(1, 1) {
            let recorder = spike_recorder(99);
            unit.enroll(&recorder).unwrap();
            for step in 0..7 {
                unit.write(&recorder, &Event::new(3, step, 0.0)).unwrap();
            }
        }
        unit.finalize().unwrap();
    });

    let file = RecordingReader::open(dir.path().join("output.sion")).unwrap();
    let metadata = file.metadata.as_ref().unwrap();
    assert_eq!(metadata.devices.len(), 1);
    assert_eq!(metadata.devices[0].unit, UnitId::new(1, 1));
    assert_eq!(file.records_for_device(DeviceId::new(99)).len(), 7);
}
