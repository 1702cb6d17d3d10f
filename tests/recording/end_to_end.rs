//! Single-process runs read back from disk.

use crate::common::*;
use sionrec::{
    BackendParameters, DeviceId, Event, RecordingCoordinator, RecordingReader, RunState,
    SharedFileIo, CONFIG_FILE_NAME,
};
use std::sync::Arc;

#[test]
fn test_multimeter_run_round_trips() {
    init_tracing();
    let (dir, params) = temp_params();
    let io = Arc::new(SharedFileIo::new());
    let coordinator = RecordingCoordinator::single_process(io.clone(), 1, params).unwrap();
    coordinator.initialize(clock()).unwrap();

    let mut unit = coordinator.open_unit(0).unwrap();
    let meter = multimeter(7).with_label("soma");
    unit.enroll_with_values(&meter, ["V_m", "I_syn"]).unwrap();
    for step in 0..100 {
        let event = Event::new(42, step, 0.05);
        unit.write_values(&meter, &event, &[-70.0 + step as f64, step as f64 * 0.5])
            .unwrap();
    }
    unit.synchronize().unwrap();
    let summary = unit.finalize().unwrap();
    assert_eq!(summary.records_written, 100);
    assert_eq!(coordinator.state(), RunState::Finalized);
    assert_eq!(io.open_sessions(), 0);

    let file = RecordingReader::open(dir.path().join("output.sion")).unwrap();
    assert!(file.preamble.is_complete());
    assert!(!file.preamble.is_collective());
    assert_eq!(file.preamble.participant_count, 1);
    assert_eq!(file.preamble.run_id, *coordinator.run_id().as_bytes());

    let metadata = file.metadata.as_ref().unwrap();
    assert_eq!(metadata.resolution, 0.1);
    assert_eq!(metadata.process_count, 1);
    let device = metadata.device(DeviceId::new(7)).unwrap();
    assert_eq!(device.label, "soma");
    assert_eq!(device.value_names, vec!["V_m".to_string(), "I_syn".to_string()]);
    assert_eq!(device.record_count, 100);

    let records = file.records_for_device(DeviceId::new(7));
    assert_eq!(records.len(), 100);
    for (step, record) in records.iter().enumerate() {
        assert_eq!(record.event(), Event::new(42, step as i64, 0.05));
        assert_eq!(record.values, vec![-70.0 + step as f64, step as f64 * 0.5]);
    }
    file.verify_record_counts().unwrap();
}

#[test]
fn test_each_synchronize_appends_a_block() {
    init_tracing();
    let (dir, params) = temp_params();
    let coordinator =
        RecordingCoordinator::single_process(Arc::new(SharedFileIo::new()), 1, params).unwrap();
    coordinator.initialize(clock()).unwrap();

    let mut unit = coordinator.open_unit(0).unwrap();
    let written = record_and_finalize(&mut unit, 50, 10).unwrap();
    assert_eq!(written, 50);

    let file = RecordingReader::open(dir.path().join("output.sion")).unwrap();
    // Five full synchronizes; finalize finds an empty buffer.
    assert_eq!(file.blocks.len(), 5);
    let steps: Vec<i64> = file.records().map(|r| r.step).collect();
    assert_eq!(steps, (0..50).collect::<Vec<_>>());
}

#[test]
fn test_spike_recorder_without_values() {
    init_tracing();
    let (dir, params) = temp_params();
    let coordinator =
        RecordingCoordinator::single_process(Arc::new(SharedFileIo::new()), 1, params).unwrap();
    coordinator.initialize(clock()).unwrap();

    let mut unit = coordinator.open_unit(0).unwrap();
    let spikes = spike_recorder(3);
    unit.enroll(&spikes).unwrap();
    for sender in 1..=20u64 {
        unit.write(&spikes, &Event::new(sender, 5, 0.0)).unwrap();
    }
    unit.finalize().unwrap();

    let file = RecordingReader::open(dir.path().join("output.sion")).unwrap();
    let senders: Vec<u64> = file.records().map(|r| r.sender).collect();
    assert_eq!(senders, (1..=20).collect::<Vec<_>>());
    assert!(file.records().all(|r| r.values.is_empty()));
    file.verify_record_counts().unwrap();
}

#[test]
fn test_enrolled_device_without_records_is_listed() {
    init_tracing();
    let (dir, params) = temp_params();
    let coordinator =
        RecordingCoordinator::single_process(Arc::new(SharedFileIo::new()), 1, params).unwrap();
    coordinator.initialize(clock()).unwrap();

    let mut unit = coordinator.open_unit(0).unwrap();
    unit.enroll_with_values(&multimeter(11), ["V_m"]).unwrap();
    unit.finalize().unwrap();

    let file = RecordingReader::open(dir.path().join("output.sion")).unwrap();
    assert!(file.blocks.is_empty());
    let metadata = file.metadata.unwrap();
    assert_eq!(metadata.devices.len(), 1);
    assert_eq!(metadata.devices[0].record_count, 0);
}

#[test]
fn test_config_file_drives_output_name() {
    init_tracing();
    let dir = tempfile::TempDir::new().unwrap();
    let config_path = dir.path().join(CONFIG_FILE_NAME);
    let out = dir.path().join("out");
    std::fs::write(
        &config_path,
        format!(
            "file_ext = \"dat\"\ndata_prefix = \"trial_\"\ndata_path = \"{}\"\nbuffer_size = 256\n",
            out.display()
        ),
    )
    .unwrap();

    let params = BackendParameters::from_file(&config_path).unwrap();
    assert_eq!(params.buffer_size, 256);
    let coordinator =
        RecordingCoordinator::single_process(Arc::new(SharedFileIo::new()), 1, params).unwrap();
    coordinator.initialize(clock()).unwrap();
    let expected = out.join("trial_output.dat");
    assert_eq!(coordinator.get_status().filename, Some(expected.clone()));

    let mut unit = coordinator.open_unit(0).unwrap();
    record_and_finalize(&mut unit, 3, 0).unwrap();
    assert_eq!(RecordingReader::open(&expected).unwrap().record_count(), 3);
}

#[test]
fn test_second_run_replaces_file() {
    init_tracing();
    let (dir, params) = temp_params();
    let coordinator =
        RecordingCoordinator::single_process(Arc::new(SharedFileIo::new()), 1, params).unwrap();

    coordinator.initialize(clock()).unwrap();
    let mut unit = coordinator.open_unit(0).unwrap();
    record_and_finalize(&mut unit, 30, 0).unwrap();
    let first_run = coordinator.run_id();

    coordinator.initialize(clock()).unwrap();
    assert_ne!(coordinator.run_id(), first_run);
    let mut unit = coordinator.open_unit(0).unwrap();
    record_and_finalize(&mut unit, 4, 0).unwrap();

    let file = RecordingReader::open(dir.path().join("output.sion")).unwrap();
    assert_eq!(file.record_count(), 4);
    assert_eq!(file.preamble.run_id, *coordinator.run_id().as_bytes());
}
