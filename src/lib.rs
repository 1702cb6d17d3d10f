//! sionrec - buffered collective recording backend
//!
//! Collects events produced by recording devices on many threads and
//! processes and writes them into a few shared, self-describing binary files.
//!
//! # Quick Start
//!
//! ```ignore
//! use sionrec::{BackendParameters, RecordingCoordinator, SharedFileIo, RunClock};
//! use sionrec::{DeviceDescriptor, DeviceKind, Event};
//! use std::sync::Arc;
//!
//! let io = Arc::new(SharedFileIo::new());
//! let coordinator = RecordingCoordinator::single_process(io, 1, BackendParameters::default())?;
//! coordinator.initialize(RunClock::default())?;
//!
//! let mut unit = coordinator.open_unit(0)?;
//! let meter = DeviceDescriptor::new(7u64, DeviceKind::Multimeter, "multimeter");
//! unit.enroll_with_values(&meter, ["V_m"])?;
//! unit.write_values(&meter, &Event::new(1, 10, 0.0), &[-70.0])?;
//! unit.finalize()?;
//! ```
//!
//! # Architecture
//!
//! - `sionrec-core`: shared types, the device trait, the error taxonomy
//! - `sionrec-durability`: byte buffer, file format, collective I/O, process
//!   groups, reader
//! - `sionrec-engine`: coordinator, unit recorders, configuration

pub use sionrec_core::*;
pub use sionrec_durability::{
    BlockKind, CollectiveIo, CollectiveIoError, DataBlock, FaultPoint, FilePreamble, GroupError,
    LocalCluster, LocalProcess, MemoryCollective, MemoryFile, OpenRequest, ProcessGroup,
    ReadError, Record, RecordingFile, RecordingReader, RunMetadata, SessionId, SharedFileIo,
    SingleProcess, TypedByteBuffer,
};
pub use sionrec_engine::*;
