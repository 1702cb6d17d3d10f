//! Core types and traits for sionrec
//!
//! This crate defines the foundational types shared by the recording pipeline:
//! - DeviceId / UnitId: identities of devices and execution units
//! - DeviceKind: enumerated device type, stored as a numeric code on disk
//! - Event: one timestamped event emitted by a device
//! - DeviceMetadata: enrollment record kept per device and execution unit
//! - RunState / RunClock: lifecycle state and simulation clock of a run
//! - RecordingDevice: the trait external devices implement
//! - RecordingError: the error taxonomy surfaced to callers

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{CollectiveOp, Origin, RecordingError, RecordingResult};
pub use traits::{DeviceDescriptor, RecordingDevice};
pub use types::{DeviceId, DeviceKind, DeviceMetadata, Event, RunClock, RunState, UnitId};
