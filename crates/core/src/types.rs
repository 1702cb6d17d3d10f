//! Core types for the recording pipeline
//!
//! This module defines the foundational types:
//! - DeviceId: process-wide unique identity of a recording device
//! - UnitId: execution unit (rank + thread) owning one buffer/session pair
//! - DeviceKind: device type discriminator with a stable numeric code
//! - Event: a single event handed to the backend by the kernel
//! - DeviceMetadata: enrollment record for one device
//! - RunState / RunClock: run lifecycle and simulation clock

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identity of a recording device
///
/// Device identities are assigned by the simulation kernel and are unique
/// across all processes of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub u64);

impl DeviceId {
    /// Create a device id from its raw value
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw id value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for DeviceId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Identity of an execution unit
///
/// An execution unit is one thread of one process. Each unit owns exactly
/// one buffer and one file session for the duration of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitId {
    /// Rank of the owning process within the process group
    pub rank: u32,
    /// Thread index within the owning process
    pub thread: u32,
}

impl UnitId {
    /// Create a unit id
    pub const fn new(rank: u32, thread: u32) -> Self {
        Self { rank, thread }
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rank {}/thread {}", self.rank, self.thread)
    }
}

/// Kind of recording device
///
/// Stored on disk as a numeric code, see [`DeviceKind::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Records spike events only (no value channels)
    SpikeRecorder,
    /// Samples analog state variables at fixed intervals
    Multimeter,
    /// Records synaptic weights on transmission
    WeightRecorder,
    /// Any other device kind, identified by its raw code.
    ///
    /// Codes 1 to 3 belong to the named variants and would decode as those,
    /// so an `Other` carrying one is rejected at enrollment. Build it with
    /// [`DeviceKind::other`].
    Other(u32),
}

impl DeviceKind {
    /// Numeric code written to the metadata header.
    pub fn code(&self) -> u32 {
        match self {
            DeviceKind::SpikeRecorder => 1,
            DeviceKind::Multimeter => 2,
            DeviceKind::WeightRecorder => 3,
            DeviceKind::Other(code) => *code,
        }
    }

    /// Decode a numeric code. Known codes always map to their named variant.
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => DeviceKind::SpikeRecorder,
            2 => DeviceKind::Multimeter,
            3 => DeviceKind::WeightRecorder,
            other => DeviceKind::Other(other),
        }
    }

    /// Kind with a custom code, or `None` if a named variant owns the code.
    pub fn other(code: u32) -> Option<Self> {
        match DeviceKind::from_code(code) {
            DeviceKind::Other(code) => Some(DeviceKind::Other(code)),
            _ => None,
        }
    }

    /// Whether the kind decodes back to itself from its code.
    pub fn is_canonical(&self) -> bool {
        DeviceKind::from_code(self.code()) == *self
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::SpikeRecorder => write!(f, "spike_recorder"),
            DeviceKind::Multimeter => write!(f, "multimeter"),
            DeviceKind::WeightRecorder => write!(f, "weight_recorder"),
            DeviceKind::Other(code) => write!(f, "other({})", code),
        }
    }
}

/// A single event emitted by a device
///
/// Time is expressed the way the kernel expresses it: an integral step on
/// the simulation grid plus a sub-step offset in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Identity of the node that produced the event
    pub sender: u64,
    /// Simulation step of the event
    pub step: i64,
    /// Offset within the step in milliseconds
    pub offset: f64,
}

impl Event {
    /// Create an event
    pub fn new(sender: u64, step: i64, offset: f64) -> Self {
        Self {
            sender,
            step,
            offset,
        }
    }

    /// Event time in milliseconds for the given resolution.
    pub fn time_ms(&self, resolution_ms: f64) -> f64 {
        self.step as f64 * resolution_ms - self.offset
    }
}

/// Metadata recorded for each enrolled device
///
/// Created at enrollment; `record_count` grows on every write. The entry is
/// never removed during a run and is dropped when a new run is initialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMetadata {
    /// Device identity
    pub id: DeviceId,
    /// Device kind
    pub kind: DeviceKind,
    /// Model name of the device
    pub name: String,
    /// User supplied label
    pub label: String,
    /// Ordered names of the value channels carried by each record
    pub value_names: Vec<String>,
    /// Number of records written so far
    pub record_count: u64,
    /// Execution unit the device was enrolled on
    pub unit: UnitId,
}

impl DeviceMetadata {
    /// Number of values carried by every record of this device.
    pub fn channel_count(&self) -> usize {
        self.value_names.len()
    }
}

/// Lifecycle state of a recording run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// No run has been initialized
    Uninitialized,
    /// Files are being opened, no device enrolled yet
    Initialized,
    /// Devices are enrolled and events are being written
    Running,
    /// The run was finalized, files are closed
    Finalized,
    /// A fatal failure ended the run
    Aborted,
}

impl RunState {
    /// Whether a run is in progress (parameters are frozen).
    pub fn is_active(&self) -> bool {
        matches!(self, RunState::Initialized | RunState::Running)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Uninitialized => write!(f, "uninitialized"),
            RunState::Initialized => write!(f, "initialized"),
            RunState::Running => write!(f, "running"),
            RunState::Finalized => write!(f, "finalized"),
            RunState::Aborted => write!(f, "aborted"),
        }
    }
}

/// Simulation clock of a run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunClock {
    /// Simulation time at which recording starts, in milliseconds
    pub start_ms: f64,
    /// Simulation resolution (step length) in milliseconds
    pub resolution_ms: f64,
}

impl RunClock {
    /// Create a clock
    pub fn new(start_ms: f64, resolution_ms: f64) -> Self {
        Self {
            start_ms,
            resolution_ms,
        }
    }
}

impl Default for RunClock {
    fn default() -> Self {
        Self {
            start_ms: 0.0,
            resolution_ms: 0.1,
        }
    }
}
