//! Error types for the recording pipeline
//!
//! This module defines the error taxonomy surfaced to callers.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Collective I/O, lifecycle and I/O errors are fatal for a run: they are
//! never retried or masked by the backend.

use crate::types::{DeviceId, RunState, UnitId};
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias for recording operations
pub type RecordingResult<T> = std::result::Result<T, RecordingError>;

/// Where an error was detected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Process-wide operation on the given rank
    Process(u32),
    /// Operation of a single execution unit
    Unit(UnitId),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Process(rank) => write!(f, "rank {}", rank),
            Origin::Unit(unit) => write!(f, "{}", unit),
        }
    }
}

impl From<UnitId> for Origin {
    fn from(unit: UnitId) -> Self {
        Origin::Unit(unit)
    }
}

/// Collective operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectiveOp {
    /// Collective open of the shared file
    Open,
    /// Buffered write of a unit's records
    Write,
    /// Write of the run metadata header
    WriteMetadata,
    /// Collective close
    Close,
    /// Release of a session without the collective close
    Abort,
    /// Process group barrier
    Barrier,
    /// Process group broadcast
    Broadcast,
    /// Process group all-gather
    Gather,
}

impl fmt::Display for CollectiveOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CollectiveOp::Open => "open",
            CollectiveOp::Write => "write",
            CollectiveOp::WriteMetadata => "metadata write",
            CollectiveOp::Close => "close",
            CollectiveOp::Abort => "abort",
            CollectiveOp::Barrier => "barrier",
            CollectiveOp::Broadcast => "broadcast",
            CollectiveOp::Gather => "gather",
        };
        f.write_str(name)
    }
}

/// Error types for the recording backend
#[derive(Debug, Error)]
pub enum RecordingError {
    /// Invalid parameter or parameter combination
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Duplicate or malformed registration
    #[error("Enrollment of device {device} on {unit} rejected: {reason}")]
    Enrollment {
        /// Unit performing the enrollment
        unit: UnitId,
        /// Device being enrolled
        device: DeviceId,
        /// Why the enrollment was rejected
        reason: String,
    },

    /// Write for a device that was never enrolled on this unit
    #[error("Device {device} is not enrolled on {unit}")]
    UnenrolledDevice {
        /// Unit performing the write
        unit: UnitId,
        /// Unknown device
        device: DeviceId,
    },

    /// Write carried a different number of values than the device declared
    #[error("Device {device} on {unit} declares {expected} value channels, write carried {actual}")]
    ValueCountMismatch {
        /// Unit performing the write
        unit: UnitId,
        /// Device written to
        device: DeviceId,
        /// Declared channel count
        expected: usize,
        /// Values supplied
        actual: usize,
    },

    /// Buffer growth failed
    #[error("Buffer allocation failed on {unit}: requested {requested} bytes (capacity {capacity})")]
    Allocation {
        /// Unit owning the buffer
        unit: UnitId,
        /// Capacity that could not be allocated
        requested: usize,
        /// Capacity at the time of the failure
        capacity: usize,
    },

    /// Collective open/write/close failure or participation mismatch
    #[error("Collective {operation} failed on {origin}: {detail}")]
    CollectiveIo {
        /// Where the failure was detected
        origin: Origin,
        /// Operation that failed
        operation: CollectiveOp,
        /// Description from the I/O layer
        detail: String,
    },

    /// Operation called outside its valid state
    #[error("Cannot {operation} on {origin} while {state}")]
    Lifecycle {
        /// Where the call was made
        origin: Origin,
        /// Operation that was attempted
        operation: &'static str,
        /// State at the time of the call
        state: RunState,
    },

    /// I/O error outside a collective operation
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Produced data failed validation
    #[error("Data corruption: {0}")]
    Corruption(String),
}

impl RecordingError {
    /// Create a lifecycle error
    pub fn lifecycle(origin: impl Into<Origin>, operation: &'static str, state: RunState) -> Self {
        RecordingError::Lifecycle {
            origin: origin.into(),
            operation,
            state,
        }
    }

    /// Create a collective I/O error
    pub fn collective(
        origin: impl Into<Origin>,
        operation: CollectiveOp,
        detail: impl fmt::Display,
    ) -> Self {
        RecordingError::CollectiveIo {
            origin: origin.into(),
            operation,
            detail: detail.to_string(),
        }
    }

    /// Whether the error aborts the run.
    ///
    /// Fatal errors leave the shared file in an undefined state for all
    /// participants; the caller must stop recording.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RecordingError::CollectiveIo { .. }
                | RecordingError::Lifecycle { .. }
                | RecordingError::Io(_)
                | RecordingError::Corruption(_)
                | RecordingError::Allocation { .. }
        )
    }
}
