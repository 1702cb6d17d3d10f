//! Device abstraction consumed by the recording backend
//!
//! Devices are owned by the simulation kernel. The backend only reads their
//! identity and descriptive fields at enrollment time.

use crate::types::{DeviceId, DeviceKind};

/// A device whose events are recorded
///
/// Implemented by the kernel's device types. Thread safety is not required:
/// a device is only handed to the execution unit it lives on.
pub trait RecordingDevice {
    /// Process-wide unique identity
    fn node_id(&self) -> DeviceId;

    /// Kind of device
    fn kind(&self) -> DeviceKind;

    /// Model name (e.g. "multimeter")
    fn name(&self) -> &str;

    /// User supplied label, empty when unset
    fn label(&self) -> &str {
        ""
    }
}

/// Plain-data device description
///
/// Useful when the caller has no device object at hand (tools, tests,
/// replaying a recorded configuration).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Device identity
    pub id: DeviceId,
    /// Device kind
    pub kind: DeviceKind,
    /// Model name
    pub name: String,
    /// Label
    pub label: String,
}

impl DeviceDescriptor {
    /// Create a descriptor with an empty label
    pub fn new(id: impl Into<DeviceId>, kind: DeviceKind, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            label: String::new(),
        }
    }

    /// Set the label (builder pattern)
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

impl RecordingDevice for DeviceDescriptor {
    fn node_id(&self) -> DeviceId {
        self.id
    }

    fn kind(&self) -> DeviceKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn label(&self) -> &str {
        &self.label
    }
}
