//! Per-unit device registry
//!
//! Each execution unit keeps its own registry, so lookups on the write path
//! never contend. Devices stay owned by the kernel; the registry snapshots
//! their identity and descriptive fields at enrollment and counts records.

use rustc_hash::FxHashMap;
use sionrec_core::{
    DeviceId, DeviceKind, DeviceMetadata, RecordingDevice, RecordingError, RecordingResult, UnitId,
};
use std::collections::HashSet;
use tracing::{debug, warn};

/// What an enrollment did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enrollment {
    /// First enrollment of the device on this unit
    Added,
    /// Re-enrollment, metadata replaced and record count kept
    Updated,
}

/// Map from device identity to metadata for one execution unit.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    unit: UnitId,
    devices: FxHashMap<DeviceId, DeviceMetadata>,
}

impl DeviceRegistry {
    /// Create an empty registry for `unit`.
    pub fn new(unit: UnitId) -> Self {
        DeviceRegistry {
            unit,
            devices: FxHashMap::default(),
        }
    }

    /// Unit owning this registry.
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// Register `device` with the given value channel names.
    ///
    /// Re-enrolling a known identity replaces kind, name, label and channels
    /// and keeps the record count. Changing the channel count after records
    /// were written is rejected, since earlier records would no longer match
    /// the declared layout.
    pub fn enroll<D, I, S>(&mut self, device: &D, value_names: I) -> RecordingResult<Enrollment>
    where
        D: RecordingDevice + ?Sized,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = device.node_id();
        let value_names: Vec<String> = value_names.into_iter().map(Into::into).collect();
        let kind = device.kind();
        if !kind.is_canonical() {
            let reason = format!(
                "kind code {} is reserved for {}",
                kind.code(),
                DeviceKind::from_code(kind.code())
            );
            return Err(self.rejected(id, reason));
        }
        self.check_channels(id, &value_names)?;

        if let Some(existing) = self.devices.get_mut(&id) {
            if existing.record_count > 0 && existing.channel_count() != value_names.len() {
                let reason = format!(
                    "{} records already written with {} channels, re-enrollment declares {}",
                    existing.record_count,
                    existing.channel_count(),
                    value_names.len()
                );
                return Err(self.rejected(id, reason));
            }
            existing.kind = kind;
            existing.name = device.name().to_string();
            existing.label = device.label().to_string();
            existing.value_names = value_names;
            warn!(
                target: "sionrec::enroll",
                unit = %self.unit,
                device = %id,
                "Device re-enrolled, metadata updated"
            );
            return Ok(Enrollment::Updated);
        }

        debug!(
            target: "sionrec::enroll",
            unit = %self.unit,
            device = %id,
            channels = value_names.len(),
            "Device enrolled"
        );
        self.devices.insert(
            id,
            DeviceMetadata {
                id,
                kind,
                name: device.name().to_string(),
                label: device.label().to_string(),
                value_names,
                record_count: 0,
                unit: self.unit,
            },
        );
        Ok(Enrollment::Added)
    }

    fn check_channels(&self, id: DeviceId, value_names: &[String]) -> RecordingResult<()> {
        let mut seen = HashSet::with_capacity(value_names.len());
        for name in value_names {
            if name.is_empty() {
                return Err(self.rejected(id, "empty value channel name".to_string()));
            }
            if !seen.insert(name.as_str()) {
                return Err(self.rejected(id, format!("duplicate value channel '{}'", name)));
            }
        }
        Ok(())
    }

    fn rejected(&self, device: DeviceId, reason: String) -> RecordingError {
        RecordingError::Enrollment {
            unit: self.unit,
            device,
            reason,
        }
    }

    /// Metadata of an enrolled device.
    pub fn get(&self, id: DeviceId) -> Option<&DeviceMetadata> {
        self.devices.get(&id)
    }

    /// Mutable metadata of an enrolled device, for the write path.
    pub fn get_mut(&mut self, id: DeviceId) -> Option<&mut DeviceMetadata> {
        self.devices.get_mut(&id)
    }

    /// Whether `id` is enrolled.
    pub fn contains(&self, id: DeviceId) -> bool {
        self.devices.contains_key(&id)
    }

    /// Number of enrolled devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether no device is enrolled.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Records written across all devices.
    pub fn total_records(&self) -> u64 {
        self.devices.values().map(|d| d.record_count).sum()
    }

    /// Snapshot of every device, in identity order.
    pub fn snapshot(&self) -> Vec<DeviceMetadata> {
        let mut devices: Vec<DeviceMetadata> = self.devices.values().cloned().collect();
        devices.sort_by_key(|d| d.id);
        devices
    }

    /// Drop every device.
    pub fn clear(&mut self) {
        self.devices.clear();
    }
}
