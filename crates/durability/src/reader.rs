//! Recording file reader.
//!
//! Reads a complete file into memory, verifies every block checksum and the
//! metadata offset recorded in the preamble, and decodes the records. Used by
//! tests and by tooling that inspects finished runs.

use crate::format::{
    decode_block, decode_records, BlockKind, FilePreamble, FormatError, Record, RunMetadata,
    PREAMBLE_SIZE,
};
use sionrec_core::{DeviceId, UnitId};
use std::collections::BTreeMap;
use std::path::Path;

/// Errors raised while reading a recording file.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// File could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File contents are malformed
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    /// Preamble points somewhere other than the metadata block
    #[error("Metadata offset mismatch: preamble says {recorded}, block found at {actual:?}")]
    MetadataOffsetMismatch {
        /// Offset recorded in the preamble
        recorded: u64,
        /// Offset of the metadata block, if any
        actual: Option<u64>,
    },

    /// More than one metadata block
    #[error("Duplicate metadata block at offset {0}")]
    DuplicateMetadata(u64),

    /// Record count in the metadata disagrees with the data blocks
    #[error("Device {device}: metadata lists {listed} records, file holds {found}")]
    RecordCountMismatch {
        /// Device
        device: DeviceId,
        /// Count in the metadata
        listed: u64,
        /// Count found in data blocks
        found: u64,
    },

    /// Data blocks reference a device missing from the metadata
    #[error("Device {0} has records but no metadata entry")]
    UnknownDevice(DeviceId),
}

/// One decoded data block.
#[derive(Debug, Clone, PartialEq)]
pub struct DataBlock {
    /// Unit that wrote the block
    pub unit: UnitId,
    /// Offset of the block header in the file
    pub offset: u64,
    /// Records in write order
    pub records: Vec<Record>,
}

/// A decoded recording file.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingFile {
    /// File preamble
    pub preamble: FilePreamble,
    /// Run metadata, absent if the run never finalized
    pub metadata: Option<RunMetadata>,
    /// Data blocks in file order
    pub blocks: Vec<DataBlock>,
}

impl RecordingFile {
    /// Units that wrote at least one data block, ascending.
    pub fn units(&self) -> Vec<UnitId> {
        let mut units: Vec<UnitId> = self.blocks.iter().map(|b| b.unit).collect();
        units.sort();
        units.dedup();
        units
    }

    /// Every record in file order.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.blocks.iter().flat_map(|b| b.records.iter())
    }

    /// Records written by `unit`, in write order.
    pub fn records_for_unit(&self, unit: UnitId) -> Vec<&Record> {
        self.blocks
            .iter()
            .filter(|b| b.unit == unit)
            .flat_map(|b| b.records.iter())
            .collect()
    }

    /// Records of `device`, in write order.
    pub fn records_for_device(&self, device: DeviceId) -> Vec<&Record> {
        self.records().filter(|r| r.device == device).collect()
    }

    /// Total number of records.
    pub fn record_count(&self) -> usize {
        self.blocks.iter().map(|b| b.records.len()).sum()
    }

    /// Check the metadata against the data blocks.
    ///
    /// Every device with records must be listed, and every listed record
    /// count must match the records found.
    pub fn verify_record_counts(&self) -> Result<(), ReadError> {
        let metadata = match &self.metadata {
            Some(metadata) => metadata,
            None => return Ok(()),
        };

        let mut found: BTreeMap<DeviceId, u64> = BTreeMap::new();
        for record in self.records() {
            *found.entry(record.device).or_default() += 1;
        }

        for (device, count) in &found {
            if metadata.device(*device).is_none() {
                return Err(ReadError::UnknownDevice(*device));
            }
            let listed: u64 = metadata
                .devices
                .iter()
                .filter(|d| d.id == *device)
                .map(|d| d.record_count)
                .sum();
            if listed != *count {
                return Err(ReadError::RecordCountMismatch {
                    device: *device,
                    listed,
                    found: *count,
                });
            }
        }
        for device in &metadata.devices {
            if device.record_count > 0 && !found.contains_key(&device.id) {
                return Err(ReadError::RecordCountMismatch {
                    device: device.id,
                    listed: device.record_count,
                    found: 0,
                });
            }
        }
        Ok(())
    }
}

/// Reader for recording files.
pub struct RecordingReader;

impl RecordingReader {
    /// Read and decode the file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<RecordingFile, ReadError> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::from_bytes(&bytes)
    }

    /// Decode a file image.
    pub fn from_bytes(bytes: &[u8]) -> Result<RecordingFile, ReadError> {
        let preamble = FilePreamble::from_bytes(bytes)?;

        let mut offset = PREAMBLE_SIZE;
        let mut metadata = None;
        let mut metadata_at = None;
        let mut blocks = Vec::new();

        while offset < bytes.len() {
            let (header, payload, consumed) = decode_block(&bytes[offset..])?;
            match header.kind {
                BlockKind::Data => blocks.push(DataBlock {
                    unit: header.unit,
                    offset: offset as u64,
                    records: decode_records(payload)?,
                }),
                BlockKind::Metadata => {
                    if metadata_at.is_some() {
                        return Err(ReadError::DuplicateMetadata(offset as u64));
                    }
                    metadata_at = Some(offset as u64);
                    metadata = Some(RunMetadata::from_bytes(payload)?);
                }
            }
            offset += consumed;
        }

        if preamble.metadata_offset != metadata_at.unwrap_or(0) {
            return Err(ReadError::MetadataOffsetMismatch {
                recorded: preamble.metadata_offset,
                actual: metadata_at,
            });
        }

        Ok(RecordingFile {
            preamble,
            metadata,
            blocks,
        })
    }
}
