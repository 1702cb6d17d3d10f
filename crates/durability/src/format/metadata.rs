//! Run metadata header.
//!
//! Written once per file by the designated writer at finalize. It lists every
//! device enrolled on any unit of the file group, with its channel names and
//! record count, so a reader can interpret the data blocks without any
//! external schema.
//!
//! # Layout
//!
//! ```text
//! Version (u32) | t_start (f64) | resolution (f64) | processes (u32)
//! file group (u32) | file group count (u32) | device count (u32)
//! For each device:
//!   id (u64) | kind (u32) | rank (u32) | thread (u32) | records (u64)
//!   name (str) | label (str) | channel count (u32) | channel names (str...)
//! str = length (u32) + UTF-8 bytes
//! ```

use super::FormatError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use sionrec_core::{DeviceId, DeviceKind, DeviceMetadata, UnitId};
use std::io::{self, Cursor, Read, Write};

/// Current metadata format version
pub const METADATA_FORMAT_VERSION: u32 = 1;

/// Metadata describing one recording file.
#[derive(Debug, Clone, PartialEq)]
pub struct RunMetadata {
    /// Simulation time at which recording started, in milliseconds
    pub t_start: f64,
    /// Simulation resolution in milliseconds
    pub resolution: f64,
    /// Number of processes in the process group
    pub process_count: u32,
    /// Index of the file group this file belongs to
    pub file_group: u32,
    /// Number of file groups (files) of the run
    pub file_group_count: u32,
    /// Devices enrolled on the units of this file group, ordered by (unit, id)
    pub devices: Vec<DeviceMetadata>,
}

impl RunMetadata {
    /// Look up a device by identity.
    pub fn device(&self, id: DeviceId) -> Option<&DeviceMetadata> {
        self.devices.iter().find(|d| d.id == id)
    }

    /// Total number of records across all devices.
    pub fn total_records(&self) -> u64 {
        self.devices.iter().map(|d| d.record_count).sum()
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        // Writes into a Vec cannot fail.
        let _ = self.write_to(&mut bytes);
        bytes
    }

    /// Serialize into a writer.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(METADATA_FORMAT_VERSION)?;
        writer.write_f64::<LittleEndian>(self.t_start)?;
        writer.write_f64::<LittleEndian>(self.resolution)?;
        writer.write_u32::<LittleEndian>(self.process_count)?;
        writer.write_u32::<LittleEndian>(self.file_group)?;
        writer.write_u32::<LittleEndian>(self.file_group_count)?;
        write_devices(writer, &self.devices)
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        let mut cursor = Cursor::new(bytes);

        let version = cursor.read_u32::<LittleEndian>()?;
        if version != METADATA_FORMAT_VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }

        let t_start = cursor.read_f64::<LittleEndian>()?;
        let resolution = cursor.read_f64::<LittleEndian>()?;
        let process_count = cursor.read_u32::<LittleEndian>()?;
        let file_group = cursor.read_u32::<LittleEndian>()?;
        let file_group_count = cursor.read_u32::<LittleEndian>()?;
        let devices = read_devices(&mut cursor)?;

        if (cursor.position() as usize) != bytes.len() {
            return Err(FormatError::InvalidFormat(format!(
                "{} trailing bytes after metadata",
                bytes.len() - cursor.position() as usize
            )));
        }

        Ok(RunMetadata {
            t_start,
            resolution,
            process_count,
            file_group,
            file_group_count,
            devices,
        })
    }
}

/// Serialize a device list, as exchanged between processes at finalize.
pub fn encode_devices(devices: &[DeviceMetadata]) -> Vec<u8> {
    let mut bytes = Vec::new();
    // Writes into a Vec cannot fail.
    let _ = write_devices(&mut bytes, devices);
    bytes
}

/// Deserialize a device list produced by [`encode_devices`].
pub fn decode_devices(bytes: &[u8]) -> Result<Vec<DeviceMetadata>, FormatError> {
    let mut cursor = Cursor::new(bytes);
    let devices = read_devices(&mut cursor)?;
    if (cursor.position() as usize) != bytes.len() {
        return Err(FormatError::InvalidFormat(
            "trailing bytes after device list".to_string(),
        ));
    }
    Ok(devices)
}

fn write_devices<W: Write>(writer: &mut W, devices: &[DeviceMetadata]) -> io::Result<()> {
    writer.write_u32::<LittleEndian>(devices.len() as u32)?;
    for device in devices {
        writer.write_u64::<LittleEndian>(device.id.as_u64())?;
        writer.write_u32::<LittleEndian>(device.kind.code())?;
        writer.write_u32::<LittleEndian>(device.unit.rank)?;
        writer.write_u32::<LittleEndian>(device.unit.thread)?;
        writer.write_u64::<LittleEndian>(device.record_count)?;
        write_str(writer, &device.name)?;
        write_str(writer, &device.label)?;
        writer.write_u32::<LittleEndian>(device.value_names.len() as u32)?;
        for name in &device.value_names {
            write_str(writer, name)?;
        }
    }
    Ok(())
}

fn read_devices<R: Read>(reader: &mut R) -> Result<Vec<DeviceMetadata>, FormatError> {
    let count = reader.read_u32::<LittleEndian>()?;
    let mut devices = Vec::new();
    for _ in 0..count {
        let id = DeviceId::new(reader.read_u64::<LittleEndian>()?);
        let kind = DeviceKind::from_code(reader.read_u32::<LittleEndian>()?);
        let rank = reader.read_u32::<LittleEndian>()?;
        let thread = reader.read_u32::<LittleEndian>()?;
        let record_count = reader.read_u64::<LittleEndian>()?;
        let name = read_str(reader)?;
        let label = read_str(reader)?;
        let channels = reader.read_u32::<LittleEndian>()?;
        let mut value_names = Vec::new();
        for _ in 0..channels {
            value_names.push(read_str(reader)?);
        }

        devices.push(DeviceMetadata {
            id,
            kind,
            name,
            label,
            value_names,
            record_count,
            unit: UnitId::new(rank, thread),
        });
    }
    Ok(devices)
}

fn write_str<W: Write>(writer: &mut W, value: &str) -> io::Result<()> {
    writer.write_u32::<LittleEndian>(value.len() as u32)?;
    writer.write_all(value.as_bytes())
}

fn read_str<R: Read>(reader: &mut R) -> Result<String, FormatError> {
    let len = reader.read_u32::<LittleEndian>()? as usize;
    let mut bytes = Vec::new();
    reader.by_ref().take(len as u64).read_to_end(&mut bytes)?;
    if bytes.len() != len {
        return Err(FormatError::InsufficientData("string"));
    }
    String::from_utf8(bytes).map_err(|e| FormatError::InvalidFormat(e.to_string()))
}
