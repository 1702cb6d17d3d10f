//! Record layout inside data blocks.
//!
//! # Record Layout
//!
//! ```text
//! ┌────────────┬────────────┬──────────┬────────────┬───────┬───────────────┐
//! │ Device (8) │ Sender (8) │ Step (8) │ Offset (8) │ N (4) │ N × f64 values│
//! └────────────┴────────────┴──────────┴────────────┴───────┴───────────────┘
//! ```

use super::FormatError;
use crate::buffer::{BufferError, TypedByteBuffer};
use byteorder::{LittleEndian, ReadBytesExt};
use sionrec_core::{DeviceId, Event};
use std::io::Cursor;

/// Size of the fixed part of a record in bytes
pub const RECORD_FIXED_SIZE: usize = 36;

/// Encoded size of a record carrying `n_values` values.
pub fn record_size(n_values: usize) -> usize {
    RECORD_FIXED_SIZE + n_values * 8
}

/// Serialize one record into `buffer`.
///
/// Space for the whole record is reserved up front, so a failed growth never
/// leaves a partial record behind.
pub fn encode_record(
    buffer: &mut TypedByteBuffer,
    device: DeviceId,
    event: &Event,
    values: &[f64],
) -> Result<(), BufferError> {
    buffer.ensure_space(record_size(values.len()))?;
    buffer
        .append(device.as_u64())?
        .append(event.sender)?
        .append(event.step)?
        .append(event.offset)?
        .append(values.len() as u32)?
        .append_slice(values)?;
    Ok(())
}

/// A decoded record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Recording device
    pub device: DeviceId,
    /// Node that produced the event
    pub sender: u64,
    /// Simulation step
    pub step: i64,
    /// Offset within the step in milliseconds
    pub offset: f64,
    /// Channel values, in declared channel order
    pub values: Vec<f64>,
}

impl Record {
    /// The event this record was written for.
    pub fn event(&self) -> Event {
        Event::new(self.sender, self.step, self.offset)
    }
}

/// Decode every record of a data block payload, in write order.
pub fn decode_records(payload: &[u8]) -> Result<Vec<Record>, FormatError> {
    let mut cursor = Cursor::new(payload);
    let mut records = Vec::new();

    while (cursor.position() as usize) < payload.len() {
        let remaining = payload.len() - cursor.position() as usize;
        if remaining < RECORD_FIXED_SIZE {
            return Err(FormatError::InsufficientData("record"));
        }

        let device = DeviceId::new(cursor.read_u64::<LittleEndian>()?);
        let sender = cursor.read_u64::<LittleEndian>()?;
        let step = cursor.read_i64::<LittleEndian>()?;
        let offset = cursor.read_f64::<LittleEndian>()?;
        let n_values = cursor.read_u32::<LittleEndian>()? as usize;

        let remaining = payload.len() - cursor.position() as usize;
        if remaining / 8 < n_values {
            return Err(FormatError::InsufficientData("record values"));
        }
        let mut values = Vec::with_capacity(n_values);
        for _ in 0..n_values {
            values.push(cursor.read_f64::<LittleEndian>()?);
        }

        records.push(Record {
            device,
            sender,
            step,
            offset,
            values,
        });
    }

    Ok(records)
}
