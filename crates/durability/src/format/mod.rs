//! On-disk byte formats of a recording file.
//!
//! This module centralizes all serialization logic for recording files.
//! Keeping serialization separate from the I/O layer (how bytes reach the
//! shared file) keeps the file format independent of the collective I/O
//! implementation in use.
//!
//! # File Layout
//!
//! ```text
//! ┌────────────────────────────────────┐
//! │ Preamble (64 bytes)                │
//! ├────────────────────────────────────┤
//! │ Data block (unit A, flush 1)       │
//! ├────────────────────────────────────┤
//! │ Data block (unit B, flush 1)       │
//! ├────────────────────────────────────┤
//! │ ...                                │
//! ├────────────────────────────────────┤
//! │ Metadata block (designated writer) │
//! └────────────────────────────────────┘
//! ```
//!
//! All integers and floats are little-endian.
//!
//! # Module Structure
//!
//! - `preamble`: fixed-size file preamble
//! - `block`: block framing (header + payload + CRC32)
//! - `record`: record layout inside data blocks
//! - `metadata`: run metadata header describing devices and channels

pub mod block;
pub mod metadata;
pub mod preamble;
pub mod record;

pub use block::{
    block_crc, decode_block, encode_block, BlockHeader, BlockKind, BLOCK_HEADER_SIZE,
    BLOCK_TRAILER_SIZE,
};
pub use metadata::{decode_devices, encode_devices, RunMetadata, METADATA_FORMAT_VERSION};
pub use preamble::{
    FilePreamble, FILE_FORMAT_VERSION, FILE_MAGIC, FLAG_COLLECTIVE, METADATA_OFFSET_POSITION,
    PREAMBLE_SIZE,
};
pub use record::{decode_records, encode_record, record_size, Record, RECORD_FIXED_SIZE};

use std::io;

/// Format parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    /// Not enough data to parse a structure
    #[error("Insufficient data to parse {0}")]
    InsufficientData(&'static str),

    /// File does not start with the expected magic bytes
    #[error("Invalid magic bytes")]
    InvalidMagic,

    /// Unsupported format version
    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u32),

    /// Unknown block kind byte
    #[error("Unknown block kind: {0}")]
    UnknownBlockKind(u8),

    /// Checksum verification failed
    #[error("Checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the file
        expected: u32,
        /// Checksum computed over the payload
        computed: u32,
    },

    /// Structurally invalid data
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

impl From<io::Error> for FormatError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            FormatError::InsufficientData("field")
        } else {
            FormatError::InvalidFormat(e.to_string())
        }
    }
}
