//! Recording file preamble.
//!
//! The preamble is written once per file when the file is opened and is
//! patched once more during the collective close, when the offset of the
//! metadata block becomes known.
//!
//! # Layout
//!
//! ```text
//! ┌──────────────┬─────────────┬───────────┬───────────────┐
//! │ Magic (8)    │ Version (4) │ Flags (4) │ Run id (16)   │
//! ├──────────────┼─────────────┼───────────┴───────────────┤
//! │ Procs (4)    │ Units (4)   │ Chunk size (8)            │
//! ├──────────────┴─────────────┼───────────────────────────┤
//! │ Metadata offset (8)        │ Created, µs since epoch (8)│
//! └────────────────────────────┴───────────────────────────┘
//! ```

use super::FormatError;

/// Magic bytes identifying a recording file: "SIONREC\0"
pub const FILE_MAGIC: [u8; 8] = *b"SIONREC\0";

/// Current file format version
pub const FILE_FORMAT_VERSION: u32 = 1;

/// Size of the preamble in bytes
pub const PREAMBLE_SIZE: usize = 64;

/// Byte position of the metadata offset field, patched at close.
pub const METADATA_OFFSET_POSITION: u64 = 48;

/// Flag bit: the file was written in collective mode.
pub const FLAG_COLLECTIVE: u32 = 1;

/// Recording file preamble (64 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePreamble {
    /// Magic bytes: "SIONREC\0"
    pub magic: [u8; 8],

    /// Format version for forward compatibility
    pub format_version: u32,

    /// Flag bits, see [`FLAG_COLLECTIVE`]
    pub flags: u32,

    /// Run identity (UUID bytes), shared by all files of a run
    pub run_id: [u8; 16],

    /// Number of processes writing into this file
    pub process_count: u32,

    /// Number of execution units writing into this file
    pub participant_count: u32,

    /// Chunk size hint the file was opened with
    pub chunk_size: u64,

    /// Offset of the metadata block, 0 until the file is closed
    pub metadata_offset: u64,

    /// Creation time in microseconds since Unix epoch
    pub created_micros: i64,
}

impl FilePreamble {
    /// Create a preamble for a newly opened file.
    pub fn new(
        run_id: [u8; 16],
        process_count: u32,
        participant_count: u32,
        chunk_size: u64,
        collective: bool,
    ) -> Self {
        FilePreamble {
            magic: FILE_MAGIC,
            format_version: FILE_FORMAT_VERSION,
            flags: if collective { FLAG_COLLECTIVE } else { 0 },
            run_id,
            process_count,
            participant_count,
            chunk_size,
            metadata_offset: 0,
            created_micros: chrono::Utc::now().timestamp_micros(),
        }
    }

    /// Whether the file was written in collective mode.
    pub fn is_collective(&self) -> bool {
        self.flags & FLAG_COLLECTIVE != 0
    }

    /// Whether the metadata block offset was recorded at close.
    pub fn is_complete(&self) -> bool {
        self.metadata_offset != 0
    }

    /// Serialize the preamble to bytes.
    pub fn to_bytes(&self) -> [u8; PREAMBLE_SIZE] {
        let mut bytes = [0u8; PREAMBLE_SIZE];
        bytes[0..8].copy_from_slice(&self.magic);
        bytes[8..12].copy_from_slice(&self.format_version.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.flags.to_le_bytes());
        bytes[16..32].copy_from_slice(&self.run_id);
        bytes[32..36].copy_from_slice(&self.process_count.to_le_bytes());
        bytes[36..40].copy_from_slice(&self.participant_count.to_le_bytes());
        bytes[40..48].copy_from_slice(&self.chunk_size.to_le_bytes());
        bytes[48..56].copy_from_slice(&self.metadata_offset.to_le_bytes());
        bytes[56..64].copy_from_slice(&self.created_micros.to_le_bytes());
        bytes
    }

    /// Deserialize and validate a preamble.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() < PREAMBLE_SIZE {
            return Err(FormatError::InsufficientData("preamble"));
        }

        let magic: [u8; 8] = bytes[0..8]
            .try_into()
            .map_err(|_| FormatError::InsufficientData("preamble"))?;
        if magic != FILE_MAGIC {
            return Err(FormatError::InvalidMagic);
        }

        let format_version = u32_at(bytes, 8);
        if format_version != FILE_FORMAT_VERSION {
            return Err(FormatError::UnsupportedVersion(format_version));
        }

        let mut run_id = [0u8; 16];
        run_id.copy_from_slice(&bytes[16..32]);

        Ok(FilePreamble {
            magic,
            format_version,
            flags: u32_at(bytes, 12),
            run_id,
            process_count: u32_at(bytes, 32),
            participant_count: u32_at(bytes, 36),
            chunk_size: u64_at(bytes, 40),
            metadata_offset: u64_at(bytes, 48),
            created_micros: u64_at(bytes, 56) as i64,
        })
    }
}

fn u32_at(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(raw)
}

fn u64_at(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(raw)
}
