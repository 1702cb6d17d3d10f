//! Durability layer for sionrec
//!
//! This crate handles everything that touches the recording file:
//!
//! - Typed byte buffer: growable per-unit staging area for records
//! - Binary on-disk format: preamble, CRC-framed blocks, records, run metadata
//! - Collective I/O: shared-file and in-memory implementations
//! - Process group: barrier, broadcast and all-gather across ranks
//! - Reader: decode and verify finished recording files

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer; // Typed byte buffer
pub mod collective; // Collective I/O capability
pub mod format; // Binary on-disk formats
pub mod group; // Process group capability
pub mod reader; // Recording file reader

// === Re-exports ===
pub use buffer::{BufferError, Scalar, TypedByteBuffer, MIN_CAPACITY};
pub use collective::{
    CollectiveIo, CollectiveIoError, FaultPoint, MemoryBlock, MemoryCollective, MemoryFile,
    OpenRequest, SessionId, SharedFileIo,
};
pub use format::{
    decode_devices, decode_records, encode_devices, encode_record, record_size, BlockKind,
    FilePreamble, FormatError, Record, RunMetadata,
};
pub use group::{GroupError, LocalCluster, LocalProcess, ProcessGroup, SingleProcess};
pub use reader::{DataBlock, ReadError, RecordingFile, RecordingReader};
