//! Block framing.
//!
//! Everything after the preamble is a sequence of blocks. A data block holds
//! the complete contents of one unit's buffer at one synchronization, so a
//! record never spans two blocks.
//!
//! # Block Layout
//!
//! ```text
//! ┌──────────┬──────────────┬──────────┬────────────┬────────────┬──────────┬──────────┐
//! │ Kind (1) │ Reserved (3) │ Rank (4) │ Thread (4) │ Length (8) │ Payload  │ CRC32 (4)│
//! └──────────┴──────────────┴──────────┴────────────┴────────────┴──────────┴──────────┘
//! ```
//!
//! The CRC covers the payload only.

use super::FormatError;
use sionrec_core::UnitId;

/// Size of the block header in bytes
pub const BLOCK_HEADER_SIZE: usize = 20;

/// Size of the block trailer (CRC32) in bytes
pub const BLOCK_TRAILER_SIZE: usize = 4;

/// Kind of block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlockKind {
    /// Records flushed from one unit's buffer
    Data = 1,
    /// Run metadata written by the designated writer
    Metadata = 2,
}

impl BlockKind {
    /// Decode a kind byte.
    pub fn from_u8(byte: u8) -> Result<Self, FormatError> {
        match byte {
            1 => Ok(BlockKind::Data),
            2 => Ok(BlockKind::Metadata),
            other => Err(FormatError::UnknownBlockKind(other)),
        }
    }
}

/// Header preceding each block payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block kind
    pub kind: BlockKind,
    /// Unit that produced the block
    pub unit: UnitId,
    /// Payload length in bytes
    pub length: u64,
}

impl BlockHeader {
    /// Create a block header.
    pub fn new(kind: BlockKind, unit: UnitId, length: u64) -> Self {
        BlockHeader { kind, unit, length }
    }

    /// Total encoded size of the block (header + payload + trailer).
    pub fn encoded_len(&self) -> u64 {
        (BLOCK_HEADER_SIZE + BLOCK_TRAILER_SIZE) as u64 + self.length
    }

    /// Serialize header to bytes.
    pub fn to_bytes(&self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut bytes = [0u8; BLOCK_HEADER_SIZE];
        bytes[0] = self.kind as u8;
        bytes[4..8].copy_from_slice(&self.unit.rank.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.unit.thread.to_le_bytes());
        bytes[12..20].copy_from_slice(&self.length.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() < BLOCK_HEADER_SIZE {
            return Err(FormatError::InsufficientData("block header"));
        }
        let kind = BlockKind::from_u8(bytes[0])?;

        let mut rank = [0u8; 4];
        rank.copy_from_slice(&bytes[4..8]);
        let mut thread = [0u8; 4];
        thread.copy_from_slice(&bytes[8..12]);
        let mut length = [0u8; 8];
        length.copy_from_slice(&bytes[12..20]);

        Ok(BlockHeader {
            kind,
            unit: UnitId::new(u32::from_le_bytes(rank), u32::from_le_bytes(thread)),
            length: u64::from_le_bytes(length),
        })
    }
}

/// CRC32 of a block payload.
pub fn block_crc(payload: &[u8]) -> u32 {
    crc32fast::hash(payload)
}

/// Encode a complete block into a fresh vector.
pub fn encode_block(kind: BlockKind, unit: UnitId, payload: &[u8]) -> Vec<u8> {
    let header = BlockHeader::new(kind, unit, payload.len() as u64);
    let mut bytes = Vec::with_capacity(header.encoded_len() as usize);
    bytes.extend_from_slice(&header.to_bytes());
    bytes.extend_from_slice(payload);
    bytes.extend_from_slice(&block_crc(payload).to_le_bytes());
    bytes
}

/// Decode one block from the front of `bytes`.
///
/// Returns the header, the verified payload, and the number of bytes consumed.
pub fn decode_block(bytes: &[u8]) -> Result<(BlockHeader, &[u8], usize), FormatError> {
    let header = BlockHeader::from_bytes(bytes)?;
    let length = usize::try_from(header.length)
        .map_err(|_| FormatError::InvalidFormat(format!("block length {}", header.length)))?;

    let total = BLOCK_HEADER_SIZE
        .checked_add(length)
        .and_then(|n| n.checked_add(BLOCK_TRAILER_SIZE))
        .ok_or_else(|| FormatError::InvalidFormat(format!("block length {}", length)))?;
    if bytes.len() < total {
        return Err(FormatError::InsufficientData("block payload"));
    }

    let payload = &bytes[BLOCK_HEADER_SIZE..BLOCK_HEADER_SIZE + length];
    let mut stored = [0u8; 4];
    stored.copy_from_slice(&bytes[BLOCK_HEADER_SIZE + length..total]);
    let expected = u32::from_le_bytes(stored);
    let computed = block_crc(payload);
    if expected != computed {
        return Err(FormatError::ChecksumMismatch { expected, computed });
    }

    Ok((header, payload, total))
}
