//! File session of one execution unit
//!
//! Pairs the collective session id with the unit's record buffer. The buffer
//! persists across write/synchronize cycles and is only released when the
//! session is closed at finalize.

use serde::Serialize;
use sionrec_core::{CollectiveOp, RecordingError, RecordingResult, UnitId};
use sionrec_durability::{BufferError, CollectiveIo, OpenRequest, SessionId, TypedByteBuffer};
use std::path::{Path, PathBuf};

/// Flush counters of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushStats {
    /// Collective writes issued, including empty collective ones
    pub flushes: u64,
    /// Payload bytes handed to the collective I/O layer
    pub bytes_flushed: u64,
}

/// Open collective session plus the unit's record buffer.
pub struct FileSession {
    id: SessionId,
    unit: UnitId,
    path: PathBuf,
    buffer: TypedByteBuffer,
    stats: FlushStats,
}

impl FileSession {
    /// Collectively open the session and allocate the record buffer.
    pub fn open(
        io: &dyn CollectiveIo,
        request: &OpenRequest,
        buffer_size: usize,
    ) -> RecordingResult<Self> {
        let unit = request.unit;
        let buffer = TypedByteBuffer::with_capacity(buffer_size)
            .map_err(|e| allocation_error(unit, e))?;
        let id = io
            .open(request)
            .map_err(|e| RecordingError::collective(unit, CollectiveOp::Open, e))?;

        Ok(FileSession {
            id,
            unit,
            path: request.path.clone(),
            buffer,
            stats: FlushStats::default(),
        })
    }

    /// Collective session id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Shared file this session writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record buffer, for serializing events.
    pub fn buffer_mut(&mut self) -> &mut TypedByteBuffer {
        &mut self.buffer
    }

    /// Bytes waiting for the next flush.
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.size()
    }

    /// Current buffer capacity.
    pub fn buffer_capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Flush counters.
    pub fn stats(&self) -> FlushStats {
        self.stats
    }

    /// Hand the buffered records to the collective I/O layer and clear the
    /// buffer.
    ///
    /// In collective mode the write is issued even for an empty buffer, since
    /// every participant must take part in each collective write. Returns the
    /// number of payload bytes written.
    pub fn flush(&mut self, io: &dyn CollectiveIo, collective: bool) -> RecordingResult<usize> {
        let size = self.buffer.size();
        if size == 0 && !collective {
            return Ok(0);
        }

        io.write(self.id, self.buffer.read())
            .map_err(|e| RecordingError::collective(self.unit, CollectiveOp::Write, e))?;
        self.buffer.clear();
        self.stats.flushes += 1;
        self.stats.bytes_flushed += size as u64;
        Ok(size)
    }

    /// Append the run metadata block.
    pub fn write_metadata(&self, io: &dyn CollectiveIo, metadata: &[u8]) -> RecordingResult<()> {
        io.write_metadata(self.id, metadata)
            .map_err(|e| RecordingError::collective(self.unit, CollectiveOp::WriteMetadata, e))
    }

    /// Collectively close the session, releasing the buffer.
    pub fn close(self, io: &dyn CollectiveIo) -> RecordingResult<FlushStats> {
        io.close(self.id)
            .map_err(|e| RecordingError::collective(self.unit, CollectiveOp::Close, e))?;
        Ok(self.stats)
    }

    /// Release the session without the collective close.
    ///
    /// Peers of the file fail at their next collective call, and the next
    /// run opening the path starts a fresh file.
    pub fn abandon(self, io: &dyn CollectiveIo, reason: &str) -> RecordingResult<()> {
        io.abort(self.id, reason)
            .map_err(|e| RecordingError::collective(self.unit, CollectiveOp::Abort, e))
    }
}

/// Map a buffer growth failure onto the public error for `unit`.
pub(crate) fn allocation_error(unit: UnitId, e: BufferError) -> RecordingError {
    match e {
        BufferError::Allocation {
            requested,
            capacity,
        } => RecordingError::Allocation {
            unit,
            requested,
            capacity,
        },
    }
}
