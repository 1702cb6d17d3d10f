//! Collective I/O trait definitions.

use sionrec_core::UnitId;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Identifier of an open collective session (one per execution unit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Parameters of a collective open.
///
/// Every participant of a file must pass the same path, participant count,
/// mode and run id; only `unit` differs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    /// Shared output file
    pub path: PathBuf,
    /// Unit performing the open
    pub unit: UnitId,
    /// Number of units writing into the file
    pub participants: u32,
    /// Number of processes writing into the file
    pub process_count: u32,
    /// Write buffer size hint in bytes
    pub chunk_size: u64,
    /// Collective mode: writes are rendezvous points
    pub collective: bool,
    /// Run identity recorded in the file preamble
    pub run_id: [u8; 16],
    /// Upper bound on waiting at a collective call
    pub rendezvous_timeout: Duration,
}

/// Collective I/O capability.
///
/// # Collective semantics
///
/// `open` and `close` complete only once every participant of the file has
/// made the matching call. In collective mode `write` is a rendezvous point
/// as well, so every participant must call it the same number of times (an
/// empty payload still participates). In independent mode `write` returns as
/// soon as the block is appended.
///
/// Each `write` payload lands in the file as one contiguous block; blocks of
/// different participants never interleave byte-wise.
///
/// # Thread Safety
///
/// Implementations are shared by all units of a process and must be
/// `Send + Sync`.
pub trait CollectiveIo: Send + Sync {
    /// Collectively open (and on first arrival create) the shared file.
    fn open(&self, request: &OpenRequest) -> Result<SessionId, CollectiveIoError>;

    /// Append one unit's buffered records as a data block.
    fn write(&self, session: SessionId, data: &[u8]) -> Result<(), CollectiveIoError>;

    /// Append the run metadata block. Called by the designated writer only.
    fn write_metadata(&self, session: SessionId, metadata: &[u8]) -> Result<(), CollectiveIoError>;

    /// Collectively close the session.
    fn close(&self, session: SessionId) -> Result<(), CollectiveIoError>;

    /// Abandon the session without the collective close.
    ///
    /// Releases the session immediately and marks the file failed: peers
    /// blocked in (or later reaching) a collective call on it get
    /// [`CollectiveIoError::Aborted`], and the next open of the path starts a
    /// fresh file. Aborting a session of an already failed file succeeds.
    fn abort(&self, session: SessionId, reason: &str) -> Result<(), CollectiveIoError>;
}

/// Collective I/O errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollectiveIoError {
    /// Underlying file operation failed
    #[error("I/O failure on {}: {detail}", path.display())]
    Io {
        /// File being accessed
        path: PathBuf,
        /// Error description
        detail: String,
    },

    /// Participants disagree on how the file is shared
    #[error("Participation mismatch on {}: {detail}", path.display())]
    ParticipationMismatch {
        /// File being opened
        path: PathBuf,
        /// What did not match
        detail: String,
    },

    /// Not every participant arrived at a collective call in time
    #[error("Collective {operation} timed out with {arrived} of {expected} participants")]
    Timeout {
        /// Operation that timed out
        operation: &'static str,
        /// Participants that arrived
        arrived: u32,
        /// Participants expected
        expected: u32,
    },

    /// Session id was never opened or is already closed
    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    /// Metadata was already written for this file
    #[error("Metadata already written to {}", .0.display())]
    DuplicateMetadata(PathBuf),

    /// An earlier collective failure left the file unusable
    #[error("File aborted: {0}")]
    Aborted(String),

    /// Failure injected by a test double
    #[error("Injected failure at {0}")]
    Injected(&'static str),
}
