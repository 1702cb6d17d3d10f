//! In-memory collective I/O.
//!
//! Keeps every file as a list of blocks and logs each call, which makes it
//! the backend of choice for unit tests of the recording engine. Calls never
//! block: there is no rendezvous, so several units can be driven from one
//! test thread in any order.

use super::traits::{CollectiveIo, CollectiveIoError, OpenRequest, SessionId};
use crate::format::{encode_block, BlockKind, FilePreamble, PREAMBLE_SIZE};
use parking_lot::Mutex;
use sionrec_core::UnitId;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Collective call at which an injected failure fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// `open`
    Open,
    /// `write`
    Write,
    /// `write_metadata`
    WriteMetadata,
    /// `close`
    Close,
}

impl FaultPoint {
    fn name(self) -> &'static str {
        match self {
            FaultPoint::Open => "open",
            FaultPoint::Write => "write",
            FaultPoint::WriteMetadata => "write_metadata",
            FaultPoint::Close => "close",
        }
    }
}

/// One block as stored by [`MemoryCollective`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryBlock {
    /// Block kind
    pub kind: BlockKind,
    /// Unit that wrote it
    pub unit: UnitId,
    /// Payload bytes
    pub payload: Vec<u8>,
}

/// Contents of one in-memory file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryFile {
    /// Preamble written at first open
    pub preamble: FilePreamble,
    /// Blocks in append order
    pub blocks: Vec<MemoryBlock>,
    /// Units that opened the file, in call order
    pub opened: Vec<UnitId>,
    /// Units that closed the file, in call order
    pub closed: Vec<UnitId>,
    /// Units that abandoned the file, in call order
    pub aborted: Vec<UnitId>,
    /// Number of `write` calls, including empty ones
    pub write_calls: usize,
}

impl MemoryFile {
    /// Whether every participant has closed the file.
    pub fn is_closed(&self) -> bool {
        self.closed.len() as u32 == self.preamble.participant_count
    }

    /// Whether any participant abandoned the file.
    pub fn is_aborted(&self) -> bool {
        !self.aborted.is_empty()
    }

    /// Data blocks written by `unit`.
    pub fn data_blocks(&self, unit: UnitId) -> Vec<&MemoryBlock> {
        self.blocks
            .iter()
            .filter(|b| b.kind == BlockKind::Data && b.unit == unit)
            .collect()
    }

    /// Serialize the file the way the shared-file backend lays it out.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut preamble = self.preamble;
        let mut body = Vec::new();
        for block in &self.blocks {
            if block.kind == BlockKind::Metadata && preamble.metadata_offset == 0 {
                preamble.metadata_offset = (PREAMBLE_SIZE + body.len()) as u64;
            }
            body.extend(encode_block(block.kind, block.unit, &block.payload));
        }

        let mut bytes = preamble.to_bytes().to_vec();
        bytes.extend(body);
        bytes
    }
}

#[derive(Default)]
struct MemoryState {
    files: BTreeMap<PathBuf, MemoryFile>,
    sessions: HashMap<SessionId, (PathBuf, UnitId)>,
    next_session: u64,
    fault: Option<FaultPoint>,
}

/// In-memory [`CollectiveIo`] implementation.
#[derive(Default)]
pub struct MemoryCollective {
    state: Mutex<MemoryState>,
}

impl MemoryCollective {
    /// Create an empty instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call at `point` fail.
    pub fn fail_on(&self, point: FaultPoint) {
        self.state.lock().fault = Some(point);
    }

    /// Remove an injected failure.
    pub fn clear_fault(&self) {
        self.state.lock().fault = None;
    }

    /// Snapshot of a file.
    pub fn file(&self, path: impl AsRef<Path>) -> Option<MemoryFile> {
        self.state.lock().files.get(path.as_ref()).cloned()
    }

    /// Paths of every file opened so far.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.state.lock().files.keys().cloned().collect()
    }

    /// Number of sessions not yet closed.
    pub fn open_sessions(&self) -> usize {
        self.state.lock().sessions.len()
    }

    fn check_fault(state: &MemoryState, point: FaultPoint) -> Result<(), CollectiveIoError> {
        if state.fault == Some(point) {
            return Err(CollectiveIoError::Injected(point.name()));
        }
        Ok(())
    }
}

impl CollectiveIo for MemoryCollective {
    fn open(&self, request: &OpenRequest) -> Result<SessionId, CollectiveIoError> {
        let mut state = self.state.lock();
        Self::check_fault(&state, FaultPoint::Open)?;

        let reopen = state
            .files
            .get(&request.path)
            .map_or(true, |file| {
                file.is_closed() || file.is_aborted() || file.preamble.run_id != request.run_id
            });
        if reopen {
            let preamble = FilePreamble::new(
                request.run_id,
                request.process_count,
                request.participants,
                request.chunk_size,
                request.collective,
            );
            state.files.insert(
                request.path.clone(),
                MemoryFile {
                    preamble,
                    blocks: Vec::new(),
                    opened: Vec::new(),
                    closed: Vec::new(),
                    aborted: Vec::new(),
                    write_calls: 0,
                },
            );
        }

        let file = state
            .files
            .get_mut(&request.path)
            .ok_or_else(|| CollectiveIoError::Aborted("file vanished".to_string()))?;
        if file.preamble.participant_count != request.participants {
            return Err(CollectiveIoError::ParticipationMismatch {
                path: request.path.clone(),
                detail: format!(
                    "{} expects {} participants, file was opened for {}",
                    request.unit, request.participants, file.preamble.participant_count
                ),
            });
        }
        file.opened.push(request.unit);

        state.next_session += 1;
        let id = SessionId(state.next_session);
        state
            .sessions
            .insert(id, (request.path.clone(), request.unit));
        Ok(id)
    }

    fn write(&self, session: SessionId, data: &[u8]) -> Result<(), CollectiveIoError> {
        let mut state = self.state.lock();
        Self::check_fault(&state, FaultPoint::Write)?;
        let (path, unit) = state
            .sessions
            .get(&session)
            .cloned()
            .ok_or(CollectiveIoError::UnknownSession(session))?;

        if let Some(file) = state.files.get_mut(&path) {
            file.write_calls += 1;
            if !data.is_empty() {
                file.blocks.push(MemoryBlock {
                    kind: BlockKind::Data,
                    unit,
                    payload: data.to_vec(),
                });
            }
        }
        Ok(())
    }

    fn write_metadata(&self, session: SessionId, metadata: &[u8]) -> Result<(), CollectiveIoError> {
        let mut state = self.state.lock();
        Self::check_fault(&state, FaultPoint::WriteMetadata)?;
        let (path, unit) = state
            .sessions
            .get(&session)
            .cloned()
            .ok_or(CollectiveIoError::UnknownSession(session))?;

        if let Some(file) = state.files.get_mut(&path) {
            if file.blocks.iter().any(|b| b.kind == BlockKind::Metadata) {
                return Err(CollectiveIoError::DuplicateMetadata(path));
            }
            file.blocks.push(MemoryBlock {
                kind: BlockKind::Metadata,
                unit,
                payload: metadata.to_vec(),
            });
        }
        Ok(())
    }

    fn close(&self, session: SessionId) -> Result<(), CollectiveIoError> {
        let mut state = self.state.lock();
        Self::check_fault(&state, FaultPoint::Close)?;
        let (path, unit) = state
            .sessions
            .remove(&session)
            .ok_or(CollectiveIoError::UnknownSession(session))?;

        if let Some(file) = state.files.get_mut(&path) {
            file.closed.push(unit);
        }
        Ok(())
    }

    fn abort(&self, session: SessionId, _reason: &str) -> Result<(), CollectiveIoError> {
        let mut state = self.state.lock();
        let (path, unit) = state
            .sessions
            .remove(&session)
            .ok_or(CollectiveIoError::UnknownSession(session))?;

        if let Some(file) = state.files.get_mut(&path) {
            file.aborted.push(unit);
        }
        Ok(())
    }
}
