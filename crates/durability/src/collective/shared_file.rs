//! Shared-file collective I/O for units living in one OS process.
//!
//! All units that open the same path share one [`BufWriter`] behind a
//! `parking_lot` mutex. Collective calls rendezvous on a condition variable:
//! the last participant to arrive completes the step (for `close` that means
//! flushing, patching the metadata offset and syncing) and releases the
//! others. A participant that waits longer than the configured timeout marks
//! the file aborted so every other participant fails instead of hanging.

use super::traits::{CollectiveIo, CollectiveIoError, OpenRequest, SessionId};
use crate::format::{
    block_crc, BlockHeader, BlockKind, FilePreamble, METADATA_OFFSET_POSITION, PREAMBLE_SIZE,
};
use parking_lot::{Condvar, Mutex, MutexGuard};
use sionrec_core::UnitId;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Smallest write buffer used regardless of the requested chunk size
const MIN_WRITE_BUFFER: usize = 4096;

/// Shared-file [`CollectiveIo`] implementation.
///
/// One instance serves every unit of the process. Simulated ranks of a
/// `LocalCluster` share a single instance as well, so a file group spanning
/// several ranks still ends up in one file. The rendezvous timeout is taken
/// from the first open request of each file.
pub struct SharedFileIo {
    files: Mutex<HashMap<PathBuf, Arc<SharedFile>>>,
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
    next_session: AtomicU64,
}

#[derive(Clone)]
struct SessionHandle {
    file: Arc<SharedFile>,
    unit: UnitId,
}

struct SharedFile {
    path: PathBuf,
    participants: u32,
    collective: bool,
    run_id: [u8; 16],
    timeout: Duration,
    state: Mutex<FileState>,
    arrivals: Condvar,
}

#[derive(Default)]
struct FileState {
    writer: Option<BufWriter<File>>,
    position: u64,
    metadata_offset: u64,
    opened: u32,
    arrived: u32,
    generation: u64,
    failure: Option<String>,
}

impl SharedFileIo {
    /// Create an instance with no open files.
    pub fn new() -> Self {
        SharedFileIo {
            files: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
        }
    }

    /// Number of sessions currently open.
    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    fn shared_file(&self, request: &OpenRequest) -> Result<Arc<SharedFile>, CollectiveIoError> {
        let mut files = self.files.lock();
        // An aborted file is abandoned by its run, and so is a file of another
        // run that no session refers to anymore; the next open starts over.
        if files.get(&request.path).map_or(false, |file| {
            file.state.lock().failure.is_some()
                || (file.run_id != request.run_id && Arc::strong_count(file) == 1)
        }) {
            files.remove(&request.path);
        }
        let file = files
            .entry(request.path.clone())
            .or_insert_with(|| Arc::new(SharedFile::new(request)))
            .clone();

        if file.participants != request.participants {
            return Err(mismatch(
                &request.path,
                format!(
                    "{} expects {} participants, file was opened for {}",
                    request.unit, request.participants, file.participants
                ),
            ));
        }
        if file.collective != request.collective {
            return Err(mismatch(
                &request.path,
                format!("{} disagrees on collective mode", request.unit),
            ));
        }
        if file.run_id != request.run_id {
            return Err(mismatch(
                &request.path,
                format!("{} belongs to a different run", request.unit),
            ));
        }
        Ok(file)
    }

    fn session(&self, session: SessionId) -> Result<SessionHandle, CollectiveIoError> {
        self.sessions
            .lock()
            .get(&session)
            .cloned()
            .ok_or(CollectiveIoError::UnknownSession(session))
    }

    fn forget(&self, file: &Arc<SharedFile>) {
        let mut files = self.files.lock();
        if files
            .get(&file.path)
            .map_or(false, |current| Arc::ptr_eq(current, file))
        {
            files.remove(&file.path);
        }
    }
}

impl Default for SharedFileIo {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectiveIo for SharedFileIo {
    fn open(&self, request: &OpenRequest) -> Result<SessionId, CollectiveIoError> {
        let file = self.shared_file(request)?;

        {
            let mut state = file.state.lock();
            if let Some(failure) = &state.failure {
                return Err(CollectiveIoError::Aborted(failure.clone()));
            }

            state.opened += 1;
            if state.opened > file.participants {
                let detail = format!(
                    "{} is participant {} of {}",
                    request.unit, state.opened, file.participants
                );
                file.abort(&mut state, detail.clone());
                return Err(mismatch(&file.path, detail));
            }

            if state.writer.is_none() {
                let preamble = FilePreamble::new(
                    request.run_id,
                    request.process_count,
                    request.participants,
                    request.chunk_size,
                    request.collective,
                );
                match create_file(&file.path, request.chunk_size, &preamble) {
                    Ok(writer) => {
                        state.writer = Some(writer);
                        state.position = PREAMBLE_SIZE as u64;
                        debug!(
                            target: "sionrec::io",
                            path = %file.path.display(),
                            participants = file.participants,
                            "Created shared recording file"
                        );
                    }
                    Err(e) => {
                        let detail = e.to_string();
                        file.abort(&mut state, detail.clone());
                        return Err(io_error(&file.path, detail));
                    }
                }
            }

            file.rendezvous(&mut state, "open", |_| Ok(()))?;
        }

        let id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        self.sessions.lock().insert(
            id,
            SessionHandle {
                file,
                unit: request.unit,
            },
        );
        Ok(id)
    }

    fn write(&self, session: SessionId, data: &[u8]) -> Result<(), CollectiveIoError> {
        let handle = self.session(session)?;
        let file = &handle.file;
        let mut state = file.state.lock();
        if let Some(failure) = &state.failure {
            return Err(CollectiveIoError::Aborted(failure.clone()));
        }

        if !data.is_empty() {
            if let Err(e) = state.append_block(BlockKind::Data, handle.unit, data) {
                let detail = e.to_string();
                file.abort(&mut state, detail.clone());
                return Err(io_error(&file.path, detail));
            }
        }

        if file.collective {
            file.rendezvous(&mut state, "write", |_| Ok(()))?;
        }
        Ok(())
    }

    fn write_metadata(&self, session: SessionId, metadata: &[u8]) -> Result<(), CollectiveIoError> {
        let handle = self.session(session)?;
        let file = &handle.file;
        let mut state = file.state.lock();
        if let Some(failure) = &state.failure {
            return Err(CollectiveIoError::Aborted(failure.clone()));
        }
        if state.metadata_offset != 0 {
            return Err(CollectiveIoError::DuplicateMetadata(file.path.clone()));
        }

        let offset = state.position;
        if let Err(e) = state.append_block(BlockKind::Metadata, handle.unit, metadata) {
            let detail = e.to_string();
            file.abort(&mut state, detail.clone());
            return Err(io_error(&file.path, detail));
        }
        state.metadata_offset = offset;
        Ok(())
    }

    fn close(&self, session: SessionId) -> Result<(), CollectiveIoError> {
        let handle = self
            .sessions
            .lock()
            .remove(&session)
            .ok_or(CollectiveIoError::UnknownSession(session))?;
        let file = handle.file;

        let completed = {
            let mut state = file.state.lock();
            if let Some(failure) = &state.failure {
                let failure = failure.clone();
                drop(state);
                self.forget(&file);
                return Err(CollectiveIoError::Aborted(failure));
            }
            file.rendezvous(&mut state, "close", FileState::finish)
        };

        match completed {
            Ok(true) => {
                self.forget(&file);
                debug!(
                    target: "sionrec::io",
                    path = %file.path.display(),
                    "Closed shared recording file"
                );
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => {
                self.forget(&file);
                Err(e)
            }
        }
    }

    fn abort(&self, session: SessionId, reason: &str) -> Result<(), CollectiveIoError> {
        let handle = self
            .sessions
            .lock()
            .remove(&session)
            .ok_or(CollectiveIoError::UnknownSession(session))?;
        let file = handle.file;

        {
            let mut state = file.state.lock();
            if state.failure.is_none() {
                file.abort(&mut state, format!("{} abandoned: {}", handle.unit, reason));
            }
        }
        self.forget(&file);
        Ok(())
    }
}

impl SharedFile {
    fn new(request: &OpenRequest) -> Self {
        SharedFile {
            path: request.path.clone(),
            participants: request.participants,
            collective: request.collective,
            run_id: request.run_id,
            timeout: request.rendezvous_timeout,
            state: Mutex::new(FileState::default()),
            arrivals: Condvar::new(),
        }
    }

    fn abort(&self, state: &mut FileState, detail: String) {
        warn!(
            target: "sionrec::io",
            path = %self.path.display(),
            %detail,
            "Shared recording file aborted"
        );
        if state.failure.is_none() {
            state.failure = Some(detail);
        }
        // Dropping the writer without flushing leaves the file as-is.
        state.writer = None;
        self.arrivals.notify_all();
    }

    /// Wait until every participant reaches this point.
    ///
    /// The last arrival runs `complete` before releasing the others; its
    /// failure aborts the file for everyone. Returns `true` for the last
    /// arrival.
    fn rendezvous<F>(
        &self,
        state: &mut MutexGuard<'_, FileState>,
        operation: &'static str,
        complete: F,
    ) -> Result<bool, CollectiveIoError>
    where
        F: FnOnce(&mut FileState) -> Result<(), String>,
    {
        let generation = state.generation;
        state.arrived += 1;

        if state.arrived == self.participants {
            state.arrived = 0;
            state.generation += 1;
            let outcome = complete(&mut **state);
            if let Err(detail) = outcome {
                self.abort(&mut **state, detail.clone());
                return Err(io_error(&self.path, detail));
            }
            self.arrivals.notify_all();
            return Ok(true);
        }

        let deadline = Instant::now() + self.timeout;
        while state.generation == generation {
            if let Some(failure) = &state.failure {
                return Err(CollectiveIoError::Aborted(failure.clone()));
            }
            if self.arrivals.wait_until(state, deadline).timed_out()
                && state.generation == generation
            {
                let arrived = state.arrived;
                self.abort(
                    &mut **state,
                    format!(
                        "{} timed out with {} of {} participants",
                        operation, arrived, self.participants
                    ),
                );
                return Err(CollectiveIoError::Timeout {
                    operation,
                    arrived,
                    expected: self.participants,
                });
            }
        }

        match &state.failure {
            Some(failure) => Err(CollectiveIoError::Aborted(failure.clone())),
            None => Ok(false),
        }
    }
}

impl FileState {
    fn append_block(&mut self, kind: BlockKind, unit: UnitId, payload: &[u8]) -> std::io::Result<()> {
        let header = BlockHeader::new(kind, unit, payload.len() as u64);
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "file is not open"))?;
        writer.write_all(&header.to_bytes())?;
        writer.write_all(payload)?;
        writer.write_all(&block_crc(payload).to_le_bytes())?;
        self.position += header.encoded_len();
        Ok(())
    }

    fn finish(&mut self) -> Result<(), String> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| "file is not open".to_string())?;
        let mut file = writer.into_inner().map_err(|e| e.error().to_string())?;

        if self.metadata_offset != 0 {
            file.seek(SeekFrom::Start(METADATA_OFFSET_POSITION))
                .map_err(|e| e.to_string())?;
            file.write_all(&self.metadata_offset.to_le_bytes())
                .map_err(|e| e.to_string())?;
        }
        file.sync_all().map_err(|e| e.to_string())
    }
}

fn create_file(
    path: &Path,
    chunk_size: u64,
    preamble: &FilePreamble,
) -> std::io::Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    let capacity = usize::try_from(chunk_size)
        .unwrap_or(usize::MAX)
        .max(MIN_WRITE_BUFFER);
    let mut writer = BufWriter::with_capacity(capacity, file);
    writer.write_all(&preamble.to_bytes())?;
    Ok(writer)
}

fn io_error(path: &Path, detail: String) -> CollectiveIoError {
    CollectiveIoError::Io {
        path: path.to_path_buf(),
        detail,
    }
}

fn mismatch(path: &Path, detail: String) -> CollectiveIoError {
    CollectiveIoError::ParticipationMismatch {
        path: path.to_path_buf(),
        detail,
    }
}
