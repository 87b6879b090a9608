#![forbid(unsafe_code)]
//! Single-writer, multiple-reader coordination for one resource.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use fs2::FileExt;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::types::{Result, StrataError};

/// Writer slot plus reader accounting shared by every transaction of a resource.
///
/// Readers never block. At most one [`WriterGuard`] exists at a time; a second
/// request fails immediately instead of queueing.
#[derive(Clone, Default)]
pub struct SingleWriter {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<SlotState>,
}

#[derive(Default, Debug)]
struct SlotState {
    readers: u32,
    writer: bool,
    closed: bool,
}

/// Point-in-time view of the coordinator, for stats.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSnapshot {
    /// Number of live reader guards.
    pub readers: u32,
    /// Whether the writer slot is taken.
    pub writer: bool,
    /// Whether the coordinator refuses new guards.
    pub closed: bool,
}

/// Guard representing a held reader registration.
pub struct ReaderGuard {
    shared: Arc<Shared>,
}

/// Guard representing the held writer slot.
pub struct WriterGuard {
    shared: Arc<Shared>,
}

impl SingleWriter {
    /// Creates an open coordinator with no holders.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a reader.
    pub fn acquire_reader(&self) -> Result<ReaderGuard> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(StrataError::Usage("resource is closed"));
        }
        state.readers = state.readers.saturating_add(1);
        Ok(ReaderGuard {
            shared: self.shared.clone(),
        })
    }

    /// Takes the writer slot, failing if another writer holds it.
    pub fn acquire_writer(&self) -> Result<WriterGuard> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(StrataError::Usage("resource is closed"));
        }
        if state.writer {
            debug!("concurrency.acquire_writer.contended");
            return Err(StrataError::Usage("write transaction already active"));
        }
        state.writer = true;
        Ok(WriterGuard {
            shared: self.shared.clone(),
        })
    }

    /// Refuses new guards from now on. Fails while the writer slot is held.
    pub fn close(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.writer {
            return Err(StrataError::Usage("cannot close with an active writer"));
        }
        state.closed = true;
        Ok(())
    }

    /// Current holders.
    pub fn snapshot(&self) -> LockSnapshot {
        let state = self.shared.state.lock();
        LockSnapshot {
            readers: state.readers,
            writer: state.writer,
            closed: state.closed,
        }
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.readers = state.readers.saturating_sub(1);
    }
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        self.shared.state.lock().writer = false;
    }
}

/// Advisory exclusive lock on a file, shared across processes.
///
/// Every handle is its own lock owner, so two handles in one process
/// exclude each other too. Released on drop.
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Takes the lock at `path` without waiting. `None` means another handle
    /// holds it.
    pub fn try_exclusive(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Some(Self { file })),
            Err(err) if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!(error = %err, "lock.file.unlock_failed");
        }
    }
}
