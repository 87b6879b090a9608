use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::{encode_at, Backend, BackendReader, BackendWriter};
use crate::page::{Page, PageAddr};
use crate::types::{Result, StrataError};

/// Volatile backend keeping every page in memory.
///
/// Storage keys are page indexes. Clones share the same storage, which lets
/// tests reopen a session on the same data. Supports failure injection for
/// commit atomicity tests.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    pages: Vec<Vec<u8>>,
    root: Option<PageAddr>,
    reads: u64,
    fail_after: Option<u64>,
}

impl MemoryState {
    fn charge_write(&mut self) -> Result<()> {
        match self.fail_after {
            Some(0) => {
                debug!("backend.memory.injected_failure");
                Err(StrataError::Io(io::Error::other("injected write failure")))
            }
            Some(ref mut left) => {
                *left -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets `writes` more writes succeed, then fails every write (pages and
    /// root pointer alike) with an I/O error.
    pub fn fail_writes_after(&self, writes: u64) {
        self.inner.lock().fail_after = Some(writes);
    }

    /// Removes any injected failure.
    pub fn clear_failure(&self) {
        self.inner.lock().fail_after = None;
    }

    /// Number of pages stored so far.
    pub fn page_count(&self) -> usize {
        self.inner.lock().pages.len()
    }

    /// Number of reads served so far.
    pub fn read_count(&self) -> u64 {
        self.inner.lock().reads
    }
}

struct MemoryReader {
    inner: Arc<Mutex<MemoryState>>,
}

impl BackendReader for MemoryReader {
    fn read(&mut self, addr: PageAddr) -> Result<Vec<u8>> {
        let mut state = self.inner.lock();
        state.reads += 1;
        usize::try_from(addr.key)
            .ok()
            .and_then(|idx| state.pages.get(idx))
            .cloned()
            .ok_or(StrataError::NotFound("page"))
    }
}

struct MemoryWriter {
    inner: Arc<Mutex<MemoryState>>,
}

impl BackendWriter for MemoryWriter {
    fn write(&mut self, page: &Page) -> Result<PageAddr> {
        let mut state = self.inner.lock();
        state.charge_write()?;
        let (bytes, addr) = encode_at(page, state.pages.len() as u64)?;
        state.pages.push(bytes);
        Ok(addr)
    }

    fn write_uber_page_reference(&mut self, addr: PageAddr) -> Result<()> {
        let mut state = self.inner.lock();
        state.charge_write()?;
        state.root = Some(addr);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Backend for MemoryBackend {
    fn reader(&self) -> Result<Box<dyn BackendReader>> {
        Ok(Box::new(MemoryReader {
            inner: self.inner.clone(),
        }))
    }

    fn writer(&self) -> Result<Box<dyn BackendWriter>> {
        Ok(Box::new(MemoryWriter {
            inner: self.inner.clone(),
        }))
    }

    fn read_root(&self) -> Result<Option<PageAddr>> {
        Ok(self.inner.lock().root)
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
