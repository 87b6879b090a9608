#![forbid(unsafe_code)]
//! Byte-level storage backends consumed by the engine.
//!
//! A backend stores encoded pages and one "current root" pointer naming the
//! most recently published uber page. The engine never assumes anything about
//! storage keys beyond what [`PageAddr`] carries.

mod file;
mod memory;

pub use file::FileBackend;
pub use memory::MemoryBackend;

use crate::page::{trailer_crc, Page, PageAddr};
use crate::types::{Result, StrataError};

/// Fetches encoded pages.
pub trait BackendReader: Send {
    /// Returns the bytes stored at `addr`, or `NotFound` when nothing is there.
    fn read(&mut self, addr: PageAddr) -> Result<Vec<u8>>;
}

/// Persists pages. Owned exclusively by the active write transaction.
pub trait BackendWriter: Send {
    /// Encodes and stores `page`, returning where it landed.
    fn write(&mut self, page: &Page) -> Result<PageAddr>;

    /// Durably records `addr` as the current uber page.
    ///
    /// Every page written earlier through this writer must be durable before
    /// the pointer becomes visible.
    fn write_uber_page_reference(&mut self, addr: PageAddr) -> Result<()>;

    /// Releases the writer.
    fn close(&mut self) -> Result<()>;
}

/// Storage shared by every transaction of one resource.
pub trait Backend: Send + Sync {
    /// Opens a new reader.
    fn reader(&self) -> Result<Box<dyn BackendReader>>;

    /// Opens a writer.
    fn writer(&self) -> Result<Box<dyn BackendWriter>>;

    /// Address of the current uber page, `None` for a fresh backend.
    fn read_root(&self) -> Result<Option<PageAddr>>;

    /// Flushes and releases the backend.
    fn close(&self) -> Result<()>;
}

/// Encodes `page` and builds the address of the resulting bytes at `key`.
pub(crate) fn encode_at(page: &Page, key: u64) -> Result<(Vec<u8>, PageAddr)> {
    let bytes = page.encode()?;
    let len = u32::try_from(bytes.len())
        .map_err(|_| StrataError::Invalid("encoded page too large"))?;
    let checksum =
        trailer_crc(&bytes).ok_or(StrataError::Corruption("encoded page lacks trailer"))?;
    Ok((bytes, PageAddr { key, len, checksum }))
}
