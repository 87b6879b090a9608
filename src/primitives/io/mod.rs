#![forbid(unsafe_code)]
//! Positioned file I/O used by the file backend.

use std::{
    fs::{File, OpenOptions},
    io,
    path::Path,
    sync::Arc,
};

use tracing::trace;

use crate::types::{Result, StrataError};

/// Positioned reads and writes on a shared handle.
///
/// Reads fill the whole buffer or fail with `UnexpectedEof`.
pub trait FileIo: Send + Sync + 'static {
    /// Fills `dst` with the bytes starting at `off`.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Writes all of `src` at `off`.
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
    /// Flushes data and metadata to stable storage.
    fn sync_all(&self) -> Result<()>;
    /// Current file length.
    fn len(&self) -> Result<u64>;
    /// True when the file holds no bytes.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
    /// Sets the file length, dropping bytes past `len`.
    fn truncate(&self, len: u64) -> Result<()>;
}

#[cfg(unix)]
fn pread(file: &File, buf: &mut [u8], off: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, off)
}

#[cfg(unix)]
fn pwrite(file: &File, buf: &[u8], off: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::write_at(file, buf, off)
}

#[cfg(windows)]
fn pread(file: &File, buf: &mut [u8], off: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, off)
}

#[cfg(windows)]
fn pwrite(file: &File, buf: &[u8], off: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_write(file, buf, off)
}

#[cfg(any(unix, windows))]
fn read_exact_at(file: &File, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
    while !dst.is_empty() {
        match pread(file, dst, off)? {
            0 => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "page extends past end of file",
                ))
            }
            n => {
                dst = &mut dst[n..];
                off += n as u64;
            }
        }
    }
    Ok(())
}

#[cfg(any(unix, windows))]
fn write_all_at(file: &File, mut off: u64, mut src: &[u8]) -> io::Result<()> {
    while !src.is_empty() {
        match pwrite(file, src, off)? {
            0 => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "positioned write stalled",
                ))
            }
            n => {
                src = &src[n..];
                off += n as u64;
            }
        }
    }
    Ok(())
}

/// [`FileIo`] over a `std::fs::File`; clones share the handle.
#[derive(Clone)]
pub struct StdFileIo {
    inner: Arc<File>,
}

impl StdFileIo {
    /// Wraps an existing file handle.
    pub fn new(file: File) -> Self {
        Self {
            inner: Arc::new(file),
        }
    }

    /// Opens or creates a file for read-write access.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(StrataError::from)?;
        Ok(Self::new(file))
    }

    fn file(&self) -> &File {
        &self.inner
    }
}

#[cfg(any(unix, windows))]
impl FileIo for StdFileIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        trace!(off, len = dst.len(), "io.read_at");
        read_exact_at(self.file(), off, dst).map_err(StrataError::from)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        trace!(off, len = src.len(), "io.write_at");
        write_all_at(self.file(), off, src).map_err(StrataError::from)
    }

    fn sync_all(&self) -> Result<()> {
        trace!("io.sync_all");
        Ok(self.file().sync_all()?)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file().metadata()?.len())
    }

    fn truncate(&self, len: u64) -> Result<()> {
        trace!(len, "io.truncate");
        Ok(self.file().set_len(len)?)
    }
}

/// Maps an `UnexpectedEof` from a positioned read to a typed miss.
pub(crate) fn eof_as_not_found(err: StrataError, what: &'static str) -> StrataError {
    match err {
        StrataError::Io(inner) if inner.kind() == io::ErrorKind::UnexpectedEof => {
            StrataError::NotFound(what)
        }
        other => other,
    }
}
