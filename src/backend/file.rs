use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{encode_at, Backend, BackendReader, BackendWriter};
use crate::page::{Page, PageAddr};
use crate::primitives::bytes::{PageCursor, PageWriter};
use crate::primitives::concurrency::FileLock;
use crate::primitives::io::{eof_as_not_found, FileIo, StdFileIo};
use crate::types::checksum::record_crc32;
use crate::types::{Result, StrataError};

const DATA_FILE: &str = "pages.dat";
const ROOT_FILE: &str = "root.ptr";
const ROOT_TMP_FILE: &str = "root.ptr.tmp";
const LOCK_FILE: &str = "writer.lock";
const ROOT_RECORD_LEN: usize = 28;

/// Append-only file backend.
///
/// Pages are appended to `pages.dat`; the storage key is the byte offset.
/// `root.ptr` holds the address of the current uber page together with the
/// data file length at publish time, and is replaced atomically through a
/// temporary file and a rename once the data file is synced. Bytes past that
/// length belong to commits that never published. `writer.lock` serializes
/// writers across processes; a writer starts appending at the published end.
#[derive(Clone)]
pub struct FileBackend {
    inner: Arc<FileInner>,
}

struct FileInner {
    dir: PathBuf,
    data: StdFileIo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RootRecord {
    addr: PageAddr,
    end: u64,
}

impl RootRecord {
    fn encode(&self) -> Vec<u8> {
        let mut w = PageWriter::with_capacity(ROOT_RECORD_LEN);
        w.put_u64(self.addr.key);
        w.put_u32(self.addr.len);
        w.put_u32(self.addr.checksum);
        w.put_u64(self.end);
        let crc = record_crc32(w.as_slice());
        w.put_u32(crc);
        w.into_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != ROOT_RECORD_LEN {
            return Err(StrataError::Corruption("root record has wrong length"));
        }
        let (body, trailer) = bytes.split_at(ROOT_RECORD_LEN - 4);
        let mut c = PageCursor::new(trailer);
        if record_crc32(body) != c.get_u32()? {
            return Err(StrataError::Corruption("root record checksum mismatch"));
        }
        let mut c = PageCursor::new(body);
        Ok(Self {
            addr: PageAddr {
                key: c.get_u64()?,
                len: c.get_u32()?,
                checksum: c.get_u32()?,
            },
            end: c.get_u64()?,
        })
    }
}

impl FileBackend {
    /// Opens (or creates) a backend rooted at `dir`.
    ///
    /// Unpublished bytes are dropped only when no writer holds the resource,
    /// in this process or another one.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let data = StdFileIo::open(dir.join(DATA_FILE))?;
        let end = match FileLock::try_exclusive(dir.join(LOCK_FILE))? {
            Some(_lock) => drop_unpublished(&dir, &data)?,
            None => {
                debug!(dir = %dir.display(), "backend.file.open_during_write");
                published_end(&dir, &data)?
            }
        };
        info!(dir = %dir.display(), end, "backend.file.open");
        Ok(Self {
            inner: Arc::new(FileInner { dir, data }),
        })
    }

    /// Directory holding the backend files.
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }
}

fn read_root_record(dir: &Path) -> Result<Option<RootRecord>> {
    match fs::read(dir.join(ROOT_FILE)) {
        Ok(bytes) => RootRecord::decode(&bytes).map(Some),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Data file length covered by the published root.
fn published_end(dir: &Path, data: &StdFileIo) -> Result<u64> {
    let end = read_root_record(dir)?.map_or(0, |r| r.end);
    if data.len()? < end {
        return Err(StrataError::Corruption("data file shorter than its root record"));
    }
    Ok(end)
}

/// Cuts the data file back to the published end. Requires the writer lock.
fn drop_unpublished(dir: &Path, data: &StdFileIo) -> Result<u64> {
    let end = published_end(dir, data)?;
    let len = data.len()?;
    if len > end {
        warn!(
            dir = %dir.display(),
            dropped = len - end,
            "backend.file.truncate_unpublished"
        );
        data.truncate(end)?;
        data.sync_all()?;
    }
    Ok(end)
}

fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    File::open(dir)?.sync_all()?;
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

struct FileReader {
    data: StdFileIo,
}

impl BackendReader for FileReader {
    fn read(&mut self, addr: PageAddr) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; addr.len as usize];
        self.data
            .read_at(addr.key, &mut buf)
            .map_err(|err| eof_as_not_found(err, "page"))?;
        Ok(buf)
    }
}

struct FileWriter {
    inner: Arc<FileInner>,
    tail: u64,
    lock: Option<FileLock>,
}

impl FileWriter {
    fn ensure_locked(&self) -> Result<()> {
        if self.lock.is_none() {
            return Err(StrataError::Usage("backend writer closed"));
        }
        Ok(())
    }
}

impl BackendWriter for FileWriter {
    fn write(&mut self, page: &Page) -> Result<PageAddr> {
        self.ensure_locked()?;
        let (bytes, addr) = encode_at(page, self.tail)?;
        self.inner.data.write_at(self.tail, &bytes)?;
        self.tail += bytes.len() as u64;
        Ok(addr)
    }

    fn write_uber_page_reference(&mut self, addr: PageAddr) -> Result<()> {
        self.ensure_locked()?;
        self.inner.data.sync_all()?;
        let record = RootRecord {
            addr,
            end: self.tail,
        };
        let tmp = self.inner.dir.join(ROOT_TMP_FILE);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&record.encode())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, self.inner.dir.join(ROOT_FILE))?;
        sync_dir(&self.inner.dir)?;
        debug!(key = addr.key, end = record.end, "backend.file.publish_root");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.lock = None;
        Ok(())
    }
}

impl Backend for FileBackend {
    fn reader(&self) -> Result<Box<dyn BackendReader>> {
        Ok(Box::new(FileReader {
            data: self.inner.data.clone(),
        }))
    }

    /// Takes `writer.lock`; fails with `Usage` while any other writer, in
    /// any process, holds it.
    fn writer(&self) -> Result<Box<dyn BackendWriter>> {
        let lock = FileLock::try_exclusive(self.inner.dir.join(LOCK_FILE))?
            .ok_or(StrataError::Usage("write transaction already active"))?;
        let tail = drop_unpublished(&self.inner.dir, &self.inner.data)?;
        Ok(Box::new(FileWriter {
            inner: self.inner.clone(),
            tail,
            lock: Some(lock),
        }))
    }

    fn read_root(&self) -> Result<Option<PageAddr>> {
        Ok(read_root_record(&self.inner.dir)?.map(|r| r.addr))
    }

    fn close(&self) -> Result<()> {
        self.inner.data.sync_all()
    }
}
