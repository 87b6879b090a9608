#![forbid(unsafe_code)]
//! Sessions over one resource and the registry of open resources.

mod registry;

pub use registry::Registry;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::backend::Backend;
use crate::cache::{CacheStats, PageCache};
use crate::config::ResourceConfig;
use crate::page::{PageAddr, RevisionRootPage, UberPage};
use crate::primitives::concurrency::SingleWriter;
use crate::revisioning::Revisioning;
use crate::tree::DirtyArena;
use crate::txn::{self, ReadTransaction, WriteTransaction};
use crate::types::{Result, Revision, StrataError};

/// State shared by a session and every transaction it opened.
pub(crate) struct SessionInner {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) cache: PageCache,
    pub(crate) config: ResourceConfig,
    pub(crate) strategy: &'static dyn Revisioning,
    pub(crate) uber: RwLock<Arc<UberPage>>,
    pub(crate) lock: SingleWriter,
    closed: AtomicBool,
}

impl SessionInner {
    /// Most recently published uber page.
    pub(crate) fn current_uber(&self) -> Arc<UberPage> {
        self.uber.read().clone()
    }

    /// Loads the uber page at `addr` and checks it was written with this
    /// session's strategy and restore window.
    fn load_uber(&self, addr: PageAddr) -> Result<UberPage> {
        let uber = self.cache.get(addr)?.as_uber()?.clone();
        if uber.latest_revision().is_none() {
            return Err(StrataError::Corruption("published uber page has no revision"));
        }
        if uber.revisioning() != self.config.revisioning
            || uber.revisions_to_restore() != self.config.revisions_to_restore
        {
            return Err(StrataError::Config(format!(
                "resource was written with {} (restore {}), opened with {} (restore {})",
                uber.revisioning(),
                uber.revisions_to_restore(),
                self.config.revisioning,
                self.config.revisions_to_restore,
            )));
        }
        Ok(uber)
    }

    /// Adopts the backend's current uber page when it is newer than ours,
    /// which happens when another handle on the same storage committed.
    pub(crate) fn refresh_uber(&self) -> Result<Arc<UberPage>> {
        let current = self.current_uber();
        let Some(addr) = self.backend.read_root()? else {
            return Ok(current);
        };
        let published = self.load_uber(addr)?;
        if published.revision_count() <= current.revision_count() {
            return Ok(current);
        }
        debug!(
            from = current.revision_count(),
            to = published.revision_count(),
            "session.refresh"
        );
        let published = Arc::new(published);
        *self.uber.write() = published.clone();
        Ok(published)
    }

    pub(crate) fn revision_root(&self, revision: u64) -> Result<RevisionRootPage> {
        let uber = self.current_uber();
        txn::load_revision_root(&self.cache, &uber, revision)
    }
}

/// Observability snapshot of a session.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct SessionStats {
    /// Most recent committed revision.
    pub latest_revision: u64,
    /// Shared page cache counters.
    pub cache: CacheStats,
    /// Live read transactions.
    pub active_readers: u32,
    /// Whether a write transaction is open.
    pub writer_active: bool,
}

/// Summary of one committed revision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RevisionInfo {
    /// Revision number.
    pub revision: u64,
    /// Commit time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Highest node key ever written, `None` while the resource is empty.
    pub max_node_key: Option<u64>,
    /// Live nodes.
    pub revision_size: u64,
}

impl From<&RevisionRootPage> for RevisionInfo {
    fn from(root: &RevisionRootPage) -> Self {
        Self {
            revision: root.revision().0,
            timestamp_ms: root.timestamp_ms(),
            max_node_key: root.max_node_key(),
            revision_size: root.revision_size(),
        }
    }
}

/// Handle to one open resource.
///
/// Cloning is cheap; clones share the cache, the writer slot and the current
/// uber page.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Opens a session on `backend`.
    ///
    /// An empty backend is bootstrapped with the empty revision 0. Otherwise
    /// the uber page named by the backend's root pointer becomes current.
    pub fn open(backend: Arc<dyn Backend>, config: ResourceConfig) -> Result<Self> {
        config.validate()?;
        let cache = PageCache::new(backend.clone(), config.cache_pages, config.reader_pool_size)?;
        let empty = UberPage::new(config.revisioning, config.revisions_to_restore);
        let inner = Arc::new(SessionInner {
            strategy: config.revisioning.strategy(),
            backend,
            cache,
            config,
            uber: RwLock::new(Arc::new(empty)),
            lock: SingleWriter::new(),
            closed: AtomicBool::new(false),
        });
        if inner.backend.read_root()?.is_none() {
            let mut writer = inner.backend.writer()?;
            // Another handle may have bootstrapped before we took the writer.
            if inner.backend.read_root()?.is_none() {
                debug!("session.bootstrap");
                let base = inner.current_uber();
                let root = RevisionRootPage::bootstrap(txn::now_ms());
                txn::publish(&inner, &mut DirtyArena::new(), writer.as_mut(), &base, root)?;
            }
            writer.close()?;
        }
        inner.refresh_uber()?;
        let session = Self { inner };
        info!(
            revision = session.most_recent_revision().0,
            revisioning = %session.inner.config.revisioning,
            "session.open"
        );
        Ok(session)
    }

    /// Configuration the session was opened with.
    pub fn config(&self) -> &ResourceConfig {
        &self.inner.config
    }

    /// Most recent committed revision.
    pub fn most_recent_revision(&self) -> Revision {
        let count = self.inner.current_uber().revision_count();
        Revision(count.saturating_sub(1))
    }

    /// Opens a reader pinned to `revision`.
    pub fn begin_read(&self, revision: u64) -> Result<ReadTransaction> {
        let guard = self.inner.lock.acquire_reader()?;
        let root = self.inner.revision_root(revision)?;
        debug!(revision, "session.begin_read");
        Ok(ReadTransaction::new(self.inner.clone(), root, guard))
    }

    /// Opens a reader pinned to the most recent revision.
    pub fn begin_read_latest(&self) -> Result<ReadTransaction> {
        self.begin_read(self.most_recent_revision().0)
    }

    /// Opens the single write transaction of this resource.
    ///
    /// Fails with [`StrataError::Usage`] while another one is open.
    pub fn begin_write(&self) -> Result<WriteTransaction> {
        let guard = self.inner.lock.acquire_writer()?;
        WriteTransaction::new(self.inner.clone(), guard)
    }

    /// Summary of `revision`.
    pub fn revision_info(&self, revision: u64) -> Result<RevisionInfo> {
        let root = self.inner.revision_root(revision)?;
        Ok(RevisionInfo::from(&root))
    }

    /// Summaries of every committed revision, oldest first.
    pub fn revisions(&self) -> Result<Vec<RevisionInfo>> {
        let count = self.inner.current_uber().revision_count();
        (0..count).map(|rev| self.revision_info(rev)).collect()
    }

    /// Current counters.
    pub fn stats(&self) -> SessionStats {
        let lock = self.inner.lock.snapshot();
        SessionStats {
            latest_revision: self.most_recent_revision().0,
            cache: self.inner.cache.stats(),
            active_readers: lock.readers,
            writer_active: lock.writer,
        }
    }

    /// True once [`Session::close`] succeeded.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Closes the session. Fails while a write transaction is open.
    ///
    /// Readers already open keep working; new transactions are refused.
    pub fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Err(StrataError::Usage("session already closed"));
        }
        self.inner.lock.close()?;
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(StrataError::Usage("session already closed"));
        }
        self.inner.backend.close()?;
        info!(revision = self.most_recent_revision().0, "session.close");
        Ok(())
    }

    pub(crate) fn same_resource(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("revision", &self.most_recent_revision().0)
            .field("revisioning", &self.inner.config.revisioning)
            .field("closed", &self.is_closed())
            .finish()
    }
}
