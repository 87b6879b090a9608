use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use super::{read_bucket, TxnState};
use crate::node::Node;
use crate::page::{DataPage, NodeBytes, RevisionRootPage};
use crate::primitives::concurrency::ReaderGuard;
use crate::session::SessionInner;
use crate::tree;
use crate::types::{NameKey, NodeKey, Result, Revision, StrataError};

/// Snapshot reader pinned to one committed revision.
pub struct ReadTransaction {
    inner: Arc<SessionInner>,
    root: RevisionRootPage,
    pages: Mutex<LruCache<u64, Arc<DataPage>>>,
    cursor: Option<NodeKey>,
    state: TxnState,
    _guard: Option<ReaderGuard>,
}

impl fmt::Debug for ReadTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadTransaction")
            .field("revision", &self.root.revision())
            .field("state", &self.state)
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl ReadTransaction {
    pub(crate) fn new(inner: Arc<SessionInner>, root: RevisionRootPage, guard: ReaderGuard) -> Self {
        let capacity = NonZeroUsize::new(inner.config.txn_page_cache).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            root,
            pages: Mutex::new(LruCache::new(capacity)),
            cursor: None,
            state: TxnState::Active,
            _guard: Some(guard),
        }
    }

    /// Revision this reader observes.
    pub fn revision(&self) -> Revision {
        self.root.revision()
    }

    /// Highest node key of the revision.
    pub fn max_node_key(&self) -> Option<u64> {
        self.root.max_node_key()
    }

    /// Number of live nodes in the revision.
    pub fn revision_size(&self) -> u64 {
        self.root.revision_size()
    }

    /// Commit time of the revision.
    pub fn timestamp_ms(&self) -> u64 {
        self.root.timestamp_ms()
    }

    /// Lifecycle state.
    pub fn state(&self) -> TxnState {
        self.state
    }

    fn bucket(&self, bucket: u64) -> Result<Arc<DataPage>> {
        if let Some(page) = self.pages.lock().get(&bucket) {
            return Ok(page.clone());
        }
        let entry = tree::resolve(&self.inner.cache, self.root.data_root(), bucket)?;
        let head = entry.addr().ok_or(StrataError::NotFound("data page"))?;
        let page = Arc::new(read_bucket(&self.inner, head)?);
        self.pages.lock().put(bucket, page.clone());
        Ok(page)
    }

    /// Raw bytes of node `key`, `None` when no such node exists in this
    /// revision.
    pub fn get_node(&self, key: u64) -> Result<Option<NodeBytes>> {
        self.state.ensure_active()?;
        let key = NodeKey(key);
        match self.bucket(key.bucket()) {
            Ok(page) => Ok(page.node(key.slot()).cloned()),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Selects node `key`. Returns false, leaving the cursor untouched, when
    /// the node does not exist.
    pub fn move_to(&mut self, key: u64) -> Result<bool> {
        if self.get_node(key)?.is_none() {
            return Ok(false);
        }
        self.cursor = Some(NodeKey(key));
        Ok(true)
    }

    /// Key of the selected node.
    pub fn current_key(&self) -> Option<NodeKey> {
        self.cursor
    }

    /// Decodes the selected node.
    pub fn node(&self) -> Result<Node> {
        let key = self.cursor.ok_or(StrataError::Usage("no node selected"))?;
        let bytes = self
            .get_node(key.0)?
            .ok_or(StrataError::NotFound("node"))?;
        Node::decode(&bytes)
    }

    /// Name interned under `key` in this revision.
    pub fn name(&self, key: NameKey) -> Result<Option<String>> {
        self.state.ensure_active()?;
        let Some(addr) = self.root.names().addr() else {
            return Ok(None);
        };
        let page = self.inner.cache.get(addr)?;
        Ok(page.as_name()?.get(key).map(str::to_owned))
    }

    /// Ends the transaction. Later calls fail with `Usage`.
    pub fn close(&mut self) -> Result<()> {
        self.state.ensure_active()?;
        self.state = TxnState::Closed;
        self._guard = None;
        self.pages.lock().clear();
        Ok(())
    }
}
