use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{data_pages, load_revision_root, publish, read_bucket, TxnState};
use crate::backend::BackendWriter;
use crate::node::{Node, NodeKind};
use crate::page::{NamePage, NodeBytes, PageAddr, RevisionRootPage, UberPage};
use crate::primitives::concurrency::WriterGuard;
use crate::revisioning::CombinedPage;
use crate::session::SessionInner;
use crate::tree::{self, DirtyArena, DirtyPage};
use crate::types::{NameKey, NodeKey, Result, Revision, StrataError};

/// The single writer of a resource.
///
/// Builds revision `base + 1` in a private arena. Nothing becomes visible to
/// other transactions before [`WriteTransaction::commit`] returns.
pub struct WriteTransaction {
    inner: Arc<SessionInner>,
    base: Arc<UberPage>,
    root: RevisionRootPage,
    arena: DirtyArena,
    writer: Option<Box<dyn BackendWriter>>,
    _guard: Option<WriterGuard>,
    state: TxnState,
    cursor: Option<NodeKey>,
}

impl fmt::Debug for WriteTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteTransaction")
            .field("revision", &self.root.revision())
            .field("state", &self.state)
            .field("dirty_pages", &self.arena.len())
            .finish()
    }
}

impl WriteTransaction {
    pub(crate) fn new(inner: Arc<SessionInner>, guard: WriterGuard) -> Result<Self> {
        let writer = inner.backend.writer()?;
        let base = inner.refresh_uber()?;
        let latest = base
            .latest_revision()
            .ok_or(StrataError::Corruption("uber page has no revision"))?;
        let root = load_revision_root(&inner.cache, &base, latest.0)?.successor(latest.0 + 1);
        debug!(revision = latest.0 + 1, "txn.write.begin");
        Ok(Self {
            inner,
            base,
            root,
            arena: DirtyArena::new(),
            writer: Some(writer),
            _guard: Some(guard),
            state: TxnState::Active,
            cursor: None,
        })
    }

    /// Revision this transaction will commit.
    pub fn revision(&self) -> Revision {
        self.root.revision()
    }

    /// Revision the transaction started from.
    pub fn base_revision(&self) -> Revision {
        Revision(self.base.revision_count().saturating_sub(1))
    }

    /// Highest node key written so far, including this transaction.
    pub fn max_node_key(&self) -> Option<u64> {
        self.root.max_node_key()
    }

    /// Live nodes, including this transaction's changes.
    pub fn revision_size(&self) -> u64 {
        self.root.revision_size()
    }

    /// Lifecycle state.
    pub fn state(&self) -> TxnState {
        self.state
    }

    /// Pages cloned or created so far.
    pub fn dirty_pages(&self) -> usize {
        self.arena.len()
    }

    fn modification_pages(&self, head: PageAddr, bucket: u64) -> Result<CombinedPage> {
        let strategy = self.inner.strategy;
        let restore = self.inner.config.revisions_to_restore;
        let pages = tree::fragments(&self.inner.cache, head, strategy.fragment_budget(restore))?;
        let fragments = data_pages(&pages)?;
        let full_dump = strategy.needs_full_dump(restore, &fragments);
        let mut combined =
            strategy.combine_for_modification(restore, bucket, &fragments, full_dump)?;
        let previous = if full_dump {
            None
        } else {
            strategy.predecessor(head, &fragments)
        };
        combined.write.set_previous(previous);
        debug!(
            bucket,
            fragments = fragments.len(),
            full_dump,
            "txn.write.clone_bucket"
        );
        Ok(combined)
    }

    /// Copy-on-write view of `bucket`, cloning the indirect path on first use.
    fn bucket_mut(&mut self, bucket: u64) -> Result<&mut CombinedPage> {
        let slot = tree::prepare_for_write(
            &self.inner.cache,
            &mut self.arena,
            self.root.data_root_mut(),
            bucket,
        )?;
        let entry = *self.arena.reference(slot)?;
        let id = match entry.dirty_id() {
            Some(id) => id,
            None => {
                let combined = match entry.addr() {
                    Some(head) => self.modification_pages(head, bucket)?,
                    None => CombinedPage::fresh(bucket),
                };
                let id = self.arena.alloc(DirtyPage::Data(combined))?;
                self.arena.reference_mut(slot)?.attach_dirty(id);
                id
            }
        };
        self.arena.data_mut(id)
    }

    /// Raw bytes of node `key` as seen by this transaction.
    pub fn get_node(&self, key: u64) -> Result<Option<NodeBytes>> {
        self.state.ensure_active()?;
        let key = NodeKey(key);
        let entry = tree::lookup(
            &self.inner.cache,
            &self.arena,
            self.root.data_root(),
            key.bucket(),
        )?;
        let Some(entry) = entry else {
            return Ok(None);
        };
        if let Some(id) = entry.dirty_id() {
            return Ok(self.arena.data(id)?.read.node(key.slot()).cloned());
        }
        match entry.addr() {
            Some(head) => Ok(read_bucket(&self.inner, head)?.node(key.slot()).cloned()),
            None => Ok(None),
        }
    }

    /// Stores raw bytes under node `key`.
    pub fn set_node(&mut self, key: u64, bytes: &[u8]) -> Result<()> {
        self.state.ensure_active()?;
        let key = NodeKey(key);
        let bytes: NodeBytes = Arc::from(bytes);
        let page = self.bucket_mut(key.bucket())?;
        let existed = page.read.node(key.slot()).is_some();
        page.read.set_node(key.slot(), bytes.clone())?;
        page.write.set_node(key.slot(), bytes)?;
        if !existed {
            let size = self.root.revision_size() + 1;
            self.root.set_revision_size(size);
        }
        self.root.bump_max_node_key(key.0);
        Ok(())
    }

    /// Deletes node `key`. Returns false when it did not exist.
    pub fn remove_node(&mut self, key: u64) -> Result<bool> {
        if self.get_node(key)?.is_none() {
            return Ok(false);
        }
        let key = NodeKey(key);
        let page = self.bucket_mut(key.bucket())?;
        page.read.set_slot(key.slot(), None)?;
        page.write.remove(key.slot())?;
        let size = self.root.revision_size().saturating_sub(1);
        self.root.set_revision_size(size);
        if self.cursor == Some(key) {
            self.cursor = None;
        }
        Ok(true)
    }

    fn names_mut(&mut self) -> Result<&mut NamePage> {
        let entry = *self.root.names();
        let id = match entry.dirty_id() {
            Some(id) => id,
            None => {
                let page = match entry.addr() {
                    Some(addr) => self.inner.cache.get(addr)?.as_name()?.clone(),
                    None => NamePage::new(),
                };
                let id = self.arena.alloc(DirtyPage::Name(page))?;
                self.root.names_mut().attach_dirty(id);
                id
            }
        };
        self.arena.name_mut(id)
    }

    /// Interns `name` for this revision.
    pub fn intern(&mut self, name: &str) -> Result<NameKey> {
        self.state.ensure_active()?;
        Ok(self.names_mut()?.intern(name))
    }

    /// Name stored under `key`.
    pub fn name(&self, key: NameKey) -> Result<Option<String>> {
        self.state.ensure_active()?;
        let entry = self.root.names();
        if let Some(id) = entry.dirty_id() {
            return Ok(self.arena.name(id)?.get(key).map(str::to_owned));
        }
        match entry.addr() {
            Some(addr) => {
                let page = self.inner.cache.get(addr)?;
                Ok(page.as_name()?.get(key).map(str::to_owned))
            }
            None => Ok(None),
        }
    }

    fn read_node(&self, key: NodeKey) -> Result<Node> {
        let bytes = self
            .get_node(key.0)?
            .ok_or(StrataError::NotFound("node"))?;
        Node::decode(&bytes)
    }

    fn write_node(&mut self, key: NodeKey, node: &Node) -> Result<()> {
        self.set_node(key.0, &node.encode()?)
    }

    fn next_key(&self) -> NodeKey {
        NodeKey(self.root.max_node_key().map_or(0, |k| k + 1))
    }

    fn new_node(&mut self, kind: NodeKind, name: Option<&str>, value: &[u8]) -> Result<Node> {
        let mut node = Node::new(kind);
        node.name = name.map(|n| self.intern(n)).transpose()?;
        node.value = value.to_vec();
        Ok(node)
    }

    fn selected(&self) -> Result<NodeKey> {
        self.state.ensure_active()?;
        self.cursor.ok_or(StrataError::Usage("no node selected"))
    }

    /// Selects node `key`. Returns false when it does not exist.
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
        let key = self.selected()?;
        self.read_node(key)
    }

    /// Creates the root node of an empty resource and selects it.
    pub fn insert_root(
        &mut self,
        kind: NodeKind,
        name: Option<&str>,
        value: &[u8],
    ) -> Result<NodeKey> {
        self.state.ensure_active()?;
        if self.root.max_node_key().is_some() {
            return Err(StrataError::Usage("resource already has nodes"));
        }
        let key = self.next_key();
        let node = self.new_node(kind, name, value)?;
        self.write_node(key, &node)?;
        self.cursor = Some(key);
        Ok(key)
    }

    /// Inserts a node as first child of the selected node and selects it.
    pub fn insert_first_child(
        &mut self,
        kind: NodeKind,
        name: Option<&str>,
        value: &[u8],
    ) -> Result<NodeKey> {
        let parent_key = self.selected()?;
        let mut parent = self.read_node(parent_key)?;
        let key = self.next_key();
        let mut node = self.new_node(kind, name, value)?;
        node.parent = Some(parent_key);
        node.right_sibling = parent.first_child;
        if let Some(old_first) = parent.first_child {
            let mut sibling = self.read_node(old_first)?;
            sibling.left_sibling = Some(key);
            self.write_node(old_first, &sibling)?;
        }
        parent.first_child = Some(key);
        parent.child_count += 1;
        self.write_node(key, &node)?;
        self.write_node(parent_key, &parent)?;
        self.cursor = Some(key);
        Ok(key)
    }

    /// Inserts a node right after the selected node and selects it.
    pub fn insert_right_sibling(
        &mut self,
        kind: NodeKind,
        name: Option<&str>,
        value: &[u8],
    ) -> Result<NodeKey> {
        let left_key = self.selected()?;
        let mut left = self.read_node(left_key)?;
        let parent_key = left
            .parent
            .ok_or(StrataError::Usage("the root node has no siblings"))?;
        let mut parent = self.read_node(parent_key)?;
        let key = self.next_key();
        let mut node = self.new_node(kind, name, value)?;
        node.parent = Some(parent_key);
        node.left_sibling = Some(left_key);
        node.right_sibling = left.right_sibling;
        if let Some(right_key) = left.right_sibling {
            let mut right = self.read_node(right_key)?;
            right.left_sibling = Some(key);
            self.write_node(right_key, &right)?;
        }
        left.right_sibling = Some(key);
        parent.child_count += 1;
        self.write_node(key, &node)?;
        self.write_node(left_key, &left)?;
        self.write_node(parent_key, &parent)?;
        self.cursor = Some(key);
        Ok(key)
    }

    /// Removes the selected leaf node and selects its parent.
    pub fn remove(&mut self) -> Result<()> {
        let key = self.selected()?;
        let node = self.read_node(key)?;
        if node.child_count > 0 {
            return Err(StrataError::Usage("cannot remove a node with children"));
        }
        if let Some(left_key) = node.left_sibling {
            let mut left = self.read_node(left_key)?;
            left.right_sibling = node.right_sibling;
            self.write_node(left_key, &left)?;
        }
        if let Some(right_key) = node.right_sibling {
            let mut right = self.read_node(right_key)?;
            right.left_sibling = node.left_sibling;
            self.write_node(right_key, &right)?;
        }
        if let Some(parent_key) = node.parent {
            let mut parent = self.read_node(parent_key)?;
            if parent.first_child == Some(key) {
                parent.first_child = node.right_sibling;
            }
            parent.child_count = parent.child_count.saturating_sub(1);
            self.write_node(parent_key, &parent)?;
        }
        self.remove_node(key.0)?;
        self.cursor = node.parent;
        Ok(())
    }

    /// Replaces the value of the selected node.
    pub fn set_value(&mut self, value: &[u8]) -> Result<()> {
        let key = self.selected()?;
        let mut node = self.read_node(key)?;
        node.value = value.to_vec();
        self.write_node(key, &node)
    }

    /// Renames the selected node.
    pub fn set_name(&mut self, name: &str) -> Result<()> {
        let key = self.selected()?;
        let mut node = self.read_node(key)?;
        node.name = Some(self.intern(name)?);
        self.write_node(key, &node)
    }

    /// Persists every change and publishes the new revision.
    ///
    /// On failure the previous revision stays current and the transaction
    /// moves to [`TxnState::Failed`]; it can then only be aborted.
    pub fn commit(&mut self) -> Result<Revision> {
        self.state.ensure_active()?;
        let revision = self.root.revision();
        let mut writer = self
            .writer
            .take()
            .ok_or(StrataError::Usage("writer already released"))?;
        info!(
            revision = revision.0,
            dirty_pages = self.arena.len(),
            "txn.commit.start"
        );
        let root = self.root.clone();
        match publish(&self.inner, &mut self.arena, writer.as_mut(), &self.base, root) {
            Ok(_) => {
                if let Err(err) = writer.close() {
                    warn!(error = %err, "txn.commit.writer_close");
                }
                self.finish(TxnState::Committed);
                info!(revision = revision.0, "txn.commit.done");
                Ok(revision)
            }
            Err(err) => {
                warn!(revision = revision.0, error = %err, "txn.commit.failed");
                self.state = TxnState::Failed;
                Err(err)
            }
        }
    }

    /// Discards every change and releases the writer slot.
    pub fn abort(&mut self) -> Result<()> {
        match self.state {
            TxnState::Active | TxnState::Failed => {
                debug!(revision = self.root.revision().0, "txn.abort");
                self.finish(TxnState::Aborted);
                Ok(())
            }
            other => other.ensure_active(),
        }
    }

    /// Closes the transaction, aborting it if still active.
    pub fn close(&mut self) -> Result<()> {
        match self.state {
            TxnState::Closed => Err(StrataError::Usage("transaction closed")),
            _ => {
                self.finish(TxnState::Closed);
                Ok(())
            }
        }
    }

    fn finish(&mut self, state: TxnState) {
        self.state = state;
        self.arena = DirtyArena::new();
        self.writer = None;
        self._guard = None;
        self.cursor = None;
    }
}
