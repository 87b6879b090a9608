#![forbid(unsafe_code)]
//! Read and write transactions.
//!
//! Readers are pinned to one revision root and only ever touch committed,
//! immutable pages. The single writer clones every page it changes into its
//! [`DirtyArena`] and publishes a new uber page on commit.

mod read;
mod write;

pub use read::ReadTransaction;
pub use write::WriteTransaction;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::backend::BackendWriter;
use crate::cache::PageCache;
use crate::page::{DataPage, Page, PageAddr, PageReference, RevisionRootPage, UberPage};
use crate::session::SessionInner;
use crate::tree::{self, DirtyArena, Persisted};
use crate::types::{Result, StrataError};

/// Lifecycle of a transaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TxnState {
    /// Accepting operations.
    Active,
    /// Commit published a new revision.
    Committed,
    /// Discarded by the caller.
    Aborted,
    /// Commit failed; only abort is accepted.
    Failed,
    /// Closed by the caller.
    Closed,
}

impl TxnState {
    pub(crate) fn ensure_active(self) -> Result<()> {
        match self {
            TxnState::Active => Ok(()),
            TxnState::Committed => Err(StrataError::Usage("transaction already committed")),
            TxnState::Aborted => Err(StrataError::Usage("transaction aborted")),
            TxnState::Failed => Err(StrataError::Usage("commit failed; abort the transaction")),
            TxnState::Closed => Err(StrataError::Usage("transaction closed")),
        }
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Loads the revision root of `revision` as published in `uber`.
pub(crate) fn load_revision_root(
    cache: &PageCache,
    uber: &UberPage,
    revision: u64,
) -> Result<RevisionRootPage> {
    if revision >= uber.revision_count() {
        return Err(StrataError::RevisionNotFound(revision));
    }
    let entry = tree::resolve(cache, uber.root(), revision).map_err(|err| {
        if err.is_not_found() {
            StrataError::RevisionNotFound(revision)
        } else {
            err
        }
    })?;
    let addr = entry
        .addr()
        .ok_or(StrataError::RevisionNotFound(revision))?;
    Ok(cache.get(addr)?.as_revision_root()?.clone())
}

/// Rebuilds the committed bucket whose newest fragment lives at `head`.
pub(crate) fn read_bucket(inner: &SessionInner, head: PageAddr) -> Result<DataPage> {
    let restore = inner.config.revisions_to_restore;
    let pages = tree::fragments(&inner.cache, head, inner.strategy.fragment_budget(restore))?;
    let fragments = data_pages(&pages)?;
    inner.strategy.combine(restore, &fragments)
}

pub(crate) fn data_pages(pages: &[Arc<Page>]) -> Result<Vec<&DataPage>> {
    pages.iter().map(|p| p.as_data()).collect()
}

/// Persists a new revision and makes it current.
///
/// Order: data and name pages, indirect pages, the revision root, the uber
/// tree, the uber page, and last the backend's root pointer. The in-memory
/// uber page is swapped only after the root pointer is durable, so a failure
/// at any step leaves the previous revision current.
pub(crate) fn publish(
    inner: &SessionInner,
    arena: &mut DirtyArena,
    writer: &mut dyn BackendWriter,
    base: &UberPage,
    mut root: RevisionRootPage,
) -> Result<Arc<UberPage>> {
    let revision = root.revision().0;
    let mut persisted = Persisted::new();
    tree::commit(arena, writer, root.data_root_mut(), &mut persisted)?;
    tree::commit(arena, writer, root.names_mut(), &mut persisted)?;
    root.set_timestamp_ms(now_ms());

    let root_page = Page::RevisionRoot(root);
    let root_addr = writer.write(&root_page)?;
    persisted.push((root_addr, Arc::new(root_page)));

    let mut uber = base.clone();
    let slot = tree::prepare_for_write(&inner.cache, arena, uber.root_mut(), revision)?;
    *arena.reference_mut(slot)? = PageReference::committed(root_addr);
    tree::commit(arena, writer, uber.root_mut(), &mut persisted)?;
    uber.set_revision_count(revision + 1);

    let uber_page = Page::Uber(uber.clone());
    let uber_addr = writer.write(&uber_page)?;
    writer.write_uber_page_reference(uber_addr)?;

    let uber = Arc::new(uber);
    *inner.uber.write() = uber.clone();
    let pages = persisted.len() + 1;
    for (addr, page) in persisted {
        inner.cache.insert(addr, page);
    }
    inner.cache.insert(uber_addr, Arc::new(uber_page));
    debug!(revision, pages, "txn.publish");
    Ok(uber)
}
