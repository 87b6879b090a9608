#![forbid(unsafe_code)]
//! Indirection trees and the copy-on-write arena of a write transaction.
//!
//! A tree is four levels of [`IndirectPage`]s. A key is split into one
//! 7-bit digit per level, most significant first; the last digit selects the
//! terminal reference. The same shape maps revision numbers to revision
//! roots (inside the uber page) and bucket indexes to data pages (inside a
//! revision root).

use std::sync::Arc;

use tracing::trace;

use crate::backend::BackendWriter;
use crate::cache::PageCache;
use crate::page::{DirtyId, IndirectPage, NamePage, Page, PageAddr, PageReference};
use crate::revisioning::CombinedPage;
use crate::types::{Result, StrataError, INDIRECT_FANOUT, LEVEL_EXPONENTS, MAX_TREE_KEY};

const DIGIT_MASK: u64 = INDIRECT_FANOUT as u64 - 1;

/// Per-level offsets of `key`, most significant first.
pub fn digits(key: u64) -> Result<[usize; LEVEL_EXPONENTS.len()]> {
    if key >= MAX_TREE_KEY {
        return Err(StrataError::Invalid("key beyond indirection tree range"));
    }
    let mut out = [0usize; LEVEL_EXPONENTS.len()];
    for (digit, exp) in out.iter_mut().zip(LEVEL_EXPONENTS) {
        *digit = ((key >> exp) & DIGIT_MASK) as usize;
    }
    Ok(out)
}

/// Walks a committed tree and returns the terminal reference for `key`.
///
/// Any missing level, and an empty terminal reference, is `NotFound`.
pub fn resolve(cache: &PageCache, root: &PageReference, key: u64) -> Result<PageReference> {
    let mut current = *root;
    for digit in digits(key)? {
        let addr = current
            .addr()
            .ok_or(StrataError::NotFound("indirect page"))?;
        let page = cache.get(addr)?;
        current = *page.as_indirect()?.reference(digit)?;
    }
    if current.is_empty() {
        return Err(StrataError::NotFound("tree entry"));
    }
    Ok(current)
}

/// Follows the fragment chain starting at `head`, newest first.
///
/// Stops at a full page (depth 0) or at the end of the chain. A chain that
/// still continues after `budget` fragments was written under a wider
/// restore window and is reported as corruption instead of being cut short.
pub fn fragments(cache: &PageCache, head: PageAddr, budget: usize) -> Result<Vec<Arc<Page>>> {
    let mut out = Vec::with_capacity(budget.min(8));
    let mut next = Some(head);
    while let Some(addr) = next {
        if out.len() >= budget {
            return Err(StrataError::Corruption("fragment chain exceeds restore window"));
        }
        let page = cache.get(addr)?;
        let data = page.as_data()?;
        next = if data.depth() == 0 {
            None
        } else {
            data.previous()
        };
        out.push(page);
    }
    trace!(head = head.key, fetched = out.len(), "tree.fragments");
    Ok(out)
}

/// Page owned by the in-flight write transaction.
#[derive(Clone, Debug)]
pub enum DirtyPage {
    /// Cloned or fresh indirect page.
    Indirect(IndirectPage),
    /// Read view plus the fragment to persist.
    Data(CombinedPage),
    /// Name table of the revision.
    Name(NamePage),
}

/// Location of one reference inside a dirty indirect page.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RefSlot {
    /// Arena id of the indirect page.
    pub page: DirtyId,
    /// Offset of the reference inside it.
    pub offset: usize,
}

/// Index-addressed storage for copy-on-write pages.
///
/// Cloning a committed page allocates a new arena slot; references point at
/// slots through [`DirtyId`]. Committed pages are never touched.
#[derive(Debug, Default)]
pub struct DirtyArena {
    pages: Vec<Option<DirtyPage>>,
}

impl DirtyArena {
    /// Empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `page` and returns its handle.
    pub fn alloc(&mut self, page: DirtyPage) -> Result<DirtyId> {
        let id = u32::try_from(self.pages.len())
            .map_err(|_| StrataError::Invalid("write arena exhausted"))?;
        self.pages.push(Some(page));
        Ok(DirtyId(id))
    }

    /// Number of pages allocated so far.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// True before the first allocation.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Page stored under `id`.
    pub fn get(&self, id: DirtyId) -> Result<&DirtyPage> {
        self.pages
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(StrataError::Usage("stale dirty page handle"))
    }

    /// Mutable page stored under `id`.
    pub fn get_mut(&mut self, id: DirtyId) -> Result<&mut DirtyPage> {
        self.pages
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(StrataError::Usage("stale dirty page handle"))
    }

    fn take(&mut self, id: DirtyId) -> Result<DirtyPage> {
        self.pages
            .get_mut(id.0 as usize)
            .and_then(Option::take)
            .ok_or(StrataError::Usage("stale dirty page handle"))
    }

    /// Indirect page under `id`; `Corruption` for any other kind.
    pub fn indirect(&self, id: DirtyId) -> Result<&IndirectPage> {
        match self.get(id)? {
            DirtyPage::Indirect(page) => Ok(page),
            _ => Err(StrataError::Usage("dirty page is not an indirect page")),
        }
    }

    /// Mutable indirect page under `id`.
    pub fn indirect_mut(&mut self, id: DirtyId) -> Result<&mut IndirectPage> {
        match self.get_mut(id)? {
            DirtyPage::Indirect(page) => Ok(page),
            _ => Err(StrataError::Usage("dirty page is not an indirect page")),
        }
    }

    /// Data page pair under `id`.
    pub fn data(&self, id: DirtyId) -> Result<&CombinedPage> {
        match self.get(id)? {
            DirtyPage::Data(page) => Ok(page),
            _ => Err(StrataError::Usage("dirty page is not a data page")),
        }
    }

    /// Mutable data page pair under `id`.
    pub fn data_mut(&mut self, id: DirtyId) -> Result<&mut CombinedPage> {
        match self.get_mut(id)? {
            DirtyPage::Data(page) => Ok(page),
            _ => Err(StrataError::Usage("dirty page is not a data page")),
        }
    }

    /// Name page under `id`.
    pub fn name(&self, id: DirtyId) -> Result<&NamePage> {
        match self.get(id)? {
            DirtyPage::Name(page) => Ok(page),
            _ => Err(StrataError::Usage("dirty page is not a name page")),
        }
    }

    /// Mutable name page under `id`.
    pub fn name_mut(&mut self, id: DirtyId) -> Result<&mut NamePage> {
        match self.get_mut(id)? {
            DirtyPage::Name(page) => Ok(page),
            _ => Err(StrataError::Usage("dirty page is not a name page")),
        }
    }

    /// Reference stored at `slot`.
    pub fn reference(&self, slot: RefSlot) -> Result<&PageReference> {
        self.indirect(slot.page)?.reference(slot.offset)
    }

    /// Mutable reference stored at `slot`.
    pub fn reference_mut(&mut self, slot: RefSlot) -> Result<&mut PageReference> {
        self.indirect_mut(slot.page)?.reference_mut(slot.offset)
    }
}

/// Ensures `r` points at a dirty indirect page, cloning the committed one (or
/// creating an empty one) when needed.
fn own_indirect(
    cache: &PageCache,
    arena: &mut DirtyArena,
    r: &mut PageReference,
) -> Result<DirtyId> {
    if let Some(id) = r.dirty_id() {
        return Ok(id);
    }
    let page = match r.addr() {
        Some(addr) => cache.get(addr)?.as_indirect()?.clone(),
        None => IndirectPage::new(),
    };
    let id = arena.alloc(DirtyPage::Indirect(page))?;
    r.attach_dirty(id);
    Ok(id)
}

/// Clones every indirect page on the path to `key` into the arena and returns
/// the terminal reference slot.
///
/// Afterwards the caller may rewrite the terminal reference in place: every
/// page on the path is owned by the arena, so no committed revision observes
/// the change.
pub fn prepare_for_write(
    cache: &PageCache,
    arena: &mut DirtyArena,
    root: &mut PageReference,
    key: u64,
) -> Result<RefSlot> {
    let digits = digits(key)?;
    let mut current = own_indirect(cache, arena, root)?;
    let (last, inner) = digits
        .split_last()
        .ok_or(StrataError::Invalid("empty key path"))?;
    for &digit in inner {
        let mut child = *arena.indirect(current)?.reference(digit)?;
        let id = own_indirect(cache, arena, &mut child)?;
        *arena.indirect_mut(current)?.reference_mut(digit)? = child;
        current = id;
    }
    Ok(RefSlot {
        page: current,
        offset: *last,
    })
}

/// Walks a tree that may contain dirty pages and returns the terminal
/// reference for `key`, or `None` when the path is not populated.
pub fn lookup(
    cache: &PageCache,
    arena: &DirtyArena,
    root: &PageReference,
    key: u64,
) -> Result<Option<PageReference>> {
    let mut current = *root;
    for digit in digits(key)? {
        current = if let Some(id) = current.dirty_id() {
            *arena.indirect(id)?.reference(digit)?
        } else if let Some(addr) = current.addr() {
            *cache.get(addr)?.as_indirect()?.reference(digit)?
        } else {
            return Ok(None);
        };
    }
    Ok((!current.is_empty()).then_some(current))
}

/// Pages persisted while committing a subtree, for cache warm-up.
pub type Persisted = Vec<(PageAddr, Arc<Page>)>;

/// Persists every dirty page reachable from `r`, children first, and rewrites
/// each reference to the address its page was written at.
pub fn commit(
    arena: &mut DirtyArena,
    writer: &mut dyn BackendWriter,
    r: &mut PageReference,
    persisted: &mut Persisted,
) -> Result<()> {
    let Some(id) = r.dirty_id() else {
        return Ok(());
    };
    let page = match arena.take(id)? {
        DirtyPage::Indirect(mut page) => {
            for child in page.references_mut() {
                commit(arena, writer, child, persisted)?;
            }
            Page::Indirect(page)
        }
        DirtyPage::Data(combined) => {
            let write = if combined.write.depth() == 0 {
                combined.write.without_tombstones()
            } else {
                combined.write
            };
            Page::Data(write)
        }
        DirtyPage::Name(page) => Page::Name(page),
    };
    let addr = writer.write(&page)?;
    r.mark_persisted(addr);
    persisted.push((addr, Arc::new(page)));
    Ok(())
}
