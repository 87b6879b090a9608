#![forbid(unsafe_code)]
//! Strategies that rebuild a logical data page from physical fragments and
//! decide what the next revision persists.
//!
//! Fragments are always ordered newest first. A slot defined by a newer
//! fragment wins over every older fragment, tombstones included, and older
//! fragments are not consulted once every slot is resolved.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::page::{DataPage, PageAddr, Slot};
use crate::types::{Result, StrataError, SLOTS_PER_PAGE};

/// Read view and write page produced for a bucket about to be modified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CombinedPage {
    /// Fully resolved page as of the base revision. Carries no tombstones.
    pub read: DataPage,
    /// Page that will be persisted for the new revision.
    pub write: DataPage,
}

impl CombinedPage {
    /// Pair for a bucket that has never been written.
    pub fn fresh(page_key: u64) -> Self {
        Self {
            read: DataPage::new(page_key),
            write: DataPage::new(page_key),
        }
    }
}

/// Page reconstruction policy.
pub trait Revisioning: Send + Sync + fmt::Debug {
    /// Serializable name of the strategy.
    fn kind(&self) -> RevisioningKind;

    /// Maximum number of fragments a reader fetches for one bucket.
    fn fragment_budget(&self, revisions_to_restore: u32) -> usize;

    /// Rebuilds the logical page from `fragments`.
    fn combine(&self, revisions_to_restore: u32, fragments: &[&DataPage]) -> Result<DataPage>;

    /// Rebuilds the logical page and derives the page the new revision
    /// persists for the same bucket.
    fn combine_for_modification(
        &self,
        revisions_to_restore: u32,
        new_page_key: u64,
        fragments: &[&DataPage],
        full_dump: bool,
    ) -> Result<CombinedPage>;

    /// Whether the next write page for this bucket must be a full
    /// materialization.
    fn needs_full_dump(&self, revisions_to_restore: u32, fragments: &[&DataPage]) -> bool;

    /// Fragment the next delta links back to. `head` is the address of
    /// `fragments[0]`.
    fn predecessor(&self, head: PageAddr, fragments: &[&DataPage]) -> Option<PageAddr>;
}

/// Names of the available strategies, as stored in resource configuration.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisioningKind {
    /// Every revision persists complete pages.
    FullDump,
    /// Revisions persist deltas against the previous revision.
    #[default]
    Incremental,
    /// Revisions persist deltas against the last full page.
    Differential,
    /// Revisions persist complete pages merged over a bounded window.
    SlidingSnapshot,
}

static FULL_DUMP: FullDump = FullDump;
static INCREMENTAL: Incremental = Incremental;
static DIFFERENTIAL: Differential = Differential;
static SLIDING_SNAPSHOT: SlidingSnapshot = SlidingSnapshot;

impl RevisioningKind {
    /// Strategy implementing this kind.
    pub fn strategy(self) -> &'static dyn Revisioning {
        match self {
            RevisioningKind::FullDump => &FULL_DUMP,
            RevisioningKind::Incremental => &INCREMENTAL,
            RevisioningKind::Differential => &DIFFERENTIAL,
            RevisioningKind::SlidingSnapshot => &SLIDING_SNAPSHOT,
        }
    }

    /// Smallest `revisions_to_restore` the strategy accepts.
    pub fn min_revisions_to_restore(self) -> u32 {
        match self {
            RevisioningKind::Differential => 2,
            _ => 1,
        }
    }

    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            RevisioningKind::FullDump => "full_dump",
            RevisioningKind::Incremental => "incremental",
            RevisioningKind::Differential => "differential",
            RevisioningKind::SlidingSnapshot => "sliding_snapshot",
        }
    }

    pub(crate) fn code(self) -> u8 {
        match self {
            RevisioningKind::FullDump => 0,
            RevisioningKind::Incremental => 1,
            RevisioningKind::Differential => 2,
            RevisioningKind::SlidingSnapshot => 3,
        }
    }

    pub(crate) fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => RevisioningKind::FullDump,
            1 => RevisioningKind::Incremental,
            2 => RevisioningKind::Differential,
            3 => RevisioningKind::SlidingSnapshot,
            _ => return Err(StrataError::Corruption("unknown revisioning kind")),
        })
    }
}

impl fmt::Display for RevisioningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn check_fragments(fragments: &[&DataPage]) -> Result<u64> {
    let first = fragments
        .first()
        .ok_or(StrataError::Usage("at least one fragment is required"))?;
    let key = first.page_key();
    if fragments.iter().any(|f| f.page_key() != key) {
        return Err(StrataError::Usage("fragments belong to different buckets"));
    }
    Ok(key)
}

fn check_modification(new_page_key: u64, fragments: &[&DataPage]) -> Result<()> {
    if check_fragments(fragments)? != new_page_key {
        return Err(StrataError::Usage("new page key differs from fragment bucket"));
    }
    Ok(())
}

/// Resolves every slot from the newest fragment that defines it.
///
/// Stops early once every slot is resolved. Tombstones shadow older
/// fragments and come out as empty slots.
fn merge_newest_first(page_key: u64, fragments: &[&DataPage]) -> Result<DataPage> {
    let mut out = DataPage::new(page_key);
    let mut resolved = [false; SLOTS_PER_PAGE];
    let mut remaining = SLOTS_PER_PAGE;
    for fragment in fragments {
        for (offset, slot) in fragment.iter_defined() {
            if resolved[offset] {
                continue;
            }
            resolved[offset] = true;
            remaining -= 1;
            if let Slot::Node(bytes) = slot {
                out.set_node(offset, bytes.clone())?;
            }
        }
        if remaining == 0 {
            break;
        }
    }
    Ok(out)
}

fn head_depth(fragments: &[&DataPage]) -> u32 {
    fragments.first().map_or(0, |f| f.depth())
}

fn full_copy(read: &DataPage) -> DataPage {
    let mut write = read.clone();
    write.set_previous(None);
    write.set_depth(0);
    write
}

/// Persists complete pages every revision.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullDump;

impl Revisioning for FullDump {
    fn kind(&self) -> RevisioningKind {
        RevisioningKind::FullDump
    }

    fn fragment_budget(&self, _revisions_to_restore: u32) -> usize {
        1
    }

    fn combine(&self, _revisions_to_restore: u32, fragments: &[&DataPage]) -> Result<DataPage> {
        check_fragments(fragments)?;
        Ok(fragments[0].without_tombstones())
    }

    fn combine_for_modification(
        &self,
        revisions_to_restore: u32,
        new_page_key: u64,
        fragments: &[&DataPage],
        _full_dump: bool,
    ) -> Result<CombinedPage> {
        check_modification(new_page_key, fragments)?;
        let read = self.combine(revisions_to_restore, fragments)?;
        let write = full_copy(&read);
        Ok(CombinedPage { read, write })
    }

    fn needs_full_dump(&self, _revisions_to_restore: u32, _fragments: &[&DataPage]) -> bool {
        true
    }

    fn predecessor(&self, _head: PageAddr, _fragments: &[&DataPage]) -> Option<PageAddr> {
        None
    }
}

/// Delta chain against the previous revision, materialized every
/// `revisions_to_restore` revisions.
#[derive(Debug, Clone, Copy, Default)]
pub struct Incremental;

impl Revisioning for Incremental {
    fn kind(&self) -> RevisioningKind {
        RevisioningKind::Incremental
    }

    fn fragment_budget(&self, revisions_to_restore: u32) -> usize {
        revisions_to_restore.max(1) as usize
    }

    fn combine(&self, _revisions_to_restore: u32, fragments: &[&DataPage]) -> Result<DataPage> {
        let key = check_fragments(fragments)?;
        merge_newest_first(key, fragments)
    }

    fn combine_for_modification(
        &self,
        revisions_to_restore: u32,
        new_page_key: u64,
        fragments: &[&DataPage],
        full_dump: bool,
    ) -> Result<CombinedPage> {
        check_modification(new_page_key, fragments)?;
        let read = self.combine(revisions_to_restore, fragments)?;
        let write = if full_dump {
            full_copy(&read)
        } else {
            let mut delta = DataPage::new(new_page_key);
            delta.set_depth(head_depth(fragments).saturating_add(1));
            delta
        };
        Ok(CombinedPage { read, write })
    }

    fn needs_full_dump(&self, revisions_to_restore: u32, fragments: &[&DataPage]) -> bool {
        head_depth(fragments).saturating_add(1) >= revisions_to_restore
    }

    fn predecessor(&self, head: PageAddr, _fragments: &[&DataPage]) -> Option<PageAddr> {
        Some(head)
    }
}

/// One cumulative delta on top of the latest full page.
#[derive(Debug, Clone, Copy, Default)]
pub struct Differential;

impl Revisioning for Differential {
    fn kind(&self) -> RevisioningKind {
        RevisioningKind::Differential
    }

    fn fragment_budget(&self, _revisions_to_restore: u32) -> usize {
        2
    }

    fn combine(&self, _revisions_to_restore: u32, fragments: &[&DataPage]) -> Result<DataPage> {
        let key = check_fragments(fragments)?;
        let window = &fragments[..fragments.len().min(2)];
        merge_newest_first(key, window)
    }

    fn combine_for_modification(
        &self,
        revisions_to_restore: u32,
        new_page_key: u64,
        fragments: &[&DataPage],
        full_dump: bool,
    ) -> Result<CombinedPage> {
        check_modification(new_page_key, fragments)?;
        let read = self.combine(revisions_to_restore, fragments)?;
        let write = if full_dump {
            full_copy(&read)
        } else {
            let head = fragments[0];
            let mut delta = DataPage::new(new_page_key);
            if head.depth() > 0 {
                for (offset, slot) in head.iter_defined() {
                    delta.set_slot(offset, Some(slot.clone()))?;
                }
            }
            delta.set_depth(head.depth().saturating_add(1));
            delta
        };
        Ok(CombinedPage { read, write })
    }

    fn needs_full_dump(&self, revisions_to_restore: u32, fragments: &[&DataPage]) -> bool {
        head_depth(fragments).saturating_add(1) >= revisions_to_restore
    }

    fn predecessor(&self, head: PageAddr, fragments: &[&DataPage]) -> Option<PageAddr> {
        match fragments.first() {
            Some(f) if f.depth() > 0 => f.previous(),
            _ => Some(head),
        }
    }
}

/// Complete pages merged over a window of `revisions_to_restore` fragments.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlidingSnapshot;

impl Revisioning for SlidingSnapshot {
    fn kind(&self) -> RevisioningKind {
        RevisioningKind::SlidingSnapshot
    }

    fn fragment_budget(&self, revisions_to_restore: u32) -> usize {
        revisions_to_restore.max(1) as usize
    }

    fn combine(&self, revisions_to_restore: u32, fragments: &[&DataPage]) -> Result<DataPage> {
        let key = check_fragments(fragments)?;
        let window = &fragments[..fragments.len().min(self.fragment_budget(revisions_to_restore))];
        merge_newest_first(key, window)
    }

    fn combine_for_modification(
        &self,
        revisions_to_restore: u32,
        new_page_key: u64,
        fragments: &[&DataPage],
        _full_dump: bool,
    ) -> Result<CombinedPage> {
        check_modification(new_page_key, fragments)?;
        let read = self.combine(revisions_to_restore, fragments)?;
        let write = full_copy(&read);
        Ok(CombinedPage { read, write })
    }

    fn needs_full_dump(&self, _revisions_to_restore: u32, _fragments: &[&DataPage]) -> bool {
        false
    }

    fn predecessor(&self, head: PageAddr, _fragments: &[&DataPage]) -> Option<PageAddr> {
        Some(head)
    }
}
