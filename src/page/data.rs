use std::sync::Arc;

use crate::primitives::bytes::{PageCursor, PageWriter};
use crate::types::{Result, StrataError, SLOTS_PER_PAGE};

use super::PageAddr;

/// Serialized bytes of one node.
pub type NodeBytes = Arc<[u8]>;

/// Marker for a slot absent from a fragment.
pub const NULL_MARKER: u32 = u32::MAX;
/// Marker for a slot deleted in this fragment.
pub const REMOVED_MARKER: u32 = u32::MAX - 1;

/// Content of a populated slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Slot {
    /// A live node.
    Node(NodeBytes),
    /// The node was deleted; older fragments must not resurrect it.
    Removed,
}

impl Slot {
    /// Node bytes, or `None` for a tombstone.
    pub fn node(&self) -> Option<&NodeBytes> {
        match self {
            Slot::Node(bytes) => Some(bytes),
            Slot::Removed => None,
        }
    }
}

/// Fixed-capacity bucket of node slots.
///
/// A data page keeps its bucket identity (`page_key`) across revisions. Physical
/// fragments of the same bucket form a chain through `previous`; `depth` counts
/// the deltas stacked since the last full materialization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataPage {
    page_key: u64,
    previous: Option<PageAddr>,
    depth: u32,
    slots: Vec<Option<Slot>>,
}

impl DataPage {
    /// Creates an empty, self-contained page for `page_key`.
    pub fn new(page_key: u64) -> Self {
        Self {
            page_key,
            previous: None,
            depth: 0,
            slots: vec![None; SLOTS_PER_PAGE],
        }
    }

    /// Bucket index of this page.
    pub fn page_key(&self) -> u64 {
        self.page_key
    }

    /// Address of the preceding fragment of this bucket.
    pub fn previous(&self) -> Option<PageAddr> {
        self.previous
    }

    /// Number of deltas since the last full materialization.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Links this fragment to its predecessor.
    pub fn set_previous(&mut self, previous: Option<PageAddr>) {
        self.previous = previous;
    }

    /// Sets the delta count since the last full page.
    pub fn set_depth(&mut self, depth: u32) {
        self.depth = depth;
    }

    /// Slot content at `offset`, `None` when the fragment does not define it.
    pub fn slot(&self, offset: usize) -> Option<&Slot> {
        self.slots.get(offset).and_then(Option::as_ref)
    }

    /// Live node bytes at `offset`.
    pub fn node(&self, offset: usize) -> Option<&NodeBytes> {
        self.slot(offset).and_then(Slot::node)
    }

    /// Overwrites the slot at `offset`.
    pub fn set_slot(&mut self, offset: usize, slot: Option<Slot>) -> Result<()> {
        let entry = self
            .slots
            .get_mut(offset)
            .ok_or(StrataError::Invalid("slot offset outside data page"))?;
        *entry = slot;
        Ok(())
    }

    /// Stores node bytes at `offset`.
    pub fn set_node(&mut self, offset: usize, bytes: NodeBytes) -> Result<()> {
        self.set_slot(offset, Some(Slot::Node(bytes)))
    }

    /// Places a tombstone at `offset`.
    pub fn remove(&mut self, offset: usize) -> Result<()> {
        self.set_slot(offset, Some(Slot::Removed))
    }

    /// True when every slot is defined by this page.
    pub fn is_dense(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Number of slots defined by this page, tombstones included.
    pub fn defined(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Number of live nodes.
    pub fn live(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Some(Slot::Node(_))))
            .count()
    }

    /// Iterates over `(offset, slot)` for every defined slot.
    pub fn iter_defined(&self) -> impl Iterator<Item = (usize, &Slot)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (i, s)))
    }

    /// Copy of this page with every tombstone dropped.
    ///
    /// Used for full materializations, which end the fragment chain and so
    /// no longer need to shadow older fragments.
    pub(crate) fn without_tombstones(&self) -> Self {
        let mut out = self.clone();
        for slot in &mut out.slots {
            if matches!(slot, Some(Slot::Removed)) {
                *slot = None;
            }
        }
        out
    }

    pub(crate) fn encode_body(&self, w: &mut PageWriter) -> Result<()> {
        w.put_u64(self.page_key);
        PageAddr::encode_opt(self.previous, w);
        w.put_u32(self.depth);
        for slot in &self.slots {
            match slot {
                None => w.put_u32(NULL_MARKER),
                Some(Slot::Removed) => w.put_u32(REMOVED_MARKER),
                Some(Slot::Node(bytes)) => {
                    if bytes.len() >= REMOVED_MARKER as usize {
                        return Err(StrataError::Invalid("node payload too large"));
                    }
                    w.put_len_prefixed(bytes)?;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn decode_body(c: &mut PageCursor<'_>) -> Result<Self> {
        let page_key = c.get_u64()?;
        let previous = PageAddr::decode_opt(c)?;
        let depth = c.get_u32()?;
        let mut slots = Vec::with_capacity(SLOTS_PER_PAGE);
        for _ in 0..SLOTS_PER_PAGE {
            let len = c.get_u32()?;
            let slot = match len {
                NULL_MARKER => None,
                REMOVED_MARKER => Some(Slot::Removed),
                len => Some(Slot::Node(Arc::from(c.get_slice(len as usize)?))),
            };
            slots.push(slot);
        }
        Ok(Self {
            page_key,
            previous,
            depth,
            slots,
        })
    }
}
