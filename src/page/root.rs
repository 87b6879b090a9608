use crate::primitives::bytes::{PageCursor, PageWriter};
use crate::revisioning::RevisioningKind;
use crate::types::{Result, Revision};

use super::PageReference;

/// Sentinel encoding of "no node key assigned yet".
const NO_NODE_KEY: u64 = u64::MAX;

/// Root of one committed revision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RevisionRootPage {
    revision: u64,
    timestamp_ms: u64,
    max_node_key: Option<u64>,
    revision_size: u64,
    data_root: PageReference,
    names: PageReference,
}

impl RevisionRootPage {
    /// Empty root for the bootstrap revision.
    pub fn bootstrap(timestamp_ms: u64) -> Self {
        Self {
            revision: 0,
            timestamp_ms,
            max_node_key: None,
            revision_size: 0,
            data_root: PageReference::empty(),
            names: PageReference::empty(),
        }
    }

    /// Copy of `self` that will become `revision`.
    ///
    /// References are copied as-is, so the new root initially shares every
    /// page of its predecessor.
    pub fn successor(&self, revision: u64) -> Self {
        Self {
            revision,
            ..self.clone()
        }
    }

    /// Revision this root belongs to.
    pub fn revision(&self) -> Revision {
        Revision(self.revision)
    }

    /// Commit time in milliseconds since the Unix epoch.
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// Highest node key written so far.
    pub fn max_node_key(&self) -> Option<u64> {
        self.max_node_key
    }

    /// Number of live nodes in the revision.
    pub fn revision_size(&self) -> u64 {
        self.revision_size
    }

    /// Root of the data-page indirection tree.
    pub fn data_root(&self) -> &PageReference {
        &self.data_root
    }

    /// Reference to the name page.
    pub fn names(&self) -> &PageReference {
        &self.names
    }

    pub(crate) fn data_root_mut(&mut self) -> &mut PageReference {
        &mut self.data_root
    }

    pub(crate) fn names_mut(&mut self) -> &mut PageReference {
        &mut self.names
    }

    pub(crate) fn set_timestamp_ms(&mut self, ts: u64) {
        self.timestamp_ms = ts;
    }

    pub(crate) fn bump_max_node_key(&mut self, key: u64) {
        self.max_node_key = Some(self.max_node_key.map_or(key, |max| max.max(key)));
    }

    pub(crate) fn set_revision_size(&mut self, size: u64) {
        self.revision_size = size;
    }

    pub(crate) fn encode_body(&self, w: &mut PageWriter) -> Result<()> {
        w.put_u64(self.revision);
        self.data_root.encode(w)?;
        self.names.encode(w)?;
        w.put_u64(self.revision_size);
        w.put_u64(self.max_node_key.unwrap_or(NO_NODE_KEY));
        w.put_u64(self.timestamp_ms);
        Ok(())
    }

    pub(crate) fn decode_body(c: &mut PageCursor<'_>) -> Result<Self> {
        let revision = c.get_u64()?;
        let data_root = PageReference::decode(c)?;
        let names = PageReference::decode(c)?;
        let revision_size = c.get_u64()?;
        let max_node_key = match c.get_u64()? {
            NO_NODE_KEY => None,
            key => Some(key),
        };
        let timestamp_ms = c.get_u64()?;
        Ok(Self {
            revision,
            timestamp_ms,
            max_node_key,
            revision_size,
            data_root,
            names,
        })
    }
}

/// Process-wide root: the revision count plus the revision indirection tree.
///
/// Also records the revisioning strategy and restore window the resource was
/// created with, since fragment chains only decode under those settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UberPage {
    revision_count: u64,
    revisioning: RevisioningKind,
    revisions_to_restore: u32,
    root: PageReference,
}

impl UberPage {
    /// Uber page of a backend with no committed revision.
    pub fn new(revisioning: RevisioningKind, revisions_to_restore: u32) -> Self {
        Self {
            revision_count: 0,
            revisioning,
            revisions_to_restore,
            root: PageReference::empty(),
        }
    }

    /// Number of committed revisions.
    pub fn revision_count(&self) -> u64 {
        self.revision_count
    }

    /// Most recent committed revision, if any.
    pub fn latest_revision(&self) -> Option<Revision> {
        self.revision_count.checked_sub(1).map(Revision)
    }

    /// Strategy every data page of the resource was written with.
    pub fn revisioning(&self) -> RevisioningKind {
        self.revisioning
    }

    /// Restore window every data page of the resource was written with.
    pub fn revisions_to_restore(&self) -> u32 {
        self.revisions_to_restore
    }

    /// Root of the revision indirection tree.
    pub fn root(&self) -> &PageReference {
        &self.root
    }

    pub(crate) fn root_mut(&mut self) -> &mut PageReference {
        &mut self.root
    }

    pub(crate) fn set_revision_count(&mut self, count: u64) {
        self.revision_count = count;
    }

    pub(crate) fn encode_body(&self, w: &mut PageWriter) -> Result<()> {
        w.put_u64(self.revision_count);
        w.put_u8(self.revisioning.code());
        w.put_u32(self.revisions_to_restore);
        self.root.encode(w)
    }

    pub(crate) fn decode_body(c: &mut PageCursor<'_>) -> Result<Self> {
        Ok(Self {
            revision_count: c.get_u64()?,
            revisioning: RevisioningKind::from_code(c.get_u8()?)?,
            revisions_to_restore: c.get_u32()?,
            root: PageReference::decode(c)?,
        })
    }
}
