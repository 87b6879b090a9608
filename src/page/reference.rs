use std::fmt;

use crate::primitives::bytes::{PageCursor, PageWriter};
use crate::types::{Result, StrataError};

/// Location of a persisted page as returned by a backend write.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PageAddr {
    /// Backend-assigned storage key.
    pub key: u64,
    /// Length of the encoded page in bytes.
    pub len: u32,
    /// CRC32 stored in the page trailer.
    pub checksum: u32,
}

impl PageAddr {
    /// Encoded size of an address.
    pub const ENCODED_LEN: usize = 16;

    pub(crate) fn encode(&self, w: &mut PageWriter) {
        w.put_u64(self.key);
        w.put_u32(self.len);
        w.put_u32(self.checksum);
    }

    pub(crate) fn decode(c: &mut PageCursor<'_>) -> Result<Self> {
        Ok(Self {
            key: c.get_u64()?,
            len: c.get_u32()?,
            checksum: c.get_u32()?,
        })
    }

    pub(crate) fn encode_opt(addr: Option<PageAddr>, w: &mut PageWriter) {
        match addr {
            Some(addr) => {
                w.put_u8(1);
                addr.encode(w);
            }
            None => w.put_u8(0),
        }
    }

    pub(crate) fn decode_opt(c: &mut PageCursor<'_>) -> Result<Option<Self>> {
        match c.get_u8()? {
            0 => Ok(None),
            1 => Ok(Some(Self::decode(c)?)),
            _ => Err(StrataError::Corruption("invalid address tag")),
        }
    }
}

impl fmt::Display for PageAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}#{:08x}", self.key, self.len, self.checksum)
    }
}

/// Index of a copy-on-write page owned by the in-flight write transaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirtyId(pub u32);

/// Lazily resolved pointer to a page.
///
/// Holds a dirty page handle, a persisted address, or both while a write
/// transaction still carries the address of the committed page it cloned.
/// Committed pages are never mutated through a reference; writers clone them
/// and point the reference at the clone.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PageReference {
    dirty: Option<DirtyId>,
    addr: Option<PageAddr>,
}

impl PageReference {
    /// A reference to nothing.
    pub const fn empty() -> Self {
        Self {
            dirty: None,
            addr: None,
        }
    }

    /// A reference to a persisted page.
    pub const fn committed(addr: PageAddr) -> Self {
        Self {
            dirty: None,
            addr: Some(addr),
        }
    }

    /// A reference to a page living in a write transaction arena.
    pub const fn dirty(id: DirtyId) -> Self {
        Self {
            dirty: Some(id),
            addr: None,
        }
    }

    /// True when an in-memory dirty instance is attached.
    pub fn is_instantiated(&self) -> bool {
        self.dirty.is_some()
    }

    /// True when the reference carries a persisted address.
    pub fn is_committed(&self) -> bool {
        self.addr.is_some()
    }

    /// True when the reference points nowhere.
    pub fn is_empty(&self) -> bool {
        self.dirty.is_none() && self.addr.is_none()
    }

    /// Persisted address, if any.
    pub fn addr(&self) -> Option<PageAddr> {
        self.addr
    }

    /// Dirty arena handle, if any.
    pub fn dirty_id(&self) -> Option<DirtyId> {
        self.dirty
    }

    pub(crate) fn attach_dirty(&mut self, id: DirtyId) {
        self.dirty = Some(id);
    }

    /// Records the address a page was persisted at and drops the dirty handle.
    pub(crate) fn mark_persisted(&mut self, addr: PageAddr) {
        self.dirty = None;
        self.addr = Some(addr);
    }

    pub(crate) fn encode(&self, w: &mut PageWriter) -> Result<()> {
        if self.dirty.is_some() {
            return Err(StrataError::Usage(
                "dirty reference serialized before its page was persisted",
            ));
        }
        PageAddr::encode_opt(self.addr, w);
        Ok(())
    }

    pub(crate) fn decode(c: &mut PageCursor<'_>) -> Result<Self> {
        Ok(Self {
            dirty: None,
            addr: PageAddr::decode_opt(c)?,
        })
    }
}
