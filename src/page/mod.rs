#![forbid(unsafe_code)]
//! Page family and its on-disk framing.
//!
//! Every encoded page is `[kind: u32][body][crc32: u32]`, big-endian. The
//! checksum covers the kind and the body.

mod data;
mod indirect;
mod name;
mod reference;
mod root;

pub use data::{DataPage, NodeBytes, Slot, NULL_MARKER, REMOVED_MARKER};
pub use indirect::IndirectPage;
pub use name::NamePage;
pub use reference::{DirtyId, PageAddr, PageReference};
pub use root::{RevisionRootPage, UberPage};

use crate::primitives::bytes::{PageCursor, PageWriter};
use crate::types::{page_crc32, Result, StrataError};

/// Discriminant stored at the head of every encoded page.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PageKind {
    /// [`UberPage`].
    Uber = 1,
    /// [`IndirectPage`].
    Indirect = 2,
    /// [`RevisionRootPage`].
    RevisionRoot = 3,
    /// [`DataPage`].
    Data = 4,
    /// [`NamePage`].
    Name = 5,
}

impl PageKind {
    fn from_u32(raw: u32) -> Result<Self> {
        Ok(match raw {
            1 => PageKind::Uber,
            2 => PageKind::Indirect,
            3 => PageKind::RevisionRoot,
            4 => PageKind::Data,
            5 => PageKind::Name,
            _ => return Err(StrataError::Corruption("unknown page kind")),
        })
    }
}

/// Any page the engine persists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Page {
    /// Entry point naming the revision tree.
    Uber(UberPage),
    /// Fan-out node of an indirection tree.
    Indirect(IndirectPage),
    /// Per-revision metadata and subtree roots.
    RevisionRoot(RevisionRootPage),
    /// Node slots, full or a delta fragment.
    Data(DataPage),
    /// Interned names.
    Name(NamePage),
}

const TRAILER_LEN: usize = 4;
const HEADER_LEN: usize = 4;

impl Page {
    /// Kind discriminant of this page.
    pub fn kind(&self) -> PageKind {
        match self {
            Page::Uber(_) => PageKind::Uber,
            Page::Indirect(_) => PageKind::Indirect,
            Page::RevisionRoot(_) => PageKind::RevisionRoot,
            Page::Data(_) => PageKind::Data,
            Page::Name(_) => PageKind::Name,
        }
    }

    /// Serializes the page with its header and checksum trailer.
    ///
    /// Fails with [`StrataError::Usage`] when a child reference still points
    /// at an unpersisted page.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let kind = self.kind() as u32;
        let mut w = PageWriter::with_capacity(256);
        w.put_u32(kind);
        match self {
            Page::Uber(p) => p.encode_body(&mut w)?,
            Page::Indirect(p) => p.encode_body(&mut w)?,
            Page::RevisionRoot(p) => p.encode_body(&mut w)?,
            Page::Data(p) => p.encode_body(&mut w)?,
            Page::Name(p) => p.encode_body(&mut w)?,
        }
        let crc = page_crc32(kind, &w.as_slice()[HEADER_LEN..]);
        w.put_u32(crc);
        Ok(w.into_vec())
    }

    /// Parses and verifies an encoded page.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN + TRAILER_LEN {
            return Err(StrataError::Corruption("page shorter than its framing"));
        }
        let (framed, trailer) = bytes.split_at(bytes.len() - TRAILER_LEN);
        let mut t = PageCursor::new(trailer);
        let stored = t.get_u32()?;
        let mut c = PageCursor::new(framed);
        let raw_kind = c.get_u32()?;
        if page_crc32(raw_kind, &framed[HEADER_LEN..]) != stored {
            return Err(StrataError::Corruption("page checksum mismatch"));
        }
        let page = match PageKind::from_u32(raw_kind)? {
            PageKind::Uber => Page::Uber(UberPage::decode_body(&mut c)?),
            PageKind::Indirect => Page::Indirect(IndirectPage::decode_body(&mut c)?),
            PageKind::RevisionRoot => Page::RevisionRoot(RevisionRootPage::decode_body(&mut c)?),
            PageKind::Data => Page::Data(DataPage::decode_body(&mut c)?),
            PageKind::Name => Page::Name(NamePage::decode_body(&mut c)?),
        };
        c.finish()?;
        Ok(page)
    }

    /// Decodes `bytes` and checks them against the address they were read from.
    pub fn decode_at(addr: PageAddr, bytes: &[u8]) -> Result<Self> {
        if bytes.len() != addr.len as usize {
            return Err(StrataError::Corruption("page length differs from its address"));
        }
        if trailer_crc(bytes) != Some(addr.checksum) {
            return Err(StrataError::Corruption("page checksum differs from its address"));
        }
        Self::decode(bytes)
    }

    /// Borrows the uber page, or fails with `Corruption`.
    pub fn as_uber(&self) -> Result<&UberPage> {
        match self {
            Page::Uber(p) => Ok(p),
            _ => Err(StrataError::Corruption("expected uber page")),
        }
    }

    /// Borrows the indirect page.
    pub fn as_indirect(&self) -> Result<&IndirectPage> {
        match self {
            Page::Indirect(p) => Ok(p),
            _ => Err(StrataError::Corruption("expected indirect page")),
        }
    }

    /// Borrows the revision root page.
    pub fn as_revision_root(&self) -> Result<&RevisionRootPage> {
        match self {
            Page::RevisionRoot(p) => Ok(p),
            _ => Err(StrataError::Corruption("expected revision root page")),
        }
    }

    /// Borrows the data page.
    pub fn as_data(&self) -> Result<&DataPage> {
        match self {
            Page::Data(p) => Ok(p),
            _ => Err(StrataError::Corruption("expected data page")),
        }
    }

    /// Borrows the name page.
    pub fn as_name(&self) -> Result<&NamePage> {
        match self {
            Page::Name(p) => Ok(p),
            _ => Err(StrataError::Corruption("expected name page")),
        }
    }
}

/// Checksum stored in the trailer of an encoded page.
pub fn trailer_crc(bytes: &[u8]) -> Option<u32> {
    let start = bytes.len().checked_sub(TRAILER_LEN)?;
    let mut c = PageCursor::new(&bytes[start..]);
    c.get_u32().ok()
}
