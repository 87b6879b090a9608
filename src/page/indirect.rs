use crate::primitives::bytes::{PageCursor, PageWriter};
use crate::types::{Result, StrataError, INDIRECT_FANOUT};

use super::PageReference;

/// One level of the indirection trie: a fixed-arity array of references.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndirectPage {
    refs: Vec<PageReference>,
}

impl Default for IndirectPage {
    fn default() -> Self {
        Self::new()
    }
}

impl IndirectPage {
    /// Creates a page with every reference empty.
    pub fn new() -> Self {
        Self {
            refs: vec![PageReference::empty(); INDIRECT_FANOUT],
        }
    }

    /// Reference at `offset`.
    pub fn reference(&self, offset: usize) -> Result<&PageReference> {
        self.refs
            .get(offset)
            .ok_or(StrataError::Invalid("indirect offset out of range"))
    }

    /// Mutable reference at `offset`.
    pub fn reference_mut(&mut self, offset: usize) -> Result<&mut PageReference> {
        self.refs
            .get_mut(offset)
            .ok_or(StrataError::Invalid("indirect offset out of range"))
    }

    /// All references in offset order.
    pub fn references(&self) -> &[PageReference] {
        &self.refs
    }

    pub(crate) fn references_mut(&mut self) -> &mut [PageReference] {
        &mut self.refs
    }

    pub(crate) fn encode_body(&self, w: &mut PageWriter) -> Result<()> {
        for r in &self.refs {
            r.encode(w)?;
        }
        Ok(())
    }

    pub(crate) fn decode_body(c: &mut PageCursor<'_>) -> Result<Self> {
        let mut refs = Vec::with_capacity(INDIRECT_FANOUT);
        for _ in 0..INDIRECT_FANOUT {
            refs.push(PageReference::decode(c)?);
        }
        Ok(Self { refs })
    }
}
