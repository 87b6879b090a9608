#![forbid(unsafe_code)]
//! Tree-node records stored in data page slots.

use serde::Serialize;

use crate::primitives::bytes::{PageCursor, PageWriter};
use crate::types::{NameKey, NodeKey, Result, StrataError};

const NONE_KEY: u64 = u64::MAX;

/// Kind of a stored node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Root of a document.
    Document,
    /// Named element.
    Element,
    /// Named attribute with a value.
    Attribute,
    /// Text content.
    Text,
}

impl NodeKind {
    fn to_u8(self) -> u8 {
        match self {
            NodeKind::Document => 1,
            NodeKind::Element => 2,
            NodeKind::Attribute => 3,
            NodeKind::Text => 4,
        }
    }

    fn from_u8(raw: u8) -> Result<Self> {
        Ok(match raw {
            1 => NodeKind::Document,
            2 => NodeKind::Element,
            3 => NodeKind::Attribute,
            4 => NodeKind::Text,
            _ => return Err(StrataError::Corruption("unknown node kind")),
        })
    }
}

/// One node of the stored tree with its structural links.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    /// What the node represents.
    pub kind: NodeKind,
    /// Parent node; `None` for the root.
    pub parent: Option<NodeKey>,
    /// Leftmost child.
    pub first_child: Option<NodeKey>,
    /// Previous sibling.
    pub left_sibling: Option<NodeKey>,
    /// Next sibling.
    pub right_sibling: Option<NodeKey>,
    /// Number of direct children.
    pub child_count: u64,
    /// Interned name, if the kind carries one.
    pub name: Option<NameKey>,
    /// Opaque payload.
    pub value: Vec<u8>,
}

impl Node {
    /// Unlinked node of `kind`.
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            first_child: None,
            left_sibling: None,
            right_sibling: None,
            child_count: 0,
            name: None,
            value: Vec::new(),
        }
    }

    /// Encodes the node into slot bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut w = PageWriter::with_capacity(48 + self.value.len());
        w.put_u8(self.kind.to_u8());
        for link in [
            self.parent,
            self.first_child,
            self.left_sibling,
            self.right_sibling,
        ] {
            w.put_u64(link.map_or(NONE_KEY, |k| k.0));
        }
        w.put_u64(self.child_count);
        match self.name {
            Some(name) => {
                w.put_u8(1);
                w.put_u32(name.0);
            }
            None => w.put_u8(0),
        }
        w.put_len_prefixed(&self.value)?;
        Ok(w.into_vec())
    }

    /// Decodes slot bytes written by [`Node::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut c = PageCursor::new(bytes);
        let kind = NodeKind::from_u8(c.get_u8()?)?;
        let mut link = || -> Result<Option<NodeKey>> {
            Ok(match c.get_u64()? {
                NONE_KEY => None,
                key => Some(NodeKey(key)),
            })
        };
        let parent = link()?;
        let first_child = link()?;
        let left_sibling = link()?;
        let right_sibling = link()?;
        let child_count = c.get_u64()?;
        let name = match c.get_u8()? {
            0 => None,
            1 => Some(NameKey(c.get_u32()?)),
            _ => return Err(StrataError::Corruption("invalid node name tag")),
        };
        let value = c.get_len_prefixed()?.to_vec();
        c.finish()?;
        Ok(Self {
            kind,
            parent,
            first_child,
            left_sibling,
            right_sibling,
            child_count,
            name,
            value,
        })
    }
}
