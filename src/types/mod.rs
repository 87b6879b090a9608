#![forbid(unsafe_code)]
//! Identifiers, constants and the crate-wide error type.

use std::fmt;

pub mod checksum;

pub use checksum::page_crc32;

/// Number of node slots held by one data page.
pub const SLOTS_PER_PAGE: usize = 128;
/// Bits of a node key consumed by the slot offset inside a data page.
pub const SLOT_BITS: u32 = 7;
/// Number of references held by one indirect page.
pub const INDIRECT_FANOUT: usize = 128;
/// Bit offsets of each indirection level, most significant digit first.
pub const LEVEL_EXPONENTS: [u32; 4] = [21, 14, 7, 0];
/// Exclusive upper bound for keys addressable through an indirection tree.
pub const MAX_TREE_KEY: u64 = 1 << 28;

/// Key of a node slot.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct NodeKey(pub u64);

/// Committed revision number.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Revision(pub u64);

/// Key of an interned name inside a name page.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct NameKey(pub u32);

impl NodeKey {
    /// Index of the data page (bucket) that stores this key.
    pub const fn bucket(self) -> u64 {
        self.0 >> SLOT_BITS
    }

    /// Slot offset of this key inside its bucket.
    pub const fn slot(self) -> usize {
        (self.0 & (SLOTS_PER_PAGE as u64 - 1)) as usize
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for NameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeKey {
    fn from(value: u64) -> Self {
        NodeKey(value)
    }
}

impl From<NodeKey> for u64 {
    fn from(value: NodeKey) -> Self {
        value.0
    }
}

impl From<u64> for Revision {
    fn from(value: u64) -> Self {
        Revision(value)
    }
}

impl From<Revision> for u64 {
    fn from(value: Revision) -> Self {
        value.0
    }
}

/// Errors surfaced by the storage engine.
#[derive(thiserror::Error, Debug)]
pub enum StrataError {
    /// Backend read or write failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// A requested page, key or reference is absent.
    #[error("not found: {0}")]
    NotFound(&'static str),
    /// The requested revision was never committed.
    #[error("revision {0} not found")]
    RevisionNotFound(u64),
    /// The caller violated the API contract.
    #[error("usage: {0}")]
    Usage(&'static str),
    /// Stored bytes failed to decode or verify.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// An argument is outside the supported range.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Resource configuration could not be loaded or is inconsistent.
    #[error("config: {0}")]
    Config(String),
}

impl StrataError {
    /// Returns true for the typed-miss variants.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StrataError::NotFound(_) | StrataError::RevisionNotFound(_)
        )
    }

    /// Returns true for programming errors that must not be retried.
    pub fn is_usage(&self) -> bool {
        matches!(self, StrataError::Usage(_))
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StrataError>;
