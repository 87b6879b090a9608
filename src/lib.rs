//! Strata: an embedded, versioned page store.
//!
//! Every commit produces an immutable revision that shares unchanged pages
//! with earlier revisions. Readers are pinned to one revision; a single writer
//! per resource builds the next one copy-on-write and publishes it atomically.

#![warn(missing_docs)]

pub mod backend;
pub mod cache;
pub mod config;
pub mod node;
pub mod page;
pub mod primitives;
pub mod revisioning;
pub mod session;
pub mod tree;
pub mod txn;
pub mod types;

pub use backend::{Backend, BackendReader, BackendWriter, FileBackend, MemoryBackend};
pub use config::ResourceConfig;
pub use node::{Node, NodeKind};
pub use revisioning::{Revisioning, RevisioningKind};
pub use session::{Registry, RevisionInfo, Session, SessionStats};
pub use txn::{ReadTransaction, TxnState, WriteTransaction};
pub use types::{NameKey, NodeKey, Result, Revision, StrataError};
