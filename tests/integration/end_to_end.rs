//! Commit, reopen and read back revisions through the public API.

#![allow(missing_docs)]

use std::sync::Arc;

use strata::{MemoryBackend, NodeKind, ResourceConfig, Result, Revision, Session};

const NODES: u64 = 300;

fn value(key: u64, generation: u32) -> Vec<u8> {
    format!("node-{key}-gen-{generation}").into_bytes()
}

fn open(backend: &MemoryBackend) -> Result<Session> {
    Session::open(Arc::new(backend.clone()), ResourceConfig::default())
}

#[test]
fn overwrite_is_visible_only_in_later_revision() -> Result<()> {
    let backend = MemoryBackend::new();
    let session = open(&backend)?;

    let mut wtx = session.begin_write()?;
    for key in 0..NODES {
        wtx.set_node(key, &value(key, 1))?;
    }
    assert_eq!(wtx.commit()?, Revision(1));

    let mut wtx = session.begin_write()?;
    wtx.set_node(5, &value(5, 2))?;
    assert_eq!(wtx.commit()?, Revision(2));

    let r1 = session.begin_read(1)?;
    let r2 = session.begin_read(2)?;
    assert_eq!(r1.get_node(5)?.as_deref(), Some(value(5, 1).as_slice()));
    assert_eq!(r2.get_node(5)?.as_deref(), Some(value(5, 2).as_slice()));
    assert_eq!(r1.get_node(200)?, r2.get_node(200)?);
    assert_eq!(r2.revision_size(), NODES);
    assert_eq!(r2.max_node_key(), Some(NODES - 1));
    assert!(r2.get_node(NODES)?.is_none());

    let r0 = session.begin_read(0)?;
    assert!(r0.get_node(5)?.is_none());
    assert_eq!(r0.revision_size(), 0);
    Ok(())
}

#[test]
fn history_survives_session_reopen() -> Result<()> {
    let backend = MemoryBackend::new();
    {
        let session = open(&backend)?;
        for generation in 1..=5u32 {
            let mut wtx = session.begin_write()?;
            for key in (0..NODES).step_by(generation as usize) {
                wtx.set_node(key, &value(key, generation))?;
            }
            wtx.commit()?;
        }
        session.close()?;
    }

    let session = open(&backend)?;
    assert_eq!(session.most_recent_revision(), Revision(5));
    let revisions = session.revisions()?;
    assert_eq!(revisions.len(), 6);
    assert!(revisions
        .windows(2)
        .all(|pair| pair[0].timestamp_ms <= pair[1].timestamp_ms));

    for generation in 1..=5u32 {
        let rtx = session.begin_read(u64::from(generation))?;
        for key in [0u64, 7, 60, 120, 299] {
            let newest = (1..=generation)
                .rev()
                .find(|g| key % u64::from(*g) == 0)
                .unwrap_or(1);
            assert_eq!(
                rtx.get_node(key)?.as_deref(),
                Some(value(key, newest).as_slice()),
                "key {key} at revision {generation}"
            );
        }
    }
    Ok(())
}

#[test]
fn document_tree_round_trips_through_commit() -> Result<()> {
    let session = open(&MemoryBackend::new())?;
    let mut wtx = session.begin_write()?;
    let doc = wtx.insert_root(NodeKind::Document, None, b"")?;
    let book = wtx.insert_first_child(NodeKind::Element, Some("book"), b"")?;
    let title = wtx.insert_first_child(NodeKind::Text, None, b"Dune")?;
    wtx.commit()?;

    let mut rtx = session.begin_read_latest()?;
    assert!(rtx.move_to(title.0)?);
    let node = rtx.node()?;
    assert_eq!(node.kind, NodeKind::Text);
    assert_eq!(node.parent, Some(book));
    assert_eq!(node.value, b"Dune");

    assert!(rtx.move_to(book.0)?);
    let node = rtx.node()?;
    assert_eq!(node.parent, Some(doc));
    assert_eq!(node.first_child, Some(title));
    let name = node.name.expect("element has a name");
    assert_eq!(rtx.name(name)?.as_deref(), Some("book"));
    Ok(())
}
