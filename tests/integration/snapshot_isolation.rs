//! Readers pinned to a revision never observe later writes.

#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use strata::{MemoryBackend, ResourceConfig, Result, Session, StrataError};

const KEYS: u64 = 200;
const COMMITS: u64 = 25;
const READERS: usize = 4;

fn session() -> Result<Session> {
    let config = ResourceConfig::new()
        .with_cache_pages(16)
        .with_reader_pool_size(2);
    Session::open(Arc::new(MemoryBackend::new()), config)
}

fn stamp(revision: u64) -> Vec<u8> {
    revision.to_le_bytes().to_vec()
}

#[test]
fn concurrent_readers_see_consistent_snapshots() -> Result<()> {
    let session = session()?;
    let done = Arc::new(AtomicBool::new(false));
    let barrier = Arc::new(Barrier::new(READERS + 1));

    let mut readers = Vec::new();
    for _ in 0..READERS {
        let session = session.clone();
        let done = Arc::clone(&done);
        let barrier = Arc::clone(&barrier);
        readers.push(thread::spawn(move || -> Result<u64> {
            barrier.wait();
            let mut snapshots = 0;
            loop {
                let finished = done.load(Ordering::Acquire);
                let rtx = session.begin_read_latest()?;
                let revision = rtx.revision().0;
                let expected = (revision > 0).then(|| stamp(revision));
                for key in 0..KEYS {
                    let got = rtx.get_node(key)?.map(|bytes| bytes.to_vec());
                    assert_eq!(got, expected, "key {key} in revision {revision}");
                }
                snapshots += 1;
                if finished {
                    break;
                }
            }
            Ok(snapshots)
        }));
    }

    barrier.wait();
    for revision in 1..=COMMITS {
        let mut wtx = session.begin_write()?;
        for key in 0..KEYS {
            wtx.set_node(key, &stamp(revision))?;
        }
        assert_eq!(wtx.commit()?.0, revision);
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        let snapshots = reader.join().expect("reader thread panicked")?;
        assert!(snapshots > 0);
    }
    assert_eq!(session.stats().active_readers, 0);
    Ok(())
}

#[test]
fn open_reader_is_unaffected_by_commit() -> Result<()> {
    let session = session()?;
    let mut wtx = session.begin_write()?;
    wtx.set_node(1, b"before")?;
    wtx.set_node(300, b"far")?;
    wtx.commit()?;

    let pinned = session.begin_read_latest()?;
    let mut wtx = session.begin_write()?;
    wtx.set_node(1, b"after")?;
    wtx.remove_node(300)?;
    wtx.set_node(2, b"new")?;
    assert_eq!(pinned.get_node(1)?.as_deref(), Some(&b"before"[..]));
    wtx.commit()?;

    assert_eq!(pinned.get_node(1)?.as_deref(), Some(&b"before"[..]));
    assert_eq!(pinned.get_node(300)?.as_deref(), Some(&b"far"[..]));
    assert!(pinned.get_node(2)?.is_none());
    assert_eq!(pinned.revision_size(), 2);

    let latest = session.begin_read_latest()?;
    assert_eq!(latest.get_node(1)?.as_deref(), Some(&b"after"[..]));
    assert!(latest.get_node(300)?.is_none());
    assert_eq!(latest.revision_size(), 2);
    Ok(())
}

#[test]
fn only_one_writer_per_resource() -> Result<()> {
    let session = session()?;
    let wtx = session.begin_write()?;

    let other = session.clone();
    let refused = thread::spawn(move || other.begin_write().err())
        .join()
        .expect("writer thread panicked");
    assert!(matches!(refused, Some(StrataError::Usage(_))));

    let readers: Vec<_> = (0..3)
        .map(|_| session.begin_read_latest())
        .collect::<Result<_>>()?;
    assert_eq!(session.stats().active_readers, 3);
    drop(readers);
    drop(wtx);
    let _next = session.begin_write()?;
    Ok(())
}
