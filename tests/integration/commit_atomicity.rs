//! A commit interrupted at any write leaves the previous revision current.

#![allow(missing_docs)]

use std::sync::Arc;

use strata::{MemoryBackend, ResourceConfig, Result, Revision, Session, StrataError, TxnState};

fn open(backend: &MemoryBackend) -> Result<Session> {
    Session::open(Arc::new(backend.clone()), ResourceConfig::default())
}

fn seed(session: &Session) -> Result<()> {
    let mut wtx = session.begin_write()?;
    for key in 0..50 {
        wtx.set_node(key, b"base")?;
    }
    wtx.commit()?;
    Ok(())
}

#[test]
fn failure_at_every_write_keeps_previous_revision() -> Result<()> {
    let backend = MemoryBackend::new();
    let session = open(&backend)?;
    seed(&session)?;

    let mut allowed = 0;
    loop {
        backend.fail_writes_after(allowed);
        let mut wtx = session.begin_write()?;
        wtx.set_node(3, b"changed")?;
        wtx.set_node(1_000, b"far away")?;
        match wtx.commit() {
            Ok(revision) => {
                assert_eq!(revision, Revision(2));
                break;
            }
            Err(err) => {
                assert!(matches!(err, StrataError::Io(_)), "unexpected {err}");
                assert_eq!(wtx.state(), TxnState::Failed);
                assert!(wtx.set_node(4, b"x").unwrap_err().is_usage());
                assert_eq!(session.most_recent_revision(), Revision(1));

                let rtx = session.begin_read_latest()?;
                assert_eq!(rtx.get_node(3)?.as_deref(), Some(&b"base"[..]));
                assert!(rtx.get_node(1_000)?.is_none());

                wtx.abort()?;
                assert_eq!(wtx.state(), TxnState::Aborted);
            }
        }
        backend.clear_failure();
        allowed += 1;
        assert!(allowed < 64, "commit never succeeded");
    }
    backend.clear_failure();
    assert!(allowed > 0);

    let rtx = session.begin_read_latest()?;
    assert_eq!(rtx.get_node(3)?.as_deref(), Some(&b"changed"[..]));
    assert_eq!(rtx.get_node(1_000)?.as_deref(), Some(&b"far away"[..]));
    Ok(())
}

#[test]
fn reopen_after_failed_commit_sees_previous_revision() -> Result<()> {
    let backend = MemoryBackend::new();
    let session = open(&backend)?;
    seed(&session)?;

    let mut wtx = session.begin_write()?;
    wtx.set_node(7, b"lost")?;
    let writes_before = backend.page_count() as u64;
    backend.fail_writes_after(2);
    assert!(wtx.commit().is_err());
    assert!(backend.page_count() as u64 <= writes_before + 2);
    drop(wtx);
    session.close()?;
    backend.clear_failure();

    let session = open(&backend)?;
    assert_eq!(session.most_recent_revision(), Revision(1));
    let rtx = session.begin_read_latest()?;
    assert_eq!(rtx.get_node(7)?.as_deref(), Some(&b"base"[..]));

    let mut wtx = session.begin_write()?;
    wtx.set_node(7, b"kept")?;
    assert_eq!(wtx.commit()?, Revision(2));
    Ok(())
}

#[test]
fn failed_writer_still_blocks_until_aborted() -> Result<()> {
    let backend = MemoryBackend::new();
    let session = open(&backend)?;
    let mut wtx = session.begin_write()?;
    wtx.set_node(0, b"zero")?;
    backend.fail_writes_after(0);
    assert!(wtx.commit().is_err());
    backend.clear_failure();

    assert!(session.begin_write().unwrap_err().is_usage());
    wtx.abort()?;
    let mut retry = session.begin_write()?;
    retry.set_node(0, b"zero")?;
    assert_eq!(retry.commit()?, Revision(1));
    Ok(())
}
