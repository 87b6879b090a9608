//! File-backed resources survive reopen and reject damaged pages.

#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use strata::{
    FileBackend, Registry, ResourceConfig, Result, Revision, RevisioningKind, Session, StrataError,
};
use tempfile::tempdir;

fn open(dir: &Path) -> Result<Session> {
    Session::open(Arc::new(FileBackend::open(dir)?), ResourceConfig::default())
}

fn commit_values(session: &Session, values: &[(u64, &str)]) -> Result<Revision> {
    let mut wtx = session.begin_write()?;
    for (key, value) in values {
        wtx.set_node(*key, value.as_bytes())?;
    }
    wtx.commit()
}

#[test]
fn revisions_survive_reopen() -> Result<()> {
    let dir = tempdir()?;
    {
        let session = open(dir.path())?;
        commit_values(&session, &[(1, "a"), (500, "b")])?;
        commit_values(&session, &[(1, "c")])?;
        session.close()?;
    }

    let session = open(dir.path())?;
    assert_eq!(session.most_recent_revision(), Revision(2));
    let r1 = session.begin_read(1)?;
    let r2 = session.begin_read(2)?;
    assert_eq!(r1.get_node(1)?.as_deref(), Some(&b"a"[..]));
    assert_eq!(r2.get_node(1)?.as_deref(), Some(&b"c"[..]));
    assert_eq!(r2.get_node(500)?.as_deref(), Some(&b"b"[..]));
    Ok(())
}

#[test]
fn unpublished_tail_is_dropped_on_open() -> Result<()> {
    let dir = tempdir()?;
    let data = dir.path().join("pages.dat");
    {
        let session = open(dir.path())?;
        commit_values(&session, &[(3, "kept")])?;
        session.close()?;
    }
    let published = fs::metadata(&data)?.len();
    OpenOptions::new()
        .append(true)
        .open(&data)?
        .write_all(&[0xAB; 97])?;

    let session = open(dir.path())?;
    assert_eq!(fs::metadata(&data)?.len(), published);
    assert_eq!(session.most_recent_revision(), Revision(1));
    assert_eq!(commit_values(&session, &[(4, "next")])?, Revision(2));
    let rtx = session.begin_read_latest()?;
    assert_eq!(rtx.get_node(3)?.as_deref(), Some(&b"kept"[..]));
    assert_eq!(rtx.get_node(4)?.as_deref(), Some(&b"next"[..]));
    Ok(())
}

#[test]
fn damaged_uber_page_is_reported_as_corruption() -> Result<()> {
    let dir = tempdir()?;
    let data = dir.path().join("pages.dat");
    {
        let session = open(dir.path())?;
        commit_values(&session, &[(0, "zero")])?;
        session.close()?;
    }
    let mut bytes = fs::read(&data)?;
    let idx = bytes.len() - 6;
    bytes[idx] ^= 0xFF;
    fs::write(&data, &bytes)?;

    let err = open(dir.path()).err().expect("damaged page must not load");
    assert!(matches!(err, StrataError::Corruption(_)), "got {err}");
    Ok(())
}

#[test]
fn registry_manages_resource_lifecycle() -> Result<()> {
    let root = tempdir()?;
    let dir = root.path().join("books");
    let registry = Registry::new();

    let config = ResourceConfig::new()
        .with_revisioning(RevisioningKind::Differential)
        .with_revisions_to_restore(3);
    let session = registry.create_resource(&dir, config.clone())?;
    assert!(registry.create_resource(&dir, config.clone()).unwrap_err().is_usage());
    commit_values(&session, &[(9, "nine")])?;

    let again = registry.open_resource(&dir)?;
    assert_eq!(again.most_recent_revision(), Revision(1));
    assert_eq!(again.config(), &config);
    let held = session.begin_write()?;
    assert!(again.begin_write().unwrap_err().is_usage());
    drop(held);

    assert!(registry.truncate_resource(&dir).unwrap_err().is_usage());
    registry.close_resource(&dir)?;
    assert!(!registry.is_open(&dir));

    let reopened = registry.open_resource(&dir)?;
    assert_eq!(reopened.most_recent_revision(), Revision(1));
    registry.close_resource(&dir)?;

    registry.truncate_resource(&dir)?;
    let fresh = registry.open_resource(&dir)?;
    assert_eq!(fresh.most_recent_revision(), Revision(0));
    assert_eq!(fresh.config(), &config);
    registry.close_all()?;

    let missing = root.path().join("missing");
    assert!(registry.open_resource(&missing).unwrap_err().is_not_found());
    Ok(())
}

#[test]
fn writers_exclude_each_other_across_registries() -> Result<()> {
    let root = tempdir()?;
    let dir = root.path().join("shared");
    let first = Registry::new();
    let second = Registry::new();
    let a = first.create_resource(&dir, ResourceConfig::default())?;
    let b = second.open_resource(&dir)?;

    let wtx = a.begin_write()?;
    assert!(b.begin_write().unwrap_err().is_usage());
    drop(wtx);

    assert_eq!(commit_values(&a, &[(1, "from-a")])?, Revision(1));
    assert_eq!(commit_values(&b, &[(2, "from-b")])?, Revision(2));
    assert_eq!(commit_values(&a, &[(3, "again-a")])?, Revision(3));
    first.close_all()?;
    second.close_all()?;

    let session = open(&dir)?;
    assert_eq!(session.most_recent_revision(), Revision(3));
    let rtx = session.begin_read_latest()?;
    assert_eq!(rtx.get_node(1)?.as_deref(), Some(&b"from-a"[..]));
    assert_eq!(rtx.get_node(2)?.as_deref(), Some(&b"from-b"[..]));
    assert_eq!(rtx.get_node(3)?.as_deref(), Some(&b"again-a"[..]));
    let before_b = session.begin_read(1)?;
    assert!(before_b.get_node(2)?.is_none());
    Ok(())
}

#[test]
fn opening_during_a_write_keeps_the_writers_pages() -> Result<()> {
    let dir = tempdir()?;
    let data = dir.path().join("pages.dat");
    let writer_session = open(dir.path())?;
    let mut wtx = writer_session.begin_write()?;
    wtx.set_node(8, b"pending")?;

    let published = fs::metadata(&data)?.len();
    OpenOptions::new()
        .append(true)
        .open(&data)?
        .write_all(&[0xCD; 64])?;
    let reader_session = open(dir.path())?;
    assert_eq!(fs::metadata(&data)?.len(), published + 64);
    assert_eq!(reader_session.most_recent_revision(), Revision(0));
    drop(wtx);

    assert_eq!(commit_values(&reader_session, &[(8, "done")])?, Revision(1));
    let rtx = open(dir.path())?.begin_read_latest()?;
    assert_eq!(rtx.get_node(8)?.as_deref(), Some(&b"done"[..]));
    Ok(())
}

#[test]
fn reopen_with_a_different_restore_window_is_refused() -> Result<()> {
    let dir = tempdir()?;
    let written = ResourceConfig::new()
        .with_revisioning(RevisioningKind::Incremental)
        .with_revisions_to_restore(8);
    {
        let session = Session::open(Arc::new(FileBackend::open(dir.path())?), written.clone())?;
        commit_values(&session, &[(0, "zero")])?;
        for value in ["a", "b", "c"] {
            commit_values(&session, &[(1, value)])?;
        }
        session.close()?;
    }

    for other in [
        written.clone().with_revisions_to_restore(2),
        ResourceConfig::new().with_revisioning(RevisioningKind::FullDump),
    ] {
        let err = Session::open(Arc::new(FileBackend::open(dir.path())?), other)
            .err()
            .expect("mismatched configuration must be refused");
        assert!(matches!(err, StrataError::Config(_)), "got {err}");
    }

    let session = Session::open(Arc::new(FileBackend::open(dir.path())?), written)?;
    let rtx = session.begin_read_latest()?;
    assert_eq!(rtx.get_node(0)?.as_deref(), Some(&b"zero"[..]));
    Ok(())
}
