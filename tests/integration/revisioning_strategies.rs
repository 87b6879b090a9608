//! Every revisioning strategy reproduces every historical revision.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use strata::cache::PageCache;
use strata::tree;
use strata::types::LEVEL_EXPONENTS;
use strata::{
    Backend, MemoryBackend, ResourceConfig, Result, Revisioning, RevisioningKind, Session,
};

const KINDS: [RevisioningKind; 4] = [
    RevisioningKind::FullDump,
    RevisioningKind::Incremental,
    RevisioningKind::Differential,
    RevisioningKind::SlidingSnapshot,
];
const COMMITS: usize = 24;
const KEY_SPACE: u64 = 400;

type Model = BTreeMap<u64, Vec<u8>>;

fn config(kind: RevisioningKind, restore: u32) -> ResourceConfig {
    ResourceConfig::new()
        .with_revisioning(kind)
        .with_revisions_to_restore(restore)
        .with_cache_pages(8)
}

fn build_history(session: &Session, seed: u64) -> Result<Vec<Model>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut model = Model::new();
    let mut history = vec![model.clone()];
    for commit in 0..COMMITS {
        let mut wtx = session.begin_write()?;
        for _ in 0..rng.gen_range(1..40) {
            let key = rng.gen_range(0..KEY_SPACE);
            if rng.gen_bool(0.25) {
                let removed = wtx.remove_node(key)?;
                assert_eq!(removed, model.remove(&key).is_some());
            } else {
                let value = format!("{commit}:{key}:{}", rng.gen::<u32>()).into_bytes();
                wtx.set_node(key, &value)?;
                model.insert(key, value);
            }
        }
        wtx.commit()?;
        history.push(model.clone());
    }
    Ok(history)
}

fn verify(session: &Session, history: &[Model]) -> Result<()> {
    for (revision, model) in history.iter().enumerate() {
        let rtx = session.begin_read(revision as u64)?;
        assert_eq!(rtx.revision_size(), model.len() as u64, "size at {revision}");
        for key in 0..KEY_SPACE {
            assert_eq!(
                rtx.get_node(key)?.as_deref(),
                model.get(&key).map(Vec::as_slice),
                "{} key {key} at revision {revision}",
                session.config().revisioning
            );
        }
    }
    Ok(())
}

#[test]
fn each_strategy_restores_all_revisions() -> Result<()> {
    for (seed, kind) in KINDS.into_iter().enumerate() {
        let backend = MemoryBackend::new();
        let session = Session::open(Arc::new(backend.clone()), config(kind, 3))?;
        let history = build_history(&session, seed as u64)?;
        verify(&session, &history)?;
        session.close()?;

        let reopened = Session::open(Arc::new(backend), config(kind, 3))?;
        verify(&reopened, &history)?;
    }
    Ok(())
}

#[test]
fn small_restore_window_still_reads_correctly() -> Result<()> {
    for kind in KINDS {
        let restore = kind.min_revisions_to_restore();
        let session = Session::open(Arc::new(MemoryBackend::new()), config(kind, restore))?;
        let history = build_history(&session, 99)?;
        verify(&session, &history)?;
    }
    Ok(())
}

#[test]
fn repeated_single_slot_updates_chain_fragments() -> Result<()> {
    for kind in KINDS {
        let session = Session::open(Arc::new(MemoryBackend::new()), config(kind, 4))?;
        for round in 0..20u32 {
            let mut wtx = session.begin_write()?;
            wtx.set_node(u64::from(round % 5), &round.to_le_bytes())?;
            wtx.commit()?;
        }
        let rtx = session.begin_read_latest()?;
        for slot in 0..5u32 {
            let last = (0..20u32).rev().find(|r| r % 5 == slot).unwrap_or(slot);
            assert_eq!(
                rtx.get_node(u64::from(slot))?.as_deref(),
                Some(&last.to_le_bytes()[..]),
                "{kind} slot {slot}"
            );
        }
        let early = session.begin_read(3)?;
        assert_eq!(early.get_node(2)?.as_deref(), Some(&2u32.to_le_bytes()[..]));
        assert!(early.get_node(3)?.is_none());
    }
    Ok(())
}

/// Depth of the newest fragment of `bucket` at `revision`, read straight from
/// the backend.
fn head_depth(backend: &MemoryBackend, revision: u64, bucket: u64) -> Result<u32> {
    let cache = PageCache::new(Arc::new(backend.clone()), 16, 1)?;
    let uber = cache.get(backend.read_root()?.expect("published root"))?;
    let root_ref = tree::resolve(&cache, uber.as_uber()?.root(), revision)?;
    let root = cache.get(root_ref.addr().expect("committed revision root"))?;
    let head = tree::resolve(&cache, root.as_revision_root()?.data_root(), bucket)?;
    let page = cache.get(head.addr().expect("committed data page"))?;
    Ok(page.as_data()?.depth())
}

#[test]
fn point_reads_stay_within_the_restore_window() -> Result<()> {
    const RESTORE: u32 = 4;
    const ROUNDS: u32 = 13;
    let levels = LEVEL_EXPONENTS.len() as u64;
    for kind in KINDS {
        let backend = MemoryBackend::new();
        let session = Session::open(Arc::new(backend.clone()), config(kind, RESTORE))?;
        for round in 1..=ROUNDS {
            let mut wtx = session.begin_write()?;
            wtx.set_node(u64::from(round % 3), &round.to_le_bytes())?;
            wtx.commit()?;
        }
        let budget = kind.strategy().fragment_budget(RESTORE) as u64;
        for revision in 1..=ROUNDS {
            let cold = Session::open(Arc::new(backend.clone()), config(kind, RESTORE))?;
            let rtx = cold.begin_read(u64::from(revision))?;
            let before = backend.read_count();
            let last = (1..=revision).rev().find(|r| r % 3 == 1).unwrap_or(1);
            assert_eq!(
                rtx.get_node(1)?.as_deref(),
                Some(&last.to_le_bytes()[..]),
                "{kind} revision {revision}"
            );
            let reads = backend.read_count() - before;
            assert!(
                reads <= levels + budget,
                "{kind} revision {revision}: {reads} reads, budget {budget}"
            );
        }
    }
    Ok(())
}

#[test]
fn delta_chains_restart_with_a_full_page() -> Result<()> {
    const RESTORE: u32 = 3;
    for kind in KINDS {
        let backend = MemoryBackend::new();
        let session = Session::open(Arc::new(backend.clone()), config(kind, RESTORE))?;
        for round in 1..=10u32 {
            let mut wtx = session.begin_write()?;
            wtx.set_node(5, &round.to_le_bytes())?;
            wtx.commit()?;
        }
        for revision in 1..=10u64 {
            let expected = match kind {
                RevisioningKind::Incremental | RevisioningKind::Differential => {
                    ((revision - 1) % u64::from(RESTORE)) as u32
                }
                RevisioningKind::FullDump | RevisioningKind::SlidingSnapshot => 0,
            };
            assert_eq!(
                head_depth(&backend, revision, 0)?,
                expected,
                "{kind} revision {revision}"
            );
        }
    }
    Ok(())
}
