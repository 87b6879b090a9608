//! Page reconstruction agrees with a naive newest-wins model.

#![allow(missing_docs)]

use std::sync::Arc;

use proptest::prelude::*;
use strata::page::DataPage;
use strata::revisioning::RevisioningKind;
use strata::types::SLOTS_PER_PAGE;

/// One write per entry: `Some(tag)` stores a node, `None` removes it.
type Edits = Vec<(usize, Option<u8>)>;

fn node(tag: u8, depth: usize) -> Arc<[u8]> {
    Arc::from(vec![tag, depth as u8])
}

/// Builds a chain newest first, terminated by a full page.
fn chain(deltas: &[Edits], base: &[Option<u8>]) -> Vec<DataPage> {
    let mut pages = Vec::new();
    for (idx, edits) in deltas.iter().enumerate() {
        let depth = deltas.len() - idx;
        let mut page = DataPage::new(9);
        for &(slot, edit) in edits {
            match edit {
                Some(tag) => page.set_node(slot, node(tag, depth)).unwrap(),
                None => page.remove(slot).unwrap(),
            }
        }
        page.set_depth(depth as u32);
        pages.push(page);
    }
    let mut full = DataPage::new(9);
    for (slot, tag) in base.iter().enumerate() {
        if let Some(tag) = tag {
            full.set_node(slot, node(*tag, 0)).unwrap();
        }
    }
    pages.push(full);
    pages
}

/// Expected slot contents when only the first `window` fragments are visible.
fn model(deltas: &[Edits], base: &[Option<u8>], window: usize) -> Vec<Option<Vec<u8>>> {
    let depth_of = |idx: usize| deltas.len() - idx;
    (0..SLOTS_PER_PAGE)
        .map(|slot| {
            for idx in 0..deltas.len().min(window) {
                if let Some(&(_, edit)) = deltas[idx].iter().rev().find(|(s, _)| *s == slot) {
                    return edit.map(|tag| vec![tag, depth_of(idx) as u8]);
                }
            }
            if window > deltas.len() {
                base[slot].map(|tag| vec![tag, 0])
            } else {
                None
            }
        })
        .collect()
}

fn observed(page: &DataPage) -> Vec<Option<Vec<u8>>> {
    (0..SLOTS_PER_PAGE)
        .map(|slot| page.node(slot).map(|bytes| bytes.to_vec()))
        .collect()
}

fn edits() -> impl Strategy<Value = Edits> {
    prop::collection::vec((0..SLOTS_PER_PAGE, prop::option::of(any::<u8>())), 0..24)
}

fn base() -> impl Strategy<Value = Vec<Option<u8>>> {
    prop::collection::vec(prop::option::of(any::<u8>()), SLOTS_PER_PAGE)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(96))]

    #[test]
    fn incremental_matches_model(
        deltas in prop::collection::vec(edits(), 0..8),
        base in base(),
    ) {
        let pages = chain(&deltas, &base);
        let frags: Vec<&DataPage> = pages.iter().collect();
        let restore = frags.len() as u32;
        let combined = RevisioningKind::Incremental
            .strategy()
            .combine(restore, &frags)
            .unwrap();
        prop_assert_eq!(observed(&combined), model(&deltas, &base, frags.len()));
        prop_assert_eq!(combined.live(), combined.defined());
    }

    #[test]
    fn differential_reads_head_over_full_page(
        delta in edits(),
        base in base(),
    ) {
        let deltas = vec![delta];
        let pages = chain(&deltas, &base);
        let frags: Vec<&DataPage> = pages.iter().collect();
        let combined = RevisioningKind::Differential
            .strategy()
            .combine(4, &frags)
            .unwrap();
        prop_assert_eq!(observed(&combined), model(&deltas, &base, 2));
    }

    #[test]
    fn sliding_window_ignores_older_fragments(
        deltas in prop::collection::vec(edits(), 1..8),
        base in base(),
        restore in 1u32..10,
    ) {
        let pages = chain(&deltas, &base);
        let frags: Vec<&DataPage> = pages.iter().collect();
        let combined = RevisioningKind::SlidingSnapshot
            .strategy()
            .combine(restore, &frags)
            .unwrap();
        prop_assert_eq!(observed(&combined), model(&deltas, &base, restore as usize));
    }

    #[test]
    fn full_dump_reads_only_the_newest_page(base in base()) {
        let pages = chain(&[], &base);
        let frags: Vec<&DataPage> = pages.iter().collect();
        let combined = RevisioningKind::FullDump
            .strategy()
            .combine(1, &frags)
            .unwrap();
        prop_assert_eq!(observed(&combined), model(&[], &base, 1));
    }
}
