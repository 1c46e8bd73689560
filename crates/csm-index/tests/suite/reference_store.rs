use csm_core::{AnchorSet, TextRange, TextSize, Uid, UidKind};
use csm_index::{FileComponentReferences, IndexOptions, ReferenceSite, ReferencesIndex, UsageIndex};
use csm_model::{Identity, ReferenceKind};
use proptest::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

const PROPTEST_CASES: u32 = 128;

fn file() -> Uid {
    Uid::new(UidKind::File, 7)
}

fn decl(id: u32) -> Uid {
    Uid::new(UidKind::Declaration, id)
}

fn site(start: u32, end: u32, text: &str) -> ReferenceSite {
    ReferenceSite::new(
        ReferenceKind::Usage,
        TextRange::new(start.into(), end.into()),
        text,
    )
}

fn store() -> (FileComponentReferences, Arc<ReferencesIndex>) {
    let usages = Arc::new(ReferencesIndex::new());
    let refs = FileComponentReferences::new(
        file(),
        AnchorSet::new(),
        usages.clone(),
        IndexOptions::default(),
    );
    (refs, usages)
}

/// Non-overlapping spans `[start, start + len)` laid out left to right.
fn arb_spans() -> impl Strategy<Value = Vec<(u32, u32)>> {
    prop::collection::vec((0..8u32, 1..6u32), 1..24).prop_map(|raw| {
        let mut cursor = 0;
        raw.into_iter()
            .map(|(gap, len)| {
                let start = cursor + gap;
                cursor = start + len;
                (start, start + len)
            })
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(PROPTEST_CASES))]

    #[test]
    fn point_query_finds_exactly_the_covering_span(spans in arb_spans()) {
        let (refs, _) = store();
        for (i, (start, end)) in spans.iter().enumerate() {
            let text = format!("id{i}");
            prop_assert!(refs.add_reference(&site(*start, *end, &text), decl(i as u32).into()));
        }

        let limit = spans.last().map(|(_, end)| end + 4).unwrap_or(4);
        for offset in 0..limit {
            let expected = spans
                .iter()
                .position(|(start, end)| *start <= offset && offset < *end);
            let found = refs.reference_at(TextSize::from(offset));
            match expected {
                Some(i) => {
                    let found = found.expect("covered offset");
                    prop_assert_eq!(found.target(), decl(i as u32));
                }
                None => prop_assert!(found.is_none()),
            }
        }
    }

    #[test]
    fn reverse_index_matches_live_targets(
        writes in prop::collection::vec((0..6u32, 0..4u32), 1..40),
    ) {
        let (refs, usages) = store();
        // Slot n occupies [10n, 10n + 3); later writes overwrite earlier ones.
        let mut live: BTreeMap<u32, u32> = BTreeMap::new();
        for (slot, target) in &writes {
            let start = slot * 10;
            refs.add_reference(&site(start, start + 3, "x"), decl(*target).into());
            live.insert(*slot, *target);
        }

        let mut by_target: HashMap<u32, Vec<u32>> = HashMap::new();
        for (slot, target) in &live {
            by_target.entry(*target).or_default().push(slot * 10);
        }
        for target in 0..4u32 {
            let starts: Vec<u32> = refs
                .references_to(&[decl(target)])
                .iter()
                .map(|reference| u32::from(reference.start()))
                .collect();
            let expected = by_target.get(&target).cloned().unwrap_or_default();
            prop_assert_eq!(&starts, &expected);

            let published = usages.usages(decl(target)).len();
            prop_assert_eq!(published, expected.len());
        }
        prop_assert_eq!(refs.len(), live.len());
    }
}

#[test]
fn local_target_leaves_no_trace_anywhere() {
    let (refs, usages) = store();
    assert!(!refs.add_reference(&site(0, 3, "tmp"), Identity::Local));
    assert!(!refs.add_resolved_reference(&site(0, 3, "tmp"), Identity::Local));

    assert!(refs.reference_at(TextSize::from(1u32)).is_none());
    assert!(refs.references().is_empty());
    assert!(refs.resolved_references().is_empty());
    assert!(usages.is_empty());
}

#[test]
fn tracing_rejections_does_not_change_results() {
    let usages = Arc::new(ReferencesIndex::new());
    let refs = FileComponentReferences::new(
        file(),
        AnchorSet::new(),
        usages,
        IndexOptions {
            trace_rejected_references: true,
        },
    );
    assert!(!refs.add_reference(&site(0, 3, "tmp"), Identity::Local));
    assert!(refs.add_reference(
        &site(4, 7, "foo").with_owner(Identity::Local),
        decl(1).into()
    ));
    assert_eq!(refs.len(), 1);
}

#[test]
fn append_unions_disjoint_components() {
    let (target, usages) = store();
    let source = FileComponentReferences::new(
        file(),
        AnchorSet::new(),
        usages.clone(),
        IndexOptions::default(),
    );
    target.add_reference(&site(0, 3, "foo"), decl(1).into());
    source.add_reference(&site(10, 13, "bar"), decl(2).into());
    source.add_resolved_reference(&site(20, 24, "expr"), decl(3).into());

    target.append_from(&source);

    let texts: Vec<_> = target
        .references()
        .iter()
        .map(|reference| reference.text().to_string())
        .collect();
    assert_eq!(texts, ["foo", "bar"]);
    assert_eq!(target.resolved_references().len(), 1);
    assert_eq!(target.references_to(&[decl(2)]).len(), 1);
    assert_eq!(usages.files_referencing(decl(2)), vec![file()]);
}

#[test]
fn appending_a_component_into_itself_is_harmless() {
    let (refs, _) = store();
    refs.add_reference(&site(0, 3, "foo"), decl(1).into());
    refs.append_from(&refs);
    assert_eq!(refs.len(), 1);
    assert_eq!(refs.references_to(&[decl(1)]).len(), 1);
}

#[test]
fn concurrent_clean_and_overwrite_keep_usages_in_step() {
    let (refs, usages) = store();
    let refs = Arc::new(refs);

    std::thread::scope(|scope| {
        for writer in 0..2u32 {
            let refs = Arc::clone(&refs);
            scope.spawn(move || {
                for round in 0..500u32 {
                    // Both writers fight over the same slots with different targets.
                    let start = (round % 8) * 10;
                    let target = decl(writer * 4 + round % 4);
                    refs.add_reference(&site(start, start + 3, "x"), target.into());
                }
            });
        }
        let cleaner = Arc::clone(&refs);
        scope.spawn(move || {
            for _ in 0..200 {
                let _ = cleaner.clean();
            }
        });
    });

    for target in 0..8u32 {
        let live = refs.references_to(&[decl(target)]).len();
        assert_eq!(usages.usages(decl(target)).len(), live, "target {target}");
    }
    let published: usize = (0..8u32).map(|t| usages.usages(decl(t)).len()).sum();
    assert_eq!(published, refs.len());
}
