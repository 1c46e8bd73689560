use csm_core::{TextRange, Uid, UidKind};
use csm_index::{FileComponentIncludes, FileComponentMacros};
use csm_model::{Include, Macro};
use csm_storage::MemoryRepository;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

const PROPTEST_CASES: u32 = 128;

fn file() -> Uid {
    Uid::new(UidKind::File, 5)
}

fn include_at(slot: u32) -> Include {
    let start = slot * 20;
    Include::new(format!("h{slot}.h"), false, TextRange::new(start.into(), (start + 15).into()))
}

fn define(name: &str, start: u32) -> Macro {
    Macro::object_like(name, TextRange::new(start.into(), (start + 10).into()), "")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(PROPTEST_CASES))]

    #[test]
    fn broken_includes_track_latest_mark(
        marks in prop::collection::vec((0..8u32, any::<bool>()), 1..32),
    ) {
        let repo = Arc::new(MemoryRepository::new());
        let includes = FileComponentIncludes::new(file(), repo);
        let mut latest: BTreeMap<u32, (Uid, bool)> = BTreeMap::new();
        for (slot, broken) in &marks {
            let uid = includes.add_include(&include_at(*slot), *broken).expect("stored");
            latest.insert(*slot, (uid, *broken));
        }

        let all = includes.includes();
        let broken = includes.broken_includes();
        prop_assert!(broken.iter().all(|uid| all.contains(uid)));

        let expected_all: Vec<Uid> = latest.values().map(|(uid, _)| *uid).collect();
        let expected_broken: Vec<Uid> = latest
            .values()
            .filter(|(_, broken)| *broken)
            .map(|(uid, _)| *uid)
            .collect();
        prop_assert_eq!(all, expected_all);
        prop_assert_eq!(broken, expected_broken);
    }
}

#[test]
fn include_append_unions_disjoint_sets() {
    let repo = Arc::new(MemoryRepository::new());
    let left = FileComponentIncludes::new(file(), repo.clone());
    let right = FileComponentIncludes::new(file(), repo.clone());
    let a = left.add_include(&include_at(0), false).unwrap();
    let c = left.add_include(&include_at(2), true).unwrap();
    let b = right.add_include(&include_at(1), true).unwrap();

    left.append_from(&right);

    assert_eq!(left.includes(), vec![a, b, c]);
    assert_eq!(left.broken_includes(), vec![b, c]);
}

#[test]
fn macro_append_unions_disjoint_sets() {
    let repo = Arc::new(MemoryRepository::new());
    let left = FileComponentMacros::new(file(), repo.clone());
    let right = FileComponentMacros::new(file(), repo.clone());
    let foo_late = left.add_macro(&define("FOO", 50)).unwrap();
    let bar = right.add_macro(&define("BAR", 5)).unwrap();
    let foo_early = right.add_macro(&define("FOO", 10)).unwrap();

    left.append_from(&right);

    assert_eq!(left.macros(), vec![bar, foo_early, foo_late]);
    assert_eq!(left.find_macro_uids("FOO"), vec![foo_early, foo_late]);
}
