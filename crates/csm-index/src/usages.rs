use csm_core::Uid;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

use crate::references::ReferenceKey;

/// Cross-file reverse index from a declaration to the files that use it.
///
/// Reference components publish into it so "find usages" does not need to open
/// every file's own store. It is injected into each component rather than
/// shared through a global.
pub trait UsageIndex: Send + Sync + fmt::Debug {
    fn put(&self, target: Uid, file: Uid, key: &ReferenceKey);

    fn remove(&self, target: Uid, file: Uid, key: &ReferenceKey);

    /// Drops every usage recorded for `file`.
    fn remove_file(&self, file: Uid);

    fn files_referencing(&self, target: Uid) -> Vec<Uid>;

    /// Every `(file, reference key)` pair that resolves to `target`.
    fn usages(&self, target: Uid) -> Vec<(Uid, ReferenceKey)>;
}

#[derive(Debug, Default)]
struct UsageMaps {
    by_target: HashMap<Uid, BTreeMap<Uid, BTreeSet<ReferenceKey>>>,
    targets_by_file: HashMap<Uid, HashSet<Uid>>,
}

/// In-memory [`UsageIndex`].
#[derive(Debug, Default)]
pub struct ReferencesIndex {
    maps: RwLock<UsageMaps>,
}

impl ReferencesIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct targets with at least one usage.
    pub fn target_count(&self) -> usize {
        self.maps.read().by_target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target_count() == 0
    }
}

impl UsageIndex for ReferencesIndex {
    fn put(&self, target: Uid, file: Uid, key: &ReferenceKey) {
        let mut maps = self.maps.write();
        maps.by_target
            .entry(target)
            .or_default()
            .entry(file)
            .or_default()
            .insert(key.clone());
        maps.targets_by_file.entry(file).or_default().insert(target);
    }

    fn remove(&self, target: Uid, file: Uid, key: &ReferenceKey) {
        let mut maps = self.maps.write();
        let Some(files) = maps.by_target.get_mut(&target) else {
            return;
        };
        let Some(keys) = files.get_mut(&file) else {
            return;
        };
        keys.remove(key);
        if !keys.is_empty() {
            return;
        }
        files.remove(&file);
        if files.is_empty() {
            maps.by_target.remove(&target);
        }
        if let Some(targets) = maps.targets_by_file.get_mut(&file) {
            targets.remove(&target);
            if targets.is_empty() {
                maps.targets_by_file.remove(&file);
            }
        }
    }

    fn remove_file(&self, file: Uid) {
        let mut maps = self.maps.write();
        let Some(targets) = maps.targets_by_file.remove(&file) else {
            return;
        };
        for target in targets {
            if let Some(files) = maps.by_target.get_mut(&target) {
                files.remove(&file);
                if files.is_empty() {
                    maps.by_target.remove(&target);
                }
            }
        }
    }

    fn files_referencing(&self, target: Uid) -> Vec<Uid> {
        self.maps
            .read()
            .by_target
            .get(&target)
            .map(|files| files.keys().copied().collect())
            .unwrap_or_default()
    }

    fn usages(&self, target: Uid) -> Vec<(Uid, ReferenceKey)> {
        let maps = self.maps.read();
        let Some(files) = maps.by_target.get(&target) else {
            return Vec::new();
        };
        files
            .iter()
            .flat_map(|(file, keys)| keys.iter().map(move |key| (*file, key.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csm_core::UidKind;

    fn decl(id: u32) -> Uid {
        Uid::new(UidKind::Declaration, id)
    }

    fn file(id: u32) -> Uid {
        Uid::new(UidKind::File, id)
    }

    #[test]
    fn files_are_listed_per_target() {
        let index = ReferencesIndex::new();
        index.put(decl(1), file(2), &ReferenceKey::new(10, 13, "foo"));
        index.put(decl(1), file(1), &ReferenceKey::new(4, 7, "foo"));
        index.put(decl(2), file(1), &ReferenceKey::new(20, 23, "bar"));

        assert_eq!(index.files_referencing(decl(1)), vec![file(1), file(2)]);
        assert_eq!(index.usages(decl(2)).len(), 1);
        assert_eq!(index.target_count(), 2);
    }

    #[test]
    fn removing_last_key_forgets_the_file() {
        let index = ReferencesIndex::new();
        let key = ReferenceKey::new(10, 13, "foo");
        index.put(decl(1), file(1), &key);
        index.remove(decl(1), file(1), &key);

        assert!(index.files_referencing(decl(1)).is_empty());
        assert!(index.is_empty());
        // Unknown entries are ignored.
        index.remove(decl(9), file(9), &key);
    }

    #[test]
    fn remove_file_leaves_other_files() {
        let index = ReferencesIndex::new();
        index.put(decl(1), file(1), &ReferenceKey::new(0, 3, "foo"));
        index.put(decl(1), file(2), &ReferenceKey::new(0, 3, "foo"));
        index.put(decl(2), file(1), &ReferenceKey::new(8, 11, "bar"));

        index.remove_file(file(1));

        assert_eq!(index.files_referencing(decl(1)), vec![file(2)]);
        assert!(index.usages(decl(2)).is_empty());
    }
}
