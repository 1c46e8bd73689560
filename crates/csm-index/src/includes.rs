use csm_core::{ComponentKind, Uid};
use csm_model::Include;
use csm_storage::{DataInput, DataOutput, Repository, RepositoryExt, StorageError};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::component::{read_header, FileComponent, PendingWrite};
use crate::error::IndexError;
use crate::TRACE_TARGET;

const FORMAT_VERSION: u16 = 1;

/// Offset-ordered handle of an include directive.
#[derive(Clone, Copy, Debug, Hash)]
struct IncludeKey {
    uid: Uid,
    start: u32,
}

impl Ord for IncludeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // The same handle is the same directive even if the offset recorded
        // for it is not final yet.
        if self.uid == other.uid {
            return Ordering::Equal;
        }
        self.start
            .cmp(&other.start)
            .then(self.uid.cmp(&other.uid))
    }
}

impl PartialOrd for IncludeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for IncludeKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IncludeKey {}

#[derive(Debug, Default)]
struct IncludesInner {
    includes: BTreeSet<IncludeKey>,
    /// Always a subset of `includes`.
    broken: BTreeSet<IncludeKey>,
}

impl IncludesInner {
    fn mark(&mut self, key: IncludeKey, broken: bool) {
        self.includes.replace(key);
        if broken {
            self.broken.replace(key);
        } else {
            self.broken.remove(&key);
        }
    }

    fn check(&self) {
        debug_assert!(
            self.broken.is_subset(&self.includes),
            "broken includes must be a subset of includes"
        );
    }
}

/// The `#include` directives of one file.
pub struct FileComponentIncludes {
    file: Uid,
    /// `None` only for the shared empty stub.
    repository: Option<Arc<dyn Repository>>,
    inner: RwLock<IncludesInner>,
}

impl fmt::Debug for FileComponentIncludes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("FileComponentIncludes")
            .field("file", &self.file)
            .field("includes", &inner.includes.len())
            .field("broken", &inner.broken.len())
            .finish()
    }
}

impl FileComponentIncludes {
    pub fn new(file: Uid, repository: Arc<dyn Repository>) -> Self {
        Self {
            file,
            repository: Some(repository),
            inner: RwLock::new(IncludesInner::default()),
        }
    }

    pub fn empty() -> Arc<Self> {
        static EMPTY: OnceLock<Arc<FileComponentIncludes>> = OnceLock::new();
        Arc::clone(EMPTY.get_or_init(|| {
            Arc::new(Self {
                file: Uid::PLACEHOLDER,
                repository: None,
                inner: RwLock::new(IncludesInner::default()),
            })
        }))
    }

    pub fn is_stub(&self) -> bool {
        self.repository.is_none()
    }

    /// Stores `include` and records it, replacing any earlier broken mark.
    pub fn add_include(&self, include: &Include, broken: bool) -> Option<Uid> {
        let repository = self.repository.as_ref()?;
        let uid = repository.put_object(&include.key(self.file), include);
        let key = IncludeKey {
            uid,
            start: include.range.start().into(),
        };
        let mut inner = self.inner.write();
        inner.mark(key, broken);
        inner.check();
        Some(uid)
    }

    /// Include handles in source order.
    pub fn includes(&self) -> Vec<Uid> {
        self.inner.read().includes.iter().map(|key| key.uid).collect()
    }

    pub fn broken_includes(&self) -> Vec<Uid> {
        self.inner.read().broken.iter().map(|key| key.uid).collect()
    }

    pub fn has_broken_includes(&self) -> bool {
        !self.inner.read().broken.is_empty()
    }

    pub fn is_broken(&self, uid: Uid) -> bool {
        self.inner.read().broken.iter().any(|key| key.uid == uid)
    }

    pub fn len(&self) -> usize {
        self.inner.read().includes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Loads the include directives in source order.
    pub fn resolve_includes(&self) -> Result<Vec<Include>, IndexError> {
        if self.is_stub() {
            return Ok(Vec::new());
        }
        self.includes()
            .into_iter()
            .map(|uid| self.resolve(uid))
            .collect()
    }

    /// Releases every include from the repository and empties the component.
    pub fn clean(&self) -> PendingWrite {
        let dropped = std::mem::take(&mut *self.inner.write());
        if let Some(repository) = &self.repository {
            for key in &dropped.includes {
                repository.remove(key.uid);
            }
        }
        tracing::debug!(
            target: TRACE_TARGET,
            file = %self.file,
            dropped = dropped.includes.len(),
            "cleaned includes"
        );
        PendingWrite::new(self.file, ComponentKind::Includes)
    }

    /// Swaps in the includes of `staged`, a component of the same file built
    /// against its own repository.
    ///
    /// The staged objects are stored here first, then the entries are
    /// exchanged under one write lock. Objects of replaced includes that the
    /// new set does not reuse are released afterwards.
    pub(crate) fn replace_from(
        &self,
        staged: &FileComponentIncludes,
    ) -> Result<PendingWrite, IndexError> {
        let pending = PendingWrite::new(self.file, ComponentKind::Includes);
        let Some(repository) = &self.repository else {
            return Ok(pending);
        };
        debug_assert!(staged.is_stub() || staged.file == self.file);

        let broken: HashSet<Uid> = staged.broken_includes().into_iter().collect();
        let mut next = IncludesInner::default();
        for uid in staged.includes() {
            let include = staged.resolve(uid)?;
            let stored = repository.put_object(&include.key(self.file), &include);
            let key = IncludeKey {
                uid: stored,
                start: include.range.start().into(),
            };
            next.mark(key, broken.contains(&uid));
        }
        next.check();

        let kept: HashSet<Uid> = next.includes.iter().map(|key| key.uid).collect();
        let previous = std::mem::replace(&mut *self.inner.write(), next);
        for key in &previous.includes {
            if !kept.contains(&key.uid) {
                repository.remove(key.uid);
            }
        }
        Ok(pending)
    }

    fn resolve(&self, uid: Uid) -> Result<Include, IndexError> {
        let Some(repository) = &self.repository else {
            return Err(IndexError::MissingObject(uid));
        };
        repository
            .get_object::<Include>(uid)?
            .ok_or(IndexError::MissingObject(uid))
    }

    /// Merges the includes of `other`.
    ///
    /// An include resolved in `other` is no longer broken here. An include
    /// broken in `other` only becomes broken here if it was not already
    /// known as resolved.
    pub fn append_from(&self, other: &FileComponentIncludes) {
        if self.is_stub() {
            return;
        }
        let (includes, broken) = {
            let other = other.inner.read();
            (other.includes.clone(), other.broken.clone())
        };
        let mut inner = self.inner.write();
        for key in includes {
            let known_resolved = inner.includes.contains(&key) && !inner.broken.contains(&key);
            if broken.contains(&key) {
                inner.includes.replace(key);
                if !known_resolved {
                    inner.broken.replace(key);
                }
            } else {
                inner.mark(key, false);
            }
        }
        inner.check();
    }

    pub fn read(
        file: Uid,
        repository: Arc<dyn Repository>,
        input: &mut DataInput<'_>,
    ) -> Result<Self, StorageError> {
        read_header(input, ComponentKind::Includes, FORMAT_VERSION..=FORMAT_VERSION, file)?;

        let len = input.read_len(9)?;
        let mut inner = IncludesInner::default();
        let mut starts = HashMap::with_capacity(len);
        for _ in 0..len {
            let uid = input.read_uid()?;
            let start = input.read_u32()?;
            starts.insert(uid, start);
            inner.includes.insert(IncludeKey { uid, start });
        }
        for uid in input.read_uids()? {
            // Broken entries without an include would violate the subset rule.
            if let Some(&start) = starts.get(&uid) {
                inner.broken.insert(IncludeKey { uid, start });
            }
        }

        Ok(Self {
            file,
            repository: Some(repository),
            inner: RwLock::new(inner),
        })
    }
}

impl FileComponent for FileComponentIncludes {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Includes
    }

    fn file(&self) -> Uid {
        self.file
    }

    fn format_version(&self) -> u16 {
        FORMAT_VERSION
    }

    fn write(&self, out: &mut DataOutput) {
        let inner = self.inner.read();
        out.write_uid(self.file);
        out.write_len(inner.includes.len());
        for key in &inner.includes {
            out.write_uid(key.uid);
            out.write_u32(key.start);
        }
        let broken: Vec<Uid> = inner.broken.iter().map(|key| key.uid).collect();
        out.write_uids(broken.iter());
    }
}
