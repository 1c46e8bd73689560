use csm_core::{ComponentKind, SmolStr, Uid};
use csm_model::Macro;
use csm_storage::{DataInput, DataOutput, Repository, RepositoryExt, StorageError};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::component::{read_header, FileComponent, PendingWrite};
use crate::error::IndexError;
use crate::TRACE_TARGET;

const FORMAT_VERSION: u16 = 1;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct MacroKey {
    name: SmolStr,
    start: u32,
}

/// The macros defined in one file, ordered by name then offset.
pub struct FileComponentMacros {
    file: Uid,
    repository: Option<Arc<dyn Repository>>,
    macros: RwLock<BTreeMap<MacroKey, Uid>>,
}

impl fmt::Debug for FileComponentMacros {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileComponentMacros")
            .field("file", &self.file)
            .field("macros", &self.macros.read().len())
            .finish()
    }
}

impl FileComponentMacros {
    pub fn new(file: Uid, repository: Arc<dyn Repository>) -> Self {
        Self {
            file,
            repository: Some(repository),
            macros: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn empty() -> Arc<Self> {
        static EMPTY: OnceLock<Arc<FileComponentMacros>> = OnceLock::new();
        Arc::clone(EMPTY.get_or_init(|| {
            Arc::new(Self {
                file: Uid::PLACEHOLDER,
                repository: None,
                macros: RwLock::new(BTreeMap::new()),
            })
        }))
    }

    pub fn is_stub(&self) -> bool {
        self.repository.is_none()
    }

    pub fn add_macro(&self, definition: &Macro) -> Option<Uid> {
        let repository = self.repository.as_ref()?;
        let uid = repository.put_object(&definition.key(self.file), definition);
        let key = MacroKey {
            name: definition.name.clone(),
            start: definition.start(),
        };
        self.macros.write().insert(key, uid);
        Some(uid)
    }

    /// Macro handles ordered by name, then offset.
    pub fn macros(&self) -> Vec<Uid> {
        self.macros.read().values().copied().collect()
    }

    /// Every definition of `name` in this file, in source order.
    pub fn find_macro_uids(&self, name: &str) -> Vec<Uid> {
        let from = MacroKey {
            name: SmolStr::new(name),
            start: 0,
        };
        let to = MacroKey {
            name: SmolStr::new(name),
            start: u32::MAX,
        };
        self.macros
            .read()
            .range(from..=to)
            .map(|(_, uid)| *uid)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.macros.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn resolve_macros(&self) -> Result<Vec<Macro>, IndexError> {
        if self.is_stub() {
            return Ok(Vec::new());
        }
        self.macros()
            .into_iter()
            .map(|uid| self.resolve(uid))
            .collect()
    }

    fn resolve(&self, uid: Uid) -> Result<Macro, IndexError> {
        let Some(repository) = &self.repository else {
            return Err(IndexError::MissingObject(uid));
        };
        repository
            .get_object::<Macro>(uid)?
            .ok_or(IndexError::MissingObject(uid))
    }

    pub fn clean(&self) -> PendingWrite {
        let dropped = std::mem::take(&mut *self.macros.write());
        if let Some(repository) = &self.repository {
            for uid in dropped.values() {
                repository.remove(*uid);
            }
        }
        tracing::debug!(
            target: TRACE_TARGET,
            file = %self.file,
            dropped = dropped.len(),
            "cleaned macros"
        );
        PendingWrite::new(self.file, ComponentKind::Macros)
    }

    /// Swaps in the macros of `staged`, built against its own repository.
    /// Definitions are stored here before the entries are exchanged.
    pub(crate) fn replace_from(
        &self,
        staged: &FileComponentMacros,
    ) -> Result<PendingWrite, IndexError> {
        let pending = PendingWrite::new(self.file, ComponentKind::Macros);
        let Some(repository) = &self.repository else {
            return Ok(pending);
        };
        debug_assert!(staged.is_stub() || staged.file == self.file);

        let mut next = BTreeMap::new();
        for uid in staged.macros() {
            let definition = staged.resolve(uid)?;
            let stored = repository.put_object(&definition.key(self.file), &definition);
            let key = MacroKey {
                name: definition.name.clone(),
                start: definition.start(),
            };
            next.insert(key, stored);
        }

        let kept: HashSet<Uid> = next.values().copied().collect();
        let previous = std::mem::replace(&mut *self.macros.write(), next);
        for uid in previous.values() {
            if !kept.contains(uid) {
                repository.remove(*uid);
            }
        }
        Ok(pending)
    }

    pub fn append_from(&self, other: &FileComponentMacros) {
        if self.is_stub() {
            return;
        }
        let entries = other.macros.read().clone();
        self.macros.write().extend(entries);
    }

    pub fn read(
        file: Uid,
        repository: Arc<dyn Repository>,
        input: &mut DataInput<'_>,
    ) -> Result<Self, StorageError> {
        read_header(input, ComponentKind::Macros, FORMAT_VERSION..=FORMAT_VERSION, file)?;
        let len = input.read_len(13)?;
        let mut macros = BTreeMap::new();
        for _ in 0..len {
            let name = input.read_str()?;
            let start = input.read_u32()?;
            let uid = input.read_uid()?;
            macros.insert(MacroKey { name, start }, uid);
        }
        Ok(Self {
            file,
            repository: Some(repository),
            macros: RwLock::new(macros),
        })
    }
}

impl FileComponent for FileComponentMacros {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Macros
    }

    fn file(&self) -> Uid {
        self.file
    }

    fn format_version(&self) -> u16 {
        FORMAT_VERSION
    }

    fn write(&self, out: &mut DataOutput) {
        let macros = self.macros.read();
        out.write_uid(self.file);
        out.write_len(macros.len());
        for (key, uid) in macros.iter() {
            out.write_str(&key.name);
            out.write_u32(key.start);
            out.write_uid(*uid);
        }
    }
}
