use csm_core::{ComponentKind, Uid};
use csm_model::Instantiation;
use csm_storage::{DataInput, DataOutput, Repository, RepositoryExt, StorageError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::component::{read_header, FileComponent, PendingWrite};
use crate::error::IndexError;
use crate::TRACE_TARGET;

const FORMAT_VERSION: u16 = 1;

/// Template instantiations attributed to one file.
///
/// Instantiations are created lazily after a parse, so nothing disposes of
/// them on reparse. Each entry remembers the content generation that last
/// produced it and [`FileComponentInstantiations::release_stale`] drops the
/// ones an older generation left behind.
pub struct FileComponentInstantiations {
    file: Uid,
    repository: Option<Arc<dyn Repository>>,
    entries: RwLock<HashMap<Uid, u64>>,
}

impl fmt::Debug for FileComponentInstantiations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileComponentInstantiations")
            .field("file", &self.file)
            .field("instantiations", &self.entries.read().len())
            .finish()
    }
}

impl FileComponentInstantiations {
    pub fn new(file: Uid, repository: Arc<dyn Repository>) -> Self {
        Self {
            file,
            repository: Some(repository),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn empty() -> Arc<Self> {
        static EMPTY: OnceLock<Arc<FileComponentInstantiations>> = OnceLock::new();
        Arc::clone(EMPTY.get_or_init(|| {
            Arc::new(Self {
                file: Uid::PLACEHOLDER,
                repository: None,
                entries: RwLock::new(HashMap::new()),
            })
        }))
    }

    pub fn is_stub(&self) -> bool {
        self.repository.is_none()
    }

    pub fn add_instantiation(&self, instantiation: &Instantiation, generation: u64) -> Option<Uid> {
        let repository = self.repository.as_ref()?;
        let uid = repository.put_object(&instantiation.key(self.file), instantiation);
        let mut entries = self.entries.write();
        let entry = entries.entry(uid).or_insert(generation);
        *entry = (*entry).max(generation);
        Some(uid)
    }

    /// Instantiation handles in handle order.
    pub fn instantiations(&self) -> Vec<Uid> {
        let mut uids: Vec<Uid> = self.entries.read().keys().copied().collect();
        uids.sort_unstable();
        uids
    }

    pub fn generation_of(&self, uid: Uid) -> Option<u64> {
        self.entries.read().get(&uid).copied()
    }

    /// Newest generation recorded by any entry.
    pub fn latest_generation(&self) -> Option<u64> {
        self.entries.read().values().copied().max()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn resolve_instantiations(&self) -> Result<Vec<Instantiation>, IndexError> {
        if self.is_stub() {
            return Ok(Vec::new());
        }
        self.instantiations()
            .into_iter()
            .map(|uid| self.resolve(uid))
            .collect()
    }

    fn resolve(&self, uid: Uid) -> Result<Instantiation, IndexError> {
        let Some(repository) = &self.repository else {
            return Err(IndexError::MissingObject(uid));
        };
        repository
            .get_object::<Instantiation>(uid)?
            .ok_or(IndexError::MissingObject(uid))
    }

    /// Stores the instantiations of `staged`, built against its own
    /// repository, here under `generation`. Returns how many were adopted.
    pub(crate) fn adopt_from(
        &self,
        staged: &FileComponentInstantiations,
        generation: u64,
    ) -> Result<usize, IndexError> {
        if self.is_stub() {
            return Ok(0);
        }
        let staged_uids = staged.instantiations();
        for uid in &staged_uids {
            let instantiation = staged.resolve(*uid)?;
            self.add_instantiation(&instantiation, generation);
        }
        Ok(staged_uids.len())
    }

    /// Releases every entry produced before `current`. Returns how many were
    /// released.
    pub fn release_stale(&self, current: u64) -> usize {
        let stale: Vec<Uid> = {
            let mut entries = self.entries.write();
            let stale = entries
                .iter()
                .filter(|(_, generation)| **generation < current)
                .map(|(uid, _)| *uid)
                .collect::<Vec<_>>();
            for uid in &stale {
                entries.remove(uid);
            }
            stale
        };
        if let Some(repository) = &self.repository {
            for uid in &stale {
                repository.remove(*uid);
            }
        }
        if !stale.is_empty() {
            tracing::debug!(
                target: TRACE_TARGET,
                file = %self.file,
                current,
                released = stale.len(),
                "released stale instantiations"
            );
        }
        stale.len()
    }

    pub fn clean(&self) -> PendingWrite {
        let dropped = std::mem::take(&mut *self.entries.write());
        if let Some(repository) = &self.repository {
            for uid in dropped.keys() {
                repository.remove(*uid);
            }
        }
        tracing::debug!(
            target: TRACE_TARGET,
            file = %self.file,
            dropped = dropped.len(),
            "cleaned instantiations"
        );
        PendingWrite::new(self.file, ComponentKind::Instantiations)
    }

    /// Merges `other`, keeping the newest generation per entry.
    pub fn append_from(&self, other: &FileComponentInstantiations) {
        if self.is_stub() {
            return;
        }
        let incoming = other.entries.read().clone();
        let mut entries = self.entries.write();
        for (uid, generation) in incoming {
            let entry = entries.entry(uid).or_insert(generation);
            *entry = (*entry).max(generation);
        }
    }

    pub fn read(
        file: Uid,
        repository: Arc<dyn Repository>,
        input: &mut DataInput<'_>,
    ) -> Result<Self, StorageError> {
        read_header(
            input,
            ComponentKind::Instantiations,
            FORMAT_VERSION..=FORMAT_VERSION,
            file,
        )?;
        let len = input.read_len(13)?;
        let mut entries = HashMap::with_capacity(len);
        for _ in 0..len {
            let uid = input.read_uid()?;
            let generation = input.read_u64()?;
            entries.insert(uid, generation);
        }
        Ok(Self {
            file,
            repository: Some(repository),
            entries: RwLock::new(entries),
        })
    }
}

impl FileComponent for FileComponentInstantiations {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Instantiations
    }

    fn file(&self) -> Uid {
        self.file
    }

    fn format_version(&self) -> u16 {
        FORMAT_VERSION
    }

    fn write(&self, out: &mut DataOutput) {
        let entries = self.entries.read();
        let mut sorted: Vec<_> = entries.iter().collect();
        sorted.sort_unstable_by_key(|(uid, _)| **uid);
        out.write_uid(self.file);
        out.write_len(sorted.len());
        for (uid, generation) in sorted {
            out.write_uid(*uid);
            out.write_u64(*generation);
        }
    }
}
