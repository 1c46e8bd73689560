use csm_core::{AnchorSet, ComponentKind, ObjectKey, TextRange, TextSize, Uid};
use csm_model::{Declaration, Instantiation};
use csm_storage::{DataInput, MemoryRepository, Repository, StorageError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::component::{FileComponent, PendingWrite};
use crate::error::IndexError;
use crate::includes::FileComponentIncludes;
use crate::instantiations::FileComponentInstantiations;
use crate::macros::FileComponentMacros;
use crate::references::FileComponentReferences;
use crate::signature::FileContentSignature;
use crate::usages::{ReferencesIndex, UsageIndex};
use crate::{IndexOptions, TRACE_TARGET};

/// Pending writes of the components cleaned together.
#[must_use = "cleaned components are not persisted until the batch is committed"]
#[derive(Debug, Default)]
pub struct CleanBatch {
    writes: Vec<PendingWrite>,
}

impl CleanBatch {
    pub fn kinds(&self) -> Vec<ComponentKind> {
        self.writes.iter().map(PendingWrite::kind).collect()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// The indexed content of one source file.
#[derive(Debug)]
pub struct FileContent {
    file: Uid,
    anchors: AnchorSet,
    repository: Option<Arc<dyn Repository>>,
    usages: Option<Arc<dyn UsageIndex>>,
    options: IndexOptions,
    generation: AtomicU64,
    references: Arc<FileComponentReferences>,
    includes: Arc<FileComponentIncludes>,
    macros: Arc<FileComponentMacros>,
    instantiations: Arc<FileComponentInstantiations>,
}

impl FileContent {
    pub fn new(
        file: Uid,
        repository: Arc<dyn Repository>,
        usages: Arc<dyn UsageIndex>,
        options: IndexOptions,
    ) -> Self {
        Self::with_anchors(file, AnchorSet::new(), repository, usages, options, 0)
    }

    fn with_anchors(
        file: Uid,
        anchors: AnchorSet,
        repository: Arc<dyn Repository>,
        usages: Arc<dyn UsageIndex>,
        options: IndexOptions,
        generation: u64,
    ) -> Self {
        Self {
            file,
            references: Arc::new(FileComponentReferences::new(
                file,
                anchors.clone(),
                Arc::clone(&usages),
                options,
            )),
            includes: Arc::new(FileComponentIncludes::new(file, Arc::clone(&repository))),
            macros: Arc::new(FileComponentMacros::new(file, Arc::clone(&repository))),
            instantiations: Arc::new(FileComponentInstantiations::new(
                file,
                Arc::clone(&repository),
            )),
            anchors,
            repository: Some(repository),
            usages: Some(usages),
            options,
            generation: AtomicU64::new(generation),
        }
    }

    /// Content of placeholder files: shared empty components, never persisted.
    pub fn empty() -> Self {
        Self {
            file: Uid::PLACEHOLDER,
            anchors: AnchorSet::new(),
            repository: None,
            usages: None,
            options: IndexOptions::default(),
            generation: AtomicU64::new(0),
            references: FileComponentReferences::empty(),
            includes: FileComponentIncludes::empty(),
            macros: FileComponentMacros::empty(),
            instantiations: FileComponentInstantiations::empty(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.repository.is_none()
    }

    /// A fresh content of the same file for building a reparse result.
    ///
    /// It shares the anchors and runs one generation ahead, but stages its
    /// objects in a private in-memory repository and publishes usages to a
    /// private index. Nothing it records is visible through this content until
    /// [`FileContent::replace_with`]; dropping it discards the reparse.
    pub fn transient(&self) -> Self {
        if self.is_placeholder() {
            return Self::empty();
        }
        Self::with_anchors(
            self.file,
            self.anchors.clone(),
            Arc::new(MemoryRepository::new()),
            Arc::new(ReferencesIndex::new()),
            self.options,
            self.generation().saturating_add(1),
        )
    }

    pub fn file(&self) -> Uid {
        self.file
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn anchors(&self) -> &AnchorSet {
        &self.anchors
    }

    pub fn references(&self) -> &Arc<FileComponentReferences> {
        &self.references
    }

    pub fn includes(&self) -> &Arc<FileComponentIncludes> {
        &self.includes
    }

    pub fn macros(&self) -> &Arc<FileComponentMacros> {
        &self.macros
    }

    pub fn instantiations(&self) -> &Arc<FileComponentInstantiations> {
        &self.instantiations
    }

    /// Records an instantiation under the current generation.
    pub fn add_instantiation(&self, instantiation: &Instantiation) -> Option<Uid> {
        self.instantiations
            .add_instantiation(instantiation, self.generation())
    }

    /// Cleans the components a reparse rebuilds: references, includes and
    /// macros. Instantiations outlive the parse and are released by
    /// generation instead.
    pub fn clean(&self) -> CleanBatch {
        CleanBatch {
            writes: vec![
                self.references.clean(),
                self.includes.clean(),
                self.macros.clean(),
            ],
        }
    }

    /// Cleans every component, for a file leaving the model.
    pub fn dispose(&self) -> CleanBatch {
        let mut batch = self.clean();
        batch.writes.push(self.instantiations.clean());
        batch
    }

    /// Writes every component named in `batch` and flushes the repository.
    pub fn commit(&self, batch: CleanBatch) -> Result<(), IndexError> {
        let Some(repository) = &self.repository else {
            return Ok(());
        };
        let committed = batch.len();
        for pending in batch.writes {
            let component = self.component(pending.kind());
            pending.commit(component, repository.as_ref());
        }
        repository.flush()?;
        tracing::debug!(target: TRACE_TARGET, file = %self.file, committed, "committed components");
        Ok(())
    }

    /// Writes all four components.
    pub fn persist(&self) -> Result<(), IndexError> {
        let writes = ComponentKind::ALL
            .into_iter()
            .map(|kind| PendingWrite::new(self.file, kind))
            .collect();
        self.commit(CleanBatch { writes })
    }

    /// Swaps in the result of a reparse built on [`FileContent::transient`].
    ///
    /// Each component is exchanged under its own write lock, so readers
    /// observe it either before or after the swap. Staged objects move into
    /// this content's repository, replaced ones are released and the durable
    /// write of all four components happens once at the end.
    pub fn replace_with(&self, transient: FileContent) -> Result<(), IndexError> {
        if self.is_placeholder() {
            return Ok(());
        }
        debug_assert_eq!(transient.file, self.file, "transient content of another file");

        let generation = transient
            .generation()
            .max(self.generation().saturating_add(1));
        let mut writes = vec![
            self.references.replace_from(&transient.references),
            self.includes.replace_from(&transient.includes)?,
            self.macros.replace_from(&transient.macros)?,
        ];
        let adopted = self
            .instantiations
            .adopt_from(&transient.instantiations, generation)?;
        self.generation.store(generation, Ordering::Release);
        let released = self.instantiations.release_stale(generation);
        writes.push(PendingWrite::new(self.file, ComponentKind::Instantiations));

        tracing::debug!(
            target: TRACE_TARGET,
            file = %self.file,
            generation,
            adopted,
            released,
            "replaced file content"
        );
        self.commit(CleanBatch { writes })
    }

    /// Reads the persisted components of `file`. Components without a blob,
    /// or whose blob uses an unsupported format version, start empty.
    pub fn load(
        file: Uid,
        repository: Arc<dyn Repository>,
        usages: Arc<dyn UsageIndex>,
        options: IndexOptions,
    ) -> Result<Self, IndexError> {
        let anchors = AnchorSet::new();
        let repo = repository.as_ref();

        let references = load_component(
            repo,
            file,
            ComponentKind::References,
            |input| FileComponentReferences::read(file, &anchors, Arc::clone(&usages), options, input),
            || FileComponentReferences::new(file, anchors.clone(), Arc::clone(&usages), options),
        )?;
        let includes = load_component(
            repo,
            file,
            ComponentKind::Includes,
            |input| FileComponentIncludes::read(file, Arc::clone(&repository), input),
            || FileComponentIncludes::new(file, Arc::clone(&repository)),
        )?;
        let macros = load_component(
            repo,
            file,
            ComponentKind::Macros,
            |input| FileComponentMacros::read(file, Arc::clone(&repository), input),
            || FileComponentMacros::new(file, Arc::clone(&repository)),
        )?;
        let instantiations = load_component(
            repo,
            file,
            ComponentKind::Instantiations,
            |input| FileComponentInstantiations::read(file, Arc::clone(&repository), input),
            || FileComponentInstantiations::new(file, Arc::clone(&repository)),
        )?;

        let generation = instantiations.latest_generation().unwrap_or(0);
        Ok(Self {
            file,
            anchors,
            repository: Some(Arc::clone(&repository)),
            usages: Some(usages),
            options,
            generation: AtomicU64::new(generation),
            references: Arc::new(references),
            includes: Arc::new(includes),
            macros: Arc::new(macros),
            instantiations: Arc::new(instantiations),
        })
    }

    /// Signature of the current includes and macros plus `declarations`.
    pub fn signature(&self, declarations: &[Declaration]) -> Result<FileContentSignature, IndexError> {
        Ok(FileContentSignature::build(
            self.file,
            &self.includes.resolve_includes()?,
            &self.macros.resolve_macros()?,
            declarations,
        ))
    }

    /// Moves the anchors of this file. Reference keys follow once
    /// [`FileComponentReferences::rebuild_keys`] runs.
    pub fn apply_edit(&self, deleted: TextRange, inserted_len: TextSize) {
        self.anchors.apply_edit(deleted, inserted_len);
    }

    fn component(&self, kind: ComponentKind) -> &dyn FileComponent {
        match kind {
            ComponentKind::References => self.references.as_ref(),
            ComponentKind::Includes => self.includes.as_ref(),
            ComponentKind::Macros => self.macros.as_ref(),
            ComponentKind::Instantiations => self.instantiations.as_ref(),
        }
    }
}

fn load_component<T>(
    repository: &dyn Repository,
    file: Uid,
    kind: ComponentKind,
    read: impl FnOnce(&mut DataInput<'_>) -> Result<T, StorageError>,
    fresh: impl FnOnce() -> T,
) -> Result<T, IndexError> {
    let Some(uid) = repository.uid_of(&ObjectKey::component(file, kind)) else {
        return Ok(fresh());
    };
    let Some(bytes) = repository.get(uid)? else {
        return Ok(fresh());
    };
    match read(&mut DataInput::new(&bytes)) {
        Ok(component) => Ok(component),
        Err(StorageError::UnsupportedVersion { found, .. }) => {
            tracing::warn!(
                target: TRACE_TARGET,
                file = %file,
                component = ?kind,
                version = found,
                "dropping component persisted in an unsupported format"
            );
            repository.remove(uid);
            Ok(fresh())
        }
        Err(err) => Err(err.into()),
    }
}
