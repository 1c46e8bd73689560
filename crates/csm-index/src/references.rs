use csm_core::{Anchor, AnchorSet, ComponentKind, SmolStr, TextRange, TextSize, Uid};
use csm_model::{Identity, ReferenceKind};
use csm_storage::{DataInput, DataOutput, Persistent, StorageError};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::component::{read_header, FileComponent, PendingWrite};
use crate::usages::UsageIndex;
use crate::{IndexOptions, TRACE_TARGET};

/// Version 1 carried no reverse index; it is rebuilt on read.
const FORMAT_VERSION: u16 = 2;
const OLDEST_READABLE_VERSION: u16 = 1;

/// Map key of a reference, captured when the reference is installed.
///
/// Keys order by start offset, then by a hash of the identifier text; end
/// offset and the text itself only make the order total.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReferenceKey {
    start: u32,
    end: u32,
    text: SmolStr,
    text_hash: u32,
}

impl ReferenceKey {
    pub fn new(start: u32, end: u32, text: impl Into<SmolStr>) -> Self {
        let text = text.into();
        Self {
            start,
            end,
            text_hash: text_hash(&text),
            text,
        }
    }

    /// Smallest key starting at `start`.
    fn floor(start: u32) -> Self {
        Self {
            start,
            end: 0,
            text: SmolStr::default(),
            text_hash: 0,
        }
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn covers(&self, offset: u32) -> bool {
        self.start <= offset && offset < self.end
    }
}

impl Ord for ReferenceKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.start
            .cmp(&other.start)
            .then(self.text_hash.cmp(&other.text_hash))
            .then(self.end.cmp(&other.end))
            .then_with(|| self.text.cmp(&other.text))
    }
}

impl PartialOrd for ReferenceKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// 32-bit FNV-1a.
fn text_hash(text: &str) -> u32 {
    text.bytes().fold(0x811c_9dc5, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
    })
}

/// Where an identifier occurs, as reported by the resolver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferenceSite {
    pub kind: ReferenceKind,
    pub range: TextRange,
    pub text: SmolStr,
    /// Declaration the occurrence appears in.
    pub owner: Option<Identity>,
    /// Closest enclosing top-level declaration.
    pub top_level_owner: Option<Identity>,
}

impl ReferenceSite {
    pub fn new(kind: ReferenceKind, range: TextRange, text: impl Into<SmolStr>) -> Self {
        Self {
            kind,
            range,
            text: text.into(),
            owner: None,
            top_level_owner: None,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<Identity>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_top_level_owner(mut self, owner: impl Into<Identity>) -> Self {
        self.top_level_owner = Some(owner.into());
        self
    }

    pub fn key(&self) -> ReferenceKey {
        ReferenceKey::new(
            self.range.start().into(),
            self.range.end().into(),
            self.text.clone(),
        )
    }
}

/// An indexed identifier occurrence. Immutable once installed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reference {
    file: Uid,
    kind: ReferenceKind,
    start: Anchor,
    end: Anchor,
    text: SmolStr,
    target: Uid,
    owner: Option<Uid>,
    top_level_owner: Option<Uid>,
}

impl Reference {
    pub fn file(&self) -> Uid {
        self.file
    }

    pub fn kind(&self) -> ReferenceKind {
        self.kind
    }

    /// Current start offset; follows edits applied to the file's anchors.
    pub fn start(&self) -> TextSize {
        self.start.offset()
    }

    pub fn end(&self) -> TextSize {
        self.end.offset()
    }

    pub fn range(&self) -> TextRange {
        TextRange::new(self.start(), self.end())
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn target(&self) -> Uid {
        self.target
    }

    pub fn owner(&self) -> Option<Uid> {
        self.owner
    }

    pub fn top_level_owner(&self) -> Option<Uid> {
        self.top_level_owner
    }

    /// Key for the current anchor offsets.
    pub fn key(&self) -> ReferenceKey {
        ReferenceKey::new(self.start().into(), self.end().into(), self.text.clone())
    }

    fn write(&self, out: &mut DataOutput) {
        out.write_uid(self.target);
        out.write_u32(self.start().into());
        out.write_u32(self.end().into());
        out.write_str(&self.text);
        self.kind.write(out);
        out.write_opt_uid(self.owner);
        out.write_opt_uid(self.top_level_owner);
    }

    fn read(file: Uid, anchors: &AnchorSet, input: &mut DataInput<'_>) -> Result<Self, StorageError> {
        let target = input.read_uid()?;
        let start = input.read_u32()?;
        let end = input.read_u32()?;
        if end < start {
            return Err(StorageError::InvalidHeader("reference ends before it starts"));
        }
        Ok(Self {
            file,
            target,
            start: anchors.anchor(start.into()),
            end: anchors.anchor(end.into()),
            text: input.read_str()?,
            kind: ReferenceKind::read(input)?,
            owner: input.read_opt_uid()?,
            top_level_owner: input.read_opt_uid()?,
        })
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}..{}) {:?} -> {}",
            self.text,
            u32::from(self.start()),
            u32::from(self.end()),
            self.kind,
            self.target
        )
    }
}

type ReferenceMap = BTreeMap<ReferenceKey, Arc<Reference>>;

#[derive(Debug, Default)]
struct ReferencesInner {
    references: ReferenceMap,
    type2classifier: ReferenceMap,
    /// Reverse index: target declaration -> references resolving to it.
    declarations: HashMap<Uid, ReferenceMap>,
}

impl ReferencesInner {
    /// Installs `reference` and keeps the reverse index in step. Returns the
    /// reference previously stored under `key`.
    fn install(&mut self, key: ReferenceKey, reference: Arc<Reference>) -> Option<Arc<Reference>> {
        let target = reference.target;
        let previous = self.references.insert(key.clone(), Arc::clone(&reference));
        if let Some(previous) = &previous {
            self.unlink(previous.target, &key);
        }
        self.declarations
            .entry(target)
            .or_default()
            .insert(key, reference);
        previous
    }

    fn unlink(&mut self, target: Uid, key: &ReferenceKey) {
        if let Some(references) = self.declarations.get_mut(&target) {
            references.remove(key);
            if references.is_empty() {
                self.declarations.remove(&target);
            }
        }
    }

    fn rebuild_declarations(&mut self) {
        self.declarations.clear();
        for (key, reference) in &self.references {
            self.declarations
                .entry(reference.target)
                .or_default()
                .insert(key.clone(), Arc::clone(reference));
        }
    }

    fn reverse_len(&self) -> usize {
        self.declarations.values().map(BTreeMap::len).sum()
    }

    fn published(&self) -> Vec<(Uid, ReferenceKey)> {
        self.references
            .iter()
            .map(|(key, reference)| (reference.target, key.clone()))
            .collect()
    }
}

/// The reference store of one file.
///
/// One lock guards the ordered reference map, the type-to-classifier map and
/// the reverse index, so the three are always observed in step.
pub struct FileComponentReferences {
    file: Uid,
    anchors: AnchorSet,
    /// `None` only for the shared empty stub.
    usages: Option<Arc<dyn UsageIndex>>,
    options: IndexOptions,
    inner: RwLock<ReferencesInner>,
}

impl fmt::Debug for FileComponentReferences {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("FileComponentReferences")
            .field("file", &self.file)
            .field("references", &inner.references.len())
            .field("type2classifier", &inner.type2classifier.len())
            .field("stub", &self.usages.is_none())
            .finish()
    }
}

impl FileComponentReferences {
    pub fn new(
        file: Uid,
        anchors: AnchorSet,
        usages: Arc<dyn UsageIndex>,
        options: IndexOptions,
    ) -> Self {
        Self {
            file,
            anchors,
            usages: Some(usages),
            options,
            inner: RwLock::new(ReferencesInner::default()),
        }
    }

    /// Shared component of placeholder files. Mutators are no-ops.
    pub fn empty() -> Arc<Self> {
        static EMPTY: OnceLock<Arc<FileComponentReferences>> = OnceLock::new();
        Arc::clone(EMPTY.get_or_init(|| {
            Arc::new(Self {
                file: Uid::PLACEHOLDER,
                anchors: AnchorSet::new(),
                usages: None,
                options: IndexOptions::default(),
                inner: RwLock::new(ReferencesInner::default()),
            })
        }))
    }

    pub fn is_stub(&self) -> bool {
        self.usages.is_none()
    }

    pub fn file(&self) -> Uid {
        self.file
    }

    /// Indexes a usage of `target`.
    ///
    /// Returns `false` without indexing anything when `target` is local to a
    /// function. Local owners are dropped but do not reject the reference.
    pub fn add_reference(&self, site: &ReferenceSite, target: Identity) -> bool {
        let Some(usages) = &self.usages else {
            return false;
        };
        let Some(reference) = self.make_reference(site, target) else {
            return false;
        };
        let target = reference.target;
        let key = site.key();

        // The usage index is updated under the component lock so a
        // concurrent clean or overwrite cannot interleave with it.
        let mut inner = self.inner.write();
        if let Some(previous) = inner.install(key.clone(), reference) {
            if previous.target != target {
                usages.remove(previous.target, self.file, &key);
            }
        }
        usages.put(target, self.file, &key);
        true
    }

    /// Records the classifier an expression's type resolves to.
    ///
    /// Resolved references are not reverse indexed and not published.
    pub fn add_resolved_reference(&self, site: &ReferenceSite, classifier: Identity) -> bool {
        if self.is_stub() {
            return false;
        }
        let Some(reference) = self.make_reference(site, classifier) else {
            return false;
        };
        self.inner
            .write()
            .type2classifier
            .insert(site.key(), reference);
        true
    }

    /// Removes the resolved reference with exactly `site`'s span and text.
    pub fn remove_resolved_reference(&self, site: &ReferenceSite) -> bool {
        self.inner
            .write()
            .type2classifier
            .remove(&site.key())
            .is_some()
    }

    /// The reference whose span covers `offset`.
    ///
    /// Spans within one file never overlap, so only the last reference
    /// starting at or before `offset` can match.
    pub fn reference_at(&self, offset: TextSize) -> Option<Arc<Reference>> {
        let offset = u32::from(offset);
        let inner = self.inner.read();
        let candidate = match offset.checked_add(1) {
            Some(next) => inner
                .references
                .range(..ReferenceKey::floor(next))
                .next_back(),
            None => inner.references.iter().next_back(),
        };
        let (key, reference) = candidate?;
        key.covers(offset).then(|| Arc::clone(reference))
    }

    pub fn resolved_reference(&self, site: &ReferenceSite) -> Option<Arc<Reference>> {
        self.inner.read().type2classifier.get(&site.key()).cloned()
    }

    /// All references in key order.
    pub fn references(&self) -> Vec<Arc<Reference>> {
        self.inner.read().references.values().cloned().collect()
    }

    pub fn references_where(&self, mut pred: impl FnMut(&Reference) -> bool) -> Vec<Arc<Reference>> {
        self.inner
            .read()
            .references
            .values()
            .filter(|reference| pred(reference))
            .cloned()
            .collect()
    }

    /// References resolving to any of `targets`, in key order.
    pub fn references_to(&self, targets: &[Uid]) -> Vec<Arc<Reference>> {
        let inner = self.inner.read();
        let mut found = ReferenceMap::new();
        for target in targets {
            if let Some(references) = inner.declarations.get(target) {
                found.extend(
                    references
                        .iter()
                        .map(|(key, reference)| (key.clone(), Arc::clone(reference))),
                );
            }
        }
        found.into_values().collect()
    }

    pub fn resolved_references(&self) -> Vec<Arc<Reference>> {
        self.inner.read().type2classifier.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-keys every entry from the current anchor offsets.
    pub fn rebuild_keys(&self) {
        let Some(usages) = &self.usages else {
            return;
        };
        let mut inner = self.inner.write();
        let references = std::mem::take(&mut inner.references);
        inner.references = references
            .into_values()
            .map(|reference| (reference.key(), reference))
            .collect();
        let resolved = std::mem::take(&mut inner.type2classifier);
        inner.type2classifier = resolved
            .into_values()
            .map(|reference| (reference.key(), reference))
            .collect();
        inner.rebuild_declarations();
        Self::publish_all(usages.as_ref(), self.file, &inner);
    }

    /// Drops every entry and the file's usages. Persisting the empty state is
    /// left to the owner.
    pub fn clean(&self) -> PendingWrite {
        let dropped = {
            let mut inner = self.inner.write();
            let dropped = inner.references.len() + inner.type2classifier.len();
            *inner = ReferencesInner::default();
            if let Some(usages) = &self.usages {
                usages.remove_file(self.file);
            }
            dropped
        };
        tracing::debug!(target: TRACE_TARGET, file = %self.file, dropped, "cleaned references");
        PendingWrite::new(self.file, ComponentKind::References)
    }

    /// Merges the entries of `other`, a component of the same file.
    pub fn append_from(&self, other: &FileComponentReferences) {
        let Some(usages) = &self.usages else {
            return;
        };
        debug_assert!(other.is_stub() || other.file == self.file);
        let (references, resolved) = {
            let other = other.inner.read();
            (other.references.clone(), other.type2classifier.clone())
        };

        let mut inner = self.inner.write();
        for (key, reference) in references {
            let target = reference.target;
            if let Some(previous) = inner.install(key.clone(), reference) {
                if previous.target != target {
                    usages.remove(previous.target, self.file, &key);
                }
            }
            usages.put(target, self.file, &key);
        }
        inner.type2classifier.extend(resolved);
    }

    /// Swaps in the entries of `staged`, a component of the same file that
    /// published to a private usage index, and republishes them to this
    /// component's usage index in the same critical section.
    pub(crate) fn replace_from(&self, staged: &FileComponentReferences) -> PendingWrite {
        let pending = PendingWrite::new(self.file, ComponentKind::References);
        let Some(usages) = &self.usages else {
            return pending;
        };
        debug_assert!(staged.is_stub() || staged.file == self.file);
        let mut next = ReferencesInner::default();
        {
            let staged = staged.inner.read();
            for (key, reference) in &staged.references {
                next.install(key.clone(), Arc::clone(reference));
            }
            next.type2classifier = staged.type2classifier.clone();
        }

        let mut inner = self.inner.write();
        let dropped = inner.references.len();
        *inner = next;
        Self::publish_all(usages.as_ref(), self.file, &inner);
        tracing::debug!(
            target: TRACE_TARGET,
            file = %self.file,
            dropped,
            installed = inner.references.len(),
            "replaced references"
        );
        pending
    }

    fn publish_all(usages: &dyn UsageIndex, file: Uid, inner: &ReferencesInner) {
        usages.remove_file(file);
        for (target, key) in inner.published() {
            usages.put(target, file, &key);
        }
    }

    /// Reads a component written by [`FileComponent::encode`] and publishes
    /// its references to `usages`.
    pub fn read(
        file: Uid,
        anchors: &AnchorSet,
        usages: Arc<dyn UsageIndex>,
        options: IndexOptions,
        input: &mut DataInput<'_>,
    ) -> Result<Self, StorageError> {
        let version = read_header(
            input,
            ComponentKind::References,
            OLDEST_READABLE_VERSION..=FORMAT_VERSION,
            file,
        )?;
        let mut inner = ReferencesInner {
            references: read_map(file, anchors, input)?,
            type2classifier: read_map(file, anchors, input)?,
            declarations: HashMap::new(),
        };

        if version >= 2 {
            let targets = input.read_len(9)?;
            for _ in 0..targets {
                let target = input.read_uid()?;
                let count = input.read_len(20)?;
                for _ in 0..count {
                    let key = Reference::read(file, anchors, input)?.key();
                    // Share the record installed in the forward map; entries
                    // that disagree with it are stale.
                    let Some(reference) = inner.references.get(&key) else {
                        continue;
                    };
                    if reference.target == target {
                        let reference = Arc::clone(reference);
                        inner
                            .declarations
                            .entry(target)
                            .or_default()
                            .insert(key, reference);
                    }
                }
            }
        }

        if inner.reverse_len() != inner.references.len() {
            tracing::debug!(
                target: TRACE_TARGET,
                file = %file,
                version,
                "rebuilding reverse reference index"
            );
            inner.rebuild_declarations();
        }

        for (target, key) in inner.published() {
            usages.put(target, file, &key);
        }

        Ok(Self {
            file,
            anchors: anchors.clone(),
            usages: Some(usages),
            options,
            inner: RwLock::new(inner),
        })
    }

    /// Approximate heap footprint in bytes.
    pub fn estimated_bytes(&self) -> u64 {
        use std::mem::size_of;

        let inner = self.inner.read();
        let mut bytes = 0u64;

        let entries = inner.references.len() + inner.type2classifier.len() + inner.reverse_len();
        bytes = bytes.saturating_add(
            (entries as u64)
                .saturating_mul((size_of::<ReferenceKey>() + size_of::<Arc<Reference>>()) as u64),
        );
        bytes = bytes.saturating_add(
            (inner.declarations.capacity() as u64)
                .saturating_mul((size_of::<Uid>() + size_of::<ReferenceMap>()) as u64),
        );

        // Each record is shared between the forward and reverse maps; count it once.
        for (key, reference) in inner.references.iter().chain(&inner.type2classifier) {
            // Record plus the two anchor cells.
            bytes = bytes.saturating_add((size_of::<Reference>() + 2 * size_of::<u32>()) as u64);
            if reference.text.is_heap_allocated() {
                bytes = bytes.saturating_add(reference.text.len() as u64);
            }
            if key.text.is_heap_allocated() {
                bytes = bytes.saturating_add(key.text.len() as u64);
            }
        }

        bytes
    }

    fn make_reference(&self, site: &ReferenceSite, target: Identity) -> Option<Arc<Reference>> {
        let Some(target) = target.uid() else {
            self.trace_rejected("target", site);
            return None;
        };
        let owner = self.persistent_owner(site.owner, "owner", site);
        let top_level_owner = self.persistent_owner(site.top_level_owner, "top-level owner", site);
        Some(Arc::new(Reference {
            file: self.file,
            kind: site.kind,
            start: self.anchors.anchor(site.range.start()),
            end: self.anchors.anchor(site.range.end()),
            text: site.text.clone(),
            target,
            owner,
            top_level_owner,
        }))
    }

    fn persistent_owner(
        &self,
        owner: Option<Identity>,
        what: &'static str,
        site: &ReferenceSite,
    ) -> Option<Uid> {
        match owner? {
            Identity::Persistent(uid) => Some(uid),
            Identity::Local => {
                self.trace_rejected(what, site);
                None
            }
        }
    }

    fn trace_rejected(&self, what: &'static str, site: &ReferenceSite) {
        if self.options.trace_rejected_references {
            tracing::trace!(
                target: TRACE_TARGET,
                file = %self.file,
                what,
                text = %site.text,
                start = u32::from(site.range.start()),
                "dropping function-local entity from reference"
            );
        }
    }

    /// Writes the file handle and both forward maps.
    fn write_maps(&self, inner: &ReferencesInner, out: &mut DataOutput) {
        out.write_uid(self.file);
        write_map(&inner.references, out);
        write_map(&inner.type2classifier, out);
    }
}

impl FileComponent for FileComponentReferences {
    fn kind(&self) -> ComponentKind {
        ComponentKind::References
    }

    fn file(&self) -> Uid {
        self.file
    }

    fn format_version(&self) -> u16 {
        FORMAT_VERSION
    }

    fn write(&self, out: &mut DataOutput) {
        let inner = self.inner.read();
        self.write_maps(&inner, out);

        let mut targets: Vec<_> = inner.declarations.iter().collect();
        targets.sort_unstable_by_key(|(target, _)| **target);
        out.write_len(targets.len());
        for (target, references) in targets {
            out.write_uid(*target);
            write_map(references, out);
        }
    }
}

fn write_map(map: &ReferenceMap, out: &mut DataOutput) {
    out.write_len(map.len());
    for reference in map.values() {
        reference.write(out);
    }
}

fn read_map(
    file: Uid,
    anchors: &AnchorSet,
    input: &mut DataInput<'_>,
) -> Result<ReferenceMap, StorageError> {
    // target (5) + offsets (8) + text length (4) + kind (1) + two option tags (2)
    let len = input.read_len(20)?;
    let mut map = ReferenceMap::new();
    for _ in 0..len {
        let reference = Arc::new(Reference::read(file, anchors, input)?);
        map.insert(reference.key(), reference);
    }
    Ok(map)
}
