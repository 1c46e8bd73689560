use csm_core::{ComponentKind, ObjectKey, Uid};
use csm_storage::{read_envelope, write_envelope, DataInput, DataOutput, Repository, StorageError};

/// A per-file component that persists as one versioned blob.
pub trait FileComponent: Send + Sync {
    fn kind(&self) -> ComponentKind;

    fn file(&self) -> Uid;

    /// Format version written into the envelope.
    fn format_version(&self) -> u16;

    /// Writes the payload that follows the envelope.
    fn write(&self, out: &mut DataOutput);

    fn encode(&self) -> Vec<u8> {
        let mut out = DataOutput::new();
        write_envelope(&mut out, self.kind().tag(), self.format_version());
        self.write(&mut out);
        out.into_vec()
    }
}

/// The durable write still owed after a component was cleaned.
///
/// Cleaning only resets in-memory state; the owner publishes the new state by
/// committing the token, usually for several components at once.
#[must_use = "a cleaned component is not persisted until its pending write is committed"]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingWrite {
    kind: ComponentKind,
    key: ObjectKey,
}

impl PendingWrite {
    pub(crate) fn new(file: Uid, kind: ComponentKind) -> Self {
        Self {
            kind,
            key: ObjectKey::component(file, kind),
        }
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    /// Stores the current state of `component` under the pending key.
    pub fn commit(self, component: &dyn FileComponent, repository: &dyn Repository) -> Uid {
        debug_assert_eq!(component.kind(), self.kind, "pending write committed to wrong component");
        debug_assert_eq!(
            Some(component.file()),
            self.key.scope,
            "pending write committed for another file"
        );
        repository.put(&self.key, component.encode())
    }
}

/// Reads the envelope and the owning file of a component blob.
pub(crate) fn read_header(
    input: &mut DataInput<'_>,
    kind: ComponentKind,
    versions: std::ops::RangeInclusive<u16>,
    file: Uid,
) -> Result<u16, StorageError> {
    let version = read_envelope(input, kind.tag(), versions)?;
    if input.read_uid()? != file {
        return Err(StorageError::InvalidHeader("component belongs to another file"));
    }
    Ok(version)
}
