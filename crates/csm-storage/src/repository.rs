use csm_core::{ObjectKey, Uid, CSM_VERSION};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::codec::{DataInput, DataOutput, Persistent};
use crate::error::StorageError;

/// Durable, possibly paging object store addressed by [`Uid`].
///
/// `put` is infallible: implementations that write to disk buffer the bytes
/// and surface I/O failures from [`Repository::flush`] or [`Repository::get`].
pub trait Repository: Send + Sync + fmt::Debug {
    /// Stores `bytes` under `key`, minting a handle the first time the key is seen.
    fn put(&self, key: &ObjectKey, bytes: Vec<u8>) -> Uid;

    fn get(&self, uid: Uid) -> Result<Option<Arc<[u8]>>, StorageError>;

    /// Forgets `uid` and its key. Unknown handles are ignored.
    fn remove(&self, uid: Uid);

    fn uid_of(&self, key: &ObjectKey) -> Option<Uid>;

    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Typed access to [`Persistent`] values stored in a [`Repository`].
pub trait RepositoryExt: Repository {
    fn put_object<T: Persistent>(&self, key: &ObjectKey, value: &T) -> Uid {
        let mut out = DataOutput::new();
        value.write(&mut out);
        self.put(key, out.into_vec())
    }

    fn get_object<T: Persistent>(&self, uid: Uid) -> Result<Option<T>, StorageError> {
        let Some(bytes) = self.get(uid)? else {
            return Ok(None);
        };
        let mut input = DataInput::new(&bytes);
        T::read(&mut input).map(Some)
    }
}

impl<R: Repository + ?Sized> RepositoryExt for R {}

/// Bidirectional `ObjectKey` ↔ `Uid` table shared by the repository backends.
#[derive(Debug, Default)]
pub struct KeyTable {
    next_id: u32,
    by_key: HashMap<ObjectKey, Uid>,
    by_uid: HashMap<Uid, ObjectKey>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct KeyTableSnapshot {
    pub csm_version: String,
    pub next_id: u32,
    pub entries: Vec<(ObjectKey, Uid)>,
}

impl KeyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mint(&mut self, key: &ObjectKey) -> Uid {
        if let Some(uid) = self.by_key.get(key) {
            return *uid;
        }
        debug_assert!(self.next_id < u32::MAX, "repository handle space exhausted");
        let uid = Uid::new(key.kind, self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        self.by_key.insert(key.clone(), uid);
        self.by_uid.insert(uid, key.clone());
        uid
    }

    pub fn get(&self, key: &ObjectKey) -> Option<Uid> {
        self.by_key.get(key).copied()
    }

    pub fn key_of(&self, uid: Uid) -> Option<&ObjectKey> {
        self.by_uid.get(&uid)
    }

    pub fn release(&mut self, uid: Uid) -> Option<ObjectKey> {
        let key = self.by_uid.remove(&uid)?;
        self.by_key.remove(&key);
        Some(key)
    }

    pub fn contains(&self, uid: Uid) -> bool {
        self.by_uid.contains_key(&uid)
    }

    pub fn len(&self) -> usize {
        self.by_uid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_uid.is_empty()
    }

    pub(crate) fn snapshot(&self) -> KeyTableSnapshot {
        let mut entries: Vec<(ObjectKey, Uid)> = self
            .by_key
            .iter()
            .map(|(key, uid)| (key.clone(), *uid))
            .collect();
        // Keep the persisted table stable across runs.
        entries.sort_by_key(|(_, uid)| *uid);
        KeyTableSnapshot {
            csm_version: CSM_VERSION.to_string(),
            next_id: self.next_id,
            entries,
        }
    }

    pub(crate) fn from_snapshot(snapshot: KeyTableSnapshot) -> Self {
        let mut table = Self {
            next_id: snapshot.next_id,
            ..Self::default()
        };
        for (key, uid) in snapshot.entries {
            table.next_id = table.next_id.max(uid.id().saturating_add(1));
            table.by_key.insert(key.clone(), uid);
            table.by_uid.insert(uid, key);
        }
        table
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    keys: KeyTable,
    objects: HashMap<Uid, Arc<[u8]>>,
}

/// Repository keeping every object in memory.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    inner: RwLock<MemoryInner>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, uid: Uid) -> bool {
        self.inner.read().objects.contains_key(&uid)
    }
}

impl Repository for MemoryRepository {
    fn put(&self, key: &ObjectKey, bytes: Vec<u8>) -> Uid {
        let mut inner = self.inner.write();
        let uid = inner.keys.mint(key);
        inner.objects.insert(uid, Arc::from(bytes));
        uid
    }

    fn get(&self, uid: Uid) -> Result<Option<Arc<[u8]>>, StorageError> {
        Ok(self.inner.read().objects.get(&uid).cloned())
    }

    fn remove(&self, uid: Uid) {
        let mut inner = self.inner.write();
        inner.keys.release(uid);
        inner.objects.remove(&uid);
    }

    fn uid_of(&self, key: &ObjectKey) -> Option<Uid> {
        self.inner.read().keys.get(key)
    }
}
