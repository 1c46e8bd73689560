use byteorder::{ByteOrder, LittleEndian};
use csm_core::{ObjectKey, Uid, CSM_VERSION};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::codec::{DataInput, DataOutput};
use crate::error::StorageError;
use crate::repository::{KeyTable, KeyTableSnapshot, Repository};

const KEY_TABLE_FILE: &str = "keys.json";
const OBJECTS_DIR: &str = "objects";
/// Safety cap for `keys.json`. Larger tables are treated as corruption.
const MAX_KEY_TABLE_BYTES: u64 = 256 * 1024 * 1024;

const BLOB_MAGIC: [u8; 4] = *b"CSMB";
/// Magic + compression tag + uncompressed length + content hash.
const BLOB_HEADER_LEN: usize = 4 + 1 + 8 + 8;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Zstd {
        level: i32,
    },
}

impl Compression {
    fn tag(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Zstd { .. } => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiskRepositoryOptions {
    pub compression: Compression,
    /// When enabled, re-reads every blob after writing it and verifies its
    /// length and content hash.
    pub validate_after_write: bool,
}

#[derive(Debug, Default)]
struct DiskState {
    keys: KeyTable,
    dirty: HashMap<Uid, Arc<[u8]>>,
    removed: HashSet<Uid>,
    keys_dirty: bool,
}

/// Repository storing one blob file per handle under a root directory.
///
/// Writes are buffered until [`Repository::flush`]; reads of flushed objects
/// go to disk, so only dirty objects stay resident.
#[derive(Debug)]
pub struct DiskRepository {
    root: PathBuf,
    options: DiskRepositoryOptions,
    state: Mutex<DiskState>,
}

impl DiskRepository {
    pub fn open(
        root: impl Into<PathBuf>,
        options: DiskRepositoryOptions,
    ) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(root.join(OBJECTS_DIR))?;
        let keys = load_key_table(&root)?;
        tracing::debug!(
            target: "csm.storage",
            root = %root.display(),
            objects = keys.len(),
            "opened disk repository"
        );
        Ok(Self {
            root,
            options,
            state: Mutex::new(DiskState {
                keys,
                ..DiskState::default()
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of objects written or removed since the last flush.
    pub fn pending_changes(&self) -> usize {
        let state = self.state.lock();
        state.dirty.len() + state.removed.len()
    }

    fn blob_path(&self, uid: Uid) -> PathBuf {
        self.root
            .join(OBJECTS_DIR)
            .join(uid.kind().tag().to_string())
            .join(format!("{}.blob", uid.id()))
    }
}

impl Repository for DiskRepository {
    fn put(&self, key: &ObjectKey, bytes: Vec<u8>) -> Uid {
        let mut state = self.state.lock();
        let uid = state.keys.mint(key);
        state.removed.remove(&uid);
        state.dirty.insert(uid, Arc::from(bytes));
        state.keys_dirty = true;
        uid
    }

    fn get(&self, uid: Uid) -> Result<Option<Arc<[u8]>>, StorageError> {
        {
            let state = self.state.lock();
            if let Some(bytes) = state.dirty.get(&uid) {
                return Ok(Some(bytes.clone()));
            }
            if state.removed.contains(&uid) || !state.keys.contains(uid) {
                return Ok(None);
            }
        }
        read_blob(&self.blob_path(uid))
    }

    fn remove(&self, uid: Uid) {
        let mut state = self.state.lock();
        if state.keys.release(uid).is_some() {
            state.keys_dirty = true;
        }
        state.dirty.remove(&uid);
        state.removed.insert(uid);
    }

    fn uid_of(&self, key: &ObjectKey) -> Option<Uid> {
        self.state.lock().keys.get(key)
    }

    fn flush(&self) -> Result<(), StorageError> {
        // Entries stay buffered until their blob is on disk so concurrent
        // readers never fall through to a missing or stale file.
        let (dirty, removed, snapshot) = {
            let mut state = self.state.lock();
            let snapshot = state.keys_dirty.then(|| state.keys.snapshot());
            state.keys_dirty = false;
            (state.dirty.clone(), state.removed.clone(), snapshot)
        };

        let result = self.flush_changes(&dirty, &removed, snapshot.as_ref());
        let mut state = self.state.lock();
        match &result {
            Ok(()) => {
                for (uid, bytes) in &dirty {
                    // A `put` since the snapshot replaced the bytes; keep it.
                    if state
                        .dirty
                        .get(uid)
                        .is_some_and(|current| Arc::ptr_eq(current, bytes))
                    {
                        state.dirty.remove(uid);
                    }
                }
                for uid in &removed {
                    state.removed.remove(uid);
                }
            }
            Err(err) => {
                tracing::warn!(
                    target: "csm.storage",
                    root = %self.root.display(),
                    error = %err,
                    "repository flush failed; keeping changes buffered"
                );
                state.keys_dirty = true;
            }
        }
        result
    }
}

impl DiskRepository {
    fn flush_changes(
        &self,
        dirty: &HashMap<Uid, Arc<[u8]>>,
        removed: &HashSet<Uid>,
        snapshot: Option<&KeyTableSnapshot>,
    ) -> Result<(), StorageError> {
        for (uid, bytes) in dirty {
            write_blob(&self.blob_path(*uid), bytes, self.options)?;
        }
        for uid in removed {
            match fs::remove_file(self.blob_path(*uid)) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        if let Some(snapshot) = snapshot {
            let json = serde_json::to_vec(snapshot)?;
            atomic_write(&self.root.join(KEY_TABLE_FILE), &[&json])?;
        }
        tracing::debug!(
            target: "csm.storage",
            written = dirty.len(),
            removed = removed.len(),
            "flushed repository"
        );
        Ok(())
    }
}

fn load_key_table(root: &Path) -> Result<KeyTable, StorageError> {
    let path = root.join(KEY_TABLE_FILE);
    let file = match fs::File::open(&path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(KeyTable::new()),
        Err(err) => return Err(err.into()),
    };
    let len = file.metadata()?.len();
    if len > MAX_KEY_TABLE_BYTES {
        return Err(io::Error::other(format!(
            "key table too large: {len} bytes (limit {MAX_KEY_TABLE_BYTES} bytes)"
        ))
        .into());
    }
    let snapshot: KeyTableSnapshot = serde_json::from_reader(io::BufReader::new(file))?;
    if snapshot.csm_version != CSM_VERSION {
        tracing::debug!(
            target: "csm.storage",
            found = %snapshot.csm_version,
            expected = CSM_VERSION,
            "key table written by another version"
        );
    }
    Ok(KeyTable::from_snapshot(snapshot))
}

fn write_blob(
    path: &Path,
    payload: &[u8],
    options: DiskRepositoryOptions,
) -> Result<(), StorageError> {
    let body = match options.compression {
        Compression::None => None,
        Compression::Zstd { level } => Some(
            zstd::stream::encode_all(payload, level)
                .map_err(|e| StorageError::Decompression(e.to_string()))?,
        ),
    };

    let mut header = DataOutput::new();
    header.write_bytes(&BLOB_MAGIC);
    header.write_u8(options.compression.tag());
    header.write_u64(payload.len() as u64);
    header.write_u64(content_hash(payload));
    let header = header.into_vec();
    debug_assert_eq!(header.len(), BLOB_HEADER_LEN);

    atomic_write(path, &[&header, body.as_deref().unwrap_or(payload)])?;

    if options.validate_after_write {
        let bytes = fs::read(path)?;
        let decoded = decode_blob(&bytes)?;
        if decoded.len() != payload.len() {
            return Err(StorageError::InvalidHeader("blob length mismatch after write"));
        }
    }
    Ok(())
}

fn read_blob(path: &Path) -> Result<Option<Arc<[u8]>>, StorageError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    Ok(Some(Arc::from(decode_blob(&bytes)?)))
}

fn decode_blob(bytes: &[u8]) -> Result<Vec<u8>, StorageError> {
    let mut input = DataInput::new(bytes);
    if input.read_bytes(BLOB_MAGIC.len())? != &BLOB_MAGIC[..] {
        return Err(StorageError::InvalidHeader("bad blob magic"));
    }
    let compression = input.read_u8()?;
    let uncompressed_len = input.read_u64()?;
    let expected = input.read_u64()?;
    let body = input.read_bytes(input.remaining())?;

    let payload = match compression {
        0 => body.to_vec(),
        1 => zstd::stream::decode_all(body)
            .map_err(|e| StorageError::Decompression(e.to_string()))?,
        tag => {
            return Err(StorageError::InvalidTag {
                what: "compression",
                tag,
            })
        }
    };
    if payload.len() as u64 != uncompressed_len {
        return Err(StorageError::InvalidHeader("uncompressed length mismatch"));
    }
    let found = content_hash(&payload);
    if found != expected {
        return Err(StorageError::HashMismatch { expected, found });
    }
    Ok(payload)
}

fn content_hash(payload: &[u8]) -> u64 {
    let hash = blake3::hash(payload);
    LittleEndian::read_u64(&hash.as_bytes()[..8])
}

fn atomic_write(dest: &Path, chunks: &[&[u8]]) -> io::Result<()> {
    let parent = dest
        .parent()
        .ok_or_else(|| io::Error::other("destination path has no parent directory"))?;
    fs::create_dir_all(parent)?;

    let (tmp_path, mut file) = open_unique_tmp_file(dest, parent)?;
    let result = (|| -> io::Result<()> {
        for chunk in chunks {
            file.write_all(chunk)?;
        }
        file.sync_all()?;
        drop(file);
        rename_overwrite(&tmp_path, dest)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

fn rename_overwrite(tmp_path: &Path, dest: &Path) -> io::Result<()> {
    const MAX_RENAME_ATTEMPTS: usize = 1024;
    let mut attempts = 0usize;

    loop {
        match fs::rename(tmp_path, dest) {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists || dest.exists() => {
                // On Windows `rename` does not overwrite; retry until we win.
                let _ = fs::remove_file(dest);
                attempts += 1;
                if attempts >= MAX_RENAME_ATTEMPTS {
                    return Err(err);
                }
            }
            Err(err) => return Err(err),
        }
    }
}

fn open_unique_tmp_file(dest: &Path, parent: &Path) -> io::Result<(PathBuf, fs::File)> {
    let file_name = dest
        .file_name()
        .ok_or_else(|| io::Error::other("destination path has no file name"))?;
    let pid = std::process::id();

    loop {
        let counter = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(format!(".tmp.{pid}.{counter}"));
        let tmp_path = parent.join(tmp_name);

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
        {
            Ok(file) => return Ok((tmp_path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
}
