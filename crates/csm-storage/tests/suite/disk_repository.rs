use csm_core::{ComponentKind, ObjectKey, Uid, UidKind};
use csm_storage::{
    Compression, DiskRepository, DiskRepositoryOptions, Repository, StorageError,
};

fn file_uid() -> Uid {
    Uid::new(UidKind::File, 1)
}

#[test]
fn flushed_objects_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let key = ObjectKey::component(file_uid(), ComponentKind::Macros);

    let uid = {
        let repo = DiskRepository::open(dir.path(), DiskRepositoryOptions::default()).unwrap();
        let uid = repo.put(&key, b"macros".to_vec());
        assert_eq!(repo.pending_changes(), 1);
        repo.flush().unwrap();
        assert_eq!(repo.pending_changes(), 0);
        uid
    };

    let reopened = DiskRepository::open(dir.path(), DiskRepositoryOptions::default()).unwrap();
    assert_eq!(reopened.uid_of(&key), Some(uid));
    assert_eq!(&*reopened.get(uid).unwrap().unwrap(), b"macros");
}

#[test]
fn unflushed_objects_are_readable_but_not_durable() {
    let dir = tempfile::tempdir().unwrap();
    let key = ObjectKey::include(file_uid(), 0);

    {
        let repo = DiskRepository::open(dir.path(), DiskRepositoryOptions::default()).unwrap();
        let uid = repo.put(&key, vec![1, 2, 3]);
        assert_eq!(&*repo.get(uid).unwrap().unwrap(), &[1, 2, 3]);
    }

    let reopened = DiskRepository::open(dir.path(), DiskRepositoryOptions::default()).unwrap();
    assert_eq!(reopened.uid_of(&key), None);
}

#[test]
fn removal_deletes_blob_and_key_on_flush() {
    let dir = tempfile::tempdir().unwrap();
    let options = DiskRepositoryOptions {
        compression: Compression::Zstd { level: 1 },
        validate_after_write: true,
    };
    let repo = DiskRepository::open(dir.path(), options).unwrap();
    let key = ObjectKey::macro_definition(file_uid(), 4, "FOO");
    let uid = repo.put(&key, b"#define FOO".to_vec());
    repo.flush().unwrap();

    repo.remove(uid);
    assert!(repo.get(uid).unwrap().is_none());
    repo.flush().unwrap();

    let reopened = DiskRepository::open(dir.path(), options).unwrap();
    assert_eq!(reopened.uid_of(&key), None);
    assert!(reopened.get(uid).unwrap().is_none());
}

#[test]
fn corrupted_blob_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let repo = DiskRepository::open(dir.path(), DiskRepositoryOptions::default()).unwrap();
    let uid = repo.put(&ObjectKey::file("a.cpp"), b"int main() {}".to_vec());
    repo.flush().unwrap();

    let blob = dir
        .path()
        .join("objects")
        .join(UidKind::File.tag().to_string())
        .join(format!("{}.blob", uid.id()));
    let mut bytes = std::fs::read(&blob).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x20;
    std::fs::write(&blob, bytes).unwrap();

    match repo.get(uid).unwrap_err() {
        StorageError::HashMismatch { .. } => {}
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn corrupt_key_table_fails_to_open() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("keys.json"), "{\"csm_version\": 1").unwrap();

    match DiskRepository::open(dir.path(), DiskRepositoryOptions::default()).unwrap_err() {
        StorageError::Json { message } => assert!(message.contains("line")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn objects_stay_readable_while_a_flush_is_writing() {
    let dir = tempfile::tempdir().unwrap();
    let repo = DiskRepository::open(dir.path(), DiskRepositoryOptions::default()).unwrap();

    std::thread::scope(|scope| {
        scope.spawn(|| {
            for _ in 0..50 {
                repo.flush().unwrap();
            }
        });
        scope.spawn(|| {
            for start in 0..400u32 {
                let payload = start.to_be_bytes().to_vec();
                let uid = repo.put(&ObjectKey::include(file_uid(), start), payload.clone());
                let read = repo.get(uid).unwrap();
                assert_eq!(read.as_deref(), Some(&payload[..]), "include at {start}");
            }
        });
    });

    repo.flush().unwrap();
    assert_eq!(repo.pending_changes(), 0);
}

#[test]
fn put_during_flush_keeps_newest_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let repo = DiskRepository::open(dir.path(), DiskRepositoryOptions::default()).unwrap();
    let key = ObjectKey::include(file_uid(), 0);

    std::thread::scope(|scope| {
        scope.spawn(|| {
            for _ in 0..50 {
                repo.flush().unwrap();
            }
        });
        scope.spawn(|| {
            for round in 0..400u32 {
                let uid = repo.put(&key, round.to_be_bytes().to_vec());
                let read = repo.get(uid).unwrap().unwrap();
                assert!(u32::from_be_bytes(read[..4].try_into().unwrap()) >= round);
            }
        });
    });

    repo.flush().unwrap();
    let reopened = DiskRepository::open(dir.path(), DiskRepositoryOptions::default()).unwrap();
    let uid = reopened.uid_of(&key).unwrap();
    assert_eq!(&*reopened.get(uid).unwrap().unwrap(), &399u32.to_be_bytes());
}
