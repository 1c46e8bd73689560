use csm_config::{ConfigError, CsmConfig};
use csm_core::ObjectKey;
use std::path::Path;

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("csm.toml");
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn missing_file_reports_its_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    let err = CsmConfig::load_from_path(&path).unwrap_err();
    match err {
        ConfigError::Io { path: reported, source } => {
            assert_eq!(reported, path.display().to_string());
            assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn configured_directory_opens_a_disk_repository() {
    let dir = tempfile::tempdir().unwrap();
    let repo_dir = dir.path().join("repo");
    let body = format!(
        "[storage]\ndir = {:?}\ncompression = \"zstd\"\nzstd_level = 1\n",
        repo_dir.display().to_string()
    );
    let config = CsmConfig::load_from_path(write_config(dir.path(), &body)).unwrap();

    let key = ObjectKey::file("main.cpp");
    let uid = {
        let repo = config.storage.open_repository().unwrap();
        let uid = repo.put(&key, b"payload".to_vec());
        repo.flush().unwrap();
        uid
    };
    assert!(repo_dir.is_dir());

    let reopened = config.storage.open_repository().unwrap();
    assert_eq!(reopened.uid_of(&key), Some(uid));
    assert_eq!(reopened.get(uid).unwrap().as_deref(), Some(&b"payload"[..]));
}

#[test]
fn absent_directory_stays_in_memory() {
    let config = CsmConfig::load_from_str("[logging]\nlevel = \"debug\"\n").unwrap();
    let repo = config.storage.open_repository().unwrap();
    let uid = repo.put(&ObjectKey::file("a.h"), b"x".to_vec());
    assert_eq!(repo.get(uid).unwrap().as_deref(), Some(&b"x"[..]));
}
