use csm_core::{ComponentKind, ObjectKey, TextRange, TextSize, Uid, UidKind};
use csm_index::{FileContent, IndexOptions, ReferenceSite, ReferencesIndex, UsageIndex};
use csm_model::{Include, Instantiation, Macro, ReferenceKind};
use csm_storage::{Compression, DiskRepository, DiskRepositoryOptions, Repository};
use std::sync::Arc;

fn range(start: u32, end: u32) -> TextRange {
    TextRange::new(start.into(), end.into())
}

fn decl(id: u32) -> Uid {
    Uid::new(UidKind::Declaration, id)
}

fn open(dir: &std::path::Path) -> Arc<DiskRepository> {
    let options = DiskRepositoryOptions {
        compression: Compression::Zstd { level: 1 },
        validate_after_write: true,
    };
    Arc::new(DiskRepository::open(dir, options).unwrap())
}

fn populate(content: &FileContent) {
    content
        .includes()
        .add_include(&Include::new("vector", true, range(0, 17)), false);
    content
        .includes()
        .add_include(&Include::new("missing.h", false, range(18, 38)), true);
    content
        .macros()
        .add_macro(&Macro::function_like("SQR", range(40, 62), ["x"], "((x)*(x))"));
    content.references().add_reference(
        &ReferenceSite::new(ReferenceKind::TypeUsage, range(70, 76), "vector")
            .with_top_level_owner(decl(9)),
        decl(1).into(),
    );
    content.references().add_reference(
        &ReferenceSite::new(ReferenceKind::MacroUsage, range(80, 83), "SQR"),
        decl(2).into(),
    );
}

#[test]
fn content_survives_repository_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let file = {
        let repo = open(dir.path());
        let file = repo.put(&ObjectKey::file("main.cpp"), Vec::new());
        let content = FileContent::new(
            file,
            repo.clone(),
            Arc::new(ReferencesIndex::new()),
            IndexOptions::default(),
        );
        populate(&content);
        content.add_instantiation(&Instantiation::new(decl(3), "int", range(90, 101)));
        content.persist().unwrap();
        file
    };

    let repo = open(dir.path());
    let usages = Arc::new(ReferencesIndex::new());
    let loaded =
        FileContent::load(file, repo.clone(), usages.clone(), IndexOptions::default()).unwrap();

    let paths: Vec<_> = loaded
        .includes()
        .resolve_includes()
        .unwrap()
        .into_iter()
        .map(|include| include.spelling())
        .collect();
    assert_eq!(paths, ["<vector>", "\"missing.h\""]);
    assert_eq!(loaded.includes().broken_includes().len(), 1);
    assert_eq!(loaded.macros().resolve_macros().unwrap()[0].name, "SQR");

    let reference = loaded
        .references()
        .reference_at(TextSize::from(72u32))
        .unwrap();
    assert_eq!(reference.target(), decl(1));
    assert_eq!(reference.top_level_owner(), Some(decl(9)));
    assert_eq!(usages.files_referencing(decl(2)), vec![file]);
    assert_eq!(loaded.instantiations().len(), 1);
}

#[test]
fn reparse_commits_every_component_durably() {
    let dir = tempfile::tempdir().unwrap();
    let repo = open(dir.path());
    let file = repo.put(&ObjectKey::file("util.cpp"), Vec::new());
    let content = FileContent::new(
        file,
        repo.clone(),
        Arc::new(ReferencesIndex::new()),
        IndexOptions::default(),
    );
    populate(&content);
    let stale = content
        .add_instantiation(&Instantiation::new(decl(3), "int", range(90, 101)))
        .unwrap();
    content.persist().unwrap();

    let transient = content.transient();
    transient
        .includes()
        .add_include(&Include::new("vector", true, range(0, 17)), false);
    content.replace_with(transient).unwrap();
    assert_eq!(repo.pending_changes(), 0);
    assert!(repo.get(stale).unwrap().is_none());

    let reopened = open(dir.path());
    let loaded = FileContent::load(
        file,
        reopened,
        Arc::new(ReferencesIndex::new()),
        IndexOptions::default(),
    )
    .unwrap();
    assert_eq!(loaded.includes().len(), 1);
    assert!(!loaded.includes().has_broken_includes());
    assert!(loaded.macros().is_empty());
    assert!(loaded.references().is_empty());
    assert!(loaded.instantiations().is_empty());

    for kind in ComponentKind::ALL {
        assert!(repo.uid_of(&ObjectKey::component(file, kind)).is_some());
    }
}

#[test]
fn signature_of_loaded_content_matches_original() {
    let dir = tempfile::tempdir().unwrap();
    let repo = open(dir.path());
    let file = repo.put(&ObjectKey::file("sig.cpp"), Vec::new());
    let content = FileContent::new(
        file,
        repo.clone(),
        Arc::new(ReferencesIndex::new()),
        IndexOptions::default(),
    );
    populate(&content);
    content.persist().unwrap();

    let loaded = FileContent::load(
        file,
        repo,
        Arc::new(ReferencesIndex::new()),
        IndexOptions::default(),
    )
    .unwrap();
    let before = content.signature(&[]).unwrap();
    let after = loaded.signature(&[]).unwrap();
    assert_eq!(before.hash(), after.hash());
    assert_eq!(before.len(), 3);
}
