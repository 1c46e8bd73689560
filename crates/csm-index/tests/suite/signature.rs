use csm_core::{TextRange, Uid, UidKind};
use csm_index::{FileContentSignature, SignatureChange};
use csm_model::{Declaration, Include, Macro};

fn range(start: u32, end: u32) -> TextRange {
    TextRange::new(start.into(), end.into())
}

fn file() -> Uid {
    Uid::new(UidKind::File, 3)
}

fn header() -> Include {
    Include::new("header.h", false, range(0, 19))
}

fn signature(includes: &[Include], second: &str) -> FileContentSignature {
    let declarations = [
        Declaration::function("foo", range(10, 30), "int", ["int"], true),
        Declaration::variable(second, range(50, 60), "int"),
    ];
    FileContentSignature::build(file(), includes, &[], &declarations)
}

#[test]
fn unchanged_file_is_same() {
    let a = signature(&[header()], "bar");
    let b = signature(&[header()], "bar");
    assert_eq!(FileContentSignature::compare(&a, &b), SignatureChange::Same);
    assert_eq!(a.hash(), b.hash());
    assert!(FileContentSignature::test_difference(&a, &b).is_empty());
}

#[test]
fn renamed_declaration_is_local_change() {
    let a = signature(&[header()], "bar");
    let b = signature(&[header()], "baz");
    let change = FileContentSignature::compare(&a, &b);
    assert_eq!(change, SignatureChange::FileLocalChange);
    assert!(!change.affects_includes());
    assert_eq!(
        FileContentSignature::test_difference(&a, &b),
        ["- V@50 int bar", "+ V@50 int baz"]
    );
}

#[test]
fn removed_include_can_affect_includes() {
    let a = signature(&[header()], "bar");
    let b = signature(&[], "bar");
    let change = FileContentSignature::compare(&a, &b);
    assert_eq!(change, SignatureChange::ChangeCanAffectIncludes);
    assert!(change.affects_includes());
    assert_ne!(a.hash(), b.hash());
}

#[test]
fn trailing_include_can_affect_includes() {
    let late = Include::new("late.h", true, range(100, 117));
    let a = signature(&[header()], "bar");
    let b = signature(&[header(), late], "bar");
    assert_eq!(
        FileContentSignature::compare(&a, &b),
        SignatureChange::ChangeCanAffectIncludes
    );
}

#[test]
fn changed_macro_body_is_local_change() {
    let declarations = [Declaration::variable("x", range(40, 45), "int")];
    let a = FileContentSignature::build(
        file(),
        &[header()],
        &[Macro::object_like("LIMIT", range(20, 36), "10")],
        &declarations,
    );
    let b = FileContentSignature::build(
        file(),
        &[header()],
        &[Macro::object_like("LIMIT", range(20, 36), "20")],
        &declarations,
    );
    assert_eq!(
        FileContentSignature::compare(&a, &b),
        SignatureChange::FileLocalChange
    );
}
