use csm_core::{SmolStr, Uid};
use csm_model::{ClassKind, Declaration, DeclarationKind, Include, Macro};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::fmt::Write as _;

/// Kind of a signature entry, written as a one-character code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignatureKind {
    Include,
    Macro,
    Namespace,
    Class,
    Struct,
    Union,
    Enum,
    Enumerator,
    Function,
    FunctionDefinition,
    Variable,
    Field,
    Typedef,
    Using,
    /// One base-class edge of a class.
    Inheritance,
}

impl SignatureKind {
    pub const fn code(self) -> char {
        match self {
            SignatureKind::Include => 'I',
            SignatureKind::Macro => 'M',
            SignatureKind::Namespace => 'N',
            SignatureKind::Class => 'C',
            SignatureKind::Struct => 'S',
            SignatureKind::Union => 'U',
            SignatureKind::Enum => 'E',
            SignatureKind::Enumerator => 'e',
            SignatureKind::Function => 'F',
            SignatureKind::FunctionDefinition => 'D',
            SignatureKind::Variable => 'V',
            SignatureKind::Field => 'f',
            SignatureKind::Typedef => 'T',
            SignatureKind::Using => 'u',
            SignatureKind::Inheritance => 'H',
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SignatureEntry {
    pub offset: u32,
    pub kind: SignatureKind,
    pub text: SmolStr,
}

impl SignatureEntry {
    fn new(offset: u32, kind: SignatureKind, text: impl Into<SmolStr>) -> Self {
        Self {
            offset,
            kind,
            text: text.into(),
        }
    }
}

impl Ord for SignatureEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.offset
            .cmp(&other.offset)
            .then(self.kind.code().cmp(&other.kind.code()))
            .then_with(|| self.text.cmp(&other.text))
    }
}

impl PartialOrd for SignatureEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SignatureEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} {}", self.kind.code(), self.offset, self.text)
    }
}

/// How a reparse changed a file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignatureChange {
    Same,
    /// Only this file needs re-indexing.
    FileLocalChange,
    /// Files including this one may see a different model.
    ChangeCanAffectIncludes,
}

impl SignatureChange {
    pub fn affects_includes(self) -> bool {
        self == SignatureChange::ChangeCanAffectIncludes
    }
}

/// Ordered structural digest of a file's includes, macros and declarations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileContentSignature {
    file: Uid,
    entries: Vec<SignatureEntry>,
}

impl FileContentSignature {
    pub fn build(
        file: Uid,
        includes: &[Include],
        macros: &[Macro],
        declarations: &[Declaration],
    ) -> Self {
        let mut entries = BTreeSet::new();
        for include in includes {
            entries.insert(SignatureEntry::new(
                include.range.start().into(),
                SignatureKind::Include,
                include.spelling(),
            ));
        }
        for definition in macros {
            entries.insert(SignatureEntry::new(
                definition.start(),
                SignatureKind::Macro,
                macro_text(definition),
            ));
        }
        for declaration in declarations {
            visit(declaration, &mut entries);
        }
        Self {
            file,
            entries: entries.into_iter().collect(),
        }
    }

    pub fn file(&self) -> Uid {
        self.file
    }

    pub fn entries(&self) -> &[SignatureEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 64-bit digest of the ordered entries.
    pub fn hash(&self) -> u64 {
        let mut hasher = blake3::Hasher::new();
        for entry in &self.entries {
            hasher.update(&entry.offset.to_le_bytes());
            let mut code = [0u8; 4];
            hasher.update(entry.kind.code().encode_utf8(&mut code).as_bytes());
            hasher.update(entry.text.as_bytes());
            hasher.update(&[0]);
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest.as_bytes()[..8]);
        u64::from_le_bytes(bytes)
    }

    /// Walks both signatures in lockstep. A mismatch involving an include,
    /// or an include left over on either side, can affect other files.
    pub fn compare(a: &FileContentSignature, b: &FileContentSignature) -> SignatureChange {
        let mut changed = false;
        for (left, right) in a.entries.iter().zip(&b.entries) {
            if left != right {
                if left.kind == SignatureKind::Include || right.kind == SignatureKind::Include {
                    return SignatureChange::ChangeCanAffectIncludes;
                }
                changed = true;
            }
        }

        let common = a.entries.len().min(b.entries.len());
        let tail = a.entries[common..].iter().chain(&b.entries[common..]);
        for entry in tail {
            if entry.kind == SignatureKind::Include {
                return SignatureChange::ChangeCanAffectIncludes;
            }
            changed = true;
        }

        if changed {
            SignatureChange::FileLocalChange
        } else {
            SignatureChange::Same
        }
    }

    /// Line diff for diagnostics: `- entry` only in `a`, `+ entry` only in `b`.
    pub fn test_difference(a: &FileContentSignature, b: &FileContentSignature) -> Vec<String> {
        let mut lines = Vec::new();
        let mut left = a.entries.iter().peekable();
        let mut right = b.entries.iter().peekable();
        loop {
            match (left.peek().copied(), right.peek().copied()) {
                (Some(l), Some(r)) => match l.cmp(r) {
                    Ordering::Equal => {
                        left.next();
                        right.next();
                    }
                    Ordering::Less => {
                        lines.push(format!("- {l}"));
                        left.next();
                    }
                    Ordering::Greater => {
                        lines.push(format!("+ {r}"));
                        right.next();
                    }
                },
                (Some(l), None) => {
                    lines.push(format!("- {l}"));
                    left.next();
                }
                (None, Some(r)) => {
                    lines.push(format!("+ {r}"));
                    right.next();
                }
                (None, None) => break,
            }
        }
        lines
    }
}

fn macro_text(definition: &Macro) -> String {
    let mut text = definition.name.to_string();
    if let Some(parameters) = &definition.parameters {
        let _ = write!(text, "({})", parameters.join(","));
    }
    if !definition.body.is_empty() {
        let _ = write!(text, " {}", definition.body);
    }
    text
}

fn visit(declaration: &Declaration, entries: &mut BTreeSet<SignatureEntry>) {
    let offset = declaration.start();
    let name = &declaration.name;
    match &declaration.kind {
        DeclarationKind::Namespace { members } => {
            entries.insert(SignatureEntry::new(offset, SignatureKind::Namespace, name.clone()));
            for member in members {
                visit(member, entries);
            }
        }
        DeclarationKind::Class {
            class_kind,
            bases,
            members,
        } => {
            let kind = match class_kind {
                ClassKind::Class => SignatureKind::Class,
                ClassKind::Struct => SignatureKind::Struct,
                ClassKind::Union => SignatureKind::Union,
            };
            entries.insert(SignatureEntry::new(offset, kind, name.clone()));
            for base in bases {
                let text = format!(
                    "{name}:{}{} {}",
                    if base.is_virtual { "virtual " } else { "" },
                    base.visibility.as_str(),
                    base.name
                );
                entries.insert(SignatureEntry::new(
                    base.range.start().into(),
                    SignatureKind::Inheritance,
                    text,
                ));
            }
            for member in members {
                visit(member, entries);
            }
        }
        DeclarationKind::Enum {
            scoped,
            enumerators,
        } => {
            let text = if *scoped {
                format!("class {name}")
            } else {
                name.to_string()
            };
            entries.insert(SignatureEntry::new(offset, SignatureKind::Enum, text));
            for enumerator in enumerators {
                let text = match &enumerator.value {
                    Some(value) => format!("{}={value}", enumerator.name),
                    None => enumerator.name.to_string(),
                };
                entries.insert(SignatureEntry::new(
                    enumerator.range.start().into(),
                    SignatureKind::Enumerator,
                    text,
                ));
            }
        }
        DeclarationKind::Function {
            parameters,
            return_type,
            definition,
        } => {
            let kind = if *definition {
                SignatureKind::FunctionDefinition
            } else {
                SignatureKind::Function
            };
            let text = format!("{return_type} {name}({})", parameters.join(","));
            entries.insert(SignatureEntry::new(offset, kind, text));
        }
        DeclarationKind::Variable { type_text, field } => {
            let kind = if *field {
                SignatureKind::Field
            } else {
                SignatureKind::Variable
            };
            entries.insert(SignatureEntry::new(offset, kind, format!("{type_text} {name}")));
        }
        DeclarationKind::Typedef { target } => {
            entries.insert(SignatureEntry::new(
                offset,
                SignatureKind::Typedef,
                format!("{target} {name}"),
            ));
        }
        DeclarationKind::Using { target } => {
            entries.insert(SignatureEntry::new(
                offset,
                SignatureKind::Using,
                format!("{name}={target}"),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csm_core::{TextRange, UidKind};
    use csm_model::{BaseSpecifier, Enumerator, Visibility};

    fn range(start: u32, end: u32) -> TextRange {
        TextRange::new(start.into(), end.into())
    }

    fn file() -> Uid {
        Uid::new(UidKind::File, 1)
    }

    fn codes(signature: &FileContentSignature) -> String {
        signature.entries().iter().map(|entry| entry.kind.code()).collect()
    }

    #[test]
    fn nested_declarations_are_flattened_in_offset_order() {
        let class = Declaration::class(
            ClassKind::Struct,
            "Point",
            range(20, 80),
            vec![BaseSpecifier::new("Base", Visibility::Public, range(34, 38))],
            vec![
                Declaration::field("x", range(42, 48), "int"),
                Declaration::function("len", range(50, 70), "double", ["void"], true),
            ],
        );
        let ns = Declaration::namespace("geo", range(10, 100), vec![class]);
        let color = Declaration::enumeration(
            "Color",
            range(110, 140),
            true,
            vec![
                Enumerator::new("Red", range(122, 125)),
                Enumerator::new("Blue", range(127, 135)).with_value("4"),
            ],
        );
        let include = Include::new("base.h", false, range(0, 17));
        let guard = Macro::object_like("GEO_H", range(5, 9), "");

        let signature =
            FileContentSignature::build(file(), &[include], &[guard], &[ns, color]);
        assert_eq!(codes(&signature), "IMNSHfDEee");
        assert_eq!(signature.entries()[4].text, "Point:public Base");
        assert_eq!(signature.entries()[8].text, "Red");
        assert_eq!(signature.entries()[9].text, "Blue=4");
    }

    #[test]
    fn function_like_macro_text_includes_parameters() {
        let m = Macro::function_like("MAX", range(0, 30), ["a", "b"], "((a)>(b)?(a):(b))");
        assert_eq!(macro_text(&m), "MAX(a,b) ((a)>(b)?(a):(b))");
    }

    #[test]
    fn hash_tracks_content() {
        let a = FileContentSignature::build(
            file(),
            &[],
            &[],
            &[Declaration::variable("x", range(0, 5), "int")],
        );
        let b = FileContentSignature::build(
            file(),
            &[],
            &[],
            &[Declaration::variable("y", range(0, 5), "int")],
        );
        assert_eq!(a.hash(), a.clone().hash());
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn trailing_declaration_is_local_change() {
        let include = Include::new("a.h", false, range(0, 12));
        let foo = Declaration::function("foo", range(20, 30), "void", ["int"], false);
        let bar = Declaration::variable("bar", range(40, 50), "int");
        let a = FileContentSignature::build(file(), &[include.clone()], &[], &[foo.clone()]);
        let b = FileContentSignature::build(file(), &[include], &[], &[foo, bar]);

        assert_eq!(
            FileContentSignature::compare(&a, &b),
            SignatureChange::FileLocalChange
        );
        assert_eq!(
            FileContentSignature::test_difference(&a, &b),
            vec!["+ V@40 int bar".to_string()]
        );
    }
}
