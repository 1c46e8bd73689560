use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt;

/// The category of object a [`Uid`] stands for.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum UidKind {
    File = 0,
    Declaration = 1,
    Type = 2,
    Macro = 3,
    Include = 4,
    Instantiation = 5,
    /// Persisted blob of a file's reference component.
    References = 6,
    /// Persisted blob of a file's include component.
    Includes = 7,
    /// Persisted blob of a file's macro component.
    Macros = 8,
    /// Persisted blob of a file's instantiation component.
    Instantiations = 9,
}

impl UidKind {
    #[inline]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    pub const fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => Self::File,
            1 => Self::Declaration,
            2 => Self::Type,
            3 => Self::Macro,
            4 => Self::Include,
            5 => Self::Instantiation,
            6 => Self::References,
            7 => Self::Includes,
            8 => Self::Macros,
            9 => Self::Instantiations,
            _ => return None,
        })
    }
}

/// The per-file components whose state is persisted as one blob each.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    References,
    Includes,
    Macros,
    Instantiations,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 4] = [
        ComponentKind::References,
        ComponentKind::Includes,
        ComponentKind::Macros,
        ComponentKind::Instantiations,
    ];

    pub const fn uid_kind(self) -> UidKind {
        match self {
            ComponentKind::References => UidKind::References,
            ComponentKind::Includes => UidKind::Includes,
            ComponentKind::Macros => UidKind::Macros,
            ComponentKind::Instantiations => UidKind::Instantiations,
        }
    }

    /// Tag written into the envelope of the component's persisted blob.
    pub const fn tag(self) -> u8 {
        self.uid_kind().tag()
    }
}

/// Opaque handle to an object owned by the repository.
///
/// Handles are cheap to copy and compare; the referenced object may not be
/// resident in memory and is resolved through the repository on demand.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Uid {
    kind: UidKind,
    id: u32,
}

impl Uid {
    /// Handle used by placeholder file contents that are never persisted.
    pub const PLACEHOLDER: Uid = Uid {
        kind: UidKind::File,
        id: u32::MAX,
    };

    #[inline]
    pub const fn new(kind: UidKind, id: u32) -> Self {
        Self { kind, id }
    }

    #[inline]
    pub const fn kind(self) -> UidKind {
        self.kind
    }

    #[inline]
    pub const fn id(self) -> u32 {
        self.id
    }

    #[inline]
    pub fn is_placeholder(self) -> bool {
        self == Self::PLACEHOLDER
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{}", self.kind, self.id)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Identity under which the repository mints a [`Uid`].
///
/// Putting an object under a key that is already known returns the existing
/// handle, so re-adding the same include or macro after a reparse keeps its
/// identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub kind: UidKind,
    pub scope: Option<Uid>,
    pub start: u32,
    pub name: SmolStr,
}

impl ObjectKey {
    pub fn file(path: impl Into<SmolStr>) -> Self {
        Self {
            kind: UidKind::File,
            scope: None,
            start: 0,
            name: path.into(),
        }
    }

    pub fn include(file: Uid, start: u32) -> Self {
        Self {
            kind: UidKind::Include,
            scope: Some(file),
            start,
            name: SmolStr::default(),
        }
    }

    pub fn macro_definition(file: Uid, start: u32, name: impl Into<SmolStr>) -> Self {
        Self {
            kind: UidKind::Macro,
            scope: Some(file),
            start,
            name: name.into(),
        }
    }

    pub fn instantiation(file: Uid, start: u32, text: impl Into<SmolStr>) -> Self {
        Self {
            kind: UidKind::Instantiation,
            scope: Some(file),
            start,
            name: text.into(),
        }
    }

    pub fn declaration(file: Uid, start: u32, name: impl Into<SmolStr>) -> Self {
        Self {
            kind: UidKind::Declaration,
            scope: Some(file),
            start,
            name: name.into(),
        }
    }

    pub fn component(file: Uid, component: ComponentKind) -> Self {
        Self {
            kind: component.uid_kind(),
            scope: Some(file),
            start: 0,
            name: SmolStr::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_kind_tags_round_trip() {
        for tag in 0..=9u8 {
            let kind = UidKind::from_tag(tag).expect("known tag");
            assert_eq!(kind.tag(), tag);
        }
        assert_eq!(UidKind::from_tag(10), None);
    }

    #[test]
    fn uids_order_by_kind_then_id() {
        let a = Uid::new(UidKind::File, 7);
        let b = Uid::new(UidKind::Declaration, 1);
        let c = Uid::new(UidKind::Declaration, 2);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(format!("{b}"), "Declaration#1");
    }

    #[test]
    fn component_keys_differ_per_kind() {
        let file = Uid::new(UidKind::File, 1);
        let refs = ObjectKey::component(file, ComponentKind::References);
        let macros = ObjectKey::component(file, ComponentKind::Macros);
        assert_ne!(refs, macros);
        assert_eq!(refs.kind, UidKind::References);
    }

    #[test]
    fn object_key_survives_json() {
        let key = ObjectKey::macro_definition(Uid::new(UidKind::File, 3), 12, "FOO");
        let json = serde_json::to_string(&key).unwrap();
        let decoded: ObjectKey = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, key);
    }
}
