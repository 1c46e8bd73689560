use csm_core::{SmolStr, TextRange};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClassKind {
    Class,
    Struct,
    Union,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Visibility {
    #[default]
    Public,
    Protected,
    Private,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Protected => "protected",
            Visibility::Private => "private",
        }
    }
}

/// One entry of a class base-specifier list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BaseSpecifier {
    pub name: SmolStr,
    pub visibility: Visibility,
    pub is_virtual: bool,
    pub range: TextRange,
}

impl BaseSpecifier {
    pub fn new(name: impl Into<SmolStr>, visibility: Visibility, range: TextRange) -> Self {
        Self {
            name: name.into(),
            visibility,
            is_virtual: false,
            range,
        }
    }

    pub fn virtual_base(mut self) -> Self {
        self.is_virtual = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Enumerator {
    pub name: SmolStr,
    pub range: TextRange,
    /// Initializer text, if written.
    pub value: Option<SmolStr>,
}

impl Enumerator {
    pub fn new(name: impl Into<SmolStr>, range: TextRange) -> Self {
        Self {
            name: name.into(),
            range,
            value: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<SmolStr>) -> Self {
        self.value = Some(value.into());
        self
    }
}

/// Kind-specific payload of a [`Declaration`].
///
/// Scopes own their nested declarations, so a declaration tree can be walked
/// without resolving handles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeclarationKind {
    Namespace {
        members: Vec<Declaration>,
    },
    Class {
        class_kind: ClassKind,
        bases: Vec<BaseSpecifier>,
        members: Vec<Declaration>,
    },
    Enum {
        scoped: bool,
        enumerators: Vec<Enumerator>,
    },
    Function {
        parameters: Vec<SmolStr>,
        return_type: SmolStr,
        /// Has a body in this file.
        definition: bool,
    },
    Variable {
        type_text: SmolStr,
        /// Non-static data member.
        field: bool,
    },
    Typedef {
        target: SmolStr,
    },
    Using {
        target: SmolStr,
    },
}

/// A declaration as produced by a parse of one file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Declaration {
    pub name: SmolStr,
    pub range: TextRange,
    pub kind: DeclarationKind,
}

impl Declaration {
    pub fn new(name: impl Into<SmolStr>, range: TextRange, kind: DeclarationKind) -> Self {
        Self {
            name: name.into(),
            range,
            kind,
        }
    }

    pub fn namespace(
        name: impl Into<SmolStr>,
        range: TextRange,
        members: Vec<Declaration>,
    ) -> Self {
        Self::new(name, range, DeclarationKind::Namespace { members })
    }

    pub fn class(
        class_kind: ClassKind,
        name: impl Into<SmolStr>,
        range: TextRange,
        bases: Vec<BaseSpecifier>,
        members: Vec<Declaration>,
    ) -> Self {
        Self::new(
            name,
            range,
            DeclarationKind::Class {
                class_kind,
                bases,
                members,
            },
        )
    }

    pub fn enumeration(
        name: impl Into<SmolStr>,
        range: TextRange,
        scoped: bool,
        enumerators: Vec<Enumerator>,
    ) -> Self {
        Self::new(name, range, DeclarationKind::Enum { scoped, enumerators })
    }

    pub fn function(
        name: impl Into<SmolStr>,
        range: TextRange,
        return_type: impl Into<SmolStr>,
        parameters: impl IntoIterator<Item = impl Into<SmolStr>>,
        definition: bool,
    ) -> Self {
        Self::new(
            name,
            range,
            DeclarationKind::Function {
                parameters: parameters.into_iter().map(Into::into).collect(),
                return_type: return_type.into(),
                definition,
            },
        )
    }

    pub fn variable(
        name: impl Into<SmolStr>,
        range: TextRange,
        type_text: impl Into<SmolStr>,
    ) -> Self {
        Self::new(
            name,
            range,
            DeclarationKind::Variable {
                type_text: type_text.into(),
                field: false,
            },
        )
    }

    pub fn field(name: impl Into<SmolStr>, range: TextRange, type_text: impl Into<SmolStr>) -> Self {
        Self::new(
            name,
            range,
            DeclarationKind::Variable {
                type_text: type_text.into(),
                field: true,
            },
        )
    }

    pub fn typedef(name: impl Into<SmolStr>, range: TextRange, target: impl Into<SmolStr>) -> Self {
        Self::new(
            name,
            range,
            DeclarationKind::Typedef {
                target: target.into(),
            },
        )
    }

    pub fn using(name: impl Into<SmolStr>, range: TextRange, target: impl Into<SmolStr>) -> Self {
        Self::new(
            name,
            range,
            DeclarationKind::Using {
                target: target.into(),
            },
        )
    }

    pub fn start(&self) -> u32 {
        self.range.start().into()
    }

    /// Nested declarations of scopes; empty for everything else.
    pub fn members(&self) -> &[Declaration] {
        match &self.kind {
            DeclarationKind::Namespace { members } | DeclarationKind::Class { members, .. } => {
                members
            }
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: u32, end: u32) -> TextRange {
        TextRange::new(start.into(), end.into())
    }

    #[test]
    fn members_of_scopes() {
        let inner = Declaration::variable("x", range(20, 26), "int");
        let ns = Declaration::namespace("n", range(0, 40), vec![inner.clone()]);
        assert_eq!(ns.members(), &[inner.clone()]);
        assert!(inner.members().is_empty());
        assert_eq!(ns.start(), 0);
    }

    #[test]
    fn field_constructor_marks_field() {
        let decl = Declaration::field("len", range(4, 12), "size_t");
        assert!(matches!(
            decl.kind,
            DeclarationKind::Variable { field: true, .. }
        ));
    }
}
