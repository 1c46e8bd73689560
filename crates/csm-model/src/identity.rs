use csm_core::Uid;

/// How an entity can be referred to from outside the scope it lives in.
///
/// Block-local variables, parameters and similar function-local entities are
/// not persisted and have no repository handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Identity {
    Persistent(Uid),
    Local,
}

impl Identity {
    #[inline]
    pub fn uid(self) -> Option<Uid> {
        match self {
            Identity::Persistent(uid) => Some(uid),
            Identity::Local => None,
        }
    }

    #[inline]
    pub fn is_persistent(self) -> bool {
        matches!(self, Identity::Persistent(_))
    }
}

impl From<Uid> for Identity {
    fn from(uid: Uid) -> Self {
        Identity::Persistent(uid)
    }
}
