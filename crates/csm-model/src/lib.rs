//! Model entities of the C/C++ source model that the per-file indexes store
//! or describe.

mod declaration;
mod entity;
mod identity;

pub use declaration::{
    BaseSpecifier, ClassKind, Declaration, DeclarationKind, Enumerator, Visibility,
};
pub use entity::{Include, Instantiation, Macro, ReferenceKind};
pub use identity::Identity;
