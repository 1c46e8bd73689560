//! Core shared types for the C/C++ source model index.
//!
//! This crate is intentionally small: repository handles, object keys, and
//! the text position primitives every other crate builds on.

mod anchor;
mod uid;

pub use anchor::{Anchor, AnchorSet};
pub use smol_str::SmolStr;
pub use text_size::{TextRange, TextSize};
pub use uid::{ComponentKind, ObjectKey, Uid, UidKind};

/// Version of the CSM crates, recorded alongside persisted key tables.
pub const CSM_VERSION: &str = env!("CARGO_PKG_VERSION");
