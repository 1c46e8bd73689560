//! Per-file cross-reference index of the C/C++ source model.
//!
//! Every source file owns four components, each guarded by its own lock:
//!
//! - [`FileComponentReferences`]: offset-ordered identifier references with a
//!   reverse index from declaration to references,
//! - [`FileComponentIncludes`]: `#include` directives and the broken subset,
//! - [`FileComponentMacros`]: macro definitions ordered by name,
//! - [`FileComponentInstantiations`]: template instantiations tagged with the
//!   content generation that produced them.
//!
//! [`FileContent`] owns the components of one file and batches the durable
//! write after a clean or a reparse. [`FileContentSignature`] classifies how a
//! reparse changed a file.

mod component;
mod content;
mod error;
mod includes;
mod instantiations;
mod macros;
mod references;
mod signature;
mod usages;

pub use component::{FileComponent, PendingWrite};
pub use content::{CleanBatch, FileContent};
pub use error::IndexError;
pub use includes::FileComponentIncludes;
pub use instantiations::FileComponentInstantiations;
pub use macros::FileComponentMacros;
pub use references::{FileComponentReferences, Reference, ReferenceKey, ReferenceSite};
pub use signature::{FileContentSignature, SignatureChange, SignatureEntry, SignatureKind};
pub use usages::{ReferencesIndex, UsageIndex};

/// Tracing target for index diagnostics.
pub(crate) const TRACE_TARGET: &str = "csm.index";

/// Behavioural switches of the index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IndexOptions {
    /// Log references dropped because their target or owner is function-local.
    pub trace_rejected_references: bool,
}
