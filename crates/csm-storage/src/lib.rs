//! Persistence layer of the C/C++ source model.
//!
//! ## Object repository
//! Every include, macro, instantiation and per-file component blob is stored in
//! a [`Repository`] under an [`csm_core::ObjectKey`]. The repository mints one
//! [`csm_core::Uid`] per key and resolves handles back to their bytes on demand.
//!
//! ## Binary layout
//! Objects are written with [`DataOutput`] and read back with [`DataInput`]:
//! big-endian integers, `u32`-length-prefixed UTF-8 strings and tagged handles.
//! Readers consume fields in exactly the order writers produced them.
//!
//! ## Versioning
//! Component blobs start with an envelope (magic, component tag, format
//! version). Readers reject versions they do not understand so the owner can
//! drop the blob and rebuild it from source.

mod codec;
mod disk;
mod envelope;
mod error;
mod repository;

pub use codec::{DataInput, DataOutput, Persistent};
pub use disk::{Compression, DiskRepository, DiskRepositoryOptions};
pub use envelope::{read_envelope, write_envelope, ENVELOPE_LEN, MAGIC};
pub use error::StorageError;
pub use repository::{KeyTable, MemoryRepository, Repository, RepositoryExt};
