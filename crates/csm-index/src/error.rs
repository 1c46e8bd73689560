use csm_core::Uid;
use csm_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// A handle held by a component no longer resolves in the repository.
    #[error("object {0} is missing from the repository")]
    MissingObject(Uid),
}
