//! Store trait for credential persistence.

use thiserror::Error;

use crate::types::CredentialBundle;

/// Error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistent slot for one [`CredentialBundle`].
pub trait CredentialStore: Send + Sync {
    /// Load the stored bundle, if any.
    fn get(&self) -> StoreResult<Option<CredentialBundle>>;

    /// Replace the stored bundle.
    fn set(&self, bundle: &CredentialBundle) -> StoreResult<()>;

    /// Remove the stored bundle. Removing an empty slot is not an error.
    fn delete(&self) -> StoreResult<()>;
}
