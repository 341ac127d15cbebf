//! In-memory credential store for tests and embedding.

use std::sync::RwLock;

use crate::store::{CredentialStore, StoreError, StoreResult};
use crate::types::CredentialBundle;

/// Keeps the bundle in process memory only.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    bundle: RwLock<Option<CredentialBundle>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds a bundle.
    pub fn with_bundle(bundle: CredentialBundle) -> Self {
        Self {
            bundle: RwLock::new(Some(bundle)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> StoreResult<Option<CredentialBundle>> {
        let bundle = self.bundle.read().map_err(|_| StoreError::Poisoned)?;
        Ok(bundle.clone())
    }

    fn set(&self, bundle: &CredentialBundle) -> StoreResult<()> {
        let mut slot = self.bundle.write().map_err(|_| StoreError::Poisoned)?;
        *slot = Some(bundle.clone());
        Ok(())
    }

    fn delete(&self) -> StoreResult<()> {
        let mut slot = self.bundle.write().map_err(|_| StoreError::Poisoned)?;
        *slot = None;
        Ok(())
    }
}
