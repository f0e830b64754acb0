//! In-memory credential storage implementation.

use async_trait::async_trait;
use std::sync::RwLock;

use super::{CredentialStore, StoreError};
use crate::model::{CredentialRecord, StoreKey};

/// In-memory credential store for testing and development.
///
/// This store is not persistent; data is lost when the process exits.
///
/// # Thread Safety
///
/// This implementation uses interior mutability via `RwLock` and is
/// safe to share across threads.
pub struct MemoryStore {
    data: RwLock<CredentialRecord>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(CredentialRecord::new()),
        }
    }

    /// Create a memory store with initial data.
    pub fn with_record(record: CredentialRecord) -> Self {
        Self {
            data: RwLock::new(record),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .data
            .read()
            .map(|d| StoreKey::ALL.iter().filter(|k| d.contains(**k)).count())
            .unwrap_or(0);
        f.debug_struct("MemoryStore")
            .field("keys_count", &count)
            .finish()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, keys: &[StoreKey]) -> Result<CredentialRecord, StoreError> {
        let data = self.data.read().map_err(|e| StoreError::BackendError {
            message: format!("lock poisoned: {}", e),
        })?;
        Ok(data.project(keys))
    }

    async fn set(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        let mut data = self.data.write().map_err(|e| StoreError::BackendError {
            message: format!("lock poisoned: {}", e),
        })?;
        data.merge(record);
        Ok(())
    }

    async fn remove(&self, keys: &[StoreKey]) -> Result<(), StoreError> {
        let mut data = self.data.write().map_err(|e| StoreError::BackendError {
            message: format!("lock poisoned: {}", e),
        })?;
        data.remove(keys);
        Ok(())
    }
}
