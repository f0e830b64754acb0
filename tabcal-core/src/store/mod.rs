//! Credential storage abstraction.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`CredentialStore`] - Trait for credential storage backends
//! - [`MemoryStore`] - In-memory implementation for testing
//! - [`FileStore`] - JSON file implementation that survives restarts
//! - [`KeyringStore`] - OS keyring implementation (with `keyring-store` feature)
//! - [`create_store`] - Helper to select a backend from configuration
//!
//! # Contract
//!
//! The store is a small key-value record keyed by [`StoreKey`]. Reads return a
//! partial [`CredentialRecord`] holding only the requested keys that exist,
//! writes only touch the keys present in the given record, and removals are
//! idempotent. Backend failures surface as [`StoreError`] and are propagated
//! unchanged by the token layer.
//!
//! # Example
//!
//! ```rust,ignore
//! use tabcal_core::store::{CredentialStore, MemoryStore, Secret};
//! use tabcal_core::{CredentialRecord, StoreKey};
//!
//! let store = MemoryStore::new();
//! store.set(&CredentialRecord {
//!     refresh_token: Some(Secret::new("1//refresh")),
//!     ..Default::default()
//! }).await?;
//!
//! let record = store.get(&[StoreKey::RefreshToken]).await?;
//! assert_eq!(record.refresh_token.unwrap().expose(), "1//refresh");
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::model::{CredentialRecord, StoreKey};

mod file;
mod memory;
#[cfg(feature = "keyring-store")]
mod keyring;

pub use file::FileStore;
pub use memory::MemoryStore;
#[cfg(feature = "keyring-store")]
pub use keyring::KeyringStore;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose) and is
/// zeroed when dropped. Debug and Display implementations show `[REDACTED]`.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Consume the secret and return the inner value.
    pub fn into_inner(mut self) -> String {
        std::mem::take(&mut self.0)
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// Error type for credential store operations.
///
/// Cloneable so that a single failed refresh can be reported to every waiter.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The storage backend is not reachable.
    #[error("storage unavailable: {message}")]
    Unavailable { message: String },

    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// A persisted value could not be encoded or decoded.
    #[error("serialization error: {message}")]
    SerializationError { message: String },
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::BackendError {
            message: format!("I/O error: {}", err),
        }
    }
}

/// Abstraction over credential storage backends.
///
/// All operations are asynchronous suspension points.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Read the requested keys.
    ///
    /// Keys that are not stored are simply absent from the returned record.
    async fn get(&self, keys: &[StoreKey]) -> Result<CredentialRecord, StoreError>;

    /// Write every field present in `record`, leaving other keys untouched.
    async fn set(&self, record: &CredentialRecord) -> Result<(), StoreError>;

    /// Remove the given keys.
    ///
    /// Returns `Ok(())` even if a key didn't exist.
    async fn remove(&self, keys: &[StoreKey]) -> Result<(), StoreError>;
}

/// Remove every stored credential field, including the PKCE scratch value.
///
/// This is what forces the next caller back through the sign-in flow.
pub async fn clear_credentials(store: &dyn CredentialStore) -> Result<(), StoreError> {
    store.remove(&StoreKey::ALL).await?;
    tracing::info!("Cleared stored credentials");
    Ok(())
}

/// Which backend [`create_store`] should build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreBackend {
    /// Process-local storage; nothing survives a restart.
    Memory,

    /// JSON file; `None` selects [`FileStore::default_path`].
    File {
        #[serde(default)]
        path: Option<PathBuf>,
    },

    /// OS keyring under the given service name.
    Keyring {
        #[serde(default = "default_keyring_service")]
        service: String,
    },
}

fn default_keyring_service() -> String {
    "tabcal".to_string()
}

impl Default for StoreBackend {
    fn default() -> Self {
        Self::File { path: None }
    }
}

/// Create a credential store for the configured backend.
///
/// # Backend Selection Logic
///
/// - `Memory`: always a [`MemoryStore`]
/// - `File`: a [`FileStore`] at the given or default path
/// - `Keyring`: a [`KeyringStore`] when the `keyring-store` feature is enabled
///   and the platform keyring is reachable; otherwise falls back to the
///   default [`FileStore`] with a warning
pub fn create_store(backend: &StoreBackend) -> Result<Arc<dyn CredentialStore>, StoreError> {
    match backend {
        StoreBackend::Memory => {
            tracing::debug!("Using in-memory credential storage");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::File { path } => {
            let path = match path {
                Some(path) => path.clone(),
                None => FileStore::default_path()?,
            };
            tracing::debug!("Using file credential storage at {:?}", path);
            Ok(Arc::new(FileStore::open(path)?))
        }
        StoreBackend::Keyring { service } => create_keyring_store(service),
    }
}

#[cfg(feature = "keyring-store")]
fn create_keyring_store(service: &str) -> Result<Arc<dyn CredentialStore>, StoreError> {
    match KeyringStore::try_new(service) {
        Ok(store) => {
            tracing::info!("Using OS keyring for credential storage");
            Ok(Arc::new(store))
        }
        Err(e) => {
            tracing::warn!(
                "Keyring unavailable ({}), falling back to file storage",
                e
            );
            Ok(Arc::new(FileStore::open(FileStore::default_path()?)?))
        }
    }
}

#[cfg(not(feature = "keyring-store"))]
fn create_keyring_store(_service: &str) -> Result<Arc<dyn CredentialStore>, StoreError> {
    tracing::warn!(
        "Keyring storage requested but keyring-store feature not enabled. \
         Falling back to file storage."
    );
    Ok(Arc::new(FileStore::open(FileStore::default_path()?)?))
}
