//! JSON file credential storage implementation.
//!
//! # Storage Location
//!
//! By default credentials live at `~/.local/share/tabcal/credentials.json` on
//! Linux, the equivalent application data directory elsewhere.

use async_trait::async_trait;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::{CredentialStore, StoreError};
use crate::model::{CredentialRecord, StoreKey};

/// File-backed credential store.
///
/// The whole record is kept in memory and rewritten on every change. Writes go
/// to a temporary file first and are renamed into place, and the file is
/// readable by the owner only on Unix.
pub struct FileStore {
    /// Path to the credentials JSON file.
    path: PathBuf,

    /// In-memory copy of the persisted record.
    data: RwLock<CredentialRecord>,
}

impl FileStore {
    /// Get the default storage path.
    pub fn default_path() -> Result<PathBuf, StoreError> {
        let dirs = directories::ProjectDirs::from("com", "tabcal", "tabcal").ok_or_else(|| {
            StoreError::Unavailable {
                message: "no home directory available for credential storage".to_string(),
            }
        })?;

        Ok(dirs.data_dir().join("credentials.json"))
    }

    /// Open the store at `path`, loading existing credentials if present.
    ///
    /// Creates parent directories if they don't exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            if contents.trim().is_empty() {
                CredentialRecord::new()
            } else {
                serde_json::from_str(&contents)?
            }
        } else {
            CredentialRecord::new()
        };

        tracing::debug!("Opened credential file {:?}", path);

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Get the storage path for this store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, data: &CredentialRecord) -> Result<(), StoreError> {
        let contents = serde_json::to_string_pretty(data)?;

        let temp_path = self.path.with_extension("json.tmp");

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&temp_path)?;

        // A temp file left behind by an earlier crash keeps its old mode
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }

        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.path)
            .finish()
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn get(&self, keys: &[StoreKey]) -> Result<CredentialRecord, StoreError> {
        let data = self.data.read().map_err(|e| StoreError::BackendError {
            message: format!("read lock poisoned: {}", e),
        })?;
        Ok(data.project(keys))
    }

    async fn set(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        let mut data = self.data.write().map_err(|e| StoreError::BackendError {
            message: format!("write lock poisoned: {}", e),
        })?;

        let mut updated = data.clone();
        updated.merge(record);
        self.save(&updated)?;
        *data = updated;
        Ok(())
    }

    async fn remove(&self, keys: &[StoreKey]) -> Result<(), StoreError> {
        let mut data = self.data.write().map_err(|e| StoreError::BackendError {
            message: format!("write lock poisoned: {}", e),
        })?;

        let mut updated = data.clone();
        updated.remove(keys);
        self.save(&updated)?;
        *data = updated;
        Ok(())
    }
}
