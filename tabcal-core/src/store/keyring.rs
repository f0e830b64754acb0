//! OS keyring-backed credential storage implementation.

use async_trait::async_trait;
use keyring::Entry;

use super::{CredentialStore, Secret, StoreError};
use crate::model::{CredentialRecord, StoreKey};

/// OS keyring-backed credential store.
///
/// This store uses the platform's native keyring service:
/// - macOS: Keychain
/// - Linux: Secret Service API (via libsecret)
/// - Windows: Credential Manager
///
/// # Storage Key Format
///
/// Each field is its own entry, stored as `{service_name}/{key}`, e.g.
/// `tabcal/refresh_token`. The expiry is stored as decimal epoch milliseconds.
pub struct KeyringStore {
    service_name: String,
}

impl KeyringStore {
    /// Try to create a new keyring store.
    ///
    /// Returns an error if the keyring backend is not available on this platform.
    pub fn try_new(service_name: &str) -> Result<Self, StoreError> {
        let test_key = format!("{}/__test__", service_name);
        match Entry::new(&test_key, "availability_check") {
            Ok(_) => Ok(Self {
                service_name: service_name.to_string(),
            }),
            Err(e) => Err(StoreError::Unavailable {
                message: format!("keyring backend not available: {}", e),
            }),
        }
    }

    fn create_entry(&self, key: StoreKey) -> Result<Entry, StoreError> {
        let service = format!("{}/{}", self.service_name, key.as_str());
        Entry::new(&service, "tabcal").map_err(|e| StoreError::BackendError {
            message: format!("failed to create keyring entry: {}", e),
        })
    }

    fn read(&self, key: StoreKey) -> Result<Option<String>, StoreError> {
        let entry = self.create_entry(key)?;

        match entry.get_password() {
            Ok(password) => Ok(Some(password)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(keyring::Error::PlatformFailure(e)) => Err(StoreError::Unavailable {
                message: format!("platform keyring failure: {}", e),
            }),
            Err(e) => Err(StoreError::BackendError {
                message: format!("keyring error for {}: {}", key, e),
            }),
        }
    }

    fn write(&self, key: StoreKey, value: &str) -> Result<(), StoreError> {
        self.create_entry(key)?
            .set_password(value)
            .map_err(|e| StoreError::BackendError {
                message: format!("failed to set keyring entry {}: {}", key, e),
            })
    }
}

impl std::fmt::Debug for KeyringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringStore")
            .field("service_name", &self.service_name)
            .finish()
    }
}

#[async_trait]
impl CredentialStore for KeyringStore {
    async fn get(&self, keys: &[StoreKey]) -> Result<CredentialRecord, StoreError> {
        let mut record = CredentialRecord::new();

        for key in keys {
            let Some(value) = self.read(*key)? else {
                continue;
            };
            match key {
                StoreKey::AccessToken => record.access_token = Some(Secret::new(value)),
                StoreKey::RefreshToken => record.refresh_token = Some(Secret::new(value)),
                StoreKey::PkceCodeVerifier => {
                    record.pkce_code_verifier = Some(Secret::new(value))
                }
                StoreKey::TokenExpiresAt => {
                    let millis = value.parse::<i64>().map_err(|e| {
                        StoreError::SerializationError {
                            message: format!("invalid {} value: {}", key, e),
                        }
                    })?;
                    record.token_expires_at = Some(millis);
                }
            }
        }

        Ok(record)
    }

    async fn set(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        if let Some(token) = &record.access_token {
            self.write(StoreKey::AccessToken, token.expose())?;
        }
        if let Some(token) = &record.refresh_token {
            self.write(StoreKey::RefreshToken, token.expose())?;
        }
        if let Some(expires_at) = record.token_expires_at {
            self.write(StoreKey::TokenExpiresAt, &expires_at.to_string())?;
        }
        if let Some(verifier) = &record.pkce_code_verifier {
            self.write(StoreKey::PkceCodeVerifier, verifier.expose())?;
        }
        Ok(())
    }

    async fn remove(&self, keys: &[StoreKey]) -> Result<(), StoreError> {
        for key in keys {
            let entry = self.create_entry(*key)?;
            match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => {}
                Err(e) => {
                    return Err(StoreError::BackendError {
                        message: format!("failed to delete keyring entry {}: {}", key, e),
                    });
                }
            }
        }
        Ok(())
    }
}
