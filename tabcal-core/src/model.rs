//! Persisted credential model.
//!
//! This module defines the shape of what the credential store holds:
//! - [`StoreKey`] - The fixed set of keys the store understands
//! - [`CredentialRecord`] - A partial record; any subset of keys may be present

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::store::Secret;

/// Key of a persisted credential field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKey {
    /// OAuth access token (short-lived).
    AccessToken,

    /// OAuth refresh token (long-lived).
    RefreshToken,

    /// Access token expiry, epoch milliseconds.
    TokenExpiresAt,

    /// PKCE verifier kept between building the consent URL and the code exchange.
    PkceCodeVerifier,
}

impl StoreKey {
    /// The three fields that together make up a credential.
    pub const CREDENTIALS: [StoreKey; 3] = [
        StoreKey::AccessToken,
        StoreKey::RefreshToken,
        StoreKey::TokenExpiresAt,
    ];

    /// Every key the store knows about.
    pub const ALL: [StoreKey; 4] = [
        StoreKey::AccessToken,
        StoreKey::RefreshToken,
        StoreKey::TokenExpiresAt,
        StoreKey::PkceCodeVerifier,
    ];

    /// Get the key as it appears in the persisted store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
            Self::TokenExpiresAt => "token_expires_at",
            Self::PkceCodeVerifier => "pkce_code_verifier",
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A partial view of the persisted credential state.
///
/// Reads return only the requested keys; writes only touch the keys that
/// are present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<Secret>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<Secret>,

    /// Epoch milliseconds after which `access_token` must not be used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_expires_at: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pkce_code_verifier: Option<Secret>,
}

impl CredentialRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether no field is present.
    pub fn is_empty(&self) -> bool {
        StoreKey::ALL.iter().all(|key| !self.contains(*key))
    }

    /// Check whether the given field is present.
    pub fn contains(&self, key: StoreKey) -> bool {
        match key {
            StoreKey::AccessToken => self.access_token.is_some(),
            StoreKey::RefreshToken => self.refresh_token.is_some(),
            StoreKey::TokenExpiresAt => self.token_expires_at.is_some(),
            StoreKey::PkceCodeVerifier => self.pkce_code_verifier.is_some(),
        }
    }

    /// Return a copy holding only the requested keys.
    pub fn project(&self, keys: &[StoreKey]) -> Self {
        let mut projected = Self::new();
        for key in keys {
            match key {
                StoreKey::AccessToken => projected.access_token = self.access_token.clone(),
                StoreKey::RefreshToken => projected.refresh_token = self.refresh_token.clone(),
                StoreKey::TokenExpiresAt => projected.token_expires_at = self.token_expires_at,
                StoreKey::PkceCodeVerifier => {
                    projected.pkce_code_verifier = self.pkce_code_verifier.clone()
                }
            }
        }
        projected
    }

    /// Overwrite fields with every field present in `other`.
    pub fn merge(&mut self, other: &CredentialRecord) {
        if let Some(token) = &other.access_token {
            self.access_token = Some(token.clone());
        }
        if let Some(token) = &other.refresh_token {
            self.refresh_token = Some(token.clone());
        }
        if let Some(expires_at) = other.token_expires_at {
            self.token_expires_at = Some(expires_at);
        }
        if let Some(verifier) = &other.pkce_code_verifier {
            self.pkce_code_verifier = Some(verifier.clone());
        }
    }

    /// Drop the given fields.
    pub fn remove(&mut self, keys: &[StoreKey]) {
        for key in keys {
            match key {
                StoreKey::AccessToken => self.access_token = None,
                StoreKey::RefreshToken => self.refresh_token = None,
                StoreKey::TokenExpiresAt => self.token_expires_at = None,
                StoreKey::PkceCodeVerifier => self.pkce_code_verifier = None,
            }
        }
    }

    /// The access token expiry as a timestamp, if stored and representable.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.token_expires_at
            .and_then(DateTime::<Utc>::from_timestamp_millis)
    }
}
