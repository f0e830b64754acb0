//! Token types for the OAuth credential lifecycle.
//!
//! This module provides:
//! - [`Credential`] - An access credential with its refresh token and expiry
//! - [`TokenResponse`] - The token endpoint's JSON response
//! - [`TokenError`] - Errors from obtaining or renewing a credential
//! - [`is_stale`] - The expiry predicate, including the safety margin

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;
use crate::model::CredentialRecord;
use crate::store::{Secret, StoreError};

/// Safety margin, in seconds, before `expires_at` inside which a token is
/// treated as expired.
///
/// Hides clock skew and the latency of the request the token is used for.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

/// [`EXPIRY_MARGIN_SECS`] as a duration.
pub fn expiry_margin() -> Duration {
    Duration::seconds(EXPIRY_MARGIN_SECS)
}

/// Error type for token operations.
///
/// Cloneable because one refresh outcome is handed to every concurrent waiter.
#[derive(Debug, Clone, Error)]
pub enum TokenError {
    /// No refresh token has ever been stored; the sign-in flow must run.
    #[error("not authenticated: sign in required")]
    NotAuthenticated,

    /// The identity provider rejected the credential. Stored credentials
    /// have been cleared.
    #[error("authentication expired: {message}")]
    AuthExpired { message: String },

    /// The OAuth client configuration is missing or invalid.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// The token endpoint could not be reached.
    #[error("network error: {message}")]
    Network { message: String },

    /// The token endpoint answered with something unexpected.
    #[error("unexpected token response: {message}")]
    Protocol { message: String },

    /// Storage error during token operations.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl TokenError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotAuthenticated => ErrorKind::NotAuthenticated,
            Self::AuthExpired { .. } => ErrorKind::AuthExpired,
            Self::Config { .. } => ErrorKind::Config,
            Self::Network { .. } | Self::Protocol { .. } => ErrorKind::NetworkOrProtocol,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }
}

/// Successful response from the token endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,

    /// Lifetime of `access_token` in seconds.
    pub expires_in: i64,

    /// Only present when the server rotates the refresh token.
    #[serde(default)]
    pub refresh_token: Option<String>,

    #[serde(default)]
    pub token_type: Option<String>,

    #[serde(default)]
    pub scope: Option<String>,
}

/// A usable access credential.
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub access_token: Secret,

    /// `None` when the server did not issue or rotate one.
    pub refresh_token: Option<Secret>,

    /// Instant after which `access_token` must no longer be used.
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Create a credential.
    pub fn new(access_token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            access_token: Secret::new(access_token),
            refresh_token: None,
            expires_at,
        }
    }

    /// Attach a refresh token.
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(Secret::new(refresh_token));
        self
    }

    /// Build a credential from a token endpoint response received at `now`.
    ///
    /// # Errors
    ///
    /// [`TokenError::Protocol`] if `expires_in` does not fit a timestamp.
    pub fn from_response(response: TokenResponse, now: DateTime<Utc>) -> Result<Self, TokenError> {
        Ok(Self {
            expires_at: expires_after(now, response.expires_in)?,
            access_token: Secret::new(response.access_token),
            refresh_token: response.refresh_token.map(Secret::new),
        })
    }

    /// Check whether this credential is inside the expiry margin at `now`.
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now + expiry_margin()
    }

    /// The fields to persist. The refresh token is only written when present,
    /// so a non-rotating server keeps the previously stored one.
    pub fn into_record(self) -> CredentialRecord {
        CredentialRecord {
            access_token: Some(self.access_token),
            refresh_token: self.refresh_token,
            token_expires_at: Some(self.expires_at.timestamp_millis()),
            pkce_code_verifier: None,
        }
    }
}

/// The instant `seconds` after `now`.
pub(crate) fn expires_after(now: DateTime<Utc>, seconds: i64) -> Result<DateTime<Utc>, TokenError> {
    Duration::try_seconds(seconds)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| TokenError::Protocol {
            message: format!("invalid token lifetime: {} seconds", seconds),
        })
}

/// Check whether the stored access token must be renewed before use.
///
/// A token is stale when it is missing, has no expiry, or expires within
/// [`EXPIRY_MARGIN_SECS`] of `now`.
pub fn is_stale(record: &CredentialRecord, now: DateTime<Utc>) -> bool {
    if record.access_token.is_none() {
        return true;
    }
    match record.token_expires_at {
        Some(expires_at) => expires_at < (now + expiry_margin()).timestamp_millis(),
        None => true,
    }
}
