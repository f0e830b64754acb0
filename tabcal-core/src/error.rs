//! Error classification shared by every tabcal error type.
//!
//! Each concern has its own error enum ([`StoreError`](crate::StoreError),
//! [`TokenError`](crate::TokenError), [`CalendarError`](crate::CalendarError),
//! [`FetchError`](crate::FetchError)). [`ErrorKind`] maps all of them onto one
//! taxonomy so the presentation layer can decide on messaging and retries
//! without matching on individual variants.

use std::fmt;

/// High-level category of a tabcal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No refresh credential is stored; the interactive sign-in must run.
    NotAuthenticated,
    /// A refresh or a live API call was rejected; credentials were cleared.
    AuthExpired,
    /// Required static configuration is missing or invalid.
    Config,
    /// A single calendar failed for a reason other than authorization.
    TransientProvider,
    /// Transport failure or unexpected response body.
    NetworkOrProtocol,
    /// The credential store could not be read or written.
    Storage,
}

impl ErrorKind {
    /// Returns a stable snake_case name for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "not_authenticated",
            Self::AuthExpired => "auth_expired",
            Self::Config => "config_error",
            Self::TransientProvider => "transient_provider_error",
            Self::NetworkOrProtocol => "network_or_protocol_error",
            Self::Storage => "storage_error",
        }
    }

    /// Returns true if the next scheduled invocation may succeed without
    /// user or operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientProvider | Self::NetworkOrProtocol)
    }

    /// Returns true if the user has to go through the sign-in flow again.
    pub fn requires_sign_in(&self) -> bool {
        matches!(self, Self::NotAuthenticated | Self::AuthExpired)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
