//! OAuth provider configuration.
//!
//! A single authorization-server profile is supported: the confidential
//! (client-secret) profile. Token refresh sends `client_id`, `refresh_token`,
//! `grant_type=refresh_token` and, when configured, `client_secret`.

use serde::{Deserialize, Serialize};

use crate::store::Secret;

/// Google's OAuth authorization endpoint.
pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Google's OAuth token endpoint.
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Read-only calendar scope.
pub const CALENDAR_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/calendar.readonly";

/// Configuration for the OAuth authorization server.
///
/// # Example
///
/// ```
/// use tabcal_core::provider::ProviderConfig;
///
/// let provider = ProviderConfig::google("1234.apps.googleusercontent.com")
///     .with_client_secret("GOCSPX-secret")
///     .with_redirect_uri("http://127.0.0.1:8765/callback");
///
/// assert!(provider.client_secret.is_some());
/// assert_eq!(provider.token_url, "https://oauth2.googleapis.com/token");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// OAuth authorization endpoint URL.
    pub auth_url: String,

    /// OAuth token endpoint URL.
    pub token_url: String,

    /// OAuth client identifier.
    pub client_id: String,

    /// Client secret; `None` for a public client.
    #[serde(default)]
    pub client_secret: Option<Secret>,

    /// Scopes requested at sign-in.
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Redirect URI registered for the sign-in flow.
    #[serde(default)]
    pub redirect_uri: Option<String>,
}

impl ProviderConfig {
    /// Create a provider configuration with empty endpoints.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            auth_url: String::new(),
            token_url: String::new(),
            client_id: client_id.into(),
            client_secret: None,
            scopes: Vec::new(),
            redirect_uri: None,
        }
    }

    /// Google endpoints with the read-only calendar scope.
    pub fn google(client_id: impl Into<String>) -> Self {
        Self::new(client_id)
            .with_auth_url(GOOGLE_AUTH_URL)
            .with_token_url(GOOGLE_TOKEN_URL)
            .with_scopes(vec![CALENDAR_READONLY_SCOPE.to_string()])
    }

    /// Set the authorization URL.
    pub fn with_auth_url(mut self, url: impl Into<String>) -> Self {
        self.auth_url = url.into();
        self
    }

    /// Set the token URL.
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    /// Set the client secret.
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(Secret::new(secret));
        self
    }

    /// Set the requested scopes.
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Set the redirect URI.
    pub fn with_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(uri.into());
        self
    }

    /// Form fields for a refresh-token grant.
    pub(crate) fn refresh_form<'a>(&'a self, refresh_token: &'a Secret) -> Vec<(&'static str, &'a str)> {
        let mut form = vec![
            ("client_id", self.client_id.as_str()),
            ("refresh_token", refresh_token.expose()),
            ("grant_type", "refresh_token"),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.expose()));
        }
        form
    }
}
