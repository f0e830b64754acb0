//! Authorization Code sign-in with PKCE.
//!
//! The browser redirect itself belongs to the host. This module covers the
//! two halves around it:
//!
//! 1. [`SignIn::authorization_url`] builds the consent URL and stores the
//!    PKCE verifier under `pkce_code_verifier`
//! 2. [`SignIn::complete`] exchanges the returned code for tokens, stores
//!    them, and removes the verifier
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example(session: tabcal_core::AuthSession) -> Result<(), tabcal_core::TokenError> {
//! use tabcal_core::SignIn;
//!
//! let sign_in = SignIn::new(session);
//! let (url, _state) = sign_in.authorization_url().await?;
//! println!("Visit: {}", url);
//!
//! // After the user approves and the redirect delivers the code...
//! sign_in.complete("4/0Acode").await?;
//! # Ok(())
//! # }
//! ```

use chrono::Utc;
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, RequestTokenError, Scope, TokenResponse, TokenUrl,
};
use tracing::{debug, info};

use crate::model::{CredentialRecord, StoreKey};
use crate::session::AuthSession;
use crate::store::Secret;
use crate::token::{expires_after, Credential, TokenError};

/// Interactive sign-in helper bound to a session.
#[derive(Debug, Clone)]
pub struct SignIn {
    session: AuthSession,
}

impl SignIn {
    pub fn new(session: AuthSession) -> Self {
        Self { session }
    }

    fn client(&self) -> Result<BasicClient, TokenError> {
        let provider = self.session.provider();

        let auth_url = AuthUrl::new(provider.auth_url.clone()).map_err(|e| TokenError::Config {
            message: format!("invalid auth URL: {}", e),
        })?;
        let token_url =
            TokenUrl::new(provider.token_url.clone()).map_err(|e| TokenError::Config {
                message: format!("invalid token URL: {}", e),
            })?;
        let redirect_uri = provider
            .redirect_uri
            .clone()
            .ok_or_else(|| TokenError::Config {
                message: "redirect URI is not configured".to_string(),
            })?;
        let redirect_url = RedirectUrl::new(redirect_uri).map_err(|e| TokenError::Config {
            message: format!("invalid redirect URL: {}", e),
        })?;

        let client = BasicClient::new(
            ClientId::new(provider.client_id.clone()),
            provider
                .client_secret
                .as_ref()
                .map(|secret| ClientSecret::new(secret.expose().to_string())),
            auth_url,
            Some(token_url),
        )
        .set_auth_type(AuthType::RequestBody)
        .set_redirect_uri(redirect_url);

        Ok(client)
    }

    /// Build the consent URL and remember the PKCE verifier.
    ///
    /// Requests offline access and forces the consent prompt so that the
    /// server issues a refresh token. Returns the URL and the CSRF state the
    /// redirect must echo back.
    pub async fn authorization_url(&self) -> Result<(String, String), TokenError> {
        let client = self.client()?;
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();

        let mut request = client
            .authorize_url(CsrfToken::new_random)
            .set_pkce_challenge(challenge)
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent");
        for scope in &self.session.provider().scopes {
            request = request.add_scope(Scope::new(scope.clone()));
        }
        let (url, state) = request.url();

        self.session
            .store()
            .set(&CredentialRecord {
                pkce_code_verifier: Some(Secret::new(verifier.secret().as_str())),
                ..Default::default()
            })
            .await?;

        debug!("Stored PKCE verifier for pending sign-in");
        Ok((url.to_string(), state.secret().to_string()))
    }

    /// Exchange the authorization code and store the resulting credential.
    ///
    /// # Errors
    ///
    /// - [`TokenError::Config`] if no sign-in is pending
    /// - [`TokenError::Network`] if the token endpoint is unreachable
    /// - [`TokenError::Protocol`] if the code was rejected or the response is
    ///   malformed
    pub async fn complete(&self, code: &str) -> Result<Credential, TokenError> {
        let store = self.session.store();
        let pending = store.get(&[StoreKey::PkceCodeVerifier]).await?;
        let verifier = pending.pkce_code_verifier.ok_or_else(|| TokenError::Config {
            message: "no sign-in in progress; request an authorization URL first".to_string(),
        })?;

        let response = self
            .client()?
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(PkceCodeVerifier::new(verifier.into_inner()))
            .request_async(async_http_client)
            .await
            .map_err(|e| match e {
                RequestTokenError::Request(e) => TokenError::Network {
                    message: format!("code exchange failed: {}", e),
                },
                RequestTokenError::ServerResponse(e) => TokenError::Protocol {
                    message: format!("authorization code rejected: {}", e),
                },
                other => TokenError::Protocol {
                    message: format!("code exchange failed: {}", other),
                },
            })?;

        let now = Utc::now();
        // Without a declared lifetime the token is stored already stale
        let expires_at = match response.expires_in() {
            Some(lifetime) => {
                let seconds = i64::try_from(lifetime.as_secs()).unwrap_or(i64::MAX);
                expires_after(now, seconds)?
            }
            None => now,
        };

        let mut credential = Credential::new(response.access_token().secret().as_str(), expires_at);
        if let Some(refresh_token) = response.refresh_token() {
            credential = credential.with_refresh_token(refresh_token.secret().as_str());
        }

        self.session.store_credential(credential.clone()).await?;
        store.remove(&[StoreKey::PkceCodeVerifier]).await?;

        info!("Sign-in complete");
        Ok(credential)
    }
}
