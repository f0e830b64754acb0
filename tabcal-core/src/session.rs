//! Access token provider.
//!
//! [`AuthSession`] is the one place the rest of the crate goes to for a usable
//! access token. It reads the credential store, returns the stored token when
//! it is still valid, and otherwise defers to the shared [`TokenRefresher`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::model::StoreKey;
use crate::provider::ProviderConfig;
use crate::refresher::TokenRefresher;
use crate::store::{clear_credentials, CredentialStore, Secret};
use crate::token::{is_stale, Credential, TokenError};

/// Source of bearer tokens for API calls.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    /// Return an access token that is valid for at least the expiry margin.
    async fn access_token(&self) -> Result<Secret, TokenError>;

    /// Drop every stored credential after the API rejected the token.
    async fn invalidate(&self) -> Result<(), TokenError>;
}

/// Stored-credential summary, computed without any network access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    /// A refresh token is stored.
    pub authenticated: bool,

    /// Expiry of the stored access token, if any.
    pub expires_at: Option<DateTime<Utc>>,

    /// The next [`AuthSession::access_token`] call will hit the token endpoint.
    pub needs_refresh: bool,
}

/// Credential store plus refresher, shared by everything that needs a token.
///
/// Clones share the same store and the same in-flight refresh.
#[derive(Clone)]
pub struct AuthSession {
    store: Arc<dyn CredentialStore>,
    provider: ProviderConfig,
    refresher: TokenRefresher,
}

impl AuthSession {
    /// Create a session over `store` for the given authorization server.
    pub fn new(store: Arc<dyn CredentialStore>, provider: ProviderConfig) -> Self {
        Self::with_http_client(store, provider, reqwest::Client::new())
    }

    /// Create a session whose token requests use `http`.
    pub fn with_http_client(
        store: Arc<dyn CredentialStore>,
        provider: ProviderConfig,
        http: reqwest::Client,
    ) -> Self {
        let refresher = TokenRefresher::with_http_client(store.clone(), provider.clone(), http);
        Self {
            store,
            provider,
            refresher,
        }
    }

    /// The underlying credential store.
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// The authorization server configuration.
    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    /// The shared refresher.
    pub fn refresher(&self) -> &TokenRefresher {
        &self.refresher
    }

    /// Get a valid access token, refreshing it when needed.
    ///
    /// A stored token that expires more than the expiry margin from now is
    /// returned without any network call.
    pub async fn access_token(&self) -> Result<Secret, TokenError> {
        let record = self.store.get(&StoreKey::CREDENTIALS).await?;

        if record.refresh_token.is_none() {
            return Err(TokenError::NotAuthenticated);
        }

        if !is_stale(&record, Utc::now()) {
            if let Some(token) = record.access_token {
                debug!("Using cached access token");
                return Ok(token);
            }
        }

        debug!("Access token missing or expiring, refreshing");
        self.refresher.refresh().await
    }

    /// Persist a credential obtained by the sign-in flow.
    ///
    /// The stored refresh token is only replaced when `credential` carries one.
    pub async fn store_credential(&self, credential: Credential) -> Result<(), TokenError> {
        self.store.set(&credential.into_record()).await?;
        debug!("Stored new credential");
        Ok(())
    }

    /// Clear all stored credentials.
    pub async fn invalidate(&self) -> Result<(), TokenError> {
        warn!("Invalidating stored credentials");
        clear_credentials(self.store.as_ref()).await?;
        Ok(())
    }

    /// Summarise the stored credentials.
    pub async fn status(&self) -> Result<SessionStatus, TokenError> {
        let record = self.store.get(&StoreKey::CREDENTIALS).await?;
        let authenticated = record.refresh_token.is_some();

        Ok(SessionStatus {
            authenticated,
            expires_at: record.expires_at(),
            needs_refresh: authenticated && is_stale(&record, Utc::now()),
        })
    }
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("client_id", &self.provider.client_id)
            .field("refresher", &self.refresher)
            .finish()
    }
}

#[async_trait]
impl AccessTokenSource for AuthSession {
    async fn access_token(&self) -> Result<Secret, TokenError> {
        AuthSession::access_token(self).await
    }

    async fn invalidate(&self) -> Result<(), TokenError> {
        AuthSession::invalidate(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CredentialRecord;
    use crate::store::MemoryStore;
    use chrono::Duration;

    fn session(record: CredentialRecord) -> (AuthSession, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::with_record(record));
        // Unroutable endpoint: any refresh attempt fails with a network error
        let provider = ProviderConfig::google("client").with_token_url("http://127.0.0.1:1/token");
        (AuthSession::new(store.clone(), provider), store)
    }

    #[tokio::test]
    async fn test_access_token_not_authenticated() {
        let (session, _) = session(CredentialRecord {
            access_token: Some(Secret::new("orphan")),
            token_expires_at: Some((Utc::now() + Duration::hours(1)).timestamp_millis()),
            ..Default::default()
        });

        let result = session.access_token().await;
        assert!(matches!(result, Err(TokenError::NotAuthenticated)));
    }

    #[tokio::test]
    async fn test_access_token_fast_path() {
        let (session, _) = session(CredentialRecord {
            access_token: Some(Secret::new("valid")),
            refresh_token: Some(Secret::new("refresh")),
            token_expires_at: Some((Utc::now() + Duration::hours(1)).timestamp_millis()),
            ..Default::default()
        });

        let token = session.access_token().await.unwrap();
        assert_eq!(token.expose(), "valid");
        assert!(!session.refresher().is_refreshing());
    }

    #[tokio::test]
    async fn test_access_token_expired_goes_to_refresher() {
        let (session, _) = session(CredentialRecord {
            access_token: Some(Secret::new("old")),
            refresh_token: Some(Secret::new("refresh")),
            token_expires_at: Some((Utc::now() + Duration::seconds(10)).timestamp_millis()),
            ..Default::default()
        });

        let result = session.access_token().await;
        assert!(matches!(result, Err(TokenError::Network { .. })));
    }

    #[tokio::test]
    async fn test_store_credential_then_read() {
        let (session, _) = session(CredentialRecord::new());
        let credential = Credential::new("ya29.fresh", Utc::now() + Duration::hours(1))
            .with_refresh_token("1//refresh");

        session.store_credential(credential).await.unwrap();

        let token = session.access_token().await.unwrap();
        assert_eq!(token.expose(), "ya29.fresh");
    }

    #[tokio::test]
    async fn test_invalidate_clears_everything() {
        let (session, store) = session(CredentialRecord {
            access_token: Some(Secret::new("a")),
            refresh_token: Some(Secret::new("r")),
            token_expires_at: Some(1),
            pkce_code_verifier: Some(Secret::new("v")),
        });

        session.invalidate().await.unwrap();
        assert!(store.get(&StoreKey::ALL).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status() {
        let (session, _) = session(CredentialRecord::new());
        let status = session.status().await.unwrap();
        assert!(!status.authenticated);
        assert!(!status.needs_refresh);
        assert!(status.expires_at.is_none());

        let expires_at = Utc::now() + Duration::seconds(30);
        session
            .store_credential(Credential::new("a", expires_at).with_refresh_token("r"))
            .await
            .unwrap();

        let status = session.status().await.unwrap();
        assert!(status.authenticated);
        assert!(status.needs_refresh);
        assert_eq!(
            status.expires_at.map(|t| t.timestamp_millis()),
            Some(expires_at.timestamp_millis())
        );
    }
}
