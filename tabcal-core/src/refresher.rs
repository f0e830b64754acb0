//! Single-flight token refresh.
//!
//! [`TokenRefresher`] exchanges the stored refresh token for a new access
//! token. However many callers ask for a refresh while one is outstanding,
//! only one request reaches the token endpoint and every caller receives the
//! same outcome.
//!
//! # Lifecycle of a refresh
//!
//! 1. The first caller finds the in-flight slot empty, spawns the exchange
//!    task and stores a shared handle to it.
//! 2. Later callers clone the handle from the slot and await it.
//! 3. The task performs the exchange, updates the store (new credential on
//!    success, all credentials cleared on rejection), and only then clears
//!    the slot.
//!
//! The exchange runs on its own task, so it completes even if every caller
//! stops waiting.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::model::StoreKey;
use crate::provider::ProviderConfig;
use crate::store::{clear_credentials, CredentialStore, Secret};
use crate::token::{is_stale, Credential, TokenError, TokenResponse};

type RefreshFuture = Shared<BoxFuture<'static, Result<Secret, TokenError>>>;

/// Handle to the outstanding exchange.
struct InFlight {
    id: u64,
    future: RefreshFuture,
}

struct RefresherInner {
    store: Arc<dyn CredentialStore>,
    provider: ProviderConfig,
    http: reqwest::Client,
    in_flight: Mutex<Option<InFlight>>,
    next_id: AtomicU64,
}

/// Exchanges refresh tokens, at most one exchange at a time.
///
/// Cloning is cheap and clones share the in-flight slot.
#[derive(Clone)]
pub struct TokenRefresher {
    inner: Arc<RefresherInner>,
}

impl TokenRefresher {
    /// Create a refresher with a default HTTP client.
    pub fn new(store: Arc<dyn CredentialStore>, provider: ProviderConfig) -> Self {
        Self::with_http_client(store, provider, reqwest::Client::new())
    }

    /// Create a refresher with a custom HTTP client.
    pub fn with_http_client(
        store: Arc<dyn CredentialStore>,
        provider: ProviderConfig,
        http: reqwest::Client,
    ) -> Self {
        Self {
            inner: Arc::new(RefresherInner {
                store,
                provider,
                http,
                in_flight: Mutex::new(None),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Check whether an exchange is currently outstanding.
    pub fn is_refreshing(&self) -> bool {
        self.inner.in_flight.lock().is_some()
    }

    /// Obtain a new access token from the token endpoint.
    ///
    /// Joins the outstanding exchange if there is one.
    ///
    /// # Errors
    ///
    /// - [`TokenError::NotAuthenticated`] if no refresh token is stored
    /// - [`TokenError::AuthExpired`] if the endpoint rejected the refresh
    ///   token; all stored credentials have been cleared
    /// - [`TokenError::Network`] / [`TokenError::Protocol`] on transport
    ///   failures or malformed responses; stored credentials are kept
    /// - [`TokenError::Storage`] if the store failed
    pub async fn refresh(&self) -> Result<Secret, TokenError> {
        let future = {
            let mut slot = self.inner.in_flight.lock();
            match slot.as_ref() {
                Some(in_flight) => {
                    debug!("Joining in-flight token refresh #{}", in_flight.id);
                    in_flight.future.clone()
                }
                None => {
                    // The task cannot clear the slot before we fill it: settle()
                    // needs the lock we are holding.
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    let future = self.inner.start(id);
                    *slot = Some(InFlight {
                        id,
                        future: future.clone(),
                    });
                    future
                }
            }
        };

        future.await
    }
}

impl std::fmt::Debug for TokenRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRefresher")
            .field("token_url", &self.inner.provider.token_url)
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}

impl RefresherInner {
    fn start(self: &Arc<Self>, id: u64) -> RefreshFuture {
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let result = inner.exchange().await;
            inner.settle(id);
            result
        });

        async move {
            handle.await.unwrap_or_else(|e| {
                Err(TokenError::Protocol {
                    message: format!("token refresh task failed: {}", e),
                })
            })
        }
        .boxed()
        .shared()
    }

    /// Release the slot if it still belongs to exchange `id`.
    fn settle(&self, id: u64) {
        let mut slot = self.in_flight.lock();
        if slot.as_ref().is_some_and(|in_flight| in_flight.id == id) {
            *slot = None;
        }
    }

    async fn exchange(&self) -> Result<Secret, TokenError> {
        let stored = self.store.get(&StoreKey::CREDENTIALS).await?;
        let Some(refresh_token) = stored.refresh_token.clone() else {
            return Err(TokenError::NotAuthenticated);
        };

        // A caller that read the store before the previous exchange settled
        // lands here after it; the stored token is already fresh.
        if !is_stale(&stored, Utc::now()) {
            if let Some(access_token) = stored.access_token {
                debug!("Stored access token is fresh, skipping token request");
                return Ok(access_token);
            }
        }

        if self.provider.token_url.is_empty() {
            return Err(TokenError::Config {
                message: "token endpoint URL is not configured".to_string(),
            });
        }

        info!("Refreshing access token");

        let response = self
            .http
            .post(&self.provider.token_url)
            .form(&self.provider.refresh_form(&refresh_token))
            .send()
            .await
            .map_err(|e| TokenError::Network {
                message: format!("token request failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Token refresh rejected with status {}", status);
            clear_credentials(self.store.as_ref()).await?;
            return Err(TokenError::AuthExpired {
                message: format!("token endpoint returned {}: {}", status, body.trim()),
            });
        }

        let token: TokenResponse = response.json().await.map_err(|e| TokenError::Protocol {
            message: format!("invalid token response: {}", e),
        })?;

        let credential = Credential::from_response(token, Utc::now())?;
        let access_token = credential.access_token.clone();
        let expires_at = credential.expires_at;
        let rotated = credential.refresh_token.is_some();

        self.store.set(&credential.into_record()).await?;

        info!(
            rotated,
            "Access token refreshed, expires at {}",
            expires_at.to_rfc3339()
        );
        Ok(access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CredentialRecord;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_refresh_without_refresh_token() {
        let store = Arc::new(MemoryStore::new());
        let refresher = TokenRefresher::new(store, ProviderConfig::google("client"));

        let result = refresher.refresh().await;
        assert!(matches!(result, Err(TokenError::NotAuthenticated)));
        assert!(!refresher.is_refreshing());
    }

    #[tokio::test]
    async fn test_refresh_without_token_url() {
        let store = Arc::new(MemoryStore::with_record(CredentialRecord {
            refresh_token: Some(Secret::new("refresh")),
            ..Default::default()
        }));
        let refresher = TokenRefresher::new(store.clone(), ProviderConfig::new("client"));

        let result = refresher.refresh().await;
        assert!(matches!(result, Err(TokenError::Config { .. })));

        // Configuration problems never clear credentials
        let record = store.get(&StoreKey::CREDENTIALS).await.unwrap();
        assert!(record.refresh_token.is_some());
    }

    #[tokio::test]
    async fn test_refresh_unreachable_endpoint_keeps_credentials() {
        let store = Arc::new(MemoryStore::with_record(CredentialRecord {
            access_token: Some(Secret::new("old")),
            refresh_token: Some(Secret::new("refresh")),
            token_expires_at: Some(0),
            ..Default::default()
        }));
        let provider = ProviderConfig::google("client").with_token_url("http://127.0.0.1:1/token");
        let refresher = TokenRefresher::new(store.clone(), provider);

        let result = refresher.refresh().await;
        assert!(matches!(result, Err(TokenError::Network { .. })));
        assert!(!refresher.is_refreshing());

        let record = store.get(&StoreKey::CREDENTIALS).await.unwrap();
        assert_eq!(record.access_token.unwrap().expose(), "old");
        assert_eq!(record.refresh_token.unwrap().expose(), "refresh");
    }

    #[tokio::test]
    async fn test_refresh_with_fresh_token_skips_request() {
        let expires_at = Utc::now() + chrono::Duration::hours(1);
        let store = Arc::new(MemoryStore::with_record(CredentialRecord {
            access_token: Some(Secret::new("fresh")),
            refresh_token: Some(Secret::new("refresh")),
            token_expires_at: Some(expires_at.timestamp_millis()),
            ..Default::default()
        }));
        // Nothing listens here, so a token request would fail
        let provider = ProviderConfig::google("client").with_token_url("http://127.0.0.1:1/token");
        let refresher = TokenRefresher::new(store, provider);

        let token = refresher.refresh().await.unwrap();
        assert_eq!(token.expose(), "fresh");
        assert!(!refresher.is_refreshing());
    }

    #[test]
    fn test_refresher_debug_shows_endpoint_only() {
        let store = Arc::new(MemoryStore::new());
        let provider = ProviderConfig::google("client").with_client_secret("s3cret");
        let refresher = TokenRefresher::new(store, provider);

        let debug = format!("{:?}", refresher);
        assert!(debug.contains("oauth2.googleapis.com"));
        assert!(!debug.contains("s3cret"));
    }
}
