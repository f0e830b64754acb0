//! Multi-calendar event fetcher.
//!
//! One request per calendar, all in flight at once. A calendar that fails
//! for any reason other than authorization contributes no events and a
//! warning. A 401 from any calendar means the shared credential is bad, so
//! the stored credentials are cleared and the whole fetch fails.

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use super::{
    sort_events, AuthMethod, CalendarClient, CalendarError, CalendarListEntry, CalendarQuery,
    EventCache, FetchError, RequestAuth, TimeWindow,
};
use crate::loader::{Loader, LoaderGuard};
use crate::session::AccessTokenSource;
use crate::store::Secret;
use crate::token::TokenError;

/// Fetches and merges events from several calendars.
#[derive(Clone, Default)]
pub struct EventFetcher {
    client: CalendarClient,
    token_source: Option<Arc<dyn AccessTokenSource>>,
    api_key: Option<Secret>,
}

impl EventFetcher {
    /// Create a fetcher against the public API with no credentials.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom calendar client.
    pub fn with_client(mut self, client: CalendarClient) -> Self {
        self.client = client;
        self
    }

    /// Source of bearer tokens for [`AuthMethod::OAuth`] queries.
    pub fn with_token_source(mut self, source: impl AccessTokenSource + 'static) -> Self {
        self.token_source = Some(Arc::new(source));
        self
    }

    /// Static key for [`AuthMethod::ApiKey`] queries.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(Secret::new(api_key));
        self
    }

    /// Fetch, merge and sort the events of every calendar in `query`.
    ///
    /// Returns `Ok(None)` without touching the network or `loader` when the
    /// query names no calendars. Otherwise `loader` is pushed before the first
    /// request and popped exactly once when this call returns.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Token`] when no access token can be obtained, or with
    ///   [`TokenError::AuthExpired`] when a calendar answered 401 in OAuth mode
    /// - [`FetchError::Config`] when the time range cannot be represented,
    ///   the API key is missing or was rejected, or no token source is
    ///   configured
    pub async fn fetch(
        &self,
        query: &CalendarQuery,
        loader: &dyn Loader,
    ) -> Result<Option<EventCache>, FetchError> {
        if query.calendar_ids.is_empty() {
            debug!("No calendars configured, skipping fetch");
            return Ok(None);
        }

        let _busy = LoaderGuard::acquire(loader);

        let window = TimeWindow::days_ahead(Utc::now(), query.time_range).ok_or_else(|| {
            FetchError::Config {
                message: format!("time range of {} days is out of range", query.time_range),
            }
        })?;
        let auth = self.request_auth(query.auth_method).await?;

        let requests = query.calendar_ids.iter().map(|calendar_id| {
            self.client
                .list_events(calendar_id, &auth, &window, query.max_results)
        });
        let results = join_all(requests).await;

        let mut events = Vec::new();
        let mut rejected = false;
        let mut failed = 0;

        for (calendar_id, result) in query.calendar_ids.iter().zip(results) {
            match result {
                Ok(items) => events.extend(items),
                Err(CalendarError::Unauthorized { .. }) => {
                    warn!("Calendar {} rejected the credentials", calendar_id);
                    rejected = true;
                }
                Err(e) => {
                    warn!("Failed to fetch events for calendar {}: {}", calendar_id, e);
                    failed += 1;
                }
            }
        }

        if rejected {
            return Err(self.reject(query.auth_method).await);
        }

        let events = sort_events(events);
        info!(
            "Fetched {} events from {} calendars ({} failed)",
            events.len(),
            query.calendar_ids.len(),
            failed
        );

        Ok(Some(EventCache {
            timestamp: Utc::now(),
            events,
        }))
    }

    /// List the signed-in user's calendars.
    pub async fn calendars(&self) -> Result<Vec<CalendarListEntry>, FetchError> {
        let auth = self.request_auth(AuthMethod::OAuth).await?;

        match self.client.list_calendars(&auth).await {
            Err(CalendarError::Unauthorized { .. }) => Err(self.reject(AuthMethod::OAuth).await),
            result => result.map_err(FetchError::from),
        }
    }

    async fn request_auth(&self, method: AuthMethod) -> Result<RequestAuth, FetchError> {
        match method {
            AuthMethod::OAuth => {
                let source = self.token_source.as_ref().ok_or_else(|| FetchError::Config {
                    message: "OAuth is not configured".to_string(),
                })?;
                Ok(RequestAuth::Bearer(source.access_token().await?))
            }
            AuthMethod::ApiKey => match &self.api_key {
                Some(key) if !key.expose().is_empty() => Ok(RequestAuth::ApiKey(key.clone())),
                _ => Err(FetchError::Config {
                    message: "calendar API key is not configured".to_string(),
                }),
            },
        }
    }

    /// Turn a 401 into the fetch error, clearing credentials in OAuth mode.
    async fn reject(&self, method: AuthMethod) -> FetchError {
        match (method, &self.token_source) {
            (AuthMethod::OAuth, Some(source)) => {
                if let Err(e) = source.invalidate().await {
                    return FetchError::Token(e);
                }
                FetchError::Token(TokenError::AuthExpired {
                    message: "calendar API rejected the access token".to_string(),
                })
            }
            _ => FetchError::Config {
                message: "calendar API rejected the API key".to_string(),
            },
        }
    }
}

impl std::fmt::Debug for EventFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventFetcher")
            .field("client", &self.client)
            .field("oauth", &self.token_source.is_some())
            .field("api_key", &self.api_key)
            .finish()
    }
}
