//! # Tabcal Core
//!
//! Data layer for the calendar widget of a new-tab dashboard.
//!
//! This crate provides:
//! - A credential store contract with memory, file and (optionally) keyring backends
//! - An OAuth access-token provider that renews credentials before they expire
//! - A single-flight token refresher shared by every concurrent caller
//! - A multi-calendar event fetcher that merges and time-sorts events
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tabcal_core::{AuthSession, CalendarQuery, CountingLoader, EventFetcher, MemoryStore, ProviderConfig};
//!
//! async fn upcoming() -> Result<(), tabcal_core::FetchError> {
//!     let store = Arc::new(MemoryStore::new());
//!     let session = AuthSession::new(store, ProviderConfig::google("client-id"));
//!     let fetcher = EventFetcher::new().with_token_source(session);
//!
//!     let query = CalendarQuery::oauth(vec!["primary".to_string()]);
//!     let loader = CountingLoader::new();
//!     if let Some(cache) = fetcher.fetch(&query, &loader).await? {
//!         println!("{} events", cache.events.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod calendar;
pub mod error;
pub mod loader;
pub mod model;
pub mod provider;
pub mod refresher;
pub mod session;
pub mod store;
pub mod token;

#[cfg(feature = "oauth")]
pub mod oauth;

// Re-export commonly used types at crate root
pub use model::{CredentialRecord, StoreKey};

pub use store::{
    clear_credentials,
    create_store,
    CredentialStore,
    FileStore,
    MemoryStore,
    Secret,
    StoreBackend,
    StoreError,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringStore;

pub use token::{expiry_margin, Credential, TokenError, TokenResponse, EXPIRY_MARGIN_SECS};

pub use provider::ProviderConfig;

pub use refresher::TokenRefresher;

pub use session::{AccessTokenSource, AuthSession, SessionStatus};

pub use loader::{CountingLoader, Loader, LoaderGuard, NoopLoader};

pub use calendar::{
    AuthMethod,
    CalendarClient,
    CalendarError,
    CalendarListEntry,
    CalendarQuery,
    EventCache,
    EventFetcher,
    EventRecord,
    EventTime,
    FetchError,
    RequestAuth,
    TimeWindow,
};

pub use error::ErrorKind;

#[cfg(feature = "oauth")]
pub use oauth::SignIn;
