//! CLI configuration handling.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tabcal_core::provider::{GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL};
use tabcal_core::{CalendarQuery, ProviderConfig, StoreBackend};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the configuration file that was loaded.
    #[serde(skip)]
    pub config_path: PathBuf,

    pub oauth: OAuthConfig,

    /// Static calendar API key, used with `authMethod = "apiKey"`.
    pub api_key: Option<String>,

    /// Calendar API root, for proxies and tests.
    pub calendar_api_base: Option<String>,

    pub calendar: CalendarQuery,

    pub store: StoreBackend,

    pub display: DisplayConfig,

    /// Logging level.
    pub log_level: String,

    /// Seconds between fetches in `watch` mode.
    pub refresh_interval_secs: u64,

    /// Timeout applied to every HTTP request.
    pub request_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: PathBuf::new(),
            oauth: OAuthConfig::default(),
            api_key: None,
            calendar_api_base: None,
            calendar: CalendarQuery::default(),
            store: StoreBackend::default(),
            display: DisplayConfig::default(),
            log_level: "info".to_string(),
            refresh_interval_secs: 1800,
            request_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub auth_url: Option<String>,
    pub token_url: Option<String>,
    pub redirect_uri: Option<String>,
    pub scopes: Option<Vec<String>>,
}

/// Which events are shown, and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub show_today: bool,
    pub show_upcoming: bool,
    pub show_description: bool,
    pub show_location: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            show_today: true,
            show_upcoming: true,
            show_description: false,
            show_location: false,
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the default location.
    ///
    /// A missing file yields defaults. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => default_config_path(),
        };

        let mut config = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config from {:?}", config_path))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {:?}", config_path))?
        } else {
            Config::default()
        };

        config.config_path = config_path;
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Let `TABCAL_API_KEY`, `TABCAL_CLIENT_ID` and `TABCAL_CLIENT_SECRET`
    /// override the file.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |name: &str| lookup(name).filter(|value| !value.is_empty());

        if let Some(key) = lookup("TABCAL_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(id) = lookup("TABCAL_CLIENT_ID") {
            self.oauth.client_id = Some(id);
        }
        if let Some(secret) = lookup("TABCAL_CLIENT_SECRET") {
            self.oauth.client_secret = Some(secret);
        }
    }

    /// Authorization server settings, if an OAuth client is configured.
    pub fn provider(&self) -> Option<ProviderConfig> {
        let client_id = self.oauth.client_id.as_ref()?;

        let mut provider = ProviderConfig::google(client_id.clone())
            .with_auth_url(self.oauth.auth_url.as_deref().unwrap_or(GOOGLE_AUTH_URL))
            .with_token_url(self.oauth.token_url.as_deref().unwrap_or(GOOGLE_TOKEN_URL));

        if let Some(secret) = &self.oauth.client_secret {
            provider = provider.with_client_secret(secret.clone());
        }
        if let Some(uri) = &self.oauth.redirect_uri {
            provider = provider.with_redirect_uri(uri.clone());
        }
        if let Some(scopes) = &self.oauth.scopes {
            provider = provider.with_scopes(scopes.clone());
        }

        Some(provider)
    }

    /// HTTP client shared by the token and calendar requests.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = self.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        builder.build().context("Failed to create HTTP client")
    }
}

fn default_config_path() -> PathBuf {
    project_dirs()
        .map(|d| d.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("tabcal.toml"))
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "tabcal", "tabcal")
}
