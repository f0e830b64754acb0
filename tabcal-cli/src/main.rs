//! tabcal CLI
//!
//! Command-line host for the calendar widget data layer.
//!
//! # Usage
//!
//! ```bash
//! # Sign in (prints the consent URL), then finish with the returned code
//! tabcal login
//! tabcal login --code 4/0A...
//!
//! # Upcoming events from the configured calendars
//! tabcal fetch
//! tabcal fetch --calendar primary --calendar team@example.com --days 14
//!
//! # Refetch periodically until Ctrl+C
//! tabcal watch
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use tabcal_core::{
    create_store, AuthMethod, AuthSession, CalendarClient, CalendarQuery, CountingLoader,
    ErrorKind, EventFetcher, FetchError, SignIn, TokenError,
};

mod config;
mod display;

use config::Config;

#[derive(Parser)]
#[command(name = "tabcal")]
#[command(about = "Upcoming events from your calendars, with OAuth token management")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and print upcoming events once
    Fetch {
        #[command(flatten)]
        query: QueryArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Fetch and print upcoming events periodically until Ctrl+C
    Watch {
        #[command(flatten)]
        query: QueryArgs,

        /// Seconds between fetches (defaults to refresh_interval_secs)
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// List the signed-in user's calendars
    Calendars,

    /// Print a valid access token, refreshing it if needed
    Token {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Show the stored credential state
    Status,

    /// Sign in with the authorization code flow
    Login {
        /// Authorization code returned to the redirect URI
        #[arg(long)]
        code: Option<String>,
    },

    /// Remove stored credentials
    Logout,
}

#[derive(clap::Args, Default)]
struct QueryArgs {
    /// Calendar to read (repeatable; replaces the configured list)
    #[arg(long = "calendar")]
    calendars: Vec<String>,

    /// Days ahead to look
    #[arg(long)]
    days: Option<u32>,

    /// Maximum events per calendar and on screen
    #[arg(long)]
    max: Option<u32>,

    /// How to authenticate calendar requests
    #[arg(long, value_enum)]
    auth: Option<AuthArg>,
}

impl QueryArgs {
    fn apply(self, mut query: CalendarQuery) -> CalendarQuery {
        if !self.calendars.is_empty() {
            query.calendar_ids = self.calendars;
        }
        if let Some(days) = self.days {
            query.time_range = days;
        }
        if let Some(max) = self.max {
            query.max_results = max;
        }
        if let Some(auth) = self.auth {
            query.auth_method = auth.into();
        }
        query
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum AuthArg {
    ApiKey,
    Oauth,
}

impl From<AuthArg> for AuthMethod {
    fn from(arg: AuthArg) -> Self {
        match arg {
            AuthArg::ApiKey => AuthMethod::ApiKey,
            AuthArg::Oauth => AuthMethod::OAuth,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(cli.verbose, &config.log_level);

    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            if error_kind(&e).is_some_and(|kind| kind.requires_sign_in()) {
                eprintln!("hint: sign in required, run `tabcal login`");
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool, level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
        }
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Classify the first tabcal error in the chain.
fn error_kind(err: &anyhow::Error) -> Option<ErrorKind> {
    err.chain().find_map(|cause| {
        cause
            .downcast_ref::<FetchError>()
            .map(FetchError::kind)
            .or_else(|| cause.downcast_ref::<TokenError>().map(TokenError::kind))
    })
}

/// Everything a command may need, built from configuration.
struct App {
    config: Config,
    session: Option<AuthSession>,
    fetcher: EventFetcher,
}

impl App {
    fn new(config: Config) -> Result<Self> {
        let http = config.http_client()?;

        let session = match config.provider() {
            Some(provider) => {
                let store = create_store(&config.store).context("Failed to open credential store")?;
                Some(AuthSession::with_http_client(store, provider, http.clone()))
            }
            None => None,
        };

        let mut client = CalendarClient::with_http_client(http);
        if let Some(base) = &config.calendar_api_base {
            client = client.with_base_url(base.clone());
        }

        let mut fetcher = EventFetcher::new().with_client(client);
        if let Some(session) = &session {
            fetcher = fetcher.with_token_source(session.clone());
        }
        if let Some(key) = &config.api_key {
            fetcher = fetcher.with_api_key(key.clone());
        }

        Ok(Self {
            config,
            session,
            fetcher,
        })
    }

    fn session(&self) -> Result<&AuthSession> {
        self.session.as_ref().context(
            "OAuth is not configured: set [oauth].client_id in the config file or TABCAL_CLIENT_ID",
        )
    }
}

async fn run(command: Commands, config: Config) -> Result<()> {
    let app = App::new(config)?;

    match command {
        Commands::Fetch { query, format } => fetch(&app, query, format).await,
        Commands::Watch { query, interval } => watch(&app, query, interval).await,
        Commands::Calendars => calendars(&app).await,
        Commands::Token { format } => token(&app, format).await,
        Commands::Status => status(&app).await,
        Commands::Login { code } => login(&app, code.as_deref()).await,
        Commands::Logout => logout(&app).await,
    }
}

async fn fetch(app: &App, args: QueryArgs, format: Format) -> Result<()> {
    let query = args.apply(app.config.calendar.clone());
    let loader = CountingLoader::new();

    let Some(cache) = app.fetcher.fetch(&query, &loader).await? else {
        println!("No calendars configured");
        return Ok(());
    };

    let now = chrono::Local::now();
    let visible = display::visible_events(
        &cache.events,
        &app.config.display,
        query.max_results as usize,
        &now,
    );

    match format {
        Format::Json => println!("{}", display::render_json(&cache, &visible)?),
        Format::Text => print!("{}", display::render_text(&visible, &app.config.display, &now)),
    }
    Ok(())
}

async fn watch(app: &App, args: QueryArgs, interval: Option<u64>) -> Result<()> {
    let query = args.apply(app.config.calendar.clone());
    let period = Duration::from_secs(interval.unwrap_or(app.config.refresh_interval_secs).max(1));
    let loader = CountingLoader::new();
    let mut ticker = tokio::time::interval(period);

    info!("Fetching every {}s. Press Ctrl+C to stop.", period.as_secs());

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, stopping");
                return Ok(());
            }
        }

        match app.fetcher.fetch(&query, &loader).await {
            Ok(Some(cache)) => {
                let now = chrono::Local::now();
                let visible = display::visible_events(
                    &cache.events,
                    &app.config.display,
                    query.max_results as usize,
                    &now,
                );
                println!("--- {} ---", now.format("%H:%M:%S"));
                print!("{}", display::render_text(&visible, &app.config.display, &now));
            }
            Ok(None) => warn!("No calendars configured"),
            Err(e) if e.kind().requires_sign_in() => {
                error!("{} (run `tabcal login`)", e);
            }
            Err(e) => error!("Fetch failed: {}", e),
        }
    }
}

async fn calendars(app: &App) -> Result<()> {
    app.session()?;
    let calendars = app.fetcher.calendars().await?;

    for calendar in calendars {
        let marker = if calendar.primary { "*" } else { " " };
        println!(
            "{} {:<40} {} ({})",
            marker,
            calendar.id,
            calendar.summary,
            calendar.access_role.as_deref().unwrap_or("unknown")
        );
    }
    Ok(())
}

async fn token(app: &App, format: Format) -> Result<()> {
    let session = app.session()?;
    let token = session.access_token().await?;

    match format {
        Format::Json => {
            let status = session.status().await?;
            let output = serde_json::json!({
                "access_token": token.expose(),
                "expires_at": status.expires_at.map(|t| t.to_rfc3339()),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Format::Text => println!("{}", token.expose()),
    }
    Ok(())
}

async fn status(app: &App) -> Result<()> {
    let Ok(session) = app.session() else {
        println!("OAuth: not configured");
        println!("API key: {}", configured(app.config.api_key.is_some()));
        return Ok(());
    };

    let status = session.status().await?;
    println!("OAuth client: {}", session.provider().client_id);
    println!("Signed in: {}", if status.authenticated { "yes" } else { "no" });
    if let Some(expires_at) = status.expires_at {
        let local = expires_at.with_timezone(&chrono::Local);
        println!("Access token expires: {}", local.format("%Y-%m-%d %H:%M:%S"));
    }
    if status.needs_refresh {
        println!("Access token will be refreshed on next use");
    }
    println!("API key: {}", configured(app.config.api_key.is_some()));
    Ok(())
}

fn configured(yes: bool) -> &'static str {
    if yes { "configured" } else { "not configured" }
}

async fn login(app: &App, code: Option<&str>) -> Result<()> {
    let sign_in = SignIn::new(app.session()?.clone());

    match code {
        None => {
            let (url, state) = sign_in.authorization_url().await?;
            println!("Open this URL in a browser and approve access:\n\n{}\n", url);
            println!("State: {}", state);
            println!("Then run: tabcal login --code <code>");
        }
        Some(code) => {
            let credential = sign_in.complete(code).await?;
            if credential.refresh_token.is_none() {
                warn!("No refresh token was issued; you will need to sign in again when the token expires");
            }
            let local = credential.expires_at.with_timezone(&chrono::Local);
            println!("Signed in. Access token valid until {}", local.format("%Y-%m-%d %H:%M:%S"));
        }
    }
    Ok(())
}

async fn logout(app: &App) -> Result<()> {
    app.session()?.invalidate().await?;
    println!("Signed out");
    Ok(())
}
