//! cdrwatch - watch a carrier web portal for new call records
//!
//! Logs in to the portal once per configured account, polls for call detail
//! records and forwards each new record to the configured sink.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/cdrwatch/config.toml (~/.config/cdrwatch/config.toml)
//! - Logs: $XDG_STATE_HOME/cdrwatch/ (~/.local/state/cdrwatch/)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use cdrwatch_core::config::AccountConfig;
use cdrwatch_core::normalize::normalize_all;
use cdrwatch_core::portal::{
    HttpTransport, PortalTransport, RecordFetcher, SessionManager, NOT_AVAILABLE,
};
use cdrwatch_core::{sink, Config, Supervisor};
use clap::{ArgAction, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "cdrwatch")]
#[command(about = "Forward new call records from a carrier web portal")]
#[command(version)]
struct Args {
    /// Config file (default: ~/.config/cdrwatch/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also log to stderr (-vv for debug level)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Poll every account until interrupted (default)
    Run,

    /// Show the resolved configuration with secrets masked
    CheckConfig,

    /// Attempt a single login for one account
    Login {
        /// Account identifier as written in the config
        identifier: String,
    },

    /// Fetch once for one account and print records as JSON lines
    Fetch {
        /// Account identifier as written in the config
        identifier: String,
    },

    /// Print the account's number ranges as JSON lines
    Ranges {
        /// Account identifier as written in the config
        identifier: String,
    },

    /// Print the account balance
    Balance {
        /// Account identifier as written in the config
        identifier: String,
    },

    /// Print the account statistics as JSON
    Stats {
        /// Account identifier as written in the config
        identifier: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };
    if args.verbose > 0 {
        config.logging.console = true;
    }
    if args.verbose > 1 {
        config.logging.level = "debug".to_string();
    }

    match args.command.unwrap_or(Command::Run) {
        Command::Run => cmd_run(&config).await,
        Command::CheckConfig => cmd_check_config(&config),
        Command::Login { identifier } => {
            let _log_guard = init_logging(&config, args.verbose)?;
            cmd_login(&config, &identifier).await
        }
        Command::Fetch { identifier } => {
            let _log_guard = init_logging(&config, args.verbose)?;
            cmd_fetch(&config, &identifier).await
        }
        Command::Ranges { identifier } => {
            let _log_guard = init_logging(&config, args.verbose)?;
            cmd_ranges(&config, &identifier).await
        }
        Command::Balance { identifier } => {
            let _log_guard = init_logging(&config, args.verbose)?;
            cmd_balance(&config, &identifier).await
        }
        Command::Stats { identifier } => {
            let _log_guard = init_logging(&config, args.verbose)?;
            cmd_stats(&config, &identifier).await
        }
    }
}

/// One-shot commands only log when asked to
fn init_logging(
    config: &Config,
    verbose: u8,
) -> Result<Option<cdrwatch_core::logging::LoggingGuard>> {
    if verbose == 0 {
        return Ok(None);
    }
    let guard =
        cdrwatch_core::logging::init(&config.logging).context("failed to initialize logging")?;
    Ok(Some(guard))
}

async fn cmd_run(config: &Config) -> Result<()> {
    let _log_guard =
        cdrwatch_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!(accounts = config.accounts.len(), "cdrwatch starting");

    let sink = sink::from_config(config).context("failed to set up notification sink")?;
    let shutdown = CancellationToken::new();
    let supervisor =
        Supervisor::start(config, sink, shutdown.clone()).context("failed to start workers")?;

    for skipped in supervisor.skipped() {
        eprintln!("Skipping account {} (see log for details)", skipped);
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    tracing::info!("Shutdown requested");
    shutdown.cancel();
    supervisor.join().await;
    tracing::info!("cdrwatch stopped");

    Ok(())
}

fn cmd_check_config(config: &Config) -> Result<()> {
    let portal = &config.portal;
    let polling = &config.polling;

    println!("cdrwatch Configuration");
    println!("======================");
    println!();
    println!("Config file:     {}", Config::config_path().display());
    println!("Log directory:   {}", cdrwatch_core::logging::log_dir().display());
    println!();

    println!("Portal");
    println!("  Base URL:      {}", portal.base_url);
    match portal.profile() {
        Ok(profile) => {
            println!("  Login:         {}", profile.login_url);
            println!("  Records API:   {}", profile.records_api_url);
            println!("  Records page:  {}", profile.records_page_url);
        }
        Err(e) => println!("  Error:         {}", e),
    }
    println!("  Max redirects: {}", portal.max_redirects);
    println!("  Timeout:       {}s", portal.request_timeout_secs);
    if let Err(e) = portal.validate() {
        println!("  Error:         {}", e);
    }
    println!();

    println!("Polling");
    println!("  Interval:      {}s", polling.interval_secs);
    println!(
        "  Backoff:       after {} failures, {}s doubling to {}s",
        polling.failure_threshold, polling.backoff_floor_secs, polling.backoff_ceiling_secs
    );
    println!("  Heartbeat:     {}s", polling.heartbeat_interval_secs);
    if let Err(e) = polling.validate() {
        println!("  Error:         {}", e);
    }
    println!();

    println!("Accounts ({})", config.accounts.len());
    for account in &config.accounts {
        match account.resolve() {
            Ok(resolved) => println!("  {:<30} secret: <set>", resolved.identifier()),
            Err(e) => println!("  {:<30} error: {}", account.identifier, e),
        }
    }
    println!();

    match &config.telegram {
        Some(telegram) => {
            println!("Telegram");
            println!("  Chat ID:       {}", telegram.chat_id);
            println!(
                "  Bot token:     {}",
                match telegram.resolve_token() {
                    Ok(_) => "<set>".to_string(),
                    Err(e) => format!("error: {}", e),
                }
            );
            println!("  Buttons:       {}", telegram.buttons.len());
        }
        None => println!("Telegram:        disabled (records are logged only)"),
    }

    Ok(())
}

/// Build a session for one configured account
fn open_session(config: &Config, identifier: &str) -> Result<(SessionManager, RecordFetcher)> {
    let account = find_account(config, identifier)?
        .resolve()
        .context("failed to resolve account credentials")?;

    config
        .portal
        .validate()
        .context("invalid portal configuration")?;
    let profile = Arc::new(config.portal.profile().context("invalid portal configuration")?);
    let transport: Arc<dyn PortalTransport> =
        Arc::new(HttpTransport::new(&config.portal).context("failed to create HTTP client")?);

    let session = SessionManager::new(account, transport, Arc::clone(&profile));
    Ok((session, RecordFetcher::new(profile)))
}

fn find_account<'a>(config: &'a Config, identifier: &str) -> Result<&'a AccountConfig> {
    match config
        .accounts
        .iter()
        .find(|a| a.identifier.trim() == identifier.trim())
    {
        Some(account) => Ok(account),
        None => bail!("account {} is not in the configuration", identifier),
    }
}

async fn cmd_login(config: &Config, identifier: &str) -> Result<()> {
    let (mut session, _) = open_session(config, identifier)?;

    let verdict = session.login().await.context("login failed")?;
    println!("Login: {:?}", verdict);

    let summary = session.summary();
    if let Some(username) = &summary.username {
        println!("User:    {}", username);
    }
    if let Some(balance) = &summary.balance {
        println!("Balance: {}", balance);
    }

    Ok(())
}

async fn cmd_fetch(config: &Config, identifier: &str) -> Result<()> {
    let (mut session, fetcher) = open_session(config, identifier)?;

    let rows = fetcher
        .fetch(&mut session)
        .await
        .context("failed to fetch records")?;
    if !session.is_authenticated() {
        bail!("could not establish a session for {}", identifier);
    }

    let account = session.account().identifier().to_string();
    for record in normalize_all(&rows, &account) {
        println!("{}", serde_json::to_string(&record)?);
    }

    Ok(())
}

async fn cmd_ranges(config: &Config, identifier: &str) -> Result<()> {
    let (mut session, fetcher) = open_session(config, identifier)?;

    let ranges = fetcher
        .fetch_ranges(&mut session)
        .await
        .context("failed to fetch number ranges")?;
    if !session.is_authenticated() {
        bail!("could not establish a session for {}", identifier);
    }

    for range in &ranges {
        println!("{}", serde_json::to_string(range)?);
    }

    Ok(())
}

async fn cmd_balance(config: &Config, identifier: &str) -> Result<()> {
    let (mut session, fetcher) = open_session(config, identifier)?;

    let balance = fetcher
        .fetch_balance(&mut session)
        .await
        .context("failed to fetch balance")?;
    if !session.is_authenticated() {
        bail!("could not establish a session for {}", identifier);
    }

    println!("Balance: {}", balance.as_deref().unwrap_or(NOT_AVAILABLE));
    Ok(())
}

async fn cmd_stats(config: &Config, identifier: &str) -> Result<()> {
    let (mut session, fetcher) = open_session(config, identifier)?;

    let ranges = fetcher
        .fetch_ranges(&mut session)
        .await
        .context("failed to fetch number ranges")?;
    let stats = fetcher
        .fetch_stats(&mut session, ranges.len())
        .await
        .context("failed to fetch statistics")?;
    if !session.is_authenticated() {
        bail!("could not establish a session for {}", identifier);
    }

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
