//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/cdrwatch/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/cdrwatch/` (~/.config/cdrwatch/)
//! - State/Logs: `$XDG_STATE_HOME/cdrwatch/` (~/.local/state/cdrwatch/)

use crate::error::{Error, Result};
use crate::portal::{LoginForm, PortalProfile, DEFAULT_MAX_HOPS};
use crate::types::Account;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Portal location and login form layout
    #[serde(default)]
    pub portal: PortalConfig,

    /// Poll cadence and login backoff
    #[serde(default)]
    pub polling: PollingConfig,

    /// One worker is started per account
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,

    /// Telegram delivery (optional; records are only logged without it)
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Upstream portal configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PortalConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_login_path")]
    pub login_path: String,

    /// Structured (JSON) record endpoint, relative to `base_url`
    #[serde(default = "default_records_api_path")]
    pub records_api_path: String,

    /// HTML page holding the record table, relative to `base_url`
    #[serde(default = "default_records_page_path")]
    pub records_page_path: String,

    /// Page listing the account's number ranges
    #[serde(default = "default_ranges_path")]
    pub ranges_path: String,

    #[serde(default = "default_balance_path")]
    pub balance_path: String,

    /// Page holding the statistics cards
    #[serde(default = "default_stats_path")]
    pub stats_path: String,

    #[serde(default = "default_credential_field")]
    pub credential_field: String,

    #[serde(default = "default_secret_field")]
    pub secret_field: String,

    #[serde(default = "default_csrf_field")]
    pub csrf_field: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Timeout applied to every request, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum redirect hops followed per request
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            login_path: default_login_path(),
            records_api_path: default_records_api_path(),
            records_page_path: default_records_page_path(),
            ranges_path: default_ranges_path(),
            balance_path: default_balance_path(),
            stats_path: default_stats_path(),
            credential_field: default_credential_field(),
            secret_field: default_secret_field(),
            csrf_field: default_csrf_field(),
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout(),
            max_redirects: default_max_redirects(),
        }
    }
}

impl PortalConfig {
    /// Resolve endpoint URLs against `base_url`.
    pub fn profile(&self) -> Result<PortalProfile> {
        let base = Url::parse(&self.base_url)
            .map_err(|e| Error::Config(format!("invalid portal.base_url: {}", e)))?;

        let join = |field: &str, path: &str| {
            base.join(path)
                .map_err(|e| Error::Config(format!("invalid portal.{}: {}", field, e)))
        };

        Ok(PortalProfile {
            login_url: join("login_path", &self.login_path)?,
            records_api_url: join("records_api_path", &self.records_api_path)?,
            records_page_url: join("records_page_path", &self.records_page_path)?,
            ranges_url: join("ranges_path", &self.ranges_path)?,
            balance_url: join("balance_path", &self.balance_path)?,
            stats_url: join("stats_path", &self.stats_path)?,
            form: LoginForm {
                credential_field: self.credential_field.clone(),
                secret_field: self.secret_field.clone(),
                csrf_field: self.csrf_field.clone(),
            },
            max_redirects: self.max_redirects,
        })
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            return Err(Error::Config(
                "portal.request_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.max_redirects == 0 {
            return Err(Error::Config(
                "portal.max_redirects must be at least 1".to_string(),
            ));
        }
        self.profile().map(|_| ())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_base_url() -> String {
    "https://www.orangecarrier.com".to_string()
}

fn default_login_path() -> String {
    "/login".to_string()
}

fn default_records_api_path() -> String {
    "/CDR/mycdrs?start=0&length=50".to_string()
}

fn default_records_page_path() -> String {
    "/CDR/mycdrs".to_string()
}

fn default_ranges_path() -> String {
    "/myranges".to_string()
}

fn default_balance_path() -> String {
    "/balance".to_string()
}

fn default_stats_path() -> String {
    "/statistics".to_string()
}

fn default_credential_field() -> String {
    "email".to_string()
}

fn default_secret_field() -> String {
    "password".to_string()
}

fn default_csrf_field() -> String {
    "_token".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_redirects() -> usize {
    DEFAULT_MAX_HOPS
}

/// Polling and backoff configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    /// Seconds between poll cycles (and between early login retries)
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Consecutive login failures before backing off
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_backoff_floor")]
    pub backoff_floor_secs: u64,

    #[serde(default = "default_backoff_ceiling")]
    pub backoff_ceiling_secs: u64,

    /// Seconds between heartbeat announcements
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            failure_threshold: default_failure_threshold(),
            backoff_floor_secs: default_backoff_floor(),
            backoff_ceiling_secs: default_backoff_ceiling(),
            heartbeat_interval_secs: default_heartbeat_interval(),
        }
    }
}

impl PollingConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(Error::Config(
                "polling.interval_secs must be at least 1".to_string(),
            ));
        }
        if self.failure_threshold == 0 {
            return Err(Error::Config(
                "polling.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.backoff_floor_secs == 0 || self.backoff_floor_secs > self.backoff_ceiling_secs {
            return Err(Error::Config(
                "polling.backoff_floor_secs must be between 1 and backoff_ceiling_secs"
                    .to_string(),
            ));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(Error::Config(
                "polling.heartbeat_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

fn default_interval() -> u64 {
    10
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_backoff_floor() -> u64 {
    60
}

fn default_backoff_ceiling() -> u64 {
    3600
}

fn default_heartbeat_interval() -> u64 {
    3600
}

/// One portal account.
///
/// The secret may be given inline or read from an environment variable.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AccountConfig {
    #[serde(default)]
    pub identifier: String,

    pub secret: Option<String>,

    /// Name of the environment variable holding the secret
    pub secret_env: Option<String>,
}

impl AccountConfig {
    /// Resolve the account credentials.
    ///
    /// Fails when the identifier is blank or no secret can be found. An inline
    /// `secret` takes precedence over `secret_env`.
    pub fn resolve(&self) -> Result<Account> {
        let identifier = self.identifier.trim();
        if identifier.is_empty() {
            return Err(Error::Config("account identifier is required".to_string()));
        }

        let secret = match (&self.secret, &self.secret_env) {
            (Some(secret), _) if !secret.is_empty() => secret.clone(),
            (_, Some(var)) => std::env::var(var).map_err(|_| {
                Error::Config(format!(
                    "account {}: environment variable {} is not set",
                    identifier, var
                ))
            })?,
            _ => {
                return Err(Error::Config(format!(
                    "account {}: secret or secret_env is required",
                    identifier
                )))
            }
        };

        if secret.is_empty() {
            return Err(Error::Config(format!(
                "account {}: secret is empty",
                identifier
            )));
        }

        Ok(Account::new(identifier, secret))
    }
}

/// Telegram Bot API delivery
#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,

    /// Name of the environment variable holding the bot token
    pub bot_token_env: Option<String>,

    /// Target chat (numeric id or `@channel`)
    pub chat_id: String,

    /// URL buttons attached to every message, one per row
    #[serde(default)]
    pub buttons: Vec<ButtonConfig>,

    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,

    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ButtonConfig {
    pub label: String,
    pub url: String,
}

impl TelegramConfig {
    pub fn resolve_token(&self) -> Result<String> {
        if let Some(token) = self.bot_token.as_ref().filter(|t| !t.is_empty()) {
            return Ok(token.clone());
        }
        match &self.bot_token_env {
            Some(var) => std::env::var(var).map_err(|_| {
                Error::Config(format!(
                    "telegram: environment variable {} is not set",
                    var
                ))
            }),
            None => Err(Error::Config(
                "telegram.bot_token or telegram.bot_token_env is required".to_string(),
            )),
        }
    }
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,

    /// Also log to stderr
    #[serde(default)]
    pub console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
            console: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/cdrwatch/config.toml` (~/.config/cdrwatch/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("cdrwatch").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/cdrwatch/` (~/.local/state/cdrwatch/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("cdrwatch")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.accounts.is_empty());
        assert!(config.telegram.is_none());
        assert_eq!(config.polling.interval_secs, 10);
        assert_eq!(config.polling.failure_threshold, 5);
        assert_eq!(config.polling.backoff_floor_secs, 60);
        assert_eq!(config.polling.backoff_ceiling_secs, 3600);
        assert_eq!(config.portal.request_timeout_secs, 30);
        assert_eq!(config.portal.max_redirects, DEFAULT_MAX_HOPS);
        assert!(config.polling.validate().is_ok());
        assert!(config.portal.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[portal]
base_url = "https://portal.example.com"

[polling]
interval_secs = 15
failure_threshold = 3

[[accounts]]
identifier = "a@x.com"
secret = "pw"

[[accounts]]
identifier = "b@x.com"
secret_env = "B_PASSWORD"

[telegram]
bot_token = "123:abc"
chat_id = "-1001"

[[telegram.buttons]]
label = "Owner"
url = "https://t.me/owner"

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.portal.base_url, "https://portal.example.com");
        assert_eq!(config.portal.login_path, "/login");
        assert_eq!(config.polling.interval_secs, 15);
        assert_eq!(config.polling.failure_threshold, 3);
        assert_eq!(config.accounts.len(), 2);
        assert_eq!(config.accounts[1].secret_env.as_deref(), Some("B_PASSWORD"));

        let telegram = config.telegram.unwrap();
        assert_eq!(telegram.chat_id, "-1001");
        assert_eq!(telegram.buttons.len(), 1);
        assert_eq!(telegram.api_base, "https://api.telegram.org");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_portal_profile_joins_paths() {
        let portal = PortalConfig {
            base_url: "https://portal.example.com".to_string(),
            ..Default::default()
        };
        let profile = portal.profile().unwrap();
        assert_eq!(profile.login_url.as_str(), "https://portal.example.com/login");
        assert_eq!(
            profile.records_api_url.as_str(),
            "https://portal.example.com/CDR/mycdrs?start=0&length=50"
        );
        assert_eq!(profile.login_path(), "/login");
        assert_eq!(profile.form.csrf_field, "_token");
        assert_eq!(profile.ranges_url.as_str(), "https://portal.example.com/myranges");
        assert_eq!(profile.balance_url.as_str(), "https://portal.example.com/balance");
        assert_eq!(profile.stats_url.as_str(), "https://portal.example.com/statistics");
    }

    #[test]
    fn test_portal_validation() {
        let config = PortalConfig {
            request_timeout_secs: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = PortalConfig {
            max_redirects: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = PortalConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_parsed_max_redirects_defaults_to_hop_limit() {
        let config: Config = toml::from_str("[portal]\nbase_url = \"https://p.example\"\n").unwrap();
        assert_eq!(config.portal.max_redirects, DEFAULT_MAX_HOPS);
    }

    #[test]
    fn test_portal_profile_rejects_bad_base_url() {
        let portal = PortalConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(portal.profile(), Err(Error::Config(_))));
    }

    #[test]
    fn test_polling_validation() {
        let config = PollingConfig {
            interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PollingConfig {
            backoff_floor_secs: 7200,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PollingConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_account_resolution() {
        let config = AccountConfig {
            identifier: " a@x.com ".to_string(),
            secret: Some("pw".to_string()),
            secret_env: None,
        };
        let account = config.resolve().unwrap();
        assert_eq!(account.identifier(), "a@x.com");
        assert_eq!(account.secret(), "pw");

        // Missing secret is a configuration error
        let config = AccountConfig {
            identifier: "a@x.com".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.resolve(), Err(Error::Config(_))));

        // Blank identifier
        let config = AccountConfig {
            identifier: "  ".to_string(),
            secret: Some("pw".to_string()),
            secret_env: None,
        };
        assert!(config.resolve().is_err());

        // Unset environment variable
        let config = AccountConfig {
            identifier: "a@x.com".to_string(),
            secret: None,
            secret_env: Some("CDRWATCH_TEST_SURELY_UNSET_VAR".to_string()),
        };
        assert!(config.resolve().is_err());
    }

    #[test]
    fn test_account_secret_from_env() {
        std::env::set_var("CDRWATCH_TEST_ACCOUNT_SECRET", "from-env");
        let config = AccountConfig {
            identifier: "a@x.com".to_string(),
            secret: None,
            secret_env: Some("CDRWATCH_TEST_ACCOUNT_SECRET".to_string()),
        };
        assert_eq!(config.resolve().unwrap().secret(), "from-env");
    }

    #[test]
    fn test_telegram_token_resolution() {
        let config = TelegramConfig {
            bot_token: None,
            bot_token_env: None,
            chat_id: "1".to_string(),
            buttons: vec![],
            api_base: default_telegram_api_base(),
            timeout_secs: 30,
        };
        assert!(config.resolve_token().is_err());

        let config = TelegramConfig {
            bot_token: Some("123:abc".to_string()),
            ..config
        };
        assert_eq!(config.resolve_token().unwrap(), "123:abc");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[[accounts]]\nidentifier = \"a@x.com\"\nsecret = \"pw\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.accounts.len(), 1);

        std::fs::write(&path, "accounts = 3").unwrap();
        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_state_dir() {
        assert!(Config::state_dir().ends_with("cdrwatch"));
    }
}
