//! Listener configuration: JSON model, defaults, and validation.
//!
//! Global settings are all-or-nothing. Accounts are validated one by one so a
//! broken entry only disables itself; the rejects are kept on [`Config`] for
//! the caller to log.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::types::DeliveryMode;

pub const DEFAULT_PORT: u16 = 993;
pub const DEFAULT_MAILBOX: &str = "INBOX";
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_RECONNECT_INTERVAL_SECS: u64 = 900;
pub const DEFAULT_DEBOUNCE_SECS: u64 = 10;

// ─── Validated model ──────────────────────────────────────────────

/// Where an account's password comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Password(String),
    /// Name of an environment variable read at connect time.
    Env(String),
}

impl Credential {
    /// Resolve to the actual secret. `None` if the env var is unset or empty.
    pub fn resolve(&self) -> Option<String> {
        match self {
            Self::Password(p) => Some(p.clone()),
            Self::Env(var) => std::env::var(var).ok().filter(|v| !v.is_empty()),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(<redacted>)"),
            Self::Env(var) => f.debug_tuple("Env").field(var).finish(),
        }
    }
}

/// One monitored mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountConfig {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
    pub use_tls: bool,
    pub mailbox: String,
}

#[derive(Debug)]
pub struct Config {
    pub accounts: Vec<AccountConfig>,
    /// Accounts that failed validation. They are not started.
    pub rejected: Vec<ConfigError>,
    pub webhook_url: String,
    pub webhook_token: String,
    pub delivery_mode: DeliveryMode,
    pub log_file: Option<PathBuf>,
    pub idle_timeout: Duration,
    pub reconnect_interval: Duration,
    pub debounce: Duration,
    /// When set, dedup state survives restarts in this JSON file.
    pub dedup_state_file: Option<PathBuf>,
}

// ─── Raw JSON ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    accounts: Vec<serde_json::Value>,
    webhook_url: Option<String>,
    webhook_token: Option<String>,
    #[serde(default)]
    delivery_mode: DeliveryMode,
    log_file: Option<PathBuf>,
    idle_timeout: Option<u64>,
    reconnect_interval: Option<u64>,
    debounce_seconds: Option<u64>,
    dedup_state_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    id: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    password_env: Option<String>,
    ssl: Option<bool>,
    mailbox: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn positive_secs(
    value: Option<u64>,
    default: u64,
    field: &'static str,
) -> Result<Duration, ConfigError> {
    match value.unwrap_or(default) {
        0 => Err(ConfigError::ZeroDuration(field)),
        secs => Ok(Duration::from_secs(secs)),
    }
}

impl RawAccount {
    fn validate(self, index: usize) -> Result<AccountConfig, ConfigError> {
        let invalid = |detail: &str| ConfigError::InvalidAccount {
            index,
            detail: detail.to_string(),
        };

        let host = non_empty(self.host).ok_or_else(|| invalid("missing host"))?;
        let username = non_empty(self.username).ok_or_else(|| invalid("missing username"))?;
        let credential = match (self.password, non_empty(self.password_env)) {
            (Some(p), _) if !p.is_empty() => Credential::Password(p),
            (_, Some(var)) => Credential::Env(var),
            _ => return Err(invalid("missing password or password_env")),
        };
        let port = match self.port {
            Some(0) => return Err(invalid("port must be non-zero")),
            Some(p) => p,
            None => DEFAULT_PORT,
        };

        Ok(AccountConfig {
            id: non_empty(self.id).unwrap_or_else(|| username.clone()),
            host,
            port,
            username,
            credential,
            use_tls: self.ssl.unwrap_or(true),
            mailbox: non_empty(self.mailbox).unwrap_or_else(|| DEFAULT_MAILBOX.to_string()),
        })
    }
}

// ─── Loading ──────────────────────────────────────────────────────

impl Config {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(json)?;

        let webhook_url =
            non_empty(raw.webhook_url).ok_or(ConfigError::MissingField("webhook_url"))?;
        let webhook_token =
            non_empty(raw.webhook_token).ok_or(ConfigError::MissingField("webhook_token"))?;
        let idle_timeout =
            positive_secs(raw.idle_timeout, DEFAULT_IDLE_TIMEOUT_SECS, "idle_timeout")?;
        let reconnect_interval = positive_secs(
            raw.reconnect_interval,
            DEFAULT_RECONNECT_INTERVAL_SECS,
            "reconnect_interval",
        )?;
        let debounce =
            positive_secs(raw.debounce_seconds, DEFAULT_DEBOUNCE_SECS, "debounce_seconds")?;

        let mut accounts = Vec::with_capacity(raw.accounts.len());
        let mut rejected = Vec::new();
        let mut seen_ids = HashSet::new();

        for (index, value) in raw.accounts.into_iter().enumerate() {
            let parsed = serde_json::from_value::<RawAccount>(value)
                .map_err(|e| ConfigError::InvalidAccount {
                    index,
                    detail: e.to_string(),
                })
                .and_then(|a| a.validate(index));

            match parsed {
                Ok(account) if !seen_ids.insert(account.id.clone()) => {
                    rejected.push(ConfigError::InvalidAccount {
                        index,
                        detail: format!("duplicate account id {}", account.id),
                    });
                }
                Ok(account) => accounts.push(account),
                Err(e) => rejected.push(e),
            }
        }

        if accounts.is_empty() {
            return Err(rejected.into_iter().next().unwrap_or(ConfigError::NoAccounts));
        }

        Ok(Self {
            accounts,
            rejected,
            webhook_url,
            webhook_token,
            delivery_mode: raw.delivery_mode,
            log_file: raw.log_file,
            idle_timeout,
            reconnect_interval,
            debounce,
            dedup_state_file: raw.dedup_state_file,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&content)
    }
}

/// Default config locations, most specific first.
pub fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(dir) = std::env::var("XDG_CONFIG_HOME")
        && !dir.is_empty()
    {
        paths.push(PathBuf::from(dir).join("mailwake").join("config.json"));
    }
    if let Ok(home) = std::env::var("HOME") {
        let fallback = PathBuf::from(home).join(".config").join("mailwake").join("config.json");
        if !paths.contains(&fallback) {
            paths.push(fallback);
        }
    }
    paths
}

/// Pick the explicit path, or the first default location that exists.
pub fn locate(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    let candidates = default_search_paths();
    candidates
        .iter()
        .find(|p| p.exists())
        .cloned()
        .ok_or_else(|| {
            ConfigError::NotFound(
                candidates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "accounts": [
            {"host": "mail.example.com", "username": "alice@example.com", "password": "pw"}
        ],
        "webhook_url": "http://127.0.0.1:18789/hooks/wake",
        "webhook_token": "tok"
    }"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = Config::from_json_str(MINIMAL).expect("valid");
        assert_eq!(cfg.accounts.len(), 1);
        let acct = &cfg.accounts[0];
        assert_eq!(acct.id, "alice@example.com");
        assert_eq!(acct.port, DEFAULT_PORT);
        assert!(acct.use_tls);
        assert_eq!(acct.mailbox, "INBOX");
        assert_eq!(cfg.idle_timeout, Duration::from_secs(300));
        assert_eq!(cfg.reconnect_interval, Duration::from_secs(900));
        assert_eq!(cfg.debounce, Duration::from_secs(10));
        assert_eq!(cfg.delivery_mode, DeliveryMode::Now);
        assert!(cfg.dedup_state_file.is_none());
        assert!(cfg.rejected.is_empty());
    }

    #[test]
    fn bad_account_does_not_block_others() {
        let json = r#"{
            "accounts": [
                {"host": "", "username": "broken", "password": "pw"},
                {"host": "imap.example.org", "port": "not-a-port",
                 "username": "x", "password": "pw"},
                {"host": "imap.example.org", "port": 143, "ssl": false,
                 "username": "bob", "password_env": "BOB_PW"}
            ],
            "webhook_url": "http://localhost/hook",
            "webhook_token": "tok"
        }"#;
        let cfg = Config::from_json_str(json).expect("one valid account remains");
        assert_eq!(cfg.accounts.len(), 1);
        assert_eq!(cfg.accounts[0].username, "bob");
        assert_eq!(cfg.accounts[0].credential, Credential::Env("BOB_PW".to_string()));
        assert!(!cfg.accounts[0].use_tls);
        assert_eq!(cfg.rejected.len(), 2);
        assert!(matches!(cfg.rejected[0], ConfigError::InvalidAccount { index: 0, .. }));
        assert!(matches!(cfg.rejected[1], ConfigError::InvalidAccount { index: 1, .. }));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let json = r#"{
            "accounts": [
                {"host": "a", "username": "same", "password": "pw"},
                {"host": "b", "username": "same", "password": "pw"}
            ],
            "webhook_url": "u",
            "webhook_token": "t"
        }"#;
        let cfg = Config::from_json_str(json).expect("valid");
        assert_eq!(cfg.accounts.len(), 1);
        assert_eq!(cfg.accounts[0].host, "a");
        assert_eq!(cfg.rejected.len(), 1);
    }

    #[test]
    fn missing_webhook_is_fatal() {
        let json = r#"{
            "accounts": [{"host": "a", "username": "u", "password": "p"}],
            "webhook_token": "t"
        }"#;
        let err = Config::from_json_str(json).expect_err("missing url");
        assert!(matches!(err, ConfigError::MissingField("webhook_url")));
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let json = r#"{
            "accounts": [{"host": "a", "username": "u", "password": "p"}],
            "webhook_url": "u", "webhook_token": "t", "idle_timeout": 0
        }"#;
        let err = Config::from_json_str(json).expect_err("zero idle");
        assert!(matches!(err, ConfigError::ZeroDuration("idle_timeout")));
    }

    #[test]
    fn all_accounts_invalid_is_fatal() {
        let json = r#"{"accounts": [{"host": "a"}], "webhook_url": "u", "webhook_token": "t"}"#;
        let err = Config::from_json_str(json).expect_err("no valid accounts");
        assert!(matches!(err, ConfigError::InvalidAccount { index: 0, .. }));

        let json = r#"{"accounts": [], "webhook_url": "u", "webhook_token": "t"}"#;
        let err = Config::from_json_str(json).expect_err("empty");
        assert!(matches!(err, ConfigError::NoAccounts));
    }

    #[test]
    fn credential_debug_redacts_password() {
        let c = Credential::Password("hunter2".to_string());
        assert!(!format!("{c:?}").contains("hunter2"));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, MINIMAL).expect("write");
        let cfg = Config::load(&path).expect("load");
        assert_eq!(cfg.webhook_token, "tok");

        let missing = dir.path().join("nope.json");
        assert!(matches!(Config::load(&missing), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn locate_prefers_explicit_path() {
        let explicit = Path::new("/etc/mailwake.json");
        assert_eq!(locate(Some(explicit)).expect("explicit"), explicit);
    }
}
