//! Configuration loading and validation.
//!
//! Every section is optional; a missing file section falls back to its
//! defaults so an empty TOML document is a valid configuration.
//!
//! ```toml
//! [logging]
//! level = "info"
//! format = "json"
//!
//! [velocity]
//! window_secs = 600
//!
//! [[accounts]]
//! id = "user_01"
//! credential = "12345678"
//!
//! [[scores]]
//! user = "user_01"
//! score = 35
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt};

use crate::baseline::DEFAULT_LOOKBACK_DAYS;
use crate::engine::{DEFAULT_COLLABORATOR_TIMEOUT, EngineSettings};
use crate::model::{Account, AccountStatus, Destination};
use crate::velocity::DEFAULT_WINDOW;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub velocity: VelocityConfig,
    pub collaborators: CollaboratorConfig,
    pub baseline: BaselineConfig,
    pub publisher: PublisherConfig,
    /// Fixed transfer destination.
    pub transfer: Destination,
    /// Accounts provisioned at startup.
    pub accounts: Vec<AccountConfig>,
    /// Seed table for the in-process score provider.
    pub scores: Vec<ScoreConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

impl LoggingConfig {
    /// Initialize the tracing subscriber. `RUST_LOG` takes precedence over
    /// the configured level. Logs go to stderr.
    pub fn init(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        match self.format.as_str() {
            "json" => fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init(),
            _ => fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct VelocityConfig {
    pub window_secs: u64,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_WINDOW.as_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CollaboratorConfig {
    /// Bound on score provider calls and event sink deliveries.
    pub timeout_ms: u64,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_COLLABORATOR_TIMEOUT.as_millis() as u64,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    pub log_dir: PathBuf,
    pub lookback_days: u32,
    pub max_concurrent_scans: usize,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            max_concurrent_scans: 4,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub webhook_url: Option<String>,
    /// Append published events to the baseline's log partitions.
    pub event_log: bool,
    /// Also emit each published event through tracing.
    pub log_events: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            event_log: true,
            log_events: false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AccountConfig {
    pub id: String,
    pub credential: String,
    #[serde(default)]
    pub status: AccountStatus,
}

impl From<&AccountConfig> for Account {
    fn from(config: &AccountConfig) -> Self {
        Account::new(config.id.as_str(), config.credential.as_str()).with_status(config.status)
    }
}

#[derive(Debug, Deserialize)]
pub struct ScoreConfig {
    pub user: String,
    #[serde(default)]
    pub score: u32,
    #[serde(default)]
    pub blocked: bool,
}

impl Config {
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse_toml(&content)
    }

    pub fn velocity_window(&self) -> Duration {
        Duration::from_secs(self.velocity.window_secs)
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborators.timeout_ms)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            collaborator_timeout: self.collaborator_timeout(),
            destination: self.transfer.clone(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.velocity.window_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "velocity.window_secs",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.collaborators.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "collaborators.timeout_ms",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.baseline.max_concurrent_scans == 0 {
            return Err(ConfigError::InvalidValue {
                field: "baseline.max_concurrent_scans",
                reason: "must be greater than 0".to_string(),
            });
        }
        if let Some(url) = &self.publisher.webhook_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidValue {
                    field: "publisher.webhook_url",
                    reason: format!("'{url}' is not an http(s) url"),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::parse_toml("").unwrap();
        assert_eq!(config.velocity_window(), Duration::from_secs(600));
        assert_eq!(config.collaborator_timeout(), Duration::from_secs(2));
        assert_eq!(config.baseline.log_dir, PathBuf::from("logs"));
        assert_eq!(config.baseline.lookback_days, 7);
        assert!(config.publisher.event_log);
        assert!(config.publisher.webhook_url.is_none());
        assert_eq!(config.transfer, Destination::default());
        assert!(config.accounts.is_empty());
    }

    #[test]
    fn parses_full_document() {
        let config = Config::parse_toml(
            r#"
            [logging]
            level = "debug"
            format = "json"

            [velocity]
            window_secs = 60

            [collaborators]
            timeout_ms = 500

            [baseline]
            log_dir = "/var/log/fds"
            lookback_days = 3

            [publisher]
            webhook_url = "https://hooks.example.com/fds"
            event_log = false

            [transfer]
            label = "Hana"
            account_ref = "222-***-0000"

            [[accounts]]
            id = "user_01"
            credential = "12345678"

            [[accounts]]
            id = "user_02"
            credential = "12341234"
            status = "MEDIUM"

            [[scores]]
            user = "user_02"
            score = 55
            "#,
        )
        .unwrap();

        assert_eq!(config.logging.format, "json");
        assert_eq!(config.velocity_window(), Duration::from_secs(60));
        assert_eq!(config.collaborator_timeout(), Duration::from_millis(500));
        assert_eq!(config.baseline.lookback_days, 3);
        assert_eq!(config.baseline.max_concurrent_scans, 4);
        assert!(!config.publisher.event_log);
        assert_eq!(config.engine_settings().destination.label, "Hana");

        let accounts: Vec<Account> = config.accounts.iter().map(Account::from).collect();
        assert_eq!(accounts[0].status, AccountStatus::Normal);
        assert_eq!(accounts[1].status, AccountStatus::Medium);
        assert_eq!(config.scores[0].score, 55);
        assert!(!config.scores[0].blocked);
    }

    #[test]
    fn zero_window_is_rejected() {
        let err = Config::parse_toml("[velocity]\nwindow_secs = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "velocity.window_secs",
                ..
            }
        ));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = Config::parse_toml("[collaborators]\ntimeout_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn bad_webhook_url_is_rejected() {
        let err = Config::parse_toml("[publisher]\nwebhook_url = \"ftp://x\"").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "publisher.webhook_url",
                ..
            }
        ));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = Config::parse_toml("[velocity\nwindow_secs = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = Config::load("/nonexistent/fds.toml").unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile(_)));
    }
}
