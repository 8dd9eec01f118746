//! Configuration management for GroupGuard
//!
//! Configuration comes from a TOML file or from environment variables layered
//! over the defaults. Every section has defaults, so a file only needs the keys
//! it changes.

use crate::core_guard::is_valid_timestamp_format;
use crate::types::UserId;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bot identity and super-operators
    pub bot: BotConfig,

    /// Store configuration
    pub store: StoreConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Audit message formatting
    pub audit: AuditConfig,

    /// Operator console behaviour
    pub console: ConsoleConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Super-operators: global authority over every scope
    pub owner_ids: Vec<UserId>,
}

impl BotConfig {
    pub fn is_owner(&self, user: UserId) -> bool {
        self.owner_ids.contains(&user)
    }
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file
    pub db_path: PathBuf,

    /// Enable WAL (Write-Ahead Log)
    pub enable_wal: bool,

    /// How long a connection waits on a locked database
    #[serde(with = "humantime_serde")]
    pub busy_timeout: Duration,

    /// Maximum pooled connections
    pub pool_size: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include timestamps
    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,
}

/// Formatting of join-guard audit messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Offset from UTC, in minutes, used for audit timestamps
    pub utc_offset_minutes: i32,

    /// chrono format string
    pub timestamp_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Maximum depth of the back-navigation stack
    pub nav_stack_limit: usize,

    /// Concurrent platform calls during a scope-wide ban or unban
    pub fanout_concurrency: usize,

    /// Removing a safe entry also bans the user across the scope
    pub ban_on_safe_remove: bool,

    /// Maximum invite links produced by one "all children" request
    pub invite_batch_limit: usize,

    /// Maximum entries offered by a chat or manager picker
    pub picker_limit: usize,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics collection
    pub enabled: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./groupguard.sqlite3"),
            enable_wal: true,
            busy_timeout: Duration::from_secs(5),
            pool_size: 8,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { utc_offset_minutes: 0, timestamp_format: "%Y-%m-%d %H:%M:%S %:z".to_string() }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            nav_stack_limit: 16,
            fanout_concurrency: 4,
            ban_on_safe_remove: true,
            invite_batch_limit: 30,
            picker_limit: 50,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables follow the pattern: GROUPGUARD_<SECTION>_<KEY>
    /// Example: GROUPGUARD_BOT_OWNER_IDS=111,222
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::FileRead { path: path.to_path_buf(), source })?;

        let config: Self = toml::from_str(&contents)?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `GROUPGUARD_*` overrides from any key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("GROUPGUARD_BOT_OWNER_IDS") {
            self.bot.owner_ids = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.parse::<UserId>())
                .collect::<Result<_, _>>()
                .map_err(|e| ConfigError::InvalidValue {
                    key: "GROUPGUARD_BOT_OWNER_IDS",
                    reason: e.to_string(),
                })?;
        }

        if let Some(path) = lookup("GROUPGUARD_STORE_DB_PATH") {
            self.store.db_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup("GROUPGUARD_STORE_ENABLE_WAL") {
            self.store.enable_wal = parse_value("GROUPGUARD_STORE_ENABLE_WAL", &raw)?;
        }
        if let Some(raw) = lookup("GROUPGUARD_STORE_BUSY_TIMEOUT") {
            self.store.busy_timeout =
                humantime_serde::re::humantime::parse_duration(&raw).map_err(|e| {
                    ConfigError::InvalidValue {
                        key: "GROUPGUARD_STORE_BUSY_TIMEOUT",
                        reason: e.to_string(),
                    }
                })?;
        }

        if let Some(level) = lookup("GROUPGUARD_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(raw) = lookup("GROUPGUARD_LOG_JSON") {
            self.logging.json_format = parse_value("GROUPGUARD_LOG_JSON", &raw)?;
        }

        if let Some(raw) = lookup("GROUPGUARD_AUDIT_UTC_OFFSET_MINUTES") {
            self.audit.utc_offset_minutes =
                parse_value("GROUPGUARD_AUDIT_UTC_OFFSET_MINUTES", &raw)?;
        }

        if let Some(raw) = lookup("GROUPGUARD_CONSOLE_FANOUT_CONCURRENCY") {
            self.console.fanout_concurrency =
                parse_value("GROUPGUARD_CONSOLE_FANOUT_CONCURRENCY", &raw)?;
        }
        if let Some(raw) = lookup("GROUPGUARD_CONSOLE_BAN_ON_SAFE_REMOVE") {
            self.console.ban_on_safe_remove =
                parse_value("GROUPGUARD_CONSOLE_BAN_ON_SAFE_REMOVE", &raw)?;
        }

        if let Some(raw) = lookup("GROUPGUARD_METRICS_ENABLED") {
            self.metrics.enabled = parse_value("GROUPGUARD_METRICS_ENABLED", &raw)?;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.pool_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "pool_size must be greater than 0".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        // chrono::FixedOffset accepts strictly less than a day
        if self.audit.utc_offset_minutes.unsigned_abs() >= 24 * 60 {
            return Err(ConfigError::ValidationFailed(format!(
                "utc_offset_minutes out of range: {}",
                self.audit.utc_offset_minutes
            )));
        }

        if !is_valid_timestamp_format(&self.audit.timestamp_format) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid timestamp_format: {}",
                self.audit.timestamp_format
            )));
        }

        if self.console.fanout_concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "fanout_concurrency must be greater than 0".to_string(),
            ));
        }

        if self.console.nav_stack_limit == 0 {
            return Err(ConfigError::ValidationFailed(
                "nav_stack_limit must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)?;

        std::fs::write(path, contents)
            .map_err(|source| ConfigError::FileWrite { path: path.to_path_buf(), source })?;

        Ok(())
    }
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue { key, reason: e.to_string() })
}
