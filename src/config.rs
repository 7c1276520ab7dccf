//! Configuration: YAML file + environment overrides
//!
//! Every section has serde defaults, so an empty (or absent) file yields a
//! working configuration. Environment variables override the file; lookup is
//! injected so tests never touch the process environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::scheduler::cadence::parse_duration;
use crate::version::filter::VersionFilterConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app: AppConfig,
    pub containers: ContainersConfig,
    pub registry: RegistryConfig,
    pub notifications: NotificationsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// How often the image check runs, as a duration like `30m` or `1h`.
    pub check_interval: String,
    pub max_concurrency: usize,
    /// Per-check registry timeout, as a duration like `30s`.
    pub registry_timeout: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            check_interval: "30m".to_string(),
            max_concurrency: 10,
            registry_timeout: "30s".to_string(),
        }
    }
}

impl AppConfig {
    /// The check interval as a scheduler cadence expression.
    pub fn check_cadence(&self) -> String {
        format!("@every {}", self.check_interval)
    }

    pub fn registry_timeout(&self) -> Duration {
        parse_duration(&self.registry_timeout).unwrap_or(Duration::from_secs(30))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContainersConfig {
    /// Fixed watch list used when no runtime integration is wired in.
    pub images: Vec<String>,
    /// Repository patterns to check; empty means everything. `*` wildcards.
    pub include: Vec<String>,
    /// Repository patterns to skip. Takes precedence over `include`.
    pub exclude: Vec<String>,
    /// Whether images pinned to `latest` are checked at all.
    pub check_latest: bool,
    /// Whether images on non-Hub registries are checked.
    pub check_private: bool,
    pub version_filters: VersionFilterConfig,
}

impl Default for ContainersConfig {
    fn default() -> Self {
        Self {
            images: Vec::new(),
            include: Vec::new(),
            exclude: Vec::new(),
            check_latest: false,
            check_private: true,
            version_filters: VersionFilterConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub rate_limit: RateLimitConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 100,
            burst: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Channel kinds to enable, e.g. `["log"]`.
    pub channels: Vec<String>,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            channels: vec!["log".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` or `plain`.
    pub format: String,
    /// Optional log file; stderr when unset.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
            file: None,
        }
    }
}

impl Config {
    /// Load from a YAML file (missing file yields defaults), apply
    /// environment overrides, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                serde_yaml::from_str(&raw)?
            }
            Some(path) => {
                debug!(path = %path.display(), "config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `TAGWATCH_*` environment overrides via an injected lookup.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("TAGWATCH_CHECK_INTERVAL") {
            self.app.check_interval = val;
        }
        if let Some(val) = lookup("TAGWATCH_MAX_CONCURRENCY")
            && let Ok(n) = val.parse()
        {
            self.app.max_concurrency = n;
        }
        if let Some(val) = lookup("TAGWATCH_REGISTRY_TIMEOUT") {
            self.app.registry_timeout = val;
        }
        if let Some(val) = lookup("TAGWATCH_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Some(val) = lookup("TAGWATCH_LOG_FORMAT") {
            self.logging.format = val;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if parse_duration(&self.app.check_interval).is_none_or(|d| d.is_zero()) {
            return Err(ConfigError::Invalid(format!(
                "app.check_interval: unparseable duration {:?}",
                self.app.check_interval
            )));
        }
        if parse_duration(&self.app.registry_timeout).is_none_or(|d| d.is_zero()) {
            return Err(ConfigError::Invalid(format!(
                "app.registry_timeout: unparseable duration {:?}",
                self.app.registry_timeout
            )));
        }
        if self.app.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "app.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.registry.rate_limit.requests_per_minute == 0 {
            return Err(ConfigError::Invalid(
                "registry.rate_limit.requests_per_minute must be at least 1".to_string(),
            ));
        }
        if !matches!(self.logging.format.as_str(), "json" | "plain") {
            return Err(ConfigError::Invalid(format!(
                "logging.format must be \"json\" or \"plain\", got {:?}",
                self.logging.format
            )));
        }
        Ok(())
    }
}
