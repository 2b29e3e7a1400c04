//! Configuration management for channel source nodes.

use crate::{CoreError, CoreResult, Paths};
use channel_protocol_types::DEFAULT_CHANNEL_NAME;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

const ENV_LOG_LEVEL: &str = "CHANNEL_LOG_LEVEL";
const ENV_CHANNEL_NAME: &str = "CHANNEL_NAME";
const ENV_REQUEST_TIMEOUT_MS: &str = "CHANNEL_REQUEST_TIMEOUT_MS";

/// Node configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Broadcast channel shared by every node.
    #[serde(default = "default_channel_name")]
    pub channel_name: String,
    /// Forwarded request timeout in milliseconds. Absent means wait forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_channel_name() -> String {
    DEFAULT_CHANNEL_NAME.to_string()
}

/// Command-line overrides, applied on top of the file and environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub log_level: Option<String>,
    pub channel_name: Option<String>,
    /// `0` disables the timeout.
    pub request_timeout_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            channel_name: default_channel_name(),
            request_timeout_ms: None,
        }
    }
}

impl Config {
    /// Load configuration from the config file if present, then apply
    /// environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the config file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Apply command-line overrides, then validate the result.
    pub fn apply_overrides(&mut self, overrides: Overrides) -> CoreResult<()> {
        if let Some(level) = overrides.log_level {
            self.log_level = level;
        }
        if let Some(name) = overrides.channel_name {
            self.channel_name = name;
        }
        if let Some(timeout_ms) = overrides.request_timeout_ms {
            self.request_timeout_ms = (timeout_ms > 0).then_some(timeout_ms);
        }
        self.validate()
    }

    /// Request timeout as a duration, if one is configured.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    /// Apply overrides from `lookup`, which maps variable names to values.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> CoreResult<()> {
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|v| !v.trim().is_empty()) {
            self.log_level = level.trim().to_string();
        }
        if let Some(name) = lookup(ENV_CHANNEL_NAME).filter(|v| !v.trim().is_empty()) {
            self.channel_name = name.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_REQUEST_TIMEOUT_MS) {
            let raw = raw.trim();
            self.request_timeout_ms = if raw.is_empty() || raw == "0" {
                None
            } else {
                Some(raw.parse::<u64>().map_err(|_| {
                    CoreError::Config(format!("{ENV_REQUEST_TIMEOUT_MS} must be milliseconds, got {raw:?}"))
                })?)
            };
        }
        Ok(())
    }

    fn validate(&self) -> CoreResult<()> {
        if self.channel_name.trim().is_empty() {
            return Err(CoreError::Config("channel_name must not be empty".into()));
        }
        if self.request_timeout_ms == Some(0) {
            return Err(CoreError::Config(
                "request_timeout_ms must be positive; omit it to disable the timeout".into(),
            ));
        }
        Ok(())
    }
}
