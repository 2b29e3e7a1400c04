//! # Observability
//!
//! Structured logging shared by every channel source binary.
//!
//! Services call [`init`] or [`init_with_config`] once at startup and then use
//! plain `tracing` macros. Every event is written as one JSON line to a
//! central append-only file (`~/.channel-source/logs/channel.jsonl` unless
//! configured otherwise), so several nodes can share one log:
//!
//! - `tail -f ~/.channel-source/logs/channel.jsonl | jq` to follow it
//! - `jq 'select(.fields.request_id == "...")'` to trace one request
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "worker".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! });
//! ```

mod json_layer;
mod writer;

use std::path::PathBuf;

pub use json_layer::{JsonLayer, LogEntry};
pub use writer::{CentralLogWriter, WriterFactory};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service (e.g., "main", "worker").
    /// Included in every log line for filtering.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Optional custom log file path.
    /// Defaults to `~/.channel-source/logs/channel.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Also emit compact logs to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize logging with default settings for `service_name`.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize logging with custom configuration.
///
/// Installs the global subscriber once; later calls in the same process are
/// ignored. If the log file cannot be opened, logs go to stderr only.
pub fn init_with_config(config: LogConfig) {
    writer::init_subscriber(&config);
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.service_name, "unknown");
        assert_eq!(config.default_level, "info");
        assert!(config.log_path.is_none());
        assert!(!config.also_stderr);
    }
}
