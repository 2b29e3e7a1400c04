//! Logging initialization for channel source nodes.
//!
//! Every node writes structured JSONL to `~/.channel-source/logs/channel.jsonl`
//! through the observability package, with a compact copy on stderr.

use crate::Paths;

const DEFAULT_SERVICE_NAME: &str = "channel-source";

/// Initialize logging for a node.
///
/// `level` is the default filter; `RUST_LOG` overrides it.
///
/// ```ignore
/// init_logging("info");
/// tracing::info!("node started");
/// ```
pub fn init_logging(level: &str) {
    init_logging_for_service(DEFAULT_SERVICE_NAME, level);
}

/// Initialize logging with a custom service name.
///
/// Use this when several nodes share the central log file and need to be
/// told apart.
pub fn init_logging_for_service(service_name: &str, level: &str) {
    observability::init_with_config(observability::LogConfig {
        service_name: service_name.into(),
        default_level: normalize_level(level).into(),
        log_path: Paths::new().ok().map(|paths| paths.log_file()),
        also_stderr: true,
    });
}

fn normalize_level(level: &str) -> &'static str {
    match parse_level(level) {
        tracing::Level::TRACE => "trace",
        tracing::Level::DEBUG => "debug",
        tracing::Level::INFO => "info",
        tracing::Level::WARN => "warn",
        tracing::Level::ERROR => "error",
    }
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.trim().to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
