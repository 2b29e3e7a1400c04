//! Configuration, paths and logging setup for channel source nodes.

mod config;
mod error;
mod logging;
mod paths;

pub use channel_protocol_types::DEFAULT_CHANNEL_NAME;
pub use config::{Config, Overrides, DEFAULT_LOG_LEVEL};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, init_logging_for_service, parse_level};
pub use paths::Paths;
