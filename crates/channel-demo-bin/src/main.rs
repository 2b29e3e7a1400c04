//! Channel demo - runs a main and a worker node over one in-process channel.

mod app;

use std::path::PathBuf;

use channel_config_and_utils::{init_logging_for_service, Config, Overrides, Paths};
use clap::{Parser, Subcommand};

/// Channel source demo command-line interface.
#[derive(Parser)]
#[command(name = "channel-demo")]
#[command(about = "Exchange transforms and queries between two channel source nodes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config and logs. Defaults to ~/.channel-source
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Broadcast channel name. Overrides the config file.
    #[arg(long, global = true)]
    channel: Option<String>,

    /// Forwarded request timeout in milliseconds. Overrides the config file.
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Replicate, push, update, pull and query between the two nodes
    Run,
    /// Push a transform the worker rejects in a before-write listener
    Reject,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let mut config = Config::load(&paths)?;
    config.apply_overrides(Overrides {
        log_level: cli.log_level,
        channel_name: cli.channel,
        request_timeout_ms: cli.timeout_ms,
    })?;

    init_logging_for_service("channel-demo", &config.log_level);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => app::run_exchange(&config).await?,
        Commands::Reject => app::run_rejection(&config).await?,
        Commands::Config => println!("{}", serde_json::to_string_pretty(&config)?),
    }

    Ok(())
}
