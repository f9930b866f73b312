//! Binary entry point for `aisdr-bot`.
//!
//! This module provides the command-line interface for aisdr-bot with options
//! for configuration file paths and logging verbosity. It initializes telemetry
//! and starts the service.

use aisdr_bot::base::{config::Config, telemetry, types::Void};
use clap::Parser;
use tracing::error;

/// Aisdr-bot – drafts prospecting emails from Slack.
///
/// Configuration can come from `config.toml` or environment variables.
/// The bot listens for Slack events and slash commands, and replies in the
/// channel with an email generated for the given prospect.
#[derive(Parser, Debug)]
#[command(version, author, about, long_about = None)]
struct Args {
    /// Override the config file path (optional).
    ///
    /// By default, the bot will look for a config file at `.hidden/config.toml`
    /// in the current directory.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,
    /// Increase log verbosity (-v, -vv, etc.).
    ///
    /// Use multiple times to increase verbosity:
    /// - No flag: `LOG_LEVEL` (INFO by default)
    /// - -v: DEBUG level
    /// - -vv or more: TRACE level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Main entry point for the aisdr-bot binary.
///
/// Loads configuration, sets up telemetry, and starts the bot.
#[tokio::main]
async fn main() -> Void {
    let args = Args::parse();

    let config = Config::load(args.config.as_deref())?;

    let guard = telemetry::init(&config, args.verbose)?;

    let result = aisdr_bot::start(config).await;

    if let Err(err) = &result {
        error!("aisdr-bot exited with an error: {}", err);
    }

    // Exporters block while flushing.
    if let Err(err) = tokio::task::spawn_blocking(move || guard.shutdown()).await? {
        error!("{}", err);
    }

    result
}
