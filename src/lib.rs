//! Library root for `aisdr-bot`.
//!
//! Aisdr-bot is an OpenAI-powered sales development assistant for Slack:
//! - Accepts prospect details through a slash command or a channel message
//! - Drafts a cold email aimed at teams using a competing observability tool
//! - Posts the draft back to the channel it was asked from
//!
//! The bot integrates with Slack for chat, OpenAI for generation, and an OTLP
//! backend for telemetry. The architecture is built around extensible traits
//! that allow for different implementations of each service.

pub mod base;
pub mod interaction;
pub mod runtime;
pub mod service;

use base::{config::Config, types::Void};
use rustls::crypto;
use tracing::{debug, info, warn};

/// Public async entry for the binary crate.
///
/// Sets up necessary services and starts the aisdr-bot runtime:
/// - Initializes the crypto provider
/// - Creates the runtime context with the LLM and chat clients
/// - Serves the webhooks until shutdown
pub async fn start(config: Config) -> Void {
    info!("Starting aisdr-bot ...");

    // Start the crypto provider.
    if crypto::ring::default_provider().install_default().is_err() {
        debug!("A crypto provider was already installed.");
    }

    if config.slack_signing_secret.as_deref().is_none_or(str::is_empty) {
        warn!("SLACK_SIGNING_SECRET is not set; inbound requests will not be verified.");
    }

    // Initialize the runtime.
    let runtime = runtime::Runtime::new(config).await?;

    // Start the runtime.
    runtime.start().await?;

    Ok(())
}
