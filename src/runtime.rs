//! Runtime services and shared state for the aisdr-bot.

use std::sync::Arc;

use slack_morphism::{SlackSigningSecret, signature_verifier::SlackEventSignatureVerifier};
use tokio::net::TcpListener;
use tracing::{error, info, instrument};

use crate::{
    base::{
        config::Config,
        metrics::Metrics,
        types::{Res, Void},
    },
    interaction::{dedup::RecentEvents, webhook},
    service::{chat::ChatClient, llm::LlmClient},
};

/// Runtime service context that can be shared across the application.
///
/// It is designed to be trivially cloneable, allowing it to be passed around
/// without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct Runtime {
    /// The configuration for the application.
    pub config: Config,
    /// The LLM client instance.
    pub llm: LlmClient,
    /// The chat client instance.
    pub chat: ChatClient,
    /// Business metrics.
    pub metrics: Metrics,
    /// Recently seen Slack event ids.
    pub recent_events: Arc<RecentEvents>,
    /// Request signature verifier, present when a signing secret is configured.
    pub verifier: Option<SlackEventSignatureVerifier>,
}

impl Runtime {
    /// Create a new runtime instance, connecting to OpenAI and Slack.
    #[instrument(skip_all)]
    pub async fn new(config: Config) -> Res<Self> {
        // Initialize the LLM client.
        let llm = LlmClient::openai(&config);

        // Initialize the slack client.
        let chat = ChatClient::slack(&config).await?;

        let metrics = Metrics::new()?;

        Ok(Self::with_clients(config, llm, chat, metrics))
    }

    /// Create a runtime over already constructed clients.
    pub fn with_clients(config: Config, llm: LlmClient, chat: ChatClient, metrics: Metrics) -> Self {
        let recent_events = Arc::new(RecentEvents::new(config.event_dedup_capacity));

        let verifier = config
            .slack_signing_secret
            .as_deref()
            .filter(|secret| !secret.is_empty())
            .map(|secret| SlackEventSignatureVerifier::new(&SlackSigningSecret(secret.to_string())));

        Self {
            config,
            llm,
            chat,
            metrics,
            recent_events,
            verifier,
        }
    }

    /// Serve the webhooks until Ctrl-C.
    pub async fn start(&self) -> Void {
        let address = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&address).await?;

        info!(bind_address = %address, "Listening for Slack webhooks");

        axum::serve(listener, webhook::router(self.clone())).with_graceful_shutdown(shutdown_signal()).await?;

        info!("Server stopped");

        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", err);
        std::future::pending::<()>().await;
    }

    info!("Shutting down ...");
}
