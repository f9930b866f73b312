//! Slack implementation of [`GenericChatClient`].
//!
//! Channel targets go through `chat.postMessage` with the bot token. Slash command
//! `response_url` targets are posted directly as `in_channel` messages.

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use serde_json::{Value, json};
use slack_morphism::prelude::*;
use tracing::{info, instrument};

use crate::base::{
    config::Config,
    types::{ReplyTarget, Res, Void},
};

use super::{ChatClient, GenericChatClient};

// Type aliases.

type FullClient = slack_morphism::SlackClient<SlackClientHyperConnector<HttpsConnector<HttpConnector>>>;

// Extra methods on `ChatClient` applied by the slack implementation.

impl ChatClient {
    /// Creates a new Slack chat client, verifying the bot token.
    pub async fn slack(config: &Config) -> Res<Self> {
        let client = SlackChatClient::new(config).await?;
        Ok(Self { inner: Arc::new(client) })
    }
}

// Structs.

/// Slack client implementation.
#[derive(Clone)]
struct SlackChatClient {
    bot_token: SlackApiToken,
    client: Arc<FullClient>,
    http: reqwest::Client,
}

impl Deref for SlackChatClient {
    type Target = FullClient;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl SlackChatClient {
    /// Create a new Slack chat client.
    #[instrument(name = "SlackChatClient::new", skip_all)]
    pub async fn new(config: &Config) -> Res<Self> {
        let bot_token = SlackApiToken::new(SlackApiTokenValue(config.slack_bot_token.clone()));

        // Initialize the Slack client.

        let https_connector = HttpsConnector::<HttpConnector>::builder().with_native_roots()?.https_only().enable_all_versions().build();
        let connector = SlackClientHyperConnector::with_connector(https_connector);
        let client = Arc::new(slack_morphism::SlackClient::new(connector));

        // Verify the token before accepting any traffic.

        let session = client.open_session(&bot_token);
        let auth = session.auth_test().await.map_err(|e| anyhow::anyhow!("Slack rejected the bot token: {e}"))?;

        info!(team = %auth.team, bot_user_id = %auth.user_id.0, "Slack bot token verified");

        Ok(Self {
            bot_token,
            client,
            http: reqwest::Client::new(),
        })
    }

    async fn post_to_channel(&self, channel_id: &str, text: &str) -> Void {
        let message = SlackMessageContent::new().with_text(text.to_string());
        let request = SlackApiChatPostMessageRequest::new(SlackChannelId(channel_id.to_string()), message);

        let session = self.open_session(&self.bot_token);

        let _ = session.chat_post_message(&request).await.map_err(|e| anyhow::anyhow!("Failed to send message: {}", e))?;

        Ok(())
    }

    async fn post_to_response_url(&self, url: &str, text: &str) -> Void {
        let response = self
            .http
            .post(url)
            .json(&response_url_payload(text))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send message to response URL: {}", e.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("Response URL rejected the message with status {status}."));
        }

        Ok(())
    }
}

#[async_trait]
impl GenericChatClient for SlackChatClient {
    #[instrument(skip(self, target, text), fields(target = %target))]
    async fn post_message(&self, target: &ReplyTarget, text: &str) -> Void {
        match target {
            ReplyTarget::Channel(channel_id) => self.post_to_channel(channel_id, text).await,
            ReplyTarget::ResponseUrl(url) => self.post_to_response_url(url, text).await,
        }
    }
}

/// Body for a `response_url` post, visible to the whole channel.
fn response_url_payload(text: &str) -> Value {
    json!({
        "response_type": "in_channel",
        "text": text,
    })
}

// Tests.
