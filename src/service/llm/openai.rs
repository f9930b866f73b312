//! OpenAI implementation of [`GenericLlmClient`], using chat completions.

use std::{sync::Arc, time::Duration};

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs, CreateChatCompletionResponse},
};
use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{info, instrument};

use crate::base::{config::Config, types::Res};

use super::{GenericLlmClient, LlmClient};

// Extra methods on `LlmClient` applied by the openai implementation.

impl LlmClient {
    pub fn openai(config: &Config) -> Self {
        let client = OpenAiLlmClient::new(config);
        Self { inner: Arc::new(client) }
    }
}

// Specific implementations.

/// OpenAI LLM client implementation.
#[derive(Clone)]
pub struct OpenAiLlmClient {
    client: Client<OpenAIConfig>,
    config: Config,
}

impl OpenAiLlmClient {
    /// Create a new OpenAI LLM client.
    #[instrument(name = "OpenAiLlmClient::new", skip_all)]
    pub fn new(config: &Config) -> Self {
        let mut cfg = OpenAIConfig::new().with_api_key(config.openai_api_key.clone());

        if let Some(base) = &config.openai_api_base {
            cfg = cfg.with_api_base(base.clone());
        }

        // The client retries rate-limited calls on its own unless the backoff is exhausted up front.
        let no_retries = backoff::ExponentialBackoff {
            max_elapsed_time: Some(Duration::ZERO),
            ..Default::default()
        };

        Self {
            client: Client::with_config(cfg).with_backoff(no_retries),
            config: config.clone(),
        }
    }
}

#[async_trait]
impl GenericLlmClient for OpenAiLlmClient {
    #[instrument(name = "OpenAiLlmClient::generate_email", skip_all, fields(model = %self.config.openai_model))]
    async fn generate_email(&self, system_prompt: &str, user_prompt: &str) -> Res<String> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default().content(system_prompt).build()?.into(),
            ChatCompletionRequestUserMessageArgs::default().content(user_prompt).build()?.into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.config.openai_model)
            .temperature(self.config.openai_temperature)
            .max_completion_tokens(self.config.openai_max_tokens)
            .messages(messages)
            .build()?;

        let limit = Duration::from_secs(self.config.openai_timeout_secs);

        let response = timeout(limit, self.client.chat().create(request))
            .await
            .map_err(|_| anyhow::anyhow!("OpenAI API call timed out after {}s.", limit.as_secs()))?
            .map_err(|e| anyhow::anyhow!("OpenAI API call failed: {e}"))?;

        let text = first_choice_text(&response)?;

        info!(chars = text.len(), "OpenAI completion received");

        Ok(text)
    }
}

/// Get the trimmed text of the first choice, failing if there is none.
fn first_choice_text(response: &CreateChatCompletionResponse) -> Res<String> {
    let text = response
        .choices
        .first()
        .and_then(|choice| choice.message.content.as_deref())
        .map(str::trim)
        .unwrap_or_default();

    if text.is_empty() {
        return Err(anyhow::anyhow!("OpenAI returned an empty completion."));
    }

    Ok(text.to_string())
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: serde_json::Value) -> CreateChatCompletionResponse {
        serde_json::from_value(json).unwrap()
    }

    fn with_content(content: serde_json::Value) -> CreateChatCompletionResponse {
        response(serde_json::json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }]
        }))
    }

    #[test]
    fn first_choice_is_trimmed() {
        let text = first_choice_text(&with_content("  Subject: Hi\n\nBody \n".into())).unwrap();

        assert_eq!(text, "Subject: Hi\n\nBody");
    }

    #[test]
    fn blank_or_missing_content_is_an_error() {
        assert!(first_choice_text(&with_content("   ".into())).is_err());
        assert!(first_choice_text(&with_content(serde_json::Value::Null)).is_err());
    }

    #[test]
    fn no_choices_is_an_error() {
        let empty = response(serde_json::json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "gpt-4o",
            "choices": []
        }));

        assert!(first_choice_text(&empty).is_err());
    }
}
