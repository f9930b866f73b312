//! Integration with Large Language Model services.
//!
//! The module defines the `GenericLlmClient` trait that can be implemented
//! for different LLM providers, with a default implementation for OpenAI.

pub mod openai;

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;

use crate::base::types::Res;

// Traits.

/// Generic LLM client trait that clients must implement.
///
/// Implementing this trait allows different LLM providers to be used with the aisdr-bot.
#[async_trait]
pub trait GenericLlmClient: Send + Sync + 'static {
    /// Draft an email from a rendered system prompt and a user turn.
    ///
    /// Makes exactly one attempt. Returns the raw completion text, which is never empty.
    async fn generate_email(&self, system_prompt: &str, user_prompt: &str) -> Res<String>;
}

// Structs.

/// LLM client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct LlmClient {
    inner: Arc<dyn GenericLlmClient>,
}

impl Deref for LlmClient {
    type Target = dyn GenericLlmClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl LlmClient {
    pub fn new(inner: Arc<dyn GenericLlmClient>) -> Self {
        Self { inner }
    }
}
