//! Chat service integration for aisdr-bot.
//!
//! It defines the `GenericChatClient` trait that can be implemented for different
//! chat services, with a default implementation for Slack.

pub mod slack;

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;

use crate::base::types::{ReplyTarget, Void};

// Traits.

/// Generic "chat" trait that clients must implement.
///
/// Implementing this trait allows different chat services to be used with the aisdr-bot.
#[async_trait]
pub trait GenericChatClient: Send + Sync + 'static {
    /// Post a message to the given target.
    ///
    /// Makes exactly one attempt; a rejected post is an error.
    async fn post_message(&self, target: &ReplyTarget, text: &str) -> Void;
}

// Structs.

/// Chat client for the application.
///
/// It is designed to be trivially cloneable, allowing it to be passed around
/// without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<dyn GenericChatClient>,
}

impl Deref for ChatClient {
    type Target = dyn GenericChatClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl ChatClient {
    pub fn new(inner: Arc<dyn GenericChatClient>) -> Self {
        Self { inner }
    }
}
