//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the executor with mock implementations.

use crate::api::{ApiError, ByteStream, CourseBotClient};
use crate::history::{BotId, History, Prompt, PromptId};
use crate::state_machine::ElementId;
use async_trait::async_trait;
use std::sync::Arc;

/// Network operations of the course bot backend
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Load every prompt/response pair of the conversation
    async fn fetch_history(&self, bot_id: BotId) -> Result<History, ApiError>;

    /// Create a prompt; the server assigns its id and timestamp
    async fn create_prompt(
        &self,
        bot_id: BotId,
        body: &str,
        csrf_token: &str,
    ) -> Result<Prompt, ApiError>;

    /// Trigger generation and return the response body as it arrives
    async fn open_response_stream(
        &self,
        bot_id: BotId,
        prompt_id: PromptId,
        csrf_token: &str,
    ) -> Result<ByteStream, ApiError>;
}

/// The rendered surface elements are scrolled on
pub trait Viewport: Send + Sync {
    /// Scroll `element` into view. Returns false when it has not been
    /// rendered yet; the caller polls.
    fn scroll_into_view(&self, element: &ElementId) -> bool;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: ChatApi + ?Sized> ChatApi for Arc<T> {
    async fn fetch_history(&self, bot_id: BotId) -> Result<History, ApiError> {
        (**self).fetch_history(bot_id).await
    }

    async fn create_prompt(
        &self,
        bot_id: BotId,
        body: &str,
        csrf_token: &str,
    ) -> Result<Prompt, ApiError> {
        (**self).create_prompt(bot_id, body, csrf_token).await
    }

    async fn open_response_stream(
        &self,
        bot_id: BotId,
        prompt_id: PromptId,
        csrf_token: &str,
    ) -> Result<ByteStream, ApiError> {
        (**self)
            .open_response_stream(bot_id, prompt_id, csrf_token)
            .await
    }
}

impl<T: Viewport + ?Sized> Viewport for Arc<T> {
    fn scroll_into_view(&self, element: &ElementId) -> bool {
        (**self).scroll_into_view(element)
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

#[async_trait]
impl ChatApi for CourseBotClient {
    async fn fetch_history(&self, bot_id: BotId) -> Result<History, ApiError> {
        CourseBotClient::fetch_history(self, bot_id).await
    }

    async fn create_prompt(
        &self,
        bot_id: BotId,
        body: &str,
        csrf_token: &str,
    ) -> Result<Prompt, ApiError> {
        CourseBotClient::create_prompt(self, bot_id, body, csrf_token).await
    }

    async fn open_response_stream(
        &self,
        bot_id: BotId,
        prompt_id: PromptId,
        csrf_token: &str,
    ) -> Result<ByteStream, ApiError> {
        CourseBotClient::open_response_stream(self, bot_id, prompt_id, csrf_token).await
    }
}
