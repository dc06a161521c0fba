//! `RetryingChatModel`: exponential backoff around any `ChatModel`,
//! adapted from the teacher's `RetryingLlmCaller`.

use super::{ChatModel, ChatResponse, ChatStreamChunk};
use crate::types::{Message, ToolDefinition};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;

pub struct RetryingChatModel {
    inner: Arc<dyn ChatModel>,
    max_retries: u32,
}

impl RetryingChatModel {
    pub fn new(inner: Arc<dyn ChatModel>, max_retries: u32) -> Self {
        Self { inner, max_retries }
    }

    fn is_auth_error(err: &str) -> bool {
        let lower = err.to_lowercase();
        ["401", "403", "authentication", "unauthorized", "forbidden", "invalid api key"]
            .iter()
            .any(|needle| lower.contains(needle))
    }

    fn is_rate_limit_error(err: &str) -> bool {
        let lower = err.to_lowercase();
        ["429", "rate limit", "too many requests", "overloaded"].iter().any(|needle| lower.contains(needle))
    }

    /// Exponential backoff capped at 60s; rate limits get a longer base
    /// wait than other transient failures.
    fn backoff_for(attempt: u32, rate_limited: bool) -> Duration {
        let base_wait: u64 = if rate_limited { 5 } else { 1 };
        let wait_s = (base_wait << attempt.min(6)).min(60);
        Duration::from_secs(wait_s)
    }
}

#[async_trait]
impl ChatModel for RetryingChatModel {
    async fn chat(&self, messages: &[Message], tools: &[ToolDefinition], model: &str) -> Result<ChatResponse, String> {
        let mut attempt = 0;
        loop {
            match self.inner.chat(messages, tools, model).await {
                Ok(response) => return Ok(response),
                Err(e) if Self::is_auth_error(&e) => return Err(e),
                Err(e) if attempt >= self.max_retries => return Err(e),
                Err(e) => {
                    let wait = Self::backoff_for(attempt, Self::is_rate_limit_error(&e));
                    tracing::warn!(attempt, error = %e, wait_s = wait.as_secs(), "chat call failed, retrying");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Stream retry is left to a higher layer (the executor can restart a
    /// turn on stream failure); this just delegates to the inner model.
    fn chat_stream<'a>(
        &'a self,
        messages: &'a [Message],
        tools: &'a [ToolDefinition],
        model: &'a str,
    ) -> BoxStream<'a, Result<ChatStreamChunk, String>> {
        self.inner.chat_stream(messages, tools, model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_are_detected() {
        assert!(RetryingChatModel::is_auth_error("401 Unauthorized"));
        assert!(RetryingChatModel::is_auth_error("Invalid API Key provided"));
        assert!(!RetryingChatModel::is_auth_error("connection reset"));
    }

    #[test]
    fn rate_limit_errors_get_longer_backoff() {
        let rl = RetryingChatModel::backoff_for(0, true);
        let normal = RetryingChatModel::backoff_for(0, false);
        assert!(rl > normal);
    }

    #[test]
    fn backoff_is_capped_at_60s() {
        let wait = RetryingChatModel::backoff_for(10, true);
        assert_eq!(wait, Duration::from_secs(60));
    }
}
