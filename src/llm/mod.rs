//! The single interface between the executor/planner and any LLM
//! provider.
//!
//! Generalizes `AsyncLlmCaller`'s `call_async`/`call_stream_async` pair
//! into `ChatModel::chat`/`chat_stream`, taking plain `&[Message]` +
//! `&[ToolDefinition]` instead of `&AgentMemory` + `&ToolRegistry` so a
//! `ChatModel` impl never needs to know about sessions or the registry —
//! only about turning messages and tool schemas into a reply.

pub mod anthropic;
pub mod mock;
pub mod openai;
pub mod retry;

pub use anthropic::AnthropicModel;
pub use mock::MockChatModel;
pub use openai::OpenAiModel;
pub use retry::RetryingChatModel;

use crate::types::{Message, ToolCall, ToolDefinition};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// A complete (non-streaming) reply from a `ChatModel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl ChatResponse {
    pub fn is_final_answer(&self) -> bool {
        self.tool_calls.is_empty()
    }
}

/// One chunk of a streamed `ChatModel` reply.
#[derive(Debug, Clone)]
pub enum ChatStreamChunk {
    Content(String),
    ToolCallDelta { name: Option<String>, args_json: String },
    Done(ChatResponse),
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        model: &str,
    ) -> Result<ChatResponse, String>;

    fn chat_stream<'a>(
        &'a self,
        messages: &'a [Message],
        tools: &'a [ToolDefinition],
        model: &'a str,
    ) -> BoxStream<'a, Result<ChatStreamChunk, String>>;
}
