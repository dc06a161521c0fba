//! `MockChatModel`: a programmable queue of canned replies for tests,
//! adapted from the teacher's `MockLlmCaller`.

use super::{ChatModel, ChatResponse, ChatStreamChunk};
use crate::types::{Message, ToolDefinition};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Mutex;

pub struct MockChatModel {
    responses: Mutex<Vec<ChatResponse>>,
    call_log: Mutex<Vec<(String, usize)>>,
}

impl MockChatModel {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self { responses: Mutex::new(responses), call_log: Mutex::new(Vec::new()) }
    }

    pub fn call_count(&self) -> usize {
        self.call_log.lock().unwrap().len()
    }

    /// The `model` argument and message count passed on the Nth call.
    pub fn call_for(&self, n: usize) -> Option<(String, usize)> {
        self.call_log.lock().unwrap().get(n).cloned()
    }

    fn next_response(&self) -> Result<ChatResponse, String> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err("MockChatModel: no more programmed responses".to_string());
        }
        Ok(responses.remove(0))
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn chat(&self, messages: &[Message], _tools: &[ToolDefinition], model: &str) -> Result<ChatResponse, String> {
        self.call_log.lock().unwrap().push((model.to_string(), messages.len()));
        self.next_response()
    }

    fn chat_stream<'a>(
        &'a self,
        messages: &'a [Message],
        _tools: &'a [ToolDefinition],
        model: &'a str,
    ) -> BoxStream<'a, Result<ChatStreamChunk, String>> {
        self.call_log.lock().unwrap().push((model.to_string(), messages.len()));
        match self.next_response() {
            Ok(response) => {
                let content_chunk = response.content.clone().map(ChatStreamChunk::Content);
                let done_chunk = ChatStreamChunk::Done(response);
                let chunks: Vec<Result<ChatStreamChunk, String>> =
                    content_chunk.into_iter().map(Ok).chain(std::iter::once(Ok(done_chunk))).collect();
                stream::iter(chunks).boxed()
            }
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    #[tokio::test]
    async fn returns_programmed_responses_in_order() {
        let model = MockChatModel::new(vec![
            ChatResponse { content: Some("first".to_string()), tool_calls: vec![], input_tokens: 1, output_tokens: 1 },
            ChatResponse { content: Some("second".to_string()), tool_calls: vec![], input_tokens: 1, output_tokens: 1 },
        ]);
        let messages = vec![Message::user("hi")];
        let r1 = model.chat(&messages, &[], "gpt-4").await.unwrap();
        assert_eq!(r1.content.as_deref(), Some("first"));
        let r2 = model.chat(&messages, &[], "gpt-4").await.unwrap();
        assert_eq!(r2.content.as_deref(), Some("second"));
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn errors_when_exhausted() {
        let model = MockChatModel::new(vec![]);
        let messages = vec![Message::user("hi")];
        let err = model.chat(&messages, &[], "gpt-4").await.unwrap_err();
        assert!(err.contains("no more programmed responses"));
    }
}
