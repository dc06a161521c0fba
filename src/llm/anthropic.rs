//! `AnthropicModel`: a hand-rolled Messages API client, adapted from
//! the teacher's `AnthropicCaller` (async-openai has no Anthropic
//! support, so the teacher talks to `reqwest` directly; kept as-is).

use super::{ChatModel, ChatResponse, ChatStreamChunk};
use crate::types::{Message, ToolCall, ToolDefinition};
use async_trait::async_trait;
use futures::stream::BoxStream;

#[derive(serde::Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    tools: Vec<AnthropicToolDef>,
    messages: Vec<AnthropicMessage>,
    stream: bool,
}

#[derive(serde::Serialize)]
struct AnthropicToolDef {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(serde::Serialize, serde::Deserialize, Clone)]
struct AnthropicMessage {
    role: String,
    content: serde_json::Value,
}

#[derive(serde::Deserialize, Debug)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    usage: AnthropicUsage,
}

#[derive(serde::Deserialize, Debug)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(serde::Deserialize, Debug)]
#[serde(tag = "type")]
enum AnthropicContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String, input: serde_json::Value },
}

#[derive(serde::Deserialize, Debug)]
#[serde(tag = "type")]
enum AnthropicStreamEvent {
    #[serde(rename = "content_block_start")]
    ContentBlockStart { content_block: AnthropicContentBlock },
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: AnthropicDelta },
    #[serde(rename = "message_delta")]
    MessageDelta { delta: AnthropicMessageDelta },
    #[serde(other)]
    Other,
}

#[derive(serde::Deserialize, Debug)]
#[serde(tag = "type")]
enum AnthropicDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "input_json_delta")]
    InputJsonDelta { partial_json: String },
}

#[derive(serde::Deserialize, Debug)]
struct AnthropicMessageDelta {
    stop_reason: Option<String>,
}

pub struct AnthropicModel {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
}

impl AnthropicModel {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), api_key: api_key.into(), api_base: "https://api.anthropic.com".to_string() }
    }

    pub fn from_env() -> Result<Self, String> {
        let key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| "ANTHROPIC_API_KEY not set".to_string())?;
        Ok(Self::new(key))
    }

    fn build_tool_defs(tools: &[ToolDefinition]) -> Vec<AnthropicToolDef> {
        tools
            .iter()
            .map(|t| AnthropicToolDef { name: t.name.clone(), description: t.description.clone(), input_schema: t.parameters.clone() })
            .collect()
    }

    /// Anthropic takes the system prompt out-of-band; every other role
    /// maps straight across, and a message carrying `tool_calls` becomes
    /// an assistant `tool_use` content block.
    fn split_system_and_messages(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system = None;
        let mut out = Vec::new();
        for m in messages {
            if m.role == "system" {
                system = Some(m.content.clone());
                continue;
            }
            if m.role == "assistant" && !m.tool_calls.is_empty() {
                let blocks: Vec<serde_json::Value> = m
                    .tool_calls
                    .iter()
                    .map(|tc| serde_json::json!({ "type": "tool_use", "id": tc.id, "name": tc.tool_name, "input": tc.parameters }))
                    .collect();
                out.push(AnthropicMessage { role: "assistant".to_string(), content: serde_json::json!(blocks) });
                continue;
            }
            if m.role == "tool" {
                out.push(AnthropicMessage {
                    role: "user".to_string(),
                    content: serde_json::json!([{
                        "type": "tool_result",
                        "tool_use_id": m.tool_call_id.clone().unwrap_or_default(),
                        "content": m.content,
                    }]),
                });
                continue;
            }
            out.push(AnthropicMessage { role: m.role.clone(), content: serde_json::json!(m.content) });
        }
        (system, out)
    }
}

#[async_trait]
impl ChatModel for AnthropicModel {
    async fn chat(&self, messages: &[Message], tools: &[ToolDefinition], model: &str) -> Result<ChatResponse, String> {
        let (system, anth_messages) = Self::split_system_and_messages(messages);
        let body = AnthropicRequest {
            model: model.to_string(),
            max_tokens: 4096,
            system,
            tools: Self::build_tool_defs(tools),
            messages: anth_messages,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.api_base))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("network error: {e}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(format!("Anthropic API error {status}: {text}"));
        }

        let parsed: AnthropicResponse = response.json().await.map_err(|e| format!("failed to parse Anthropic response: {e}"))?;
        let input_tokens = parsed.usage.input_tokens;
        let output_tokens = parsed.usage.output_tokens;

        let mut content = None;
        let mut tool_calls = Vec::new();
        for block in parsed.content {
            match block {
                AnthropicContentBlock::ToolUse { id, name, input } => {
                    let parameters = serde_json::from_value(input).map_err(|e| format!("invalid tool args: {e}"))?;
                    tool_calls.push(ToolCall { id, tool_name: name, parameters });
                }
                AnthropicContentBlock::Text { text } => content = Some(text),
            }
        }

        if content.is_none() && tool_calls.is_empty() {
            return Err("Anthropic returned empty content".to_string());
        }

        Ok(ChatResponse { content, tool_calls, input_tokens, output_tokens })
    }

    fn chat_stream<'a>(
        &'a self,
        messages: &'a [Message],
        tools: &'a [ToolDefinition],
        model: &'a str,
    ) -> BoxStream<'a, Result<ChatStreamChunk, String>> {
        use futures::{stream, StreamExt};

        let (system, anth_messages) = Self::split_system_and_messages(messages);
        let body = AnthropicRequest {
            model: model.to_string(),
            max_tokens: 4096,
            system,
            tools: Self::build_tool_defs(tools),
            messages: anth_messages,
            stream: true,
        };

        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let api_base = self.api_base.clone();

        stream::once(async move {
            client
                .post(format!("{api_base}/v1/messages"))
                .header("x-api-key", &api_key)
                .header("anthropic-version", "2023-06-01")
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await
                .map_err(|e| format!("network error: {e}"))
        })
        .flat_map(|res| match res {
            Ok(resp) if resp.status().is_success() => {
                let mut accumulated_content = String::new();
                let mut accumulated_tool_id = String::new();
                let mut accumulated_tool_name = String::new();
                let mut accumulated_tool_args = String::new();

                resp.bytes_stream()
                    .map(|b| b.map_err(|e| format!("stream error: {e}")))
                    .map(move |res| {
                        let bytes = res?;
                        let text = String::from_utf8_lossy(&bytes);
                        let mut chunks = Vec::new();

                        for line in text.lines() {
                            let Some(data) = line.strip_prefix("data: ") else { continue };
                            let Ok(event) = serde_json::from_str::<AnthropicStreamEvent>(data) else { continue };
                            match event {
                                AnthropicStreamEvent::ContentBlockStart { content_block: AnthropicContentBlock::ToolUse { id, name, .. } } => {
                                    accumulated_tool_id = id;
                                    accumulated_tool_name = name;
                                }
                                AnthropicStreamEvent::ContentBlockDelta { delta: AnthropicDelta::TextDelta { text } } => {
                                    accumulated_content.push_str(&text);
                                    chunks.push(Ok(ChatStreamChunk::Content(text)));
                                }
                                AnthropicStreamEvent::ContentBlockDelta { delta: AnthropicDelta::InputJsonDelta { partial_json } } => {
                                    accumulated_tool_args.push_str(&partial_json);
                                    chunks.push(Ok(ChatStreamChunk::ToolCallDelta {
                                        name: Some(accumulated_tool_name.clone()),
                                        args_json: accumulated_tool_args.clone(),
                                    }));
                                }
                                AnthropicStreamEvent::MessageDelta { delta: AnthropicMessageDelta { stop_reason: Some(_) } } => {
                                    if !accumulated_tool_args.is_empty() {
                                        let parameters = serde_json::from_str(&accumulated_tool_args).unwrap_or_default();
                                        chunks.push(Ok(ChatStreamChunk::Done(ChatResponse {
                                            content: None,
                                            tool_calls: vec![ToolCall {
                                                id: accumulated_tool_id.clone(),
                                                tool_name: accumulated_tool_name.clone(),
                                                parameters,
                                            }],
                                            input_tokens: 0,
                                            output_tokens: 0,
                                        })));
                                    } else if !accumulated_content.is_empty() {
                                        chunks.push(Ok(ChatStreamChunk::Done(ChatResponse {
                                            content: Some(accumulated_content.clone()),
                                            tool_calls: Vec::new(),
                                            input_tokens: 0,
                                            output_tokens: 0,
                                        })));
                                    }
                                }
                                _ => {}
                            }
                        }
                        Ok(chunks)
                    })
                    .flat_map(|res| match res {
                        Ok(chunks) => stream::iter(chunks),
                        Err(e) => stream::iter(vec![Err(e)]),
                    })
                    .boxed()
            }
            Ok(resp) => stream::once(async move {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                Err(format!("Anthropic API error {status}: {text}"))
            })
            .boxed(),
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        })
        .boxed()
    }
}
