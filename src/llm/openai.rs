//! `OpenAiModel`: OpenAI and OpenAI-compatible (Groq, Together, Ollama,
//! Fireworks, ...) chat completions, adapted from the teacher's
//! `OpenAiCaller` to the `ChatModel` trait.

use super::{ChatModel, ChatResponse, ChatStreamChunk};
use crate::types::{Message, ToolCall, ToolDefinition};
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestMessage, ChatCompletionTool,
        ChatCompletionToolType, CreateChatCompletionRequestArgs, FunctionObject,
    },
    Client,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;

pub struct OpenAiModel {
    client: Client<OpenAIConfig>,
}

impl OpenAiModel {
    /// Standard OpenAI client, reading `OPENAI_API_KEY` from the environment.
    pub fn new() -> Self {
        Self { client: Client::new() }
    }

    /// Custom base URL for an OpenAI-compatible endpoint.
    pub fn with_base_url(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        let config = OpenAIConfig::new().with_api_base(api_base).with_api_key(api_key);
        Self { client: Client::with_config(config) }
    }

    fn build_tools(tools: &[ToolDefinition]) -> Vec<ChatCompletionTool> {
        tools
            .iter()
            .map(|t| ChatCompletionTool {
                r#type: ChatCompletionToolType::Function,
                function: FunctionObject {
                    name: t.name.clone(),
                    description: Some(t.description.clone()),
                    parameters: Some(t.parameters.clone()),
                },
            })
            .collect()
    }

    /// Converts our provider-agnostic `Message`s into OpenAI's wire shape
    /// via a JSON round-trip, the same technique the teacher used to
    /// bridge `AgentMemory::build_messages()`'s `Vec<Value>`.
    fn build_messages(messages: &[Message]) -> Result<Vec<ChatCompletionRequestMessage>, String> {
        let values: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                if m.role == "assistant" && !m.tool_calls.is_empty() {
                    serde_json::json!({
                        "role": "assistant",
                        "content": if m.content.is_empty() { serde_json::Value::Null } else { serde_json::Value::String(m.content.clone()) },
                        "tool_calls": m.tool_calls.iter().map(|tc| serde_json::json!({
                            "id": tc.id,
                            "type": "function",
                            "function": { "name": tc.tool_name, "arguments": serde_json::to_string(&tc.parameters).unwrap_or_default() }
                        })).collect::<Vec<_>>(),
                    })
                } else if m.role == "tool" {
                    serde_json::json!({
                        "role": "tool",
                        "tool_call_id": m.tool_call_id.clone().unwrap_or_default(),
                        "content": m.content,
                    })
                } else {
                    serde_json::json!({ "role": m.role, "content": m.content })
                }
            })
            .collect();
        serde_json::from_value(serde_json::Value::Array(values)).map_err(|e| format!("failed to build OpenAI messages: {e}"))
    }

    fn parse_tool_call(tc: &ChatCompletionMessageToolCall) -> Result<ToolCall, String> {
        let parameters: HashMap<String, serde_json::Value> =
            serde_json::from_str(&tc.function.arguments).map_err(|e| format!("failed to parse tool args: {e}"))?;
        Ok(ToolCall { id: tc.id.clone(), tool_name: tc.function.name.clone(), parameters })
    }
}

impl Default for OpenAiModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatModel for OpenAiModel {
    async fn chat(&self, messages: &[Message], tools: &[ToolDefinition], model: &str) -> Result<ChatResponse, String> {
        let oai_messages = Self::build_messages(messages)?;
        let oai_tools = Self::build_tools(tools);

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(model).messages(oai_messages);
        if !oai_tools.is_empty() {
            builder.tools(oai_tools);
        }
        let request = builder.build().map_err(|e| format!("failed to build request: {e}"))?;

        let response = self.client.chat().create(request).await.map_err(|e| format!("OpenAI API error: {e}"))?;

        let (input_tokens, output_tokens) = response
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));

        let choice = response.choices.into_iter().next().ok_or("empty response from OpenAI")?;
        let message = choice.message;

        if let Some(tool_calls) = message.tool_calls {
            let parsed = tool_calls
                .iter()
                .map(Self::parse_tool_call)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(ChatResponse { content: None, tool_calls: parsed, input_tokens, output_tokens });
        }

        Ok(ChatResponse { content: message.content, tool_calls: Vec::new(), input_tokens, output_tokens })
    }

    fn chat_stream<'a>(
        &'a self,
        messages: &'a [Message],
        tools: &'a [ToolDefinition],
        model: &'a str,
    ) -> BoxStream<'a, Result<ChatStreamChunk, String>> {
        use futures::{stream, StreamExt};

        let oai_messages = match Self::build_messages(messages) {
            Ok(m) => m,
            Err(e) => return stream::once(async move { Err(e) }).boxed(),
        };
        let oai_tools = Self::build_tools(tools);

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(model).messages(oai_messages).stream(true);
        if !oai_tools.is_empty() {
            builder.tools(oai_tools);
        }
        let request = match builder.build() {
            Ok(r) => r,
            Err(e) => return stream::once(async move { Err(format!("failed to build request: {e}")) }).boxed(),
        };

        let client = self.client.clone();

        stream::once(async move { client.chat().create_stream(request).await.map_err(|e| format!("OpenAI API error: {e}")) })
            .flat_map(|res| match res {
                Ok(inner) => {
                    let mut accumulated_content = String::new();

                    #[derive(Default)]
                    struct ToolCallAcc {
                        id: Option<String>,
                        name: Option<String>,
                        args: String,
                    }
                    let mut tool_accumulators: HashMap<i32, ToolCallAcc> = HashMap::new();

                    inner
                        .map(move |res| {
                            let res = res.map_err(|e| format!("OpenAI stream error: {e}"))?;
                            let choice = res.choices.into_iter().next().ok_or("empty choice in stream")?;
                            let delta = choice.delta;

                            if let Some(tool_calls) = delta.tool_calls {
                                for tc in tool_calls {
                                    let acc = tool_accumulators.entry(tc.index).or_default();
                                    if let Some(id) = tc.id {
                                        acc.id = Some(id);
                                    }
                                    if let Some(func) = tc.function {
                                        if let Some(name) = func.name {
                                            acc.name = Some(name);
                                        }
                                        if let Some(args) = func.arguments {
                                            acc.args.push_str(&args);
                                        }
                                    }
                                }
                                let (name, args_json) = tool_accumulators
                                    .values()
                                    .next()
                                    .map(|a| (a.name.clone(), a.args.clone()))
                                    .unwrap_or((None, String::new()));
                                return Ok(ChatStreamChunk::ToolCallDelta { name, args_json });
                            }

                            if let Some(content) = delta.content {
                                accumulated_content.push_str(&content);
                                return Ok(ChatStreamChunk::Content(content));
                            }

                            if choice.finish_reason.is_some() {
                                if !tool_accumulators.is_empty() {
                                    let tool_calls = tool_accumulators
                                        .values()
                                        .map(|acc| {
                                            let parameters: HashMap<String, serde_json::Value> =
                                                serde_json::from_str(&acc.args).unwrap_or_default();
                                            ToolCall {
                                                id: acc.id.clone().unwrap_or_default(),
                                                tool_name: acc.name.clone().unwrap_or_default(),
                                                parameters,
                                            }
                                        })
                                        .collect();
                                    return Ok(ChatStreamChunk::Done(ChatResponse {
                                        content: None,
                                        tool_calls,
                                        input_tokens: 0,
                                        output_tokens: 0,
                                    }));
                                } else if !accumulated_content.is_empty() {
                                    return Ok(ChatStreamChunk::Done(ChatResponse {
                                        content: Some(accumulated_content.clone()),
                                        tool_calls: Vec::new(),
                                        input_tokens: 0,
                                        output_tokens: 0,
                                    }));
                                }
                            }

                            Err("SKIP".to_string())
                        })
                        .filter(|res| futures::future::ready(!matches!(res, Err(e) if e == "SKIP")))
                        .boxed()
                }
                Err(e) => stream::once(async move { Err(e) }).boxed(),
            })
            .boxed()
    }
}
