// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! OpenAI chat-completions provider
//!
//! Streams over `data:` lines terminated by `[DONE]`. Tool calls arrive as
//! fragments keyed by index and are re-emitted as tool-use blocks so the shared
//! accumulator can assemble them.

use std::collections::BTreeSet;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::common::{
    parse_numeric_token_counts, parse_retry_after_seconds, sse_data, sse_frames, status_error,
};
use crate::error::{ApiError, PluribotsError, Result};
use crate::llm::message::{ContentBlock, Message, MessageContent, Role};
use crate::llm::provider::{
    CompletionRequest, ContentBlockDelta, ContentBlockResponse, EventStream, LlmProvider,
    RequestDefaults, StopReason, StreamEvent, ToolDefinition, Usage,
};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI provider
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    defaults: RequestDefaults,
}

impl OpenAiProvider {
    /// Create a new OpenAI provider bound to `model`
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, OPENAI_API_URL)
    }

    /// Create with a custom chat-completions endpoint
    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
            defaults: RequestDefaults::default(),
        }
    }

    /// Override sampling parameters
    pub fn with_request_defaults(mut self, defaults: RequestDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    fn models_url(&self) -> String {
        match self.base_url.strip_suffix("/chat/completions") {
            Some(root) => format!("{}/models", root),
            None => format!("{}/models", self.base_url.trim_end_matches('/')),
        }
    }

    /// Convert internal messages to OpenAI format
    fn convert_messages(&self, messages: &[Message], system: Option<&str>) -> Vec<OpenAiMessage> {
        let mut result = Vec::new();

        if let Some(sys) = system {
            result.push(OpenAiMessage::text("system", sys));
        }

        for m in messages {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };

            let blocks = match &m.content {
                MessageContent::Text(text) => {
                    result.push(OpenAiMessage::text(role, text));
                    continue;
                }
                MessageContent::Blocks(blocks) => blocks,
            };

            let mut parts = Vec::new();
            let mut tool_calls = Vec::new();
            let mut tool_results = Vec::new();

            for block in blocks {
                match block {
                    ContentBlock::Text { text } => parts.push(OpenAiPart::Text { text: text.clone() }),
                    ContentBlock::Image { source } => parts.push(OpenAiPart::ImageUrl {
                        image_url: OpenAiImageUrl {
                            url: source.data_uri(),
                        },
                    }),
                    ContentBlock::ToolUse { id, name, input } => tool_calls.push(OpenAiToolCall {
                        id: id.clone(),
                        r#type: "function".to_string(),
                        function: OpenAiFunctionCall {
                            name: name.clone(),
                            arguments: input.to_string(),
                        },
                    }),
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    } => tool_results.push((tool_use_id.clone(), content.clone())),
                }
            }

            if !parts.is_empty() || !tool_calls.is_empty() {
                let has_image = parts.iter().any(|p| matches!(p, OpenAiPart::ImageUrl { .. }));
                let content = if has_image {
                    OpenAiContent::Parts(parts)
                } else {
                    OpenAiContent::Text(
                        parts
                            .into_iter()
                            .filter_map(|p| match p {
                                OpenAiPart::Text { text } => Some(text),
                                OpenAiPart::ImageUrl { .. } => None,
                            })
                            .collect::<Vec<_>>()
                            .join("\n"),
                    )
                };
                result.push(OpenAiMessage {
                    role: role.to_string(),
                    content,
                    tool_calls: if tool_calls.is_empty() {
                        None
                    } else {
                        Some(tool_calls)
                    },
                    tool_call_id: None,
                });
            }

            for (tool_use_id, content) in tool_results {
                result.push(OpenAiMessage {
                    role: "tool".to_string(),
                    content: OpenAiContent::Text(content),
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id),
                });
            }
        }

        result
    }

    /// Convert tools to OpenAI format
    fn convert_tools(&self, tools: &[ToolDefinition]) -> Vec<OpenAiTool> {
        tools
            .iter()
            .map(|t| OpenAiTool {
                r#type: "function".to_string(),
                function: OpenAiFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: serde_json::json!({
                        "type": t.input_schema.schema_type,
                        "properties": t.input_schema.properties,
                        "required": t.input_schema.required,
                    }),
                },
            })
            .collect()
    }

    /// Build the request body
    fn build_body(&self, request: &CompletionRequest) -> OpenAiRequest {
        OpenAiRequest {
            model: request.model.clone(),
            messages: self.convert_messages(&request.messages, request.system.as_deref()),
            max_tokens: Some(request.max_tokens),
            temperature: Some(request.temperature),
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(self.convert_tools(&request.tools))
            },
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
        }
    }

    /// Parse an error response
    fn parse_error(&self, status: u16, body: &str, retry_after: Option<u64>) -> PluribotsError {
        let Ok(error_response) = serde_json::from_str::<OpenAiError>(body) else {
            return status_error(status, body, retry_after);
        };

        let message = error_response.error.message;
        let code = error_response
            .error
            .code
            .or(error_response.error.error_type)
            .unwrap_or_default();

        match code.as_str() {
            "invalid_api_key" | "authentication_error" => {
                PluribotsError::Api(ApiError::AuthenticationFailed)
            }
            "rate_limit_exceeded" => {
                PluribotsError::Api(ApiError::RateLimited(retry_after.unwrap_or(10) as u32))
            }
            "context_length_exceeded" => {
                let (current, limit) = parse_numeric_token_counts(&message);
                PluribotsError::Api(ApiError::ContextTooLong { current, limit })
            }
            "model_not_found" => PluribotsError::Api(ApiError::ModelNotFound(message)),
            _ => status_error(status, &message, retry_after),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn request_defaults(&self) -> RequestDefaults {
        self.defaults
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<EventStream> {
        let body = self.build_body(&request);

        let response = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", &self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();

        if !response.status().is_success() {
            let retry_after = parse_retry_after_seconds(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(self.parse_error(status, &body, retry_after));
        }

        let event_stream = sse_frames(response.bytes_stream())
            .scan(ChunkParser::default(), |parser, frame| {
                let events: Vec<Result<StreamEvent>> = match frame {
                    Ok(frame) => parser.parse_frame(&frame).into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                };
                futures::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }

    async fn health_check(&self) -> Result<()> {
        let response = self
            .client
            .get(self.models_url())
            .header("Authorization", format!("Bearer {}", &self.api_key))
            .send()
            .await?;

        let status = response.status().as_u16();
        if response.status().is_success() {
            Ok(())
        } else {
            let retry_after = parse_retry_after_seconds(response.headers());
            let body = response.text().await.unwrap_or_default();
            Err(self.parse_error(status, &body, retry_after))
        }
    }
}

/// Stateful translation of chat-completion chunks.
///
/// Text always lives in block 0; tool call `i` lives in block `i + 1`.
#[derive(Debug, Default)]
struct ChunkParser {
    started: bool,
    text_open: bool,
    open_tools: BTreeSet<usize>,
}

impl ChunkParser {
    fn parse_frame(&mut self, frame: &str) -> Vec<StreamEvent> {
        let Some(data) = sse_data(frame) else {
            return vec![];
        };
        let data = data.trim();

        if data == "[DONE]" {
            let mut events = self.close_blocks();
            events.push(StreamEvent::MessageStop);
            return events;
        }

        if let Ok(error) = serde_json::from_str::<OpenAiError>(data) {
            return vec![StreamEvent::Error {
                error_type: error.error.error_type.unwrap_or_else(|| "error".into()),
                message: error.error.message,
            }];
        }

        let chunk = match serde_json::from_str::<OpenAiStreamChunk>(data) {
            Ok(chunk) => chunk,
            Err(err) => {
                tracing::debug!(target: "pluribots.llm", error = %err, "skipping unparseable chunk");
                return vec![];
            }
        };

        let mut events = Vec::new();

        if !self.started {
            self.started = true;
            events.push(StreamEvent::MessageStart {
                id: chunk.id.clone().unwrap_or_default(),
                model: chunk.model.clone().unwrap_or_default(),
            });
        }

        if let Some(choice) = chunk.choices.into_iter().next() {
            let delta = choice.delta;

            if let Some(reasoning) = delta.reasoning_content.filter(|r| !r.is_empty()) {
                events.push(StreamEvent::ContentBlockDelta {
                    index: 0,
                    delta: ContentBlockDelta::ThinkingDelta {
                        thinking: reasoning,
                    },
                });
            }

            if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                if !self.text_open {
                    self.text_open = true;
                    events.push(StreamEvent::ContentBlockStart {
                        index: 0,
                        content_block: ContentBlockResponse::Text {
                            text: String::new(),
                        },
                    });
                }
                events.push(StreamEvent::ContentBlockDelta {
                    index: 0,
                    delta: ContentBlockDelta::TextDelta { text },
                });
            }

            for tc in delta.tool_calls.unwrap_or_default() {
                let tc_index = tc.index.unwrap_or(0);
                let block_index = tc_index + 1;
                let function = tc.function.unwrap_or_default();

                if self.open_tools.insert(tc_index) {
                    events.push(StreamEvent::ContentBlockStart {
                        index: block_index,
                        content_block: ContentBlockResponse::ToolUse {
                            id: tc.id.unwrap_or_else(|| format!("call_{}", tc_index)),
                            name: function.name.unwrap_or_default(),
                            input: serde_json::Value::Object(serde_json::Map::new()),
                        },
                    });
                }

                if let Some(args) = function.arguments.filter(|a| !a.is_empty()) {
                    events.push(StreamEvent::ContentBlockDelta {
                        index: block_index,
                        delta: ContentBlockDelta::InputJsonDelta { partial_json: args },
                    });
                }
            }

            if let Some(reason) = choice.finish_reason {
                events.extend(self.close_blocks());
                let stop_reason = match reason.as_str() {
                    "length" => StopReason::MaxTokens,
                    "tool_calls" | "function_call" => StopReason::ToolUse,
                    _ => StopReason::EndTurn,
                };
                events.push(StreamEvent::MessageDelta {
                    stop_reason: Some(stop_reason),
                    usage: None,
                });
            }
        }

        if let Some(usage) = chunk.usage {
            events.push(StreamEvent::MessageDelta {
                stop_reason: None,
                usage: Some(Usage {
                    input_tokens: usage.prompt_tokens,
                    output_tokens: usage.completion_tokens,
                    ..Default::default()
                }),
            });
        }

        events
    }

    fn close_blocks(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if std::mem::take(&mut self.text_open) {
            events.push(StreamEvent::ContentBlockStop { index: 0 });
        }
        for tc_index in std::mem::take(&mut self.open_tools) {
            events.push(StreamEvent::ContentBlockStop {
                index: tc_index + 1,
            });
        }
        events
    }
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
    stream: bool,
    stream_options: StreamOptions,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    content: OpenAiContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl OpenAiMessage {
    fn text(role: &str, text: &str) -> Self {
        Self {
            role: role.to_string(),
            content: OpenAiContent::Text(text.to_string()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum OpenAiContent {
    Text(String),
    Parts(Vec<OpenAiPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenAiPart {
    Text { text: String },
    ImageUrl { image_url: OpenAiImageUrl },
}

#[derive(Debug, Serialize)]
struct OpenAiImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct OpenAiToolCall {
    id: String,
    r#type: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Serialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct OpenAiTool {
    r#type: String,
    function: OpenAiFunction,
}

#[derive(Debug, Serialize)]
struct OpenAiFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OpenAiError {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default, rename = "type")]
    error_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: OpenAiStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiStreamDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<OpenAiStreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamToolCall {
    index: Option<usize>,
    id: Option<String>,
    function: Option<OpenAiStreamFunction>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiStreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::message::ImageSource;
    use crate::llm::streaming::StreamAccumulator;

    fn provider() -> OpenAiProvider {
        OpenAiProvider::new("sk-test", "gpt-4o")
    }

    fn data(json: &str) -> String {
        format!("data: {}", json)
    }

    #[test]
    fn test_provider_new() {
        let provider = provider();
        assert_eq!(provider.name(), "openai");
        assert_eq!(provider.model(), "gpt-4o");
        assert_eq!(provider.base_url, OPENAI_API_URL);
        assert_eq!(provider.models_url(), "https://api.openai.com/v1/models");
    }

    #[test]
    fn test_convert_messages_system_first() {
        let converted = provider().convert_messages(&[Message::user("hi")], Some("be nice"));
        assert_eq!(converted.len(), 2);
        assert_eq!(converted[0].role, "system");
        assert_eq!(converted[1].role, "user");
    }

    #[test]
    fn test_convert_images_as_data_uri_parts() {
        let messages = vec![Message::user_with_images(
            "describe",
            vec![ImageSource::base64("image/jpeg", "QUJD")],
        )];
        let json = serde_json::to_value(&provider().convert_messages(&messages, None)[0]).unwrap();

        assert_eq!(json["content"][0]["type"], "image_url");
        assert_eq!(
            json["content"][0]["image_url"]["url"],
            "data:image/jpeg;base64,QUJD"
        );
        assert_eq!(json["content"][1]["type"], "text");
    }

    #[test]
    fn test_convert_tool_round_trip_messages() {
        let messages = vec![
            Message::assistant_blocks(vec![ContentBlock::ToolUse {
                id: "call_1".to_string(),
                name: "search".to_string(),
                input: serde_json::json!({"q": "rust"}),
            }]),
            Message::tool_results(vec![ContentBlock::ToolResult {
                tool_use_id: "call_1".to_string(),
                content: "found".to_string(),
                is_error: None,
            }]),
        ];

        let converted = provider().convert_messages(&messages, None);
        let json = serde_json::to_value(&converted).unwrap();

        assert_eq!(json[0]["role"], "assistant");
        assert_eq!(json[0]["tool_calls"][0]["function"]["name"], "search");
        assert_eq!(json[0]["tool_calls"][0]["function"]["arguments"], "{\"q\":\"rust\"}");
        assert_eq!(json[1]["role"], "tool");
        assert_eq!(json[1]["tool_call_id"], "call_1");
        assert_eq!(json[1]["content"], "found");
    }

    #[test]
    fn test_build_body_requests_usage() {
        let request = CompletionRequest::new("gpt-4o", vec![Message::user("hi")]);
        let json = serde_json::to_value(provider().build_body(&request)).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["stream_options"]["include_usage"], true);
        assert!(json.get("tools").is_none());
    }

    #[test]
    fn test_parse_error_codes() {
        let p = provider();
        let auth = p.parse_error(
            401,
            r#"{"error":{"message":"bad","code":"invalid_api_key"}}"#,
            None,
        );
        assert!(matches!(auth, PluribotsError::Api(ApiError::AuthenticationFailed)));

        let ctx = p.parse_error(
            400,
            r#"{"error":{"message":"requested 130000 tokens, max 128000","code":"context_length_exceeded"}}"#,
            None,
        );
        assert!(matches!(
            ctx,
            PluribotsError::Api(ApiError::ContextTooLong {
                current: 130000,
                limit: 128000
            })
        ));

        let unknown = p.parse_error(503, r#"{"error":{"message":"busy"}}"#, None);
        assert!(matches!(
            unknown,
            PluribotsError::Api(ApiError::ServerError { status: 503, .. })
        ));
    }

    #[test]
    fn test_chunk_parser_text_then_done() {
        let mut parser = ChunkParser::default();
        let mut acc = StreamAccumulator::new();

        let frames = [
            data(r#"{"id":"c1","model":"gpt-4o","choices":[{"delta":{"content":"Hel"}}]}"#),
            data(r#"{"id":"c1","choices":[{"delta":{"content":"lo"}}]}"#),
            data(r#"{"id":"c1","choices":[{"delta":{},"finish_reason":"stop"}]}"#),
            data(r#"{"id":"c1","choices":[],"usage":{"prompt_tokens":12,"completion_tokens":3}}"#),
            data("[DONE]"),
        ];
        for frame in &frames {
            for event in parser.parse_frame(frame) {
                acc.process_event(event);
            }
        }

        assert_eq!(acc.text(), "Hello");
        assert_eq!(acc.stop_reason(), Some(StopReason::EndTurn));
        let usage = acc.usage_or_estimate(0);
        assert_eq!(usage.input_tokens, 12);
        assert_eq!(usage.output_tokens, 3);
    }

    #[test]
    fn test_chunk_parser_reasoning_is_thinking() {
        let mut parser = ChunkParser::default();
        let events = parser.parse_frame(&data(
            r#"{"choices":[{"delta":{"reasoning_content":"let me see"}}]}"#,
        ));
        assert!(events.iter().any(|e| matches!(
            e,
            StreamEvent::ContentBlockDelta { delta: ContentBlockDelta::ThinkingDelta { thinking }, .. } if thinking == "let me see"
        )));
    }

    #[test]
    fn test_chunk_parser_accumulates_tool_call_fragments() {
        let mut parser = ChunkParser::default();
        let mut acc = StreamAccumulator::new();

        let frames = [
            data(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"search","arguments":""}}]}}]}"#),
            data(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"q\":"}}]}}]}"#),
            data(r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"fetch","arguments":"{}"}}]}}]}"#),
            data(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"rust\"}"}}]}}]}"#),
            data(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#),
            data("[DONE]"),
        ];
        for frame in &frames {
            for event in parser.parse_frame(frame) {
                acc.process_event(event);
            }
        }

        let calls = acc.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].input, serde_json::json!({"q": "rust"}));
        assert_eq!(calls[1].name, "fetch");
        assert_eq!(acc.stop_reason(), Some(StopReason::ToolUse));
    }

    #[test]
    fn test_chunk_parser_error_payload() {
        let mut parser = ChunkParser::default();
        let events = parser.parse_frame(&data(
            r#"{"error":{"message":"overloaded","type":"server_error"}}"#,
        ));
        assert!(matches!(
            &events[0],
            StreamEvent::Error { error_type, message } if error_type == "server_error" && message == "overloaded"
        ));
    }

    #[test]
    fn test_chunk_parser_ignores_comments_and_garbage() {
        let mut parser = ChunkParser::default();
        assert!(parser.parse_frame(": keep-alive").is_empty());
        assert!(parser.parse_frame("data: not-json").is_empty());
    }
}
