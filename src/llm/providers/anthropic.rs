// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Anthropic Claude API provider implementation
//!
//! Implements the LlmProvider trait for Claude models over the Messages API.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::common::{
    parse_numeric_token_counts, parse_retry_after_seconds, server_error, sse_data,
    sse_event_name, sse_frames, status_error,
};
use crate::error::{ApiError, PluribotsError, Result};
use crate::llm::message::{ContentBlock, Message, MessageContent, Role};
use crate::llm::provider::{
    CompletionRequest, ContentBlockDelta, ContentBlockResponse, EventStream, LlmProvider,
    RequestDefaults, StopReason, StreamEvent, ToolDefinition, Usage,
};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Claude provider
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    defaults: RequestDefaults,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider bound to `model`
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, ANTHROPIC_API_URL)
    }

    /// Create with a custom messages endpoint
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
        match self.base_url.strip_suffix("/messages") {
            Some(root) => format!("{}/models", root),
            None => format!("{}/models", self.base_url.trim_end_matches('/')),
        }
    }

    /// Convert internal messages to Anthropic format
    fn convert_messages(&self, messages: &[Message]) -> Vec<AnthropicMessage> {
        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };

                let content = match &m.content {
                    MessageContent::Text(text) => AnthropicContent::Text(text.clone()),
                    MessageContent::Blocks(blocks) => AnthropicContent::Blocks(
                        blocks.iter().map(convert_block).collect(),
                    ),
                };

                AnthropicMessage {
                    role: role.to_string(),
                    content,
                }
            })
            .collect()
    }

    /// Convert tools to Anthropic format
    fn convert_tools(&self, tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: serde_json::json!({
                    "type": t.input_schema.schema_type,
                    "properties": t.input_schema.properties,
                    "required": t.input_schema.required,
                }),
            })
            .collect()
    }

    /// Build the request body
    fn build_body(&self, request: &CompletionRequest) -> AnthropicRequest {
        AnthropicRequest {
            model: request.model.clone(),
            messages: self.convert_messages(&request.messages),
            system: request.system.clone(),
            max_tokens: request.max_tokens,
            temperature: Some(request.temperature),
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(self.convert_tools(&request.tools))
            },
            stream: true,
        }
    }

    /// Parse an error response
    fn parse_error(&self, status: u16, body: &str, retry_after: Option<u64>) -> PluribotsError {
        let Ok(error_response) = serde_json::from_str::<AnthropicError>(body) else {
            return status_error(status, body, retry_after);
        };

        match error_response.error.error_type.as_str() {
            "authentication_error" | "permission_error" => {
                PluribotsError::Api(ApiError::AuthenticationFailed)
            }
            "rate_limit_error" => {
                PluribotsError::Api(ApiError::RateLimited(retry_after.unwrap_or(10) as u32))
            }
            "not_found_error" => {
                PluribotsError::Api(ApiError::ModelNotFound(error_response.error.message))
            }
            "invalid_request_error" => {
                let msg = &error_response.error.message;
                if msg.contains("too long") || (msg.contains("tokens") && msg.contains("maximum"))
                {
                    let (current, limit) = parse_numeric_token_counts(msg);
                    PluribotsError::Api(ApiError::ContextTooLong { current, limit })
                } else {
                    PluribotsError::Api(ApiError::InvalidResponse(error_response.error.message))
                }
            }
            _ => server_error(status, error_response.error.message),
        }
    }
}

fn convert_block(block: &ContentBlock) -> AnthropicContentBlock {
    match block {
        ContentBlock::Text { text } => AnthropicContentBlock::Text { text: text.clone() },
        ContentBlock::Image { source } => AnthropicContentBlock::Image {
            source: AnthropicImageSource {
                source_type: "base64".to_string(),
                media_type: source.media_type.clone(),
                data: source.data.clone(),
            },
        },
        ContentBlock::ToolUse { id, name, input } => AnthropicContentBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        },
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => AnthropicContentBlock::ToolResult {
            tool_use_id: tool_use_id.clone(),
            content: content.clone(),
            is_error: *is_error,
        },
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
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
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
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
            .map(|frame| -> Vec<Result<StreamEvent>> {
                match frame {
                    Ok(frame) => parse_sse_event(&frame).into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                }
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }

    async fn health_check(&self) -> Result<()> {
        let response = self
            .client
            .get(self.models_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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

fn parse_stop_reason(reason: &str) -> StopReason {
    match reason {
        "max_tokens" => StopReason::MaxTokens,
        "tool_use" => StopReason::ToolUse,
        "stop_sequence" => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}

fn parse_usage(u: &serde_json::Value) -> Usage {
    let field = |name: &str| u[name].as_u64().unwrap_or(0) as u32;
    Usage {
        input_tokens: field("input_tokens"),
        output_tokens: field("output_tokens"),
        cache_creation_input_tokens: field("cache_creation_input_tokens"),
        cache_read_input_tokens: field("cache_read_input_tokens"),
    }
}

/// Parse one Server-Sent Event frame into zero or more stream events
fn parse_sse_event(frame: &str) -> Vec<StreamEvent> {
    let (Some(event_type), Some(data)) = (sse_event_name(frame), sse_data(frame)) else {
        return vec![];
    };
    if event_type == "ping" {
        return vec![StreamEvent::Ping];
    }
    if event_type == "message_stop" {
        return vec![StreamEvent::MessageStop];
    }
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&data) else {
        return vec![];
    };

    match event_type {
        "message_start" => {
            let message = &parsed["message"];
            let mut events = vec![StreamEvent::MessageStart {
                id: message["id"].as_str().unwrap_or_default().to_string(),
                model: message["model"].as_str().unwrap_or_default().to_string(),
            }];
            if message.get("usage").is_some() {
                events.push(StreamEvent::MessageDelta {
                    stop_reason: None,
                    usage: Some(parse_usage(&message["usage"])),
                });
            }
            events
        }
        "content_block_start" => {
            let Some(index) = parsed["index"].as_u64() else {
                return vec![];
            };
            let block = &parsed["content_block"];
            let content_block = match block["type"].as_str() {
                Some("text") => ContentBlockResponse::Text {
                    text: block["text"].as_str().unwrap_or("").to_string(),
                },
                Some("tool_use") => ContentBlockResponse::ToolUse {
                    id: block["id"].as_str().unwrap_or_default().to_string(),
                    name: block["name"].as_str().unwrap_or_default().to_string(),
                    input: serde_json::Value::Object(serde_json::Map::new()),
                },
                // Thinking blocks only matter through their deltas.
                _ => return vec![],
            };
            vec![StreamEvent::ContentBlockStart {
                index: index as usize,
                content_block,
            }]
        }
        "content_block_delta" => {
            let Some(index) = parsed["index"].as_u64() else {
                return vec![];
            };
            let delta = &parsed["delta"];
            let delta = match delta["type"].as_str() {
                Some("text_delta") => ContentBlockDelta::TextDelta {
                    text: delta["text"].as_str().unwrap_or_default().to_string(),
                },
                Some("thinking_delta") => ContentBlockDelta::ThinkingDelta {
                    thinking: delta["thinking"].as_str().unwrap_or_default().to_string(),
                },
                Some("input_json_delta") => ContentBlockDelta::InputJsonDelta {
                    partial_json: delta["partial_json"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                },
                _ => return vec![],
            };
            vec![StreamEvent::ContentBlockDelta {
                index: index as usize,
                delta,
            }]
        }
        "content_block_stop" => match parsed["index"].as_u64() {
            Some(index) => vec![StreamEvent::ContentBlockStop {
                index: index as usize,
            }],
            None => vec![],
        },
        "message_delta" => {
            let stop_reason = parsed["delta"]["stop_reason"]
                .as_str()
                .map(parse_stop_reason);
            let usage = parsed.get("usage").map(parse_usage);
            vec![StreamEvent::MessageDelta { stop_reason, usage }]
        }
        "error" => vec![StreamEvent::Error {
            error_type: parsed["error"]["type"]
                .as_str()
                .unwrap_or("error")
                .to_string(),
            message: parsed["error"]["message"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
        }],
        _ => vec![],
    }
}

// Anthropic API types

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<AnthropicContentBlock>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text {
        text: String,
    },
    Image {
        source: AnthropicImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

#[derive(Debug, Serialize)]
struct AnthropicImageSource {
    #[serde(rename = "type")]
    source_type: String,
    media_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}
