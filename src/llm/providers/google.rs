// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Google Gemini provider
//!
//! Uses `streamGenerateContent` with `alt=sse`. Each frame carries whole
//! candidate parts; function calls arrive complete rather than as fragments.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::common::{parse_retry_after_seconds, sse_data, sse_frames, status_error};
use crate::error::{ApiError, PluribotsError, Result};
use crate::llm::message::{ContentBlock, Message, MessageContent, Role};
use crate::llm::provider::{
    CompletionRequest, ContentBlockDelta, ContentBlockResponse, EventStream, LlmProvider,
    RequestDefaults, StopReason, StreamEvent, ToolDefinition, Usage,
};

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com";

/// Google Gemini provider
pub struct GoogleProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    defaults: RequestDefaults,
}

impl GoogleProvider {
    /// Create a new Gemini provider bound to `model`
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, GEMINI_API_URL)
    }

    /// Create with a custom API root
    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            defaults: RequestDefaults::default(),
        }
    }

    /// Override sampling parameters
    pub fn with_request_defaults(mut self, defaults: RequestDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    fn stream_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?key={}&alt=sse",
            self.base_url, model, self.api_key
        )
    }

    fn models_url(&self) -> String {
        format!("{}/v1beta/models?key={}", self.base_url, self.api_key)
    }

    /// Convert internal messages to Gemini `contents`
    fn convert_messages(&self, messages: &[Message]) -> Vec<Value> {
        // functionResponse is matched by name, not id.
        let tool_names: HashMap<&str, &str> = messages
            .iter()
            .filter_map(|m| match &m.content {
                MessageContent::Blocks(blocks) => Some(blocks),
                MessageContent::Text(_) => None,
            })
            .flatten()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, .. } => Some((id.as_str(), name.as_str())),
                _ => None,
            })
            .collect();

        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                };
                let parts: Vec<Value> = match &m.content {
                    MessageContent::Text(text) => vec![json!({ "text": text })],
                    MessageContent::Blocks(blocks) => blocks
                        .iter()
                        .map(|block| match block {
                            ContentBlock::Text { text } => json!({ "text": text }),
                            ContentBlock::Image { source } => json!({
                                "inline_data": {
                                    "mime_type": source.media_type,
                                    "data": source.data,
                                }
                            }),
                            ContentBlock::ToolUse { name, input, .. } => json!({
                                "functionCall": { "name": name, "args": input }
                            }),
                            ContentBlock::ToolResult {
                                tool_use_id,
                                content,
                                ..
                            } => json!({
                                "functionResponse": {
                                    "name": tool_names.get(tool_use_id.as_str()).copied().unwrap_or(tool_use_id.as_str()),
                                    "response": { "content": content },
                                }
                            }),
                        })
                        .collect(),
                };
                json!({ "role": role, "parts": parts })
            })
            .collect()
    }

    fn convert_tools(&self, tools: &[ToolDefinition]) -> Value {
        let declarations: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": {
                        "type": t.input_schema.schema_type,
                        "properties": t.input_schema.properties,
                        "required": t.input_schema.required,
                    },
                })
            })
            .collect();
        json!([{ "functionDeclarations": declarations }])
    }

    /// Build the request body
    fn build_body(&self, request: &CompletionRequest) -> Value {
        let mut body = json!({
            "contents": self.convert_messages(&request.messages),
            "generationConfig": {
                "maxOutputTokens": request.max_tokens,
                "temperature": request.temperature,
            }
        });

        if let Some(system) = &request.system {
            body["system_instruction"] = json!({ "parts": [{ "text": system }] });
        }
        if !request.tools.is_empty() {
            body["tools"] = self.convert_tools(&request.tools);
        }
        body
    }

    /// Parse an error response
    fn parse_error(&self, status: u16, body: &str, retry_after: Option<u64>) -> PluribotsError {
        let Ok(error_response) = serde_json::from_str::<GeminiError>(body) else {
            return status_error(status, body, retry_after);
        };
        let message = error_response.error.message;

        match error_response.error.status.as_deref() {
            Some("UNAUTHENTICATED") | Some("PERMISSION_DENIED") => {
                PluribotsError::Api(ApiError::AuthenticationFailed)
            }
            Some("INVALID_ARGUMENT") if message.contains("API key") => {
                PluribotsError::Api(ApiError::AuthenticationFailed)
            }
            Some("RESOURCE_EXHAUSTED") => {
                PluribotsError::Api(ApiError::RateLimited(retry_after.unwrap_or(10) as u32))
            }
            Some("NOT_FOUND") => PluribotsError::Api(ApiError::ModelNotFound(message)),
            _ => status_error(status, &message, retry_after),
        }
    }
}

#[async_trait]
impl LlmProvider for GoogleProvider {
    fn name(&self) -> &str {
        "google"
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
            .post(self.stream_url(&request.model))
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
            .scan(FrameParser::default(), |parser, frame| {
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
        let response = self.client.get(self.models_url()).send().await?;

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

/// Stateful translation of Gemini frames.
///
/// Text lives in block 0; each function call gets its own block after it.
#[derive(Debug, Default)]
struct FrameParser {
    started: bool,
    text_open: bool,
    calls: usize,
}

impl FrameParser {
    fn parse_frame(&mut self, frame: &str) -> Vec<StreamEvent> {
        let Some(data) = sse_data(frame) else {
            return vec![];
        };
        let Ok(parsed) = serde_json::from_str::<Value>(&data) else {
            tracing::debug!(target: "pluribots.llm", "skipping unparseable gemini frame");
            return vec![];
        };

        if let Some(error) = parsed.get("error") {
            return vec![StreamEvent::Error {
                error_type: error["status"].as_str().unwrap_or("error").to_string(),
                message: error["message"].as_str().unwrap_or_default().to_string(),
            }];
        }

        let mut events = Vec::new();
        if !self.started {
            self.started = true;
            events.push(StreamEvent::MessageStart {
                id: parsed["responseId"].as_str().unwrap_or_default().to_string(),
                model: parsed["modelVersion"].as_str().unwrap_or_default().to_string(),
            });
        }

        let candidate = &parsed["candidates"][0];
        let parts = candidate["content"]["parts"].as_array().cloned().unwrap_or_default();
        let mut saw_call = false;

        for part in parts {
            if let Some(call) = part.get("functionCall") {
                saw_call = true;
                self.calls += 1;
                let index = self.calls;
                let name = call["name"].as_str().unwrap_or_default().to_string();
                let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ContentBlockResponse::ToolUse {
                        id: format!("call_{}_{}", index, name),
                        name,
                        input: json!({}),
                    },
                });
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentBlockDelta::InputJsonDelta {
                        partial_json: args.to_string(),
                    },
                });
                events.push(StreamEvent::ContentBlockStop { index });
                continue;
            }

            let Some(text) = part["text"].as_str().filter(|t| !t.is_empty()) else {
                continue;
            };
            if part["thought"].as_bool().unwrap_or(false) {
                events.push(StreamEvent::ContentBlockDelta {
                    index: 0,
                    delta: ContentBlockDelta::ThinkingDelta {
                        thinking: text.to_string(),
                    },
                });
                continue;
            }
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
                delta: ContentBlockDelta::TextDelta {
                    text: text.to_string(),
                },
            });
        }

        let usage = parsed.get("usageMetadata").map(|u| Usage {
            input_tokens: u["promptTokenCount"].as_u64().unwrap_or(0) as u32,
            output_tokens: (u["candidatesTokenCount"].as_u64().unwrap_or(0)
                + u["thoughtsTokenCount"].as_u64().unwrap_or(0)) as u32,
            ..Default::default()
        });

        let stop_reason = candidate["finishReason"].as_str().map(|reason| {
            if saw_call || self.calls > 0 {
                StopReason::ToolUse
            } else if reason == "MAX_TOKENS" {
                StopReason::MaxTokens
            } else {
                StopReason::EndTurn
            }
        });

        if stop_reason.is_some() && std::mem::take(&mut self.text_open) {
            events.push(StreamEvent::ContentBlockStop { index: 0 });
        }
        if stop_reason.is_some() || usage.is_some() {
            events.push(StreamEvent::MessageDelta { stop_reason, usage });
        }
        events
    }
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
    #[serde(default)]
    status: Option<String>,
}
