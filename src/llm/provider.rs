// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! LLM Provider trait and related types
//!
//! Every vendor binding implements [`LlmProvider::complete_stream`], turning its
//! own wire protocol into the shared [`StreamEvent`] sequence. The two
//! orchestration-facing operations, [`LlmProvider::stream`] and
//! [`LlmProvider::stream_with_tools`], are provided on top of that and behave
//! identically for every vendor.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::error::{PluribotsError, Result};
use crate::llm::message::{ContentBlock, Message};
use crate::llm::streaming::{consume_stream, StreamHandler, StreamOutcome};

/// Boxed stream of provider events
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Main trait for LLM providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get the provider name (e.g., "anthropic", "openai")
    fn name(&self) -> &str;

    /// Model this instance is bound to
    fn model(&self) -> &str;

    /// Sampling parameters applied to every request this instance builds
    fn request_defaults(&self) -> RequestDefaults {
        RequestDefaults::default()
    }

    /// Streaming completion in the shared event vocabulary
    async fn complete_stream(&self, request: CompletionRequest) -> Result<EventStream>;

    /// Cheap reachability/credential probe
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    /// Build a request for this instance's model
    fn build_request(&self, system: &str, messages: Vec<Message>) -> CompletionRequest {
        let defaults = self.request_defaults();
        let mut request = CompletionRequest::new(self.model(), messages)
            .with_max_tokens(defaults.max_tokens)
            .with_temperature(defaults.temperature);
        if !system.is_empty() {
            request = request.with_system(system);
        }
        request
    }

    /// Single request without tools.
    ///
    /// Fires `on_token`/`on_thinking` as fragments arrive, then exactly one of
    /// `on_complete` or `on_error`.
    async fn stream(
        &self,
        system: &str,
        messages: Vec<Message>,
        handler: &dyn StreamHandler,
    ) -> Result<StreamOutcome> {
        let result: Result<StreamOutcome> = async {
            let request = self.build_request(system, messages);
            let input_bytes = request.text_len();
            let events = self.complete_stream(request).await?;
            let turn = consume_stream(events, handler).await?;
            let usage = turn.usage_or_estimate(input_bytes);
            Ok(StreamOutcome {
                text: turn.text(),
                thinking: turn.thinking().to_string(),
                usage,
                rounds: 1,
            })
        }
        .await;

        finish(result, handler)
    }

    /// Agentic tool loop.
    ///
    /// Each round streams one response. Tool calls in the response run
    /// concurrently through `handler.on_tool_call`; failures become textual
    /// error results for the model. The assistant turn and one user turn with
    /// every result are appended before the next round. A round without tool
    /// calls ends the loop. Running past `max_rounds` is an error.
    async fn stream_with_tools(
        &self,
        system: &str,
        mut messages: Vec<Message>,
        tools: &[ToolDefinition],
        handler: &dyn StreamHandler,
        max_rounds: u32,
    ) -> Result<StreamOutcome> {
        let result: Result<StreamOutcome> = async {
            let mut usage = Usage::default();
            let mut text = String::new();
            let mut thinking = String::new();

            for round in 1..=max_rounds {
                let request = self
                    .build_request(system, messages.clone())
                    .with_tools(tools.to_vec());
                let input_bytes = request.text_len();
                let events = self.complete_stream(request).await?;
                let turn = consume_stream(events, handler).await?;

                usage.add(&turn.usage_or_estimate(input_bytes));
                text.push_str(&turn.text());
                thinking.push_str(turn.thinking());

                let calls = turn.tool_calls();
                if calls.is_empty() {
                    return Ok(StreamOutcome {
                        text,
                        thinking,
                        usage,
                        rounds: round,
                    });
                }

                tracing::debug!(
                    target: "pluribots.llm",
                    provider = self.name(),
                    round,
                    calls = calls.len(),
                    "executing tool calls"
                );

                let results = futures::future::join_all(
                    calls
                        .iter()
                        .map(|call| execute_tool_call(handler, call)),
                )
                .await;

                messages.push(Message::assistant_blocks(turn.message_blocks()));
                messages.push(Message::tool_results(results));
            }

            Err(PluribotsError::ToolLoopExceeded(max_rounds))
        }
        .await;

        finish(result, handler)
    }
}

/// Route a finished attempt to exactly one terminal callback.
fn finish(result: Result<StreamOutcome>, handler: &dyn StreamHandler) -> Result<StreamOutcome> {
    match &result {
        Ok(outcome) => handler.on_complete(&outcome.text, &outcome.usage),
        Err(err) => handler.on_error(err),
    }
    result
}

async fn execute_tool_call(handler: &dyn StreamHandler, call: &ToolCall) -> ContentBlock {
    match handler.on_tool_call(&call.name, call.input.clone()).await {
        Ok(output) => ContentBlock::ToolResult {
            tool_use_id: call.id.clone(),
            content: output,
            is_error: None,
        },
        Err(err) => {
            tracing::warn!(
                target: "pluribots.llm",
                tool = %call.name,
                error = %err,
                "tool call failed"
            );
            ContentBlock::ToolResult {
                tool_use_id: call.id.clone(),
                content: format!("Error: {}", err),
                is_error: Some(true),
            }
        }
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Sampling parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestDefaults {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            max_tokens: 8192,
            temperature: 0.7,
        }
    }
}

/// Request for completion
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model to use
    pub model: String,

    /// Messages in the conversation
    pub messages: Vec<Message>,

    /// System prompt
    pub system: Option<String>,

    /// Maximum tokens in response
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,

    /// Tools available for the model to use
    pub tools: Vec<ToolDefinition>,
}

/// A content block in the response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlockResponse {
    /// Text content
    Text { text: String },

    /// Tool use request
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

/// Why the model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of message
    EndTurn,
    /// Hit max tokens
    MaxTokens,
    /// Wants to use a tool
    ToolUse,
    /// Stop sequence hit
    StopSequence,
}

/// Token usage statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Input tokens
    pub input_tokens: u32,
    /// Output tokens
    pub output_tokens: u32,
    /// Cache creation tokens (if caching enabled)
    #[serde(default)]
    pub cache_creation_input_tokens: u32,
    /// Cache read tokens (if caching enabled)
    #[serde(default)]
    pub cache_read_input_tokens: u32,
}

/// Events from a streaming response
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Start of message
    MessageStart { id: String, model: String },

    /// Start of a content block
    ContentBlockStart {
        index: usize,
        content_block: ContentBlockResponse,
    },

    /// Delta to a content block
    ContentBlockDelta {
        index: usize,
        delta: ContentBlockDelta,
    },

    /// End of a content block
    ContentBlockStop { index: usize },

    /// Message delta (stop reason, usage)
    MessageDelta {
        stop_reason: Option<StopReason>,
        usage: Option<Usage>,
    },

    /// End of message
    MessageStop,

    /// Ping (keep-alive)
    Ping,

    /// Error
    Error { error_type: String, message: String },
}

/// Delta update to a content block
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlockDelta {
    /// Text delta
    TextDelta { text: String },

    /// Reasoning-trace fragment; never part of the final text
    ThinkingDelta { thinking: String },

    /// Partial JSON for tool input
    InputJsonDelta { partial_json: String },
}

/// Tool definition for the LLM
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    /// Tool name
    pub name: String,

    /// Tool description
    pub description: String,

    /// Input schema (JSON Schema)
    pub input_schema: ToolInputSchema,
}

/// Input schema for a tool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInputSchema {
    /// Schema type (always "object")
    #[serde(rename = "type")]
    pub schema_type: String,

    /// Property definitions
    pub properties: serde_json::Value,

    /// Required properties
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl ToolDefinition {
    /// Object-schema tool definition
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        properties: serde_json::Value,
        required: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: ToolInputSchema {
                schema_type: "object".to_string(),
                properties,
                required: required.iter().map(|s| s.to_string()).collect(),
            },
        }
    }
}

impl CompletionRequest {
    /// Create a new completion request
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        let defaults = RequestDefaults::default();
        Self {
            model: model.into(),
            messages,
            system: None,
            max_tokens: defaults.max_tokens,
            temperature: defaults.temperature,
            tools: vec![],
        }
    }

    /// Set the system prompt
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set tools
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Byte length of the prompt text, for token estimation
    pub fn text_len(&self) -> usize {
        self.system.as_deref().map(str::len).unwrap_or(0)
            + self.messages.iter().map(Message::text_len).sum::<usize>()
    }
}

impl Usage {
    /// Get total tokens used
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    /// Whether the vendor reported nothing
    pub fn is_empty(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0
    }

    /// Add another round's usage
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_input_tokens += other.cache_creation_input_tokens;
        self.cache_read_input_tokens += other.cache_read_input_tokens;
    }

    /// Overlay non-zero fields from a later report of the same response
    pub fn merge_report(&mut self, report: &Usage) {
        if report.input_tokens > 0 {
            self.input_tokens = report.input_tokens;
        }
        if report.output_tokens > 0 {
            self.output_tokens = report.output_tokens;
        }
        if report.cache_creation_input_tokens > 0 {
            self.cache_creation_input_tokens = report.cache_creation_input_tokens;
        }
        if report.cache_read_input_tokens > 0 {
            self.cache_read_input_tokens = report.cache_read_input_tokens;
        }
    }

    /// Byte-length heuristic: roughly four bytes per token, rounded up
    pub fn estimate(input_bytes: usize, output_bytes: usize) -> Self {
        Self {
            input_tokens: estimate_tokens(input_bytes),
            output_tokens: estimate_tokens(output_bytes),
            ..Default::default()
        }
    }
}

fn estimate_tokens(bytes: usize) -> u32 {
    u32::try_from(bytes.div_ceil(4)).unwrap_or(u32::MAX)
}
