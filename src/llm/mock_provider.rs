// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Mock LLM provider for testing
//!
//! Provides a scripted implementation of the LlmProvider trait that can be
//! used in tests and dry runs without making real API calls.

use async_trait::async_trait;
use futures::stream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{ApiError, Result};
use crate::utils;
use crate::llm::provider::{
    CompletionRequest, ContentBlockDelta, ContentBlockResponse, EventStream, LlmProvider,
    StopReason, StreamEvent, Usage,
};

/// A mock LLM provider for testing
#[derive(Clone)]
pub struct MockProvider {
    /// Provider name
    name: String,
    /// Model reported by the instance
    model: String,
    /// Queued responses, replayed in order; the last one repeats
    responses: Arc<Mutex<Vec<MockResponse>>>,
    /// Responses chosen by a substring of the latest user turn
    rules: Arc<Mutex<Vec<(String, MockResponse)>>>,
    /// Call counter
    call_count: Arc<AtomicUsize>,
    /// Recorded requests
    recorded_requests: Arc<Mutex<Vec<CompletionRequest>>>,
    /// Result of `health_check`
    healthy: Arc<AtomicBool>,
    /// Characters per streamed text delta
    chunk_size: usize,
}

/// A pre-configured response for the mock provider
#[derive(Clone, Debug)]
pub struct MockResponse {
    /// Text content to return
    pub text: String,
    /// Reasoning trace streamed before the text
    pub thinking: String,
    /// Tool calls to return (optional)
    pub tool_calls: Vec<MockToolCall>,
    /// Stop reason
    pub stop_reason: StopReason,
    /// Token usage; `None` leaves usage unreported
    pub usage: Option<Usage>,
    /// Fail the stream with this message after the text has been sent
    pub error: Option<String>,
}

/// A mock tool call
#[derive(Clone, Debug)]
pub struct MockToolCall {
    /// Tool call ID
    pub id: String,
    /// Tool name
    pub name: String,
    /// Tool input (JSON)
    pub input: serde_json::Value,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            text: "Mock response".to_string(),
            thinking: String::new(),
            tool_calls: vec![],
            stop_reason: StopReason::EndTurn,
            usage: Some(Usage {
                input_tokens: 10,
                output_tokens: 20,
                cache_creation_input_tokens: 0,
                cache_read_input_tokens: 0,
            }),
            error: None,
        }
    }
}

impl MockResponse {
    /// Plain text response
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Response asking for one tool call
    pub fn tool_call(name: impl Into<String>, input: serde_json::Value) -> Self {
        Self::default().and_tool_call(name, input)
    }

    /// Add a tool call to this response
    pub fn and_tool_call(mut self, name: impl Into<String>, input: serde_json::Value) -> Self {
        if self.tool_calls.is_empty() && self.text == "Mock response" {
            self.text.clear();
        }
        self.tool_calls.push(MockToolCall {
            id: format!("toolu_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            input,
        });
        self.stop_reason = StopReason::ToolUse;
        self
    }

    /// Stream a reasoning trace first
    pub fn with_thinking(mut self, thinking: impl Into<String>) -> Self {
        self.thinking = thinking.into();
        self
    }

    /// Report this usage
    pub fn with_usage(mut self, usage: Option<Usage>) -> Self {
        self.usage = usage;
        self
    }

    /// A stream that fails mid-way
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    /// Create a new mock provider
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            model: "mock-model".to_string(),
            responses: Arc::new(Mutex::new(vec![MockResponse::default()])),
            rules: Arc::new(Mutex::new(vec![])),
            call_count: Arc::new(AtomicUsize::new(0)),
            recorded_requests: Arc::new(Mutex::new(vec![])),
            healthy: Arc::new(AtomicBool::new(true)),
            chunk_size: 10,
        }
    }

    /// Create a mock provider with a custom name
    pub fn with_name(name: impl Into<String>) -> Self {
        let mut provider = Self::new();
        provider.name = name.into();
        provider
    }

    /// Report a different model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Stream text in deltas of `size` characters
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Set the text response
    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.with_scripted(vec![MockResponse::text(text)])
    }

    /// Queue multiple text responses (returned in order)
    pub fn with_responses(self, texts: Vec<String>) -> Self {
        self.with_scripted(texts.into_iter().map(MockResponse::text).collect())
    }

    /// Queue fully specified responses (returned in order)
    pub fn with_scripted(self, scripted: Vec<MockResponse>) -> Self {
        {
            let mut responses = utils::lock(&self.responses, "mock provider");
            responses.clear();
            responses.extend(scripted);
        }
        self
    }

    /// Answer with `response` whenever the last user turn contains `needle`.
    /// Rules are checked in insertion order before the queue.
    pub fn when_prompt_contains(self, needle: impl Into<String>, response: MockResponse) -> Self {
        utils::lock(&self.rules, "mock provider").push((needle.into(), response));
        self
    }

    /// Change the health-check result
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Get the number of times the provider was called
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Get all recorded requests
    pub fn recorded_requests(&self) -> Vec<CompletionRequest> {
        utils::lock(&self.recorded_requests, "mock provider").clone()
    }

    /// Get the last request made
    pub fn last_request(&self) -> Option<CompletionRequest> {
        utils::lock(&self.recorded_requests, "mock provider").last().cloned()
    }

    /// Reset call count and recorded requests
    pub fn reset(&self) {
        self.call_count.store(0, Ordering::SeqCst);
        utils::lock(&self.recorded_requests, "mock provider").clear();
    }

    fn next_response(&self, request: &CompletionRequest) -> MockResponse {
        let count = self.call_count.fetch_add(1, Ordering::SeqCst);

        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == crate::llm::message::Role::User)
            .map(|m| m.text())
            .unwrap_or_default();
        let rule_hit = utils::lock(&self.rules, "mock provider")
            .iter()
            .find(|(needle, _)| last_user.contains(needle.as_str()))
            .map(|(_, response)| response.clone());
        if let Some(response) = rule_hit {
            return response;
        }

        let responses = utils::lock(&self.responses, "mock provider");
        if responses.is_empty() {
            MockResponse::default()
        } else {
            responses[count.min(responses.len() - 1)].clone()
        }
    }

    fn events_for(&self, model: String, response: MockResponse) -> Vec<Result<StreamEvent>> {
        let mut events = vec![Ok(StreamEvent::MessageStart {
            id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            model,
        })];
        let mut index = 0;

        if !response.thinking.is_empty() {
            events.push(Ok(StreamEvent::ContentBlockDelta {
                index,
                delta: ContentBlockDelta::ThinkingDelta {
                    thinking: response.thinking,
                },
            }));
            index += 1;
        }

        if !response.text.is_empty() {
            events.push(Ok(StreamEvent::ContentBlockStart {
                index,
                content_block: ContentBlockResponse::Text {
                    text: String::new(),
                },
            }));
            for chunk in response
                .text
                .chars()
                .collect::<Vec<_>>()
                .chunks(self.chunk_size)
            {
                events.push(Ok(StreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentBlockDelta::TextDelta {
                        text: chunk.iter().collect(),
                    },
                }));
            }
            events.push(Ok(StreamEvent::ContentBlockStop { index }));
            index += 1;
        }

        if let Some(message) = response.error {
            events.push(Err(ApiError::StreamError(message).into()));
            return events;
        }

        for tool_call in response.tool_calls {
            events.push(Ok(StreamEvent::ContentBlockStart {
                index,
                content_block: ContentBlockResponse::ToolUse {
                    id: tool_call.id,
                    name: tool_call.name,
                    input: serde_json::json!({}),
                },
            }));
            events.push(Ok(StreamEvent::ContentBlockDelta {
                index,
                delta: ContentBlockDelta::InputJsonDelta {
                    partial_json: tool_call.input.to_string(),
                },
            }));
            events.push(Ok(StreamEvent::ContentBlockStop { index }));
            index += 1;
        }

        events.push(Ok(StreamEvent::MessageDelta {
            stop_reason: Some(response.stop_reason),
            usage: response.usage,
        }));
        events.push(Ok(StreamEvent::MessageStop));
        events
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<EventStream> {
        utils::lock(&self.recorded_requests, "mock provider").push(request.clone());
        let response = self.next_response(&request);
        let events = self.events_for(request.model, response);
        Ok(Box::pin(stream::iter(events)))
    }

    async fn health_check(&self) -> Result<()> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ApiError::ServerError {
                status: 503,
                message: format!("{} is unavailable", self.name),
            }
            .into())
        }
    }
}
