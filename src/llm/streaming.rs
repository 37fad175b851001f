// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Streaming response handling
//!
//! Folds the shared [`StreamEvent`] sequence into one assistant turn and
//! forwards fragments to a [`StreamHandler`] as they arrive.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;

use crate::error::{ApiError, PluribotsError, Result};
use crate::llm::message::ContentBlock;
use crate::llm::provider::{
    ContentBlockDelta, ContentBlockResponse, EventStream, StopReason, StreamEvent, ToolCall, Usage,
};

/// Callbacks for one `stream` / `stream_with_tools` invocation.
///
/// Exactly one of `on_complete` or `on_error` fires per invocation.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    /// Incremental text fragment
    fn on_token(&self, token: &str);

    /// Incremental reasoning-trace fragment
    fn on_thinking(&self, _thinking: &str) {}

    /// Execute a tool the model asked for
    async fn on_tool_call(&self, name: &str, _input: serde_json::Value) -> Result<String> {
        Err(PluribotsError::ToolExecution(format!(
            "no executor for tool '{}'",
            name
        )))
    }

    /// Successful end of the invocation
    fn on_complete(&self, text: &str, usage: &Usage);

    /// Failed end of the invocation
    fn on_error(&self, error: &PluribotsError);
}

/// Final result of a streaming invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamOutcome {
    /// Visible text across all rounds
    pub text: String,
    /// Reasoning trace across all rounds
    pub thinking: String,
    /// Usage summed across all rounds
    pub usage: Usage,
    /// Number of model round trips
    pub rounds: u32,
}

/// Accumulator for streaming response content
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    /// Accumulated content blocks
    content_blocks: Vec<ContentBlockResponse>,
    /// Vendor block index to position in `content_blocks`
    positions: HashMap<usize, usize>,
    /// Tool input JSON being accumulated, per vendor block index
    tool_inputs: HashMap<usize, String>,
    /// Reasoning trace, kept out of the content blocks
    thinking: String,
    /// Stop reason from the stream
    stop_reason: Option<StopReason>,
    /// Usage as reported by the vendor
    usage: Usage,
}

/// Result of processing a stream event
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEventResult {
    /// Nothing for the caller to forward
    Quiet,
    /// Text delta received
    TextDelta(String),
    /// Reasoning delta received
    ThinkingDelta(String),
    /// Message stopped
    MessageStop,
    /// Error event from the vendor
    Error { error_type: String, message: String },
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the accumulated content blocks
    pub fn content_blocks(&self) -> &[ContentBlockResponse] {
        &self.content_blocks
    }

    /// Get the stop reason
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    /// Reasoning trace seen so far
    pub fn thinking(&self) -> &str {
        &self.thinking
    }

    /// Process a stream event and return anything the caller should forward
    pub fn process_event(&mut self, event: StreamEvent) -> StreamEventResult {
        match event {
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                self.positions.insert(index, self.content_blocks.len());
                if matches!(content_block, ContentBlockResponse::ToolUse { .. }) {
                    self.tool_inputs.insert(index, String::new());
                }
                self.content_blocks.push(content_block);
                StreamEventResult::Quiet
            }
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                ContentBlockDelta::TextDelta { text } => {
                    match self.block_mut(index) {
                        Some(ContentBlockResponse::Text { text: block_text }) => {
                            block_text.push_str(&text)
                        }
                        _ => {
                            // Vendors that skip block starts still get their text kept.
                            self.positions.insert(index, self.content_blocks.len());
                            self.content_blocks.push(ContentBlockResponse::Text {
                                text: text.clone(),
                            });
                        }
                    }
                    StreamEventResult::TextDelta(text)
                }
                ContentBlockDelta::ThinkingDelta { thinking } => {
                    self.thinking.push_str(&thinking);
                    StreamEventResult::ThinkingDelta(thinking)
                }
                ContentBlockDelta::InputJsonDelta { partial_json } => {
                    self.tool_inputs
                        .entry(index)
                        .or_default()
                        .push_str(&partial_json);
                    StreamEventResult::Quiet
                }
            },
            StreamEvent::ContentBlockStop { index } => {
                self.finalize_tool_input(index);
                StreamEventResult::Quiet
            }
            StreamEvent::MessageDelta { stop_reason, usage } => {
                if stop_reason.is_some() {
                    self.stop_reason = stop_reason;
                }
                if let Some(report) = usage {
                    self.usage.merge_report(&report);
                }
                StreamEventResult::Quiet
            }
            StreamEvent::MessageStop => StreamEventResult::MessageStop,
            StreamEvent::Error {
                error_type,
                message,
            } => StreamEventResult::Error {
                error_type,
                message,
            },
            StreamEvent::Ping | StreamEvent::MessageStart { .. } => StreamEventResult::Quiet,
        }
    }

    fn block_mut(&mut self, index: usize) -> Option<&mut ContentBlockResponse> {
        let position = *self.positions.get(&index)?;
        self.content_blocks.get_mut(position)
    }

    fn finalize_tool_input(&mut self, index: usize) {
        let Some(raw) = self.tool_inputs.remove(&index) else {
            return;
        };
        if raw.trim().is_empty() {
            return;
        }
        let parsed = match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(target: "pluribots.llm", error = %err, "unparseable tool input");
                return;
            }
        };
        if let Some(ContentBlockResponse::ToolUse { input, .. }) = self.block_mut(index) {
            *input = parsed;
        }
    }

    /// Visible text of the turn
    pub fn text(&self) -> String {
        self.content_blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlockResponse::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Tool invocations requested in the turn, in order
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.content_blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlockResponse::ToolUse { id, name, input } => Some(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// The turn as conversation blocks for replay
    pub fn message_blocks(&self) -> Vec<ContentBlock> {
        self.content_blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlockResponse::Text { text } if text.is_empty() => None,
                ContentBlockResponse::Text { text } => {
                    Some(ContentBlock::Text { text: text.clone() })
                }
                ContentBlockResponse::ToolUse { id, name, input } => Some(ContentBlock::ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
            })
            .collect()
    }

    /// Vendor-reported usage, or a byte-length estimate when the vendor sent none
    pub fn usage_or_estimate(&self, input_bytes: usize) -> Usage {
        if !self.usage.is_empty() {
            return self.usage;
        }
        let output_bytes: usize = self
            .content_blocks
            .iter()
            .map(|block| match block {
                ContentBlockResponse::Text { text } => text.len(),
                ContentBlockResponse::ToolUse { name, input, .. } => {
                    name.len() + input.to_string().len()
                }
            })
            .sum::<usize>()
            + self.thinking.len();
        Usage::estimate(input_bytes, output_bytes)
    }

    /// Consume the accumulator and return the final results
    pub fn finish(self) -> (Vec<ContentBlockResponse>, Option<StopReason>) {
        (self.content_blocks, self.stop_reason)
    }
}

/// Drain a provider stream into an accumulator, forwarding fragments in arrival order.
pub async fn consume_stream(
    mut events: EventStream,
    handler: &dyn StreamHandler,
) -> Result<StreamAccumulator> {
    let mut acc = StreamAccumulator::new();
    while let Some(event) = events.next().await {
        match acc.process_event(event?) {
            StreamEventResult::TextDelta(text) => handler.on_token(&text),
            StreamEventResult::ThinkingDelta(thinking) => handler.on_thinking(&thinking),
            StreamEventResult::Error {
                error_type,
                message,
            } => {
                return Err(ApiError::StreamError(format!("{}: {}", error_type, message)).into());
            }
            StreamEventResult::MessageStop => break,
            StreamEventResult::Quiet => {}
        }
    }
    Ok(acc)
}

/// Builder for simulating stream events in tests
#[cfg(test)]
pub struct StreamEventBuilder;

#[cfg(test)]
impl StreamEventBuilder {
    pub fn text_block_start(index: usize) -> StreamEvent {
        StreamEvent::ContentBlockStart {
            index,
            content_block: ContentBlockResponse::Text {
                text: String::new(),
            },
        }
    }

    pub fn tool_use_start(index: usize, id: &str, name: &str) -> StreamEvent {
        StreamEvent::ContentBlockStart {
            index,
            content_block: ContentBlockResponse::ToolUse {
                id: id.to_string(),
                name: name.to_string(),
                input: serde_json::json!({}),
            },
        }
    }

    pub fn text_delta(index: usize, text: &str) -> StreamEvent {
        StreamEvent::ContentBlockDelta {
            index,
            delta: ContentBlockDelta::TextDelta {
                text: text.to_string(),
            },
        }
    }

    pub fn thinking_delta(index: usize, thinking: &str) -> StreamEvent {
        StreamEvent::ContentBlockDelta {
            index,
            delta: ContentBlockDelta::ThinkingDelta {
                thinking: thinking.to_string(),
            },
        }
    }

    pub fn input_delta(index: usize, json: &str) -> StreamEvent {
        StreamEvent::ContentBlockDelta {
            index,
            delta: ContentBlockDelta::InputJsonDelta {
                partial_json: json.to_string(),
            },
        }
    }

    pub fn block_stop(index: usize) -> StreamEvent {
        StreamEvent::ContentBlockStop { index }
    }

    pub fn message_delta(stop_reason: Option<StopReason>, usage: Option<Usage>) -> StreamEvent {
        StreamEvent::MessageDelta { stop_reason, usage }
    }
}
