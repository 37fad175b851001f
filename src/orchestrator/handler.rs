// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Stream callbacks for one step: live events and tool dispatch

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::services::ToolExecutor;
use crate::agents::{AgentDefinition, OutputKind};
use crate::artifact::{ArtifactStreamer, StreamerEvent};
use crate::error::{PluribotsError, Result};
use crate::events::{EventBroadcaster, PlanEvent};
use crate::llm::provider::Usage;
use crate::llm::streaming::StreamHandler;
use crate::utils::lock;

/// Forwards one step's stream to the conversation's listeners.
///
/// Project agents have their tokens parsed into file events; document agents
/// broadcast raw tokens; visual agents stay quiet until their deliverable.
pub(crate) struct StepHandler {
    conversation_id: String,
    instance_id: String,
    output: OutputKind,
    events: Arc<EventBroadcaster>,
    tools: Arc<dyn ToolExecutor>,
    streamer: Mutex<ArtifactStreamer>,
}

impl StepHandler {
    pub(crate) fn new(
        conversation_id: &str,
        instance_id: &str,
        agent: &AgentDefinition,
        events: Arc<EventBroadcaster>,
        tools: Arc<dyn ToolExecutor>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            instance_id: instance_id.to_string(),
            output: agent.output,
            events,
            tools,
            streamer: Mutex::new(ArtifactStreamer::new()),
        }
    }

    fn emit(&self, event: PlanEvent) {
        self.events.broadcast(&self.conversation_id, event);
    }
}

#[async_trait]
impl StreamHandler for StepHandler {
    fn on_token(&self, token: &str) {
        match self.output {
            OutputKind::Project => {
                let parsed = lock(&self.streamer, "artifact streamer").on_token(token);
                for event in parsed {
                    self.emit(match event {
                        StreamerEvent::ArtifactStart => PlanEvent::ArtifactStart {
                            instance_id: self.instance_id.clone(),
                        },
                        StreamerEvent::FileUpdate(update) => {
                            PlanEvent::file_update(&self.instance_id, update)
                        }
                    });
                }
            }
            OutputKind::Document => self.emit(PlanEvent::Token {
                instance_id: self.instance_id.clone(),
                content: token.to_string(),
            }),
            OutputKind::Visual => {}
        }
    }

    fn on_thinking(&self, thinking: &str) {
        self.emit(PlanEvent::ThinkingUpdate {
            instance_id: self.instance_id.clone(),
            content: thinking.to_string(),
        });
    }

    async fn on_tool_call(&self, name: &str, input: serde_json::Value) -> Result<String> {
        tracing::debug!(
            target: "pluribots.orchestrator",
            instance_id = %self.instance_id,
            tool = name,
            "tool call"
        );
        self.tools.execute(name, input).await
    }

    fn on_complete(&self, text: &str, usage: &Usage) {
        tracing::debug!(
            target: "pluribots.orchestrator",
            instance_id = %self.instance_id,
            chars = text.len(),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "step stream complete"
        );
    }

    fn on_error(&self, error: &PluribotsError) {
        tracing::warn!(
            target: "pluribots.orchestrator",
            instance_id = %self.instance_id,
            error = %error,
            "step stream failed"
        );
    }
}
