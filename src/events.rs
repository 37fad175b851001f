// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Plan events and their per-conversation broadcast
//!
//! [`PlanEvent`] is the only contract between the engine and a UI. Delivery
//! is best-effort: events sent while nobody listens are dropped, and a slow
//! listener may miss events once its channel buffer fills.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::artifact::FileUpdate;
use crate::orchestrator::Deliverable;
use crate::utils::lock;

/// Default buffer per conversation channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Events emitted while a plan executes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum PlanEvent {
    /// A project agent opened its artifact
    ArtifactStart { instance_id: String },

    /// Progress (`partial`) or completion of one file
    FileUpdate {
        instance_id: String,
        file_path: String,
        content: String,
        language: String,
        partial: bool,
    },

    /// A step finished; `next_*` point at the first step of the following group
    StepComplete {
        instance_id: String,
        summary: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_agent_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_instance_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_task: Option<String>,
        step_index: usize,
        total_steps: usize,
    },

    CreditUpdate { credits_used: u64, balance: i64 },

    Deliverable(Deliverable),

    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        instance_id: Option<String>,
        message: String,
    },

    /// Raw text of agents that produce neither files nor a rendered surface
    Token { instance_id: String, content: String },

    ThinkingUpdate { instance_id: String, content: String },
}

impl PlanEvent {
    pub fn file_update(instance_id: &str, update: FileUpdate) -> Self {
        PlanEvent::FileUpdate {
            instance_id: instance_id.to_string(),
            file_path: update.file_path,
            content: update.content,
            language: update.language,
            partial: update.partial,
        }
    }

    pub fn error(instance_id: Option<&str>, message: impl Into<String>) -> Self {
        PlanEvent::Error {
            instance_id: instance_id.map(str::to_string),
            message: message.into(),
        }
    }

    /// The `type` tag as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            PlanEvent::ArtifactStart { .. } => "artifact_start",
            PlanEvent::FileUpdate { .. } => "file_update",
            PlanEvent::StepComplete { .. } => "step_complete",
            PlanEvent::CreditUpdate { .. } => "credit_update",
            PlanEvent::Deliverable(_) => "deliverable",
            PlanEvent::Error { .. } => "error",
            PlanEvent::Token { .. } => "token",
            PlanEvent::ThinkingUpdate { .. } => "thinking_update",
        }
    }
}

/// Fire-and-forget publisher keyed by conversation id
pub struct EventBroadcaster {
    channels: Mutex<HashMap<String, broadcast::Sender<PlanEvent>>>,
    capacity: usize,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Publish to every current listener of the conversation
    pub fn broadcast(&self, conversation_id: &str, event: PlanEvent) {
        let channels = lock(&self.channels, "event broadcaster");
        if let Some(sender) = channels.get(conversation_id) {
            // No receivers is fine.
            let _ = sender.send(event);
        }
    }

    /// Listen to a conversation's events from now on
    pub fn subscribe(&self, conversation_id: &str) -> broadcast::Receiver<PlanEvent> {
        let mut channels = lock(&self.channels, "event broadcaster");
        channels
            .entry(conversation_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn listener_count(&self, conversation_id: &str) -> usize {
        lock(&self.channels, "event broadcaster")
            .get(conversation_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Drop the conversation's channel; listeners see it close
    pub fn close(&self, conversation_id: &str) {
        lock(&self.channels, "event broadcaster").remove(conversation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = PlanEvent::StepComplete {
            instance_id: "seo-1".into(),
            summary: "done".into(),
            next_agent_id: Some("dev".into()),
            next_instance_id: Some("dev-1".into()),
            next_task: None,
            step_index: 0,
            total_steps: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "step_complete");
        assert_eq!(json["nextAgentId"], "dev");
        assert_eq!(json["stepIndex"], 0);
        assert_eq!(json["totalSteps"], 2);
        assert!(json.get("nextTask").is_none());
    }

    #[test]
    fn test_file_update_from_streamer() {
        let event = PlanEvent::file_update(
            "dev-1",
            FileUpdate {
                file_path: "a.ts".into(),
                content: "x".into(),
                language: "typescript".into(),
                partial: true,
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "file_update");
        assert_eq!(json["filePath"], "a.ts");
        assert_eq!(json["partial"], true);
        assert_eq!(event.kind(), "file_update");
    }

    #[test]
    fn test_event_round_trip() {
        let event = PlanEvent::CreditUpdate {
            credits_used: 3,
            balance: 97,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(serde_json::from_str::<PlanEvent>(&json).unwrap(), event);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers_of_conversation_only() {
        let events = EventBroadcaster::new();
        let mut a = events.subscribe("conv-a");
        let mut b = events.subscribe("conv-b");

        events.broadcast("conv-a", PlanEvent::error(None, "boom"));

        assert_eq!(a.recv().await.unwrap(), PlanEvent::error(None, "boom"));
        assert!(b.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_without_listeners_is_silent() {
        let events = EventBroadcaster::new();
        events.broadcast("nobody", PlanEvent::error(None, "dropped"));
        assert_eq!(events.listener_count("nobody"), 0);
    }

    #[test]
    fn test_close_drops_channel() {
        let events = EventBroadcaster::new();
        let rx = events.subscribe("c");
        assert_eq!(events.listener_count("c"), 1);
        events.close("c");
        assert_eq!(events.listener_count("c"), 0);
        drop(rx);
    }
}
