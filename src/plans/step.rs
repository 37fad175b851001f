// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Steps and the in-flight plan record

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::message::ImageSource;

/// One agent invocation within a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Which specialized agent runs the step
    pub agent_id: String,
    /// Unique handle within the plan, e.g. "web-1"
    #[serde(alias = "id")]
    pub instance_id: String,
    /// Instruction text for the model
    #[serde(default)]
    pub task: String,
    /// Human-readable summary
    #[serde(default)]
    pub user_description: String,
    /// Instance ids this step waits for; unknown ids are ignored
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Step {
    pub fn new(
        agent_id: impl Into<String>,
        instance_id: impl Into<String>,
        task: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            instance_id: instance_id.into(),
            task: task.into(),
            user_description: String::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.user_description = description.into();
        self
    }

    /// Short label for summaries: the description, else the task
    pub fn label(&self) -> &str {
        if self.user_description.trim().is_empty() {
            &self.task
        } else {
            &self.user_description
        }
    }
}

/// Instance ids meant to run concurrently
pub type ExecutionGroup = Vec<String>;

/// Where a plan stands between orchestrator calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanState {
    /// Nothing has run yet
    Idle,
    /// Some, but not all, steps of the current group finished
    GroupRunning,
    /// The previous group finished and the next one has not started
    StepsComplete,
    /// Every group finished
    PlanComplete,
}

/// Mutable state of one in-flight plan for a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutingPlan {
    pub conversation_id: String,
    pub user_id: String,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub groups: Vec<ExecutionGroup>,
    #[serde(default)]
    pub current_group_index: usize,
    #[serde(default)]
    pub completed: BTreeSet<String>,
    /// Full accumulated output per instance id
    #[serde(default)]
    pub agent_outputs: BTreeMap<String, String>,
    /// `vendor:model`, `vendor`, or a bare model name applied to every step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_override: Option<String>,
    /// Image attached to the conversation turn that approved the plan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageSource>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutingPlan {
    /// A plan with no groups yet; the orchestrator schedules it on start
    pub fn new(
        conversation_id: impl Into<String>,
        user_id: impl Into<String>,
        steps: Vec<Step>,
    ) -> Self {
        let now = Utc::now();
        Self {
            conversation_id: conversation_id.into(),
            user_id: user_id.into(),
            steps,
            groups: Vec::new(),
            current_group_index: 0,
            completed: BTreeSet::new(),
            agent_outputs: BTreeMap::new(),
            model_override: None,
            image: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_model_override(mut self, model: impl Into<String>) -> Self {
        self.model_override = Some(model.into());
        self
    }

    pub fn with_image(mut self, image: ImageSource) -> Self {
        self.image = Some(image);
        self
    }

    pub fn step(&self, instance_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.instance_id == instance_id)
    }

    /// Position of a step in the plan's step list
    pub fn step_index(&self, instance_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.instance_id == instance_id)
    }

    pub fn current_group(&self) -> Option<&ExecutionGroup> {
        self.groups.get(self.current_group_index)
    }

    /// First step of the group at `index`, if any
    pub fn first_step_of_group(&self, index: usize) -> Option<&Step> {
        self.groups
            .get(index)
            .and_then(|group| group.first())
            .and_then(|id| self.step(id))
    }

    /// Index of the group holding `instance_id`
    pub fn group_of(&self, instance_id: &str) -> Option<usize> {
        self.groups
            .iter()
            .position(|group| group.iter().any(|id| id == instance_id))
    }

    pub fn is_completed(&self, instance_id: &str) -> bool {
        self.completed.contains(instance_id)
    }

    pub fn is_finished(&self) -> bool {
        self.current_group_index >= self.groups.len()
    }

    pub fn state(&self) -> PlanState {
        if self.is_finished() {
            return PlanState::PlanComplete;
        }
        if self.completed.is_empty() {
            return PlanState::Idle;
        }
        let running = self
            .current_group()
            .map(|group| group.iter().any(|id| self.is_completed(id)))
            .unwrap_or(false);
        if running {
            PlanState::GroupRunning
        } else {
            PlanState::StepsComplete
        }
    }

    /// Record a finished step's output
    pub fn complete_step(&mut self, instance_id: &str, output: String) {
        self.completed.insert(instance_id.to_string());
        self.agent_outputs.insert(instance_id.to_string(), output);
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
