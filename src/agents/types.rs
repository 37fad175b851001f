// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Agent definitions
//!
//! An agent is a named LLM configuration: system prompt, default model,
//! available tools, and the flags the scheduler and orchestrator act on.

use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::llm::factory::ModelChoice;
use crate::llm::provider::ToolDefinition;

/// What an agent hands back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// Report or copy; rendered from markdown when it is not HTML
    Document,
    /// A single rendered page shown in the shared preview
    Visual,
    /// A multi-file artifact in the tagged file protocol
    Project,
}

/// One specialization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Catalog key, e.g. "web-design"
    pub id: String,
    /// Display name
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    /// Model used unless the plan overrides it; `None` uses the settings default vendor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<ModelChoice>,
    pub output: OutputKind,
    /// Output is a design document a code agent can build from
    #[serde(default)]
    pub design_producer: bool,
    /// Receives condensed design context instead of raw design documents
    #[serde(default)]
    pub code_consumer: bool,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

impl AgentDefinition {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        output: OutputKind,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            system_prompt: system_prompt.into(),
            default_model: None,
            output,
            design_producer: false,
            code_consumer: false,
            tools: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_default_model(mut self, choice: ModelChoice) -> Self {
        self.default_model = Some(choice);
        self
    }

    pub fn with_tool(mut self, tool: ToolDefinition) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn design_producer(mut self) -> Self {
        self.design_producer = true;
        self
    }

    pub fn code_consumer(mut self) -> Self {
        self.code_consumer = true;
        self
    }

    /// Produces a rendered UI surface
    pub fn is_visual(&self) -> bool {
        self.output == OutputKind::Visual
    }

    /// Produces a multi-file artifact
    pub fn is_project(&self) -> bool {
        self.output == OutputKind::Project
    }

    pub fn uses_tools(&self) -> bool {
        !self.tools.is_empty()
    }

    /// The agent's model, or the settings default vendor's default model
    pub fn model_choice(&self, settings: &Settings) -> ModelChoice {
        self.default_model
            .clone()
            .unwrap_or_else(|| ModelChoice::vendor_default(settings.default_vendor()))
    }
}
