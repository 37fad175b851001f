// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Specialized agents
//!
//! The [`AgentCatalog`] answers the questions the scheduler and orchestrator
//! ask about an agent id: is it visual, does it produce a project, which
//! prompt and model does it use.
//!
//! ```rust,ignore
//! use pluribots::agents::AgentCatalog;
//!
//! let catalog = AgentCatalog::builtin();
//! assert!(catalog.is_visual("web-design"));
//! ```

pub mod builtin;
pub mod types;

pub use builtin::builtin_agents;
pub use types::{AgentDefinition, OutputKind};

use crate::error::{PluribotsError, Result};

/// Lookup table of agent definitions, in registration order
#[derive(Debug, Clone, Default)]
pub struct AgentCatalog {
    agents: Vec<AgentDefinition>,
}

impl AgentCatalog {
    /// Catalog with no agents
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog of the built-in agents
    pub fn builtin() -> Self {
        Self {
            agents: builtin_agents().to_vec(),
        }
    }

    /// Add an agent, replacing any with the same id
    pub fn register(&mut self, agent: AgentDefinition) {
        match self.agents.iter_mut().find(|a| a.id == agent.id) {
            Some(existing) => *existing = agent,
            None => self.agents.push(agent),
        }
    }

    pub fn with_agent(mut self, agent: AgentDefinition) -> Self {
        self.register(agent);
        self
    }

    pub fn get(&self, id: &str) -> Option<&AgentDefinition> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// Like [`AgentCatalog::get`], failing with [`PluribotsError::Agent`]
    pub fn require(&self, id: &str) -> Result<&AgentDefinition> {
        self.get(id)
            .ok_or_else(|| PluribotsError::Agent(format!("unknown agent '{}'", id)))
    }

    /// Unknown agents are not visual
    pub fn is_visual(&self, id: &str) -> bool {
        self.get(id).is_some_and(AgentDefinition::is_visual)
    }

    pub fn is_project(&self, id: &str) -> bool {
        self.get(id).is_some_and(AgentDefinition::is_project)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AgentDefinition> {
        self.agents.iter()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
