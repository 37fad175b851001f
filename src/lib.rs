// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Pluribots - plan execution engine for multi-agent LLM workflows.
//!
//! A plan is a list of agent steps with dependencies. This crate schedules
//! the steps into execution groups, runs each group concurrently against an
//! LLM vendor, streams progress events to listeners, and turns the outputs
//! into deliverables.
//!
//! Architecture highlights:
//! - `plans`: steps, dependency layering, visual exclusivity, plan persistence
//! - `orchestrator`: group execution, prompt context, refinement, deliverables
//! - `artifact`: the tagged multi-file project format and its streaming parser
//! - `llm`: provider abstraction (Anthropic/OpenAI/Google), tool loop, health fallback
//! - `agents`: the catalog of specialized agents
//! - `events`: per-conversation event broadcasting

pub mod agents;
pub mod artifact;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod llm;
pub mod orchestrator;
pub mod plans;
pub mod utils;

pub use error::{PluribotsError, Result};
