// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! CLI module for Pluribots
//!
//! Argument parsing plus the plan document the `run` and `groups`
//! subcommands read.

pub mod args;

pub use args::*;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PluribotsError, Result};
use crate::plans::Step;

/// A plan as handed over by a planner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDocument {
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_override: Option<String>,
}

impl PlanDocument {
    /// Read a plan document; a bare JSON array of steps is accepted too
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content).map_err(|e| {
            PluribotsError::InvalidInput(format!("{}: {}", path.display(), e))
        })
    }

    pub fn parse(content: &str) -> std::result::Result<Self, serde_json::Error> {
        match serde_json::from_str::<Self>(content) {
            Ok(doc) => Ok(doc),
            Err(err) => serde_json::from_str::<Vec<Step>>(content)
                .map(|steps| Self {
                    steps,
                    model_override: None,
                })
                .map_err(|_| err),
        }
    }
}
