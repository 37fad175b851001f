// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! CLI argument definitions using Clap

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Pluribots - run multi-agent plans from the terminal
#[derive(Parser, Debug)]
#[command(name = "pluribots")]
#[command(version, about = "Plan execution engine for multi-agent LLM workflows")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Settings file (defaults to $PLURIBOTS_HOME/settings.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output format (events default to JSON lines, listings to text)
    #[arg(long, global = true)]
    pub format: Option<OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a plan and print its events as JSON lines
    Run(RunArgs),

    /// Print the execution groups computed for a plan
    Groups(GroupsArgs),

    /// Re-run one completed step of a saved plan with feedback
    Refine(RefineArgs),

    /// List the agent catalog and which vendors are configured
    Agents,
}

/// Arguments for the run subcommand
#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Plan document: {"steps": [...], "modelOverride": "..."}
    #[arg(short, long)]
    pub plan: PathBuf,

    /// Conversation id (defaults to a fresh one)
    #[arg(long)]
    pub conversation: Option<String>,

    /// User charged for the run
    #[arg(long, default_value = "local")]
    pub user: String,

    /// Model for every step: vendor, vendor:model, or a model name
    #[arg(short, long)]
    pub model: Option<String>,

    /// Write the final plan state here so it can be refined later
    #[arg(long)]
    pub save_state: Option<PathBuf>,

    /// Continue a persisted plan instead of starting over
    #[arg(long)]
    pub resume: bool,
}

/// Arguments for the groups subcommand
#[derive(clap::Args, Debug)]
pub struct GroupsArgs {
    /// Plan document
    #[arg(short, long)]
    pub plan: PathBuf,
}

/// Arguments for the refine subcommand
#[derive(clap::Args, Debug)]
pub struct RefineArgs {
    /// Plan state written by `run --save-state`; updated in place
    #[arg(short, long)]
    pub plan: PathBuf,

    /// Instance id of the step to refine
    #[arg(short, long)]
    pub instance: String,

    /// What to change
    #[arg(short, long)]
    pub feedback: String,

    /// User charged for the refinement
    #[arg(long, default_value = "local")]
    pub user: String,
}

#[derive(ValueEnum, Clone, Debug, PartialEq)]
pub enum OutputFormat {
    /// Plain text output
    Text,

    /// JSON output
    Json,
}
