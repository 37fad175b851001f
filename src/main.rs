// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Pluribots - plan execution engine for multi-agent LLM workflows
//!
//! Entry point for the CLI application.

use anyhow::Context;
use clap::Parser;

use pluribots::cli::{Cli, Commands, OutputFormat};
use pluribots::config::Settings;

#[path = "main/cli_commands.rs"]
mod cli_commands;

use cli_commands::{run_agents, run_groups, run_plan, run_refine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into());

    // `-v` raises the crate's own targets; `RUST_LOG` still applies to the rest.
    let level = match cli.verbose {
        0 => None,
        1 => Some("info"),
        2 => Some("debug"),
        _ => Some("trace"),
    };
    if let Some(level) = level {
        if let Ok(parsed) = format!("pluribots={}", level).parse() {
            env_filter = env_filter.add_directive(parsed);
        }
    }

    // stdout carries events; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::load().context("loading settings")?,
    };

    let events = cli.format.clone().unwrap_or(OutputFormat::Json);
    let listing = cli.format.unwrap_or(OutputFormat::Text);

    match cli.command {
        Commands::Run(args) => run_plan(args, settings, &events).await?,
        Commands::Groups(args) => run_groups(args, &listing)?,
        Commands::Refine(args) => run_refine(args, settings, &events).await?,
        Commands::Agents => run_agents(&settings, &listing)?,
    }
    Ok(())
}
