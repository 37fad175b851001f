// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tokio::task::JoinHandle;

use pluribots::agents::AgentCatalog;
use pluribots::cli::{GroupsArgs, OutputFormat, PlanDocument, RefineArgs, RunArgs};
use pluribots::config::Settings;
use pluribots::error::{PluribotsError, Result};
use pluribots::events::PlanEvent;
use pluribots::llm::factory::{ProviderRegistry, Vendor};
use pluribots::orchestrator::{
    FileDeliverableStore, GroupReport, InMemoryCreditLedger, Orchestrator,
};
use pluribots::plans::{compute_groups, enforce_visual_exclusivity, ExecutingPlan, FilePlanStore};
use pluribots::utils::truncate_chars;

fn build_orchestrator(settings: Settings) -> Result<Orchestrator> {
    Settings::ensure_directories()?;
    Ok(
        Orchestrator::new(Arc::new(settings), Arc::new(ProviderRegistry::new()))
            .with_plan_store(Arc::new(FilePlanStore::open_default()?))
            .with_deliverable_store(Arc::new(FileDeliverableStore::open_default()?))
            .with_ledger(Arc::new(InMemoryCreditLedger::default())),
    )
}

/// Print events for one conversation until its channel closes
fn spawn_printer(mut rx: Receiver<PlanEvent>, format: OutputFormat) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => print_event(&event, &format),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(target: "pluribots.cli", skipped, "event printer lagged")
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn print_event(event: &PlanEvent, format: &OutputFormat) {
    if *format == OutputFormat::Json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!(target: "pluribots.cli", error = %e, "unprintable event"),
        }
        return;
    }

    match event {
        PlanEvent::ArtifactStart { instance_id } => println!("[{}] building project", instance_id),
        PlanEvent::FileUpdate {
            instance_id,
            file_path,
            partial: false,
            ..
        } => println!("[{}] wrote {}", instance_id, file_path),
        PlanEvent::StepComplete {
            summary,
            step_index,
            total_steps,
            next_agent_id,
            ..
        } => {
            println!("({}/{}) {}", step_index + 1, total_steps, summary);
            if let Some(next) = next_agent_id {
                println!("      next: {}", next);
            }
        }
        PlanEvent::CreditUpdate {
            credits_used,
            balance,
        } => println!("      credits: -{} (balance {})", credits_used, balance),
        PlanEvent::Deliverable(d) => println!(
            "      deliverable {} ({:?}, {} chars)",
            d.id,
            d.kind,
            d.content.chars().count()
        ),
        PlanEvent::Error {
            instance_id,
            message,
        } => eprintln!(
            "error{}: {}",
            instance_id
                .as_deref()
                .map(|id| format!(" in {}", id))
                .unwrap_or_default(),
            message
        ),
        PlanEvent::FileUpdate { .. } | PlanEvent::Token { .. } | PlanEvent::ThinkingUpdate { .. } => {}
    }
}

fn write_state(path: &Path, plan: &ExecutingPlan) -> Result<()> {
    let json = serde_json::to_string_pretty(plan)?;
    std::fs::write(path, json)?;
    Ok(())
}

fn summarize(reports: &[GroupReport]) -> Result<()> {
    let Some(last) = reports.last() else {
        return Ok(());
    };
    if let Some(failure) = last.failed.first() {
        return Err(PluribotsError::Plan(format!(
            "group {} stopped: {} failed ({}); re-run with --resume --conversation {}",
            last.group_index + 1,
            failure.instance_id,
            truncate_chars(&failure.message, 200),
            last.plan.conversation_id
        )));
    }
    Ok(())
}

/// Execute a plan document, or resume a persisted one
pub(super) async fn run_plan(args: RunArgs, settings: Settings, format: &OutputFormat) -> Result<()> {
    let conversation_id = args
        .conversation
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    if args.resume && args.conversation.is_none() {
        return Err(PluribotsError::InvalidInput(
            "--resume needs --conversation".to_string(),
        ));
    }

    let orchestrator = build_orchestrator(settings)?;
    let printer = spawn_printer(
        orchestrator.events().subscribe(&conversation_id),
        format.clone(),
    );

    let result = if args.resume {
        orchestrator.run_to_completion(&conversation_id).await
    } else {
        let doc = PlanDocument::load(&args.plan)?;
        let mut plan = ExecutingPlan::new(&conversation_id, &args.user, doc.steps);
        if let Some(model) = args.model.or(doc.model_override) {
            plan = plan.with_model_override(model);
        }
        orchestrator.execute_plan(plan).await
    };

    orchestrator.events().close(&conversation_id);
    let _ = printer.await;

    let reports = result?;
    if let (Some(path), Some(last)) = (&args.save_state, reports.last()) {
        write_state(path, &last.plan)?;
    }
    summarize(&reports)
}

/// Print the execution groups for a plan document
pub(super) fn run_groups(args: GroupsArgs, format: &OutputFormat) -> Result<()> {
    let doc = PlanDocument::load(&args.plan)?;
    let catalog = AgentCatalog::builtin();
    let groups = enforce_visual_exclusivity(compute_groups(&doc.steps), &doc.steps, |step| {
        catalog.is_visual(&step.agent_id)
    });

    if *format == OutputFormat::Json {
        println!("{}", serde_json::to_string(&groups)?);
        return Ok(());
    }
    for (index, group) in groups.iter().enumerate() {
        println!("{}. {}", index + 1, group.join(", "));
    }
    Ok(())
}

/// Refine one step of a saved plan state and write the state back
pub(super) async fn run_refine(
    args: RefineArgs,
    settings: Settings,
    format: &OutputFormat,
) -> Result<()> {
    let content = std::fs::read_to_string(&args.plan)?;
    let mut plan: ExecutingPlan = serde_json::from_str(&content)?;

    let orchestrator = build_orchestrator(settings)?;
    let printer = spawn_printer(
        orchestrator.events().subscribe(&plan.conversation_id),
        format.clone(),
    );
    let result = orchestrator
        .refine_step(&mut plan, &args.instance, &args.feedback, &args.user)
        .await;
    orchestrator.events().close(&plan.conversation_id);
    let _ = printer.await;

    result?;
    write_state(&args.plan, &plan)
}

/// List the agent catalog with the vendor each agent would use
pub(super) fn run_agents(settings: &Settings, format: &OutputFormat) -> Result<()> {
    let catalog = AgentCatalog::builtin();

    if *format == OutputFormat::Json {
        let agents: Vec<serde_json::Value> = catalog
            .iter()
            .map(|agent| {
                let choice = agent.model_choice(settings);
                serde_json::json!({
                    "id": agent.id,
                    "name": agent.name,
                    "output": agent.output,
                    "vendor": choice.vendor,
                    "model": choice.model_or_default(settings),
                    "configured": settings.is_vendor_configured(choice.vendor),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&agents)?);
        return Ok(());
    }

    for agent in catalog.iter() {
        let choice = agent.model_choice(settings);
        println!(
            "{:<12} {:<18} {:>10}:{}",
            agent.id,
            agent.name,
            choice.vendor.as_str(),
            choice.model_or_default(settings)
        );
    }
    println!();
    for vendor in Vendor::ALL {
        let status = if settings.is_vendor_configured(vendor) {
            "configured"
        } else {
            "missing API key"
        };
        println!("{:<10} {}", vendor.as_str(), status);
    }
    Ok(())
}
