// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! End-to-end plan execution against scripted providers

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::broadcast::Receiver;

use pluribots::config::Settings;
use pluribots::error::{PluribotsError, Result};
use pluribots::events::PlanEvent;
use pluribots::llm::factory::{ProviderRegistry, Vendor};
use pluribots::llm::mock_provider::{MockProvider, MockResponse};
use pluribots::orchestrator::{
    DeliverableKind, FileDeliverableStore, InMemoryCreditLedger, Orchestrator, ToolExecutor,
};
use pluribots::plans::{ExecutingPlan, FilePlanStore, PlanState, Step};

fn offline_settings() -> Settings {
    let mut settings = Settings::default();
    settings.providers.anthropic.api_key_env = "PLURIBOTS_IT_UNSET_ANTHROPIC".into();
    settings.providers.openai.api_key_env = "PLURIBOTS_IT_UNSET_OPENAI".into();
    settings.providers.google.api_key_env = "PLURIBOTS_IT_UNSET_GOOGLE".into();
    settings
}

fn orchestrator_with(mock: &MockProvider) -> Orchestrator {
    let registry = Arc::new(ProviderRegistry::new());
    registry.register(Vendor::Anthropic, Arc::new(mock.clone()));
    Orchestrator::new(Arc::new(offline_settings()), registry)
}

fn drain(rx: &mut Receiver<PlanEvent>) -> Vec<PlanEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_two_step_chain_end_to_end() {
    let mock = MockProvider::new().with_responses(vec![
        "# Keyword report\n\n- pluribots".to_string(),
        "# Ad copy\n\nBuy now".to_string(),
    ]);
    let ledger = Arc::new(InMemoryCreditLedger::new(50));
    let orch = orchestrator_with(&mock).with_ledger(ledger.clone());
    let mut rx = orch.events().subscribe("conv-e2e");

    let reports = orch
        .execute_plan(ExecutingPlan::new(
            "conv-e2e",
            "user-1",
            vec![
                Step::new("seo", "a", "Research keywords"),
                Step::new("ads", "b", "Write ads").depends_on(["a"]),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.succeeded()));
    assert_eq!(reports[1].plan.state(), PlanState::PlanComplete);

    let events = drain(&mut rx);
    let completes: Vec<&PlanEvent> = events
        .iter()
        .filter(|e| matches!(e, PlanEvent::StepComplete { .. }))
        .collect();
    assert_eq!(completes.len(), 2);
    match completes[0] {
        PlanEvent::StepComplete { next_agent_id, .. } => {
            assert_eq!(next_agent_id.as_deref(), Some("ads"))
        }
        _ => unreachable!(),
    }
    match completes[1] {
        PlanEvent::StepComplete {
            next_agent_id,
            step_index,
            total_steps,
            ..
        } => {
            assert!(next_agent_id.is_none());
            assert_eq!((*step_index, *total_steps), (1, 2));
        }
        _ => unreachable!(),
    }

    let deliverables = orch.deliverable_store().list("conv-e2e").await.unwrap();
    assert_eq!(deliverables.len(), 2);
    assert!(deliverables.iter().all(|d| d.kind == DeliverableKind::Html));
    assert!(deliverables[0].content.contains("<h1>Keyword report</h1>"));

    // Two calls at 30 tokens each, one credit per started thousand.
    assert_eq!(ledger.balance("user-1"), 48);
    assert_eq!(ledger.usage_rows().len(), 2);
}

#[tokio::test]
async fn test_design_context_reaches_developer() {
    let design = r#"<!DOCTYPE html><html><head>
<script>tailwind.config = { theme: { extend: { colors: { brand: '#123456' } } } }</script>
<link href="https://fonts.googleapis.com/css2?family=Inter" rel="stylesheet">
</head><body><section id="hero"><h1>Fresh Bread</h1><img src="https://img.example/loaf.jpg"></section></body></html>"#;
    let code = "<pluriArtifact id=\"bakery\" title=\"Bakery\">\n<pluriAction type=\"file\" filePath=\"index.html\">\n<h1>Fresh Bread</h1>\n</pluriAction>\n</pluriArtifact>";

    let mock = MockProvider::new().with_responses(vec![design.to_string(), code.to_string()]);
    let orch = orchestrator_with(&mock);

    orch.execute_plan(ExecutingPlan::new(
        "conv-design",
        "u",
        vec![
            Step::new("web-design", "web-1", "Landing page"),
            Step::new("dev", "dev-1", "Build it").depends_on(["web-1"]),
        ],
    ))
    .await
    .unwrap();

    let prompt = mock.recorded_requests()[1].messages[0].text();
    assert!(prompt.contains("Design context (reuse exactly):"));
    assert!(prompt.contains("#123456"));
    assert!(prompt.contains("https://img.example/loaf.jpg"));
    assert!(!prompt.contains("<!DOCTYPE html>"));

    let deliverables = orch.deliverable_store().list("conv-design").await.unwrap();
    assert_eq!(deliverables[0].kind, DeliverableKind::Html);
    assert_eq!(deliverables[1].kind, DeliverableKind::Project);
}

struct RecordingTools(Mutex<Vec<String>>);

#[async_trait]
impl ToolExecutor for RecordingTools {
    async fn execute(&self, name: &str, input: serde_json::Value) -> Result<String> {
        self.0.lock().unwrap().push(format!("{}:{}", name, input));
        Ok("result: pluribots is a plan engine".to_string())
    }
}

#[tokio::test]
async fn test_tool_calls_go_through_executor() {
    let mock = MockProvider::new().with_scripted(vec![
        MockResponse::tool_call("web_search", json!({"query": "pluribots"})),
        MockResponse::text("# Findings"),
    ]);
    let tools = Arc::new(RecordingTools(Mutex::new(Vec::new())));
    let orch = orchestrator_with(&mock).with_tools(tools.clone());

    orch.execute_plan(ExecutingPlan::new(
        "conv-tools",
        "u",
        vec![Step::new("seo", "s", "Research")],
    ))
    .await
    .unwrap();

    assert_eq!(mock.call_count(), 2);
    assert_eq!(tools.0.lock().unwrap().len(), 1);
    assert!(tools.0.lock().unwrap()[0].starts_with("web_search:"));
    let deliverables = orch.deliverable_store().list("conv-tools").await.unwrap();
    assert!(deliverables[0].content.contains("Findings"));
}

#[tokio::test]
async fn test_duplicate_instance_ids_are_rejected() {
    let mock = MockProvider::new().with_response("# Report");
    let orch = orchestrator_with(&mock);

    let err = orch
        .execute_plan(ExecutingPlan::new(
            "conv-dup",
            "u",
            vec![
                Step::new("seo", "x", "Research keywords"),
                Step::new("ads", "x", "Write ads"),
            ],
        ))
        .await
        .unwrap_err();

    match err {
        PluribotsError::InvalidInput(message) => assert!(message.contains("duplicate instance id")),
        other => panic!("expected InvalidInput, got {:?}", other),
    }
    assert_eq!(mock.call_count(), 0);
    assert!(orch.plan_store().load("conv-dup").await.unwrap().is_none());
}

#[tokio::test]
async fn test_plan_resumes_from_disk_after_restart() {
    let dir = TempDir::new().unwrap();
    let plans_dir = dir.path().join("plans");
    let deliverables_dir = dir.path().join("deliverables");

    let build = |mock: &MockProvider| {
        orchestrator_with(mock)
            .with_plan_store(Arc::new(FilePlanStore::open(&plans_dir).unwrap()))
            .with_deliverable_store(Arc::new(
                FileDeliverableStore::open(&deliverables_dir).unwrap(),
            ))
    };

    let first = MockProvider::new().with_response("# Brand guide");
    let orch = build(&first);
    orch.start_plan(ExecutingPlan::new(
        "conv-disk",
        "u",
        vec![
            Step::new("branding", "brand", "Guide"),
            Step::new("video", "vid", "Script").depends_on(["brand"]),
        ],
    ))
    .await
    .unwrap();
    let report = orch.execute_next_group("conv-disk").await.unwrap();
    assert_eq!(report.plan.current_group_index, 1);
    drop(orch);

    // A fresh orchestrator picks the plan up where the last one stopped.
    let second = MockProvider::new().with_response("# Video script");
    let orch = build(&second);
    let reports = orch.run_to_completion("conv-disk").await.unwrap();
    assert!(reports.last().unwrap().is_plan_complete());
    assert_eq!(second.call_count(), 1);
    assert!(second.recorded_requests()[0].messages[0]
        .text()
        .contains("Brand guide"));

    assert!(orch.plan_store().load("conv-disk").await.unwrap().is_none());
    assert_eq!(
        orch.deliverable_store().list("conv-disk").await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn test_refine_visual_step_replaces_page() {
    let mock = MockProvider::new().with_scripted(vec![
        MockResponse::text("<html><body><h1>v1</h1></body></html>"),
        MockResponse::text("<html><body><h1>v2</h1></body></html>"),
    ]);
    let orch = orchestrator_with(&mock);

    let mut plan = orch
        .execute_plan(ExecutingPlan::new(
            "conv-refine",
            "u",
            vec![Step::new("web-design", "web-1", "Landing")],
        ))
        .await
        .unwrap()
        .pop()
        .unwrap()
        .plan;

    let deliverable = orch
        .refine_step(&mut plan, "web-1", "Make it v2", "u")
        .await
        .unwrap();

    assert!(deliverable.refined);
    assert!(deliverable.content.contains("<h1>v2</h1>"));
    assert!(plan.agent_outputs["web-1"].contains("v2"));
    let last = mock.last_request().unwrap();
    assert!(last.messages[2].text().contains("complete updated HTML document"));
}
