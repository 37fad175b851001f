// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Re-running one completed step with user feedback

use super::context::build_step_prompt;
use super::deliverable::{extract_deliverable, ExtractedDeliverable};
use super::{Deliverable, Orchestrator};
use crate::agents::AgentCatalog;
use crate::artifact::{parse_artifact, ProjectArtifact};
use crate::error::{PluribotsError, Result};
use crate::events::PlanEvent;
use crate::llm::message::Message;
use crate::plans::{ExecutingPlan, Step};
use crate::utils::format_error;

impl Orchestrator {
    /// Re-execute a completed step with `feedback`.
    ///
    /// Project agents return only changed files, which are merged into the
    /// previous artifact; other agents return a full replacement. The step's
    /// stored output is updated and the plan re-persisted with its cursor
    /// unchanged. A plan that already finished is not written back to the
    /// store. The `step_complete` event points at the group after the step's
    /// own group.
    pub async fn refine_step(
        &self,
        plan: &mut ExecutingPlan,
        instance_id: &str,
        feedback: &str,
        user_id: &str,
    ) -> Result<Deliverable> {
        let step = plan.step(instance_id).cloned().ok_or_else(|| {
            PluribotsError::InvalidInput(format!("no step '{}' in plan", instance_id))
        })?;
        if !plan.is_completed(instance_id) {
            return Err(PluribotsError::Plan(format!(
                "step '{}' has not completed yet",
                instance_id
            )));
        }
        if feedback.trim().is_empty() {
            return Err(PluribotsError::InvalidInput(
                "refinement feedback is empty".to_string(),
            ));
        }

        let result = self.refine_inner(plan, &step, feedback, user_id).await;
        if let Err(err) = &result {
            tracing::warn!(
                target: "pluribots.orchestrator",
                instance_id,
                error = %err,
                "refinement failed"
            );
            self.emit(
                &plan.conversation_id,
                PlanEvent::error(Some(instance_id), format_error(err)),
            );
        }
        result
    }

    async fn refine_inner(
        &self,
        plan: &mut ExecutingPlan,
        step: &Step,
        feedback: &str,
        user_id: &str,
    ) -> Result<Deliverable> {
        let agent = self.catalog.require(&step.agent_id)?;
        let previous = plan
            .agent_outputs
            .get(&step.instance_id)
            .cloned()
            .unwrap_or_default();
        let base = if agent.is_project() {
            parse_artifact(&previous).filter(|a| !a.is_empty())
        } else {
            None
        };

        let first = self.user_turn(plan, build_step_prompt(plan, step, &self.catalog));
        let messages =
            refinement_messages(first, &previous, base.as_ref(), feedback, &self.catalog, step);

        let (outcome, model) = self.stream_step(plan, step, agent, messages).await?;

        let (output, extracted) = match base {
            Some(base) => {
                let update = parse_artifact(&outcome.text).unwrap_or_default();
                let merged = base.merge(&update);
                (merged.to_markup(), ExtractedDeliverable::Project(merged))
            }
            None => (
                outcome.text.clone(),
                extract_deliverable(&agent.name, &outcome.text),
            ),
        };

        plan.agent_outputs.insert(step.instance_id.clone(), output);
        plan.touch();
        if plan.is_finished() {
            tracing::debug!(
                target: "pluribots.orchestrator",
                conversation_id = %plan.conversation_id,
                "refined a finished plan; not persisting"
            );
        } else {
            self.plans.save(plan).await?;
        }

        let next_group = plan
            .group_of(&step.instance_id)
            .map(|g| g + 1)
            .unwrap_or(plan.groups.len());
        self.finish_step(
            plan,
            step,
            agent,
            user_id,
            &model,
            &outcome.usage,
            extracted,
            next_group,
            true,
        )
        .await
    }
}

/// Three turns: the original request, the previous answer, and the feedback
fn refinement_messages(
    first: Message,
    previous: &str,
    base: Option<&ProjectArtifact>,
    feedback: &str,
    catalog: &AgentCatalog,
    step: &Step,
) -> Vec<Message> {
    let previous_turn = if previous.trim().is_empty() {
        "(no previous output)".to_string()
    } else {
        previous.to_string()
    };

    let instruction = match base {
        Some(artifact) => format!(
            "{}\n\nCurrent project:\n\n{}\nReturn ONLY the files you change or add, inside a \
             <pluriArtifact id=\"{}\"> block. Files you leave out are kept as they are.",
            feedback.trim(),
            artifact.format_as_context(),
            artifact.id
        ),
        None => {
            let what = if catalog.is_visual(&step.agent_id) {
                "HTML document"
            } else {
                "document"
            };
            format!(
                "{}\n\nReturn the complete updated {}, not only the parts that change.",
                feedback.trim(),
                what
            )
        }
    };

    vec![
        first,
        Message::assistant(previous_turn),
        Message::user(instruction),
    ]
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Settings;
    use crate::llm::factory::{ProviderRegistry, Vendor};
    use crate::llm::message::Role;
    use crate::llm::mock_provider::{MockProvider, MockResponse};
    use crate::orchestrator::DeliverableKind;

    const V1: &str = "<pluriArtifact id=\"shop\" title=\"Shop\">\n<pluriAction type=\"file\" filePath=\"index.html\">\n<h1>Shop</h1>\n</pluriAction>\n<pluriAction type=\"file\" filePath=\"style.css\">\nbody{}\n</pluriAction>\n</pluriArtifact>";
    const V2: &str = "Updated the heading.\n<pluriArtifact id=\"shop\" title=\"Shop\">\n<pluriAction type=\"file\" filePath=\"index.html\">\n<h1>Better Shop</h1>\n</pluriAction>\n</pluriArtifact>";

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.providers.anthropic.api_key_env = "PLURIBOTS_REFINE_TEST_A".into();
        settings.providers.openai.api_key_env = "PLURIBOTS_REFINE_TEST_O".into();
        settings.providers.google.api_key_env = "PLURIBOTS_REFINE_TEST_G".into();
        settings
    }

    fn orchestrator(mock: MockProvider) -> Orchestrator {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(Vendor::Anthropic, Arc::new(mock));
        Orchestrator::new(Arc::new(settings()), registry)
    }

    /// A dev step followed by an seo step, with the dev group executed
    async fn two_step_plan(orch: &Orchestrator, conversation_id: &str) -> ExecutingPlan {
        orch.start_plan(ExecutingPlan::new(
            conversation_id,
            "u1",
            vec![
                Step::new("dev", "dev-1", "build a shop"),
                Step::new("seo", "seo-1", "audit").depends_on(["dev-1"]),
            ],
        ))
        .await
        .unwrap();
        orch.execute_next_group(conversation_id).await.unwrap().plan
    }

    #[tokio::test]
    async fn test_refine_project_merges_files() {
        let mock = MockProvider::new().with_scripted(vec![
            MockResponse::text(V1),
            MockResponse::text(V2),
        ]);
        let orch = orchestrator(mock.clone());
        let mut plan = two_step_plan(&orch, "r1").await;
        assert_eq!(plan.current_group_index, 1);

        let mut rx = orch.events().subscribe("r1");
        let deliverable = orch
            .refine_step(&mut plan, "dev-1", "Make the heading better", "u1")
            .await
            .unwrap();

        assert_eq!(deliverable.kind, DeliverableKind::Project);
        assert!(deliverable.refined);
        let artifact = deliverable.artifact.unwrap();
        assert_eq!(artifact.files.len(), 2);
        assert_eq!(artifact.file("index.html").unwrap().content, "<h1>Better Shop</h1>");
        assert_eq!(artifact.file("style.css").unwrap().content, "body{}");

        // Cursor untouched, output replaced by the merged markup, plan re-persisted.
        assert_eq!(plan.current_group_index, 1);
        assert!(plan.agent_outputs["dev-1"].contains("Better Shop"));
        assert!(plan.agent_outputs["dev-1"].contains("style.css"));
        let stored = orch.plan_store().load("r1").await.unwrap().unwrap();
        assert_eq!(stored.agent_outputs["dev-1"], plan.agent_outputs["dev-1"]);

        // Three turns, the last carrying the artifact summary.
        let request = mock.last_request().unwrap();
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[1].role, Role::Assistant);
        let last = request.messages[2].text();
        assert!(last.starts_with("Make the heading better"));
        assert!(last.contains("## Shop (2 files)"));

        let mut next = None;
        while let Ok(event) = rx.try_recv() {
            if let PlanEvent::StepComplete {
                next_instance_id, ..
            } = event
            {
                next = next_instance_id;
            }
        }
        assert_eq!(next.as_deref(), Some("seo-1"));
    }

    #[tokio::test]
    async fn test_refine_document_replaces_output() {
        let mock = MockProvider::new().with_scripted(vec![
            MockResponse::text("# Audit v1"),
            MockResponse::text("# Audit v2"),
        ]);
        let orch = orchestrator(mock.clone());
        let mut plan = orch
            .start_plan(ExecutingPlan::new("r2", "u1", vec![Step::new("branding", "b-1", "guide")]))
            .await
            .unwrap();
        let report = orch.execute_next_group("r2").await.unwrap();
        assert!(report.is_plan_complete());
        plan = report.plan;

        let deliverable = orch
            .refine_step(&mut plan, "b-1", "More color", "u1")
            .await
            .unwrap();
        assert_eq!(deliverable.kind, DeliverableKind::Html);
        assert!(deliverable.content.contains("<h1>Audit v2</h1>"));
        assert_eq!(plan.agent_outputs["b-1"], "# Audit v2");
        assert!(mock
            .last_request()
            .unwrap()
            .messages[2]
            .text()
            .contains("complete updated document"));
        // Finished plans stay deleted.
        assert!(orch.plan_store().load("r2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refine_rejects_incomplete_or_unknown_steps() {
        let orch = orchestrator(MockProvider::new());
        let mut plan = orch
            .start_plan(ExecutingPlan::new("r3", "u1", vec![Step::new("seo", "s", "t")]))
            .await
            .unwrap();

        assert!(matches!(
            orch.refine_step(&mut plan, "s", "more", "u1").await.unwrap_err(),
            PluribotsError::Plan(_)
        ));
        assert!(matches!(
            orch.refine_step(&mut plan, "ghost", "more", "u1").await.unwrap_err(),
            PluribotsError::InvalidInput(_)
        ));
    }
}
