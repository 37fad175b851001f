// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Plan execution
//!
//! The [`Orchestrator`] drives one execution group at a time. Every step of
//! the group runs concurrently and the group is joined before the cursor
//! moves. Per step it:
//!
//! 1. builds the prompt from completed dependency outputs
//! 2. resolves a provider (plan override, agent default, health fallback)
//! 3. streams the response, broadcasting live events
//! 4. charges credits, extracts and stores the deliverable
//! 5. signals completion with a pointer to the next group's first step
//!
//! A failed step emits an `error` event and keeps the cursor where it is, so
//! the plan can be resumed. [`Orchestrator::refine_step`] re-runs one
//! completed step with user feedback without touching the cursor.
//!
//! ```rust,ignore
//! let orchestrator = Orchestrator::new(settings, registry);
//! let mut events = orchestrator.events().subscribe("conv-1");
//! orchestrator.start_plan(ExecutingPlan::new("conv-1", "user-1", steps)).await?;
//! let reports = orchestrator.run_to_completion("conv-1").await?;
//! ```

pub mod context;
pub mod deliverable;
mod handler;
mod refine;
pub mod services;

pub use context::{build_step_prompt, extract_design_context};
pub use deliverable::{extract_deliverable, ExtractedDeliverable};
pub use services::{
    credits_for, CreditLedger, Deliverable, DeliverableKind, DeliverableStore,
    FileDeliverableStore, InMemoryCreditLedger, InMemoryDeliverableStore, NoToolExecutor,
    ToolExecutor,
};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::agents::{AgentCatalog, AgentDefinition};
use crate::config::Settings;
use crate::error::{PluribotsError, Result};
use crate::events::{EventBroadcaster, PlanEvent};
use crate::llm::factory::{ModelChoice, ProviderRegistry};
use crate::llm::health::{HealthCache, ModelResolver};
use crate::llm::message::Message;
use crate::llm::provider::Usage;
use crate::llm::streaming::StreamOutcome;
use crate::plans::{
    compute_groups, enforce_visual_exclusivity, ExecutingPlan, InMemoryPlanStore, PlanStore, Step,
};
use crate::utils::{format_error, truncate_chars};
use handler::StepHandler;

/// A step of a group that did not complete
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    pub instance_id: String,
    pub message: String,
}

/// Outcome of one [`Orchestrator::execute_next_group`] call
#[derive(Debug, Clone)]
pub struct GroupReport {
    /// Index of the group that ran
    pub group_index: usize,
    /// Steps that completed in this call
    pub completed: Vec<String>,
    pub failed: Vec<StepFailure>,
    /// The plan as persisted after the group
    pub plan: ExecutingPlan,
}

impl GroupReport {
    pub fn succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn is_plan_complete(&self) -> bool {
        self.plan.is_finished()
    }
}

/// Executes plans against providers and the external collaborators
pub struct Orchestrator {
    settings: Arc<Settings>,
    catalog: Arc<AgentCatalog>,
    resolver: ModelResolver,
    plans: Arc<dyn PlanStore>,
    deliverables: Arc<dyn DeliverableStore>,
    ledger: Arc<dyn CreditLedger>,
    tools: Arc<dyn ToolExecutor>,
    events: Arc<EventBroadcaster>,
}

impl Orchestrator {
    /// Orchestrator with the built-in agents and in-memory collaborators
    pub fn new(settings: Arc<Settings>, registry: Arc<ProviderRegistry>) -> Self {
        let health = Arc::new(HealthCache::new(Duration::from_secs(
            settings.orchestration.health_ttl_secs,
        )));
        let resolver = ModelResolver::new(settings.clone(), registry, health);
        Self {
            settings,
            catalog: Arc::new(AgentCatalog::builtin()),
            resolver,
            plans: Arc::new(InMemoryPlanStore::new()),
            deliverables: Arc::new(InMemoryDeliverableStore::new()),
            ledger: Arc::new(InMemoryCreditLedger::default()),
            tools: Arc::new(NoToolExecutor),
            events: Arc::new(EventBroadcaster::new()),
        }
    }

    pub fn with_catalog(mut self, catalog: AgentCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    pub fn with_plan_store(mut self, plans: Arc<dyn PlanStore>) -> Self {
        self.plans = plans;
        self
    }

    pub fn with_deliverable_store(mut self, deliverables: Arc<dyn DeliverableStore>) -> Self {
        self.deliverables = deliverables;
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn CreditLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_tools(mut self, tools: Arc<dyn ToolExecutor>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBroadcaster>) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &Arc<EventBroadcaster> {
        &self.events
    }

    pub fn catalog(&self) -> &AgentCatalog {
        &self.catalog
    }

    pub fn plan_store(&self) -> &Arc<dyn PlanStore> {
        &self.plans
    }

    pub fn deliverable_store(&self) -> &Arc<dyn DeliverableStore> {
        &self.deliverables
    }

    /// Schedule a freshly approved plan and persist it.
    ///
    /// Steps must name known agents and carry distinct instance ids. Any
    /// previous progress in `plan` is discarded.
    pub async fn start_plan(&self, mut plan: ExecutingPlan) -> Result<ExecutingPlan> {
        if plan.steps.is_empty() {
            return Err(PluribotsError::InvalidInput("plan has no steps".to_string()));
        }
        let mut seen = HashSet::new();
        for step in &plan.steps {
            self.catalog.require(&step.agent_id)?;
            if !seen.insert(step.instance_id.as_str()) {
                return Err(PluribotsError::InvalidInput(format!(
                    "duplicate instance id '{}'",
                    step.instance_id
                )));
            }
        }
        if let Some(model) = &plan.model_override {
            ModelChoice::parse(model)?;
        }

        let groups = compute_groups(&plan.steps);
        plan.groups = enforce_visual_exclusivity(groups, &plan.steps, |step| {
            self.catalog.is_visual(&step.agent_id)
        });
        plan.current_group_index = 0;
        plan.completed.clear();
        plan.agent_outputs.clear();
        plan.touch();

        self.plans.save(&plan).await?;
        tracing::info!(
            target: "pluribots.orchestrator",
            conversation_id = %plan.conversation_id,
            steps = plan.steps.len(),
            groups = plan.groups.len(),
            "plan started"
        );
        Ok(plan)
    }

    /// Run every not-yet-completed step of the current group.
    ///
    /// The cursor advances only when all of them succeed. A finished plan is
    /// deleted from the store; otherwise it is saved.
    pub async fn execute_next_group(&self, conversation_id: &str) -> Result<GroupReport> {
        let mut plan = self.plans.load(conversation_id).await?.ok_or_else(|| {
            PluribotsError::Plan(format!(
                "no executing plan for conversation '{}'",
                conversation_id
            ))
        })?;
        let group_index = plan.current_group_index;

        if plan.is_finished() {
            self.plans.delete(conversation_id).await?;
            return Ok(GroupReport {
                group_index,
                completed: Vec::new(),
                failed: Vec::new(),
                plan,
            });
        }

        let pending: Vec<Step> = plan
            .current_group()
            .into_iter()
            .flatten()
            .filter(|id| !plan.is_completed(id))
            .filter_map(|id| plan.step(id).cloned())
            .collect();

        tracing::info!(
            target: "pluribots.orchestrator",
            conversation_id,
            group = group_index,
            steps = pending.len(),
            "executing group"
        );

        let results = futures::future::join_all(
            pending
                .iter()
                .map(|step| self.run_step(&plan, step, group_index)),
        )
        .await;

        let mut completed = Vec::new();
        let mut failed = Vec::new();
        for (step, result) in pending.iter().zip(results) {
            match result {
                Ok(output) => {
                    plan.complete_step(&step.instance_id, output);
                    completed.push(step.instance_id.clone());
                }
                Err(err) => failed.push(StepFailure {
                    instance_id: step.instance_id.clone(),
                    message: err.to_string(),
                }),
            }
        }

        if failed.is_empty() {
            plan.current_group_index += 1;
        }
        plan.touch();

        if plan.is_finished() {
            self.plans.delete(conversation_id).await?;
            tracing::info!(target: "pluribots.orchestrator", conversation_id, "plan complete");
        } else {
            self.plans.save(&plan).await?;
        }

        Ok(GroupReport {
            group_index,
            completed,
            failed,
            plan,
        })
    }

    /// Execute groups until the plan finishes or a group has a failed step
    pub async fn run_to_completion(&self, conversation_id: &str) -> Result<Vec<GroupReport>> {
        let mut reports = Vec::new();
        loop {
            let report = self.execute_next_group(conversation_id).await?;
            let stop = !report.succeeded() || report.is_plan_complete();
            reports.push(report);
            if stop {
                return Ok(reports);
            }
        }
    }

    /// [`Orchestrator::start_plan`] followed by [`Orchestrator::run_to_completion`]
    pub async fn execute_plan(&self, plan: ExecutingPlan) -> Result<Vec<GroupReport>> {
        let plan = self.start_plan(plan).await?;
        self.run_to_completion(&plan.conversation_id).await
    }

    async fn run_step(&self, plan: &ExecutingPlan, step: &Step, group_index: usize) -> Result<String> {
        let result = self.execute_step(plan, step, group_index).await;
        if let Err(err) = &result {
            tracing::warn!(
                target: "pluribots.orchestrator",
                instance_id = %step.instance_id,
                error = %err,
                "step failed"
            );
            self.emit(
                &plan.conversation_id,
                PlanEvent::error(Some(&step.instance_id), format_error(err)),
            );
        }
        result
    }

    async fn execute_step(
        &self,
        plan: &ExecutingPlan,
        step: &Step,
        group_index: usize,
    ) -> Result<String> {
        let agent = self.catalog.require(&step.agent_id)?;
        let prompt = build_step_prompt(plan, step, &self.catalog);
        let messages = vec![self.user_turn(plan, prompt)];

        let (outcome, model) = self.stream_step(plan, step, agent, messages).await?;
        let extracted = extract_deliverable(&agent.name, &outcome.text);
        self.finish_step(
            plan,
            step,
            agent,
            &plan.user_id,
            &model,
            &outcome.usage,
            extracted,
            group_index + 1,
            false,
        )
        .await?;
        Ok(outcome.text)
    }

    fn user_turn(&self, plan: &ExecutingPlan, prompt: String) -> Message {
        match &plan.image {
            Some(image) => Message::user_with_images(prompt, vec![image.clone()]),
            None => Message::user(prompt),
        }
    }

    /// Resolve the provider and stream one response for `step`
    async fn stream_step(
        &self,
        plan: &ExecutingPlan,
        step: &Step,
        agent: &AgentDefinition,
        messages: Vec<Message>,
    ) -> Result<(StreamOutcome, String)> {
        let plan_override = plan
            .model_override
            .as_deref()
            .map(ModelChoice::parse)
            .transpose()?;
        let default = agent.model_choice(&self.settings);
        let resolved = self.resolver.resolve(plan_override.as_ref(), &default).await?;

        tracing::info!(
            target: "pluribots.orchestrator",
            instance_id = %step.instance_id,
            agent = %agent.id,
            vendor = %resolved.vendor,
            model = %resolved.model,
            fell_back = resolved.fell_back,
            "running step"
        );

        let handler = StepHandler::new(
            &plan.conversation_id,
            &step.instance_id,
            agent,
            self.events.clone(),
            self.tools.clone(),
        );

        let outcome = if agent.uses_tools() {
            resolved
                .provider
                .stream_with_tools(
                    &agent.system_prompt,
                    messages,
                    &agent.tools,
                    &handler,
                    self.settings.max_tool_rounds(),
                )
                .await?
        } else {
            resolved
                .provider
                .stream(&agent.system_prompt, messages, &handler)
                .await?
        };
        Ok((outcome, resolved.model))
    }

    /// Charge, persist and announce a finished step
    #[allow(clippy::too_many_arguments)]
    async fn finish_step(
        &self,
        plan: &ExecutingPlan,
        step: &Step,
        agent: &AgentDefinition,
        user_id: &str,
        model: &str,
        usage: &Usage,
        extracted: ExtractedDeliverable,
        next_group: usize,
        refined: bool,
    ) -> Result<Deliverable> {
        self.charge(&plan.conversation_id, user_id, agent, model, usage)
            .await;

        let kind = extracted.kind();
        let (content, artifact) = match extracted {
            ExtractedDeliverable::Project(artifact) => (artifact.to_markup(), Some(artifact)),
            ExtractedDeliverable::Html(html) => (html, None),
        };
        let deliverable = Deliverable {
            id: Uuid::new_v4(),
            conversation_id: plan.conversation_id.clone(),
            instance_id: step.instance_id.clone(),
            agent_id: agent.id.clone(),
            title: agent.name.clone(),
            kind,
            content,
            artifact,
            refined,
            created_at: Utc::now(),
        };
        self.deliverables.save(&deliverable).await?;
        self.emit(
            &plan.conversation_id,
            PlanEvent::Deliverable(deliverable.clone()),
        );

        let next = plan.first_step_of_group(next_group);
        let verb = if refined { "updated" } else { "finished" };
        self.emit(
            &plan.conversation_id,
            PlanEvent::StepComplete {
                instance_id: step.instance_id.clone(),
                summary: format!("{} {}: {}", agent.name, verb, truncate_chars(step.label(), 120)),
                next_agent_id: next.map(|s| s.agent_id.clone()),
                next_instance_id: next.map(|s| s.instance_id.clone()),
                next_task: next.map(|s| s.task.clone()),
                step_index: plan.step_index(&step.instance_id).unwrap_or_default(),
                total_steps: plan.steps.len(),
            },
        );
        Ok(deliverable)
    }

    /// Usage and credit calls; failures are logged, never retried
    async fn charge(
        &self,
        conversation_id: &str,
        user_id: &str,
        agent: &AgentDefinition,
        model: &str,
        usage: &Usage,
    ) {
        if let Err(err) = self.ledger.track_usage(user_id, &agent.id, model, usage).await {
            tracing::warn!(target: "pluribots.orchestrator", error = %err, "usage tracking failed");
        }

        let credits = credits_for(usage, self.settings.orchestration.credits_per_1k_tokens);
        match self.ledger.consume_credits(user_id, credits).await {
            Ok(balance) => self.emit(
                conversation_id,
                PlanEvent::CreditUpdate {
                    credits_used: credits,
                    balance,
                },
            ),
            Err(err) => {
                tracing::warn!(target: "pluribots.orchestrator", error = %err, "credit deduction failed")
            }
        }
    }

    fn emit(&self, conversation_id: &str, event: PlanEvent) {
        self.events.broadcast(conversation_id, event);
    }
}
