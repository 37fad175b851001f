// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Provider health and model resolution
//!
//! Before each step the orchestrator asks [`ModelResolver`] for a provider.
//! Candidates are tried in order (plan override, agent default, fallback
//! vendors); a candidate is skipped when its vendor has no credentials or its
//! cached health check failed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::Settings;
use crate::error::{PluribotsError, Result};
use crate::llm::factory::{ModelChoice, ProviderRegistry, Vendor};
use crate::llm::provider::LlmProvider;
use crate::utils::lock;

/// Memoized health-check results per vendor
pub struct HealthCache {
    ttl: Duration,
    entries: Mutex<HashMap<Vendor, (bool, Instant)>>,
}

impl HealthCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cached result, if still fresh
    pub fn get(&self, vendor: Vendor) -> Option<bool> {
        let entries = lock(&self.entries, "health cache");
        entries
            .get(&vendor)
            .filter(|(_, checked_at)| checked_at.elapsed() < self.ttl)
            .map(|(healthy, _)| *healthy)
    }

    pub fn record(&self, vendor: Vendor, healthy: bool) {
        lock(&self.entries, "health cache").insert(vendor, (healthy, Instant::now()));
    }

    pub fn invalidate(&self, vendor: Vendor) {
        lock(&self.entries, "health cache").remove(&vendor);
    }

    pub fn invalidate_all(&self) {
        lock(&self.entries, "health cache").clear();
    }

    /// Cached health of `vendor`, probing `provider` when nothing fresh is cached
    pub async fn check(&self, vendor: Vendor, provider: &dyn LlmProvider) -> bool {
        if let Some(healthy) = self.get(vendor) {
            return healthy;
        }

        let healthy = match provider.health_check().await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    target: "pluribots.llm",
                    vendor = %vendor,
                    error = %err,
                    "health check failed"
                );
                false
            }
        };
        self.record(vendor, healthy);
        healthy
    }
}

/// The provider chosen for one step
#[derive(Clone)]
pub struct ResolvedModel {
    pub vendor: Vendor,
    pub model: String,
    pub provider: Arc<dyn LlmProvider>,
    /// True when the first candidate was passed over
    pub fell_back: bool,
}

impl std::fmt::Debug for ResolvedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedModel")
            .field("vendor", &self.vendor)
            .field("model", &self.model)
            .field("fell_back", &self.fell_back)
            .finish()
    }
}

/// Picks a usable provider for a step
pub struct ModelResolver {
    settings: Arc<Settings>,
    registry: Arc<ProviderRegistry>,
    health: Arc<HealthCache>,
}

impl ModelResolver {
    pub fn new(
        settings: Arc<Settings>,
        registry: Arc<ProviderRegistry>,
        health: Arc<HealthCache>,
    ) -> Self {
        Self {
            settings,
            registry,
            health,
        }
    }

    pub fn health(&self) -> &Arc<HealthCache> {
        &self.health
    }

    /// Ordered, de-duplicated candidates for a step
    pub fn candidates(
        &self,
        plan_override: Option<&ModelChoice>,
        agent_default: &ModelChoice,
    ) -> Vec<(Vendor, String)> {
        let primary = plan_override.unwrap_or(agent_default);

        let mut choices: Vec<(Vendor, String)> = Vec::new();
        let mut push = |vendor: Vendor, model: String| {
            if !choices.iter().any(|(v, m)| *v == vendor && *m == model) {
                choices.push((vendor, model));
            }
        };

        if let Some(choice) = plan_override {
            push(choice.vendor, choice.model_or_default(&self.settings).to_string());
        }
        push(
            agent_default.vendor,
            agent_default.model_or_default(&self.settings).to_string(),
        );
        for vendor in self.settings.fallback_order(primary.vendor) {
            push(vendor, self.settings.default_model(vendor).to_string());
        }
        choices
    }

    /// Resolve the provider for a step.
    ///
    /// Fails with [`PluribotsError::ProviderUnavailable`] when every candidate
    /// lacks credentials or is unhealthy.
    pub async fn resolve(
        &self,
        plan_override: Option<&ModelChoice>,
        agent_default: &ModelChoice,
    ) -> Result<ResolvedModel> {
        let candidates = self.candidates(plan_override, agent_default);
        let mut tried = Vec::new();

        for (position, (vendor, model)) in candidates.into_iter().enumerate() {
            if !self.registry.has_credentials(vendor, &self.settings) {
                tracing::debug!(target: "pluribots.llm", vendor = %vendor, "skipping vendor without credentials");
                tried.push(format!("{} (no credentials)", vendor));
                continue;
            }

            let provider = self.registry.get(vendor, &model, &self.settings)?;

            if self.settings.orchestration.health_check
                && !self.health.check(vendor, provider.as_ref()).await
            {
                tried.push(format!("{} (unhealthy)", vendor));
                continue;
            }

            if position > 0 {
                tracing::info!(
                    target: "pluribots.llm",
                    vendor = %vendor,
                    model = %model,
                    "substituting fallback provider"
                );
            }

            return Ok(ResolvedModel {
                vendor,
                model,
                provider,
                fell_back: position > 0,
            });
        }

        Err(PluribotsError::ProviderUnavailable(format!(
            "no usable provider; tried {}",
            tried.join(", ")
        )))
    }
}
