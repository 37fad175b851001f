// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Plan persistence
//!
//! In-flight plans are saved between groups so a restarted process can resume
//! them. The file store keeps one JSON document per conversation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use super::step::ExecutingPlan;
use crate::config::Settings;
use crate::error::{PluribotsError, Result};
use crate::utils::lock;

/// Record store for executing plans, keyed by conversation id
#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn load(&self, conversation_id: &str) -> Result<Option<ExecutingPlan>>;

    /// Create or replace the plan for its conversation
    async fn save(&self, plan: &ExecutingPlan) -> Result<()>;

    /// Remove the plan; removing a missing plan is not an error
    async fn delete(&self, conversation_id: &str) -> Result<()>;

    /// Conversation ids with a stored plan
    async fn list(&self) -> Result<Vec<String>>;
}

/// Process-local plan store
#[derive(Default)]
pub struct InMemoryPlanStore {
    plans: Mutex<HashMap<String, ExecutingPlan>>,
}

impl InMemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanStore for InMemoryPlanStore {
    async fn load(&self, conversation_id: &str) -> Result<Option<ExecutingPlan>> {
        Ok(lock(&self.plans, "plan store").get(conversation_id).cloned())
    }

    async fn save(&self, plan: &ExecutingPlan) -> Result<()> {
        lock(&self.plans, "plan store").insert(plan.conversation_id.clone(), plan.clone());
        Ok(())
    }

    async fn delete(&self, conversation_id: &str) -> Result<()> {
        lock(&self.plans, "plan store").remove(conversation_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = lock(&self.plans, "plan store").keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// One JSON file per conversation under a directory
pub struct FilePlanStore {
    dir: PathBuf,
}

impl FilePlanStore {
    /// Open a store rooted at `dir`, creating it if needed
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Open the store under `$PLURIBOTS_HOME/plans`
    pub fn open_default() -> Result<Self> {
        Self::open(Settings::plans_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn plan_path(&self, conversation_id: &str) -> Result<PathBuf> {
        let valid = !conversation_id.is_empty()
            && conversation_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(PluribotsError::InvalidInput(format!(
                "conversation id '{}' is not a safe file name",
                conversation_id
            )));
        }
        Ok(self.dir.join(format!("{}.json", conversation_id)))
    }
}

#[async_trait]
impl PlanStore for FilePlanStore {
    async fn load(&self, conversation_id: &str) -> Result<Option<ExecutingPlan>> {
        let path = self.plan_path(conversation_id)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let plan = serde_json::from_str(&content).map_err(|e| {
            PluribotsError::Store(format!("corrupt plan file {}: {}", path.display(), e))
        })?;
        Ok(Some(plan))
    }

    async fn save(&self, plan: &ExecutingPlan) -> Result<()> {
        let path = self.plan_path(&plan.conversation_id)?;
        let content = serde_json::to_string_pretty(plan)?;
        // Write-then-rename.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!(
            target: "pluribots.store",
            conversation_id = %plan.conversation_id,
            group = plan.current_group_index,
            "plan persisted"
        );
        Ok(())
    }

    async fn delete(&self, conversation_id: &str) -> Result<()> {
        let path = self.plan_path(conversation_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}
