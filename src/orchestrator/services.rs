// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Collaborators the orchestrator calls out to: deliverable storage, credit
//! accounting and tool execution

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifact::ProjectArtifact;
use crate::config::Settings;
use crate::error::{PluribotsError, Result};
use crate::llm::provider::Usage;
use crate::utils::lock;

/// How a deliverable's content should be presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverableKind {
    /// A complete HTML document
    Html,
    /// A multi-file artifact; `content` holds its markup
    Project,
}

/// The persisted result of one step execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deliverable {
    pub id: Uuid,
    pub conversation_id: String,
    pub instance_id: String,
    pub agent_id: String,
    pub title: String,
    pub kind: DeliverableKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ProjectArtifact>,
    /// Set when the deliverable came from a refinement
    #[serde(default)]
    pub refined: bool,
    pub created_at: DateTime<Utc>,
}

/// Deliverable persistence
#[async_trait]
pub trait DeliverableStore: Send + Sync {
    async fn save(&self, deliverable: &Deliverable) -> Result<()>;

    /// Every deliverable of a conversation, oldest first
    async fn list(&self, conversation_id: &str) -> Result<Vec<Deliverable>>;
}

#[derive(Default)]
pub struct InMemoryDeliverableStore {
    deliverables: Mutex<Vec<Deliverable>>,
}

impl InMemoryDeliverableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliverableStore for InMemoryDeliverableStore {
    async fn save(&self, deliverable: &Deliverable) -> Result<()> {
        lock(&self.deliverables, "deliverable store").push(deliverable.clone());
        Ok(())
    }

    async fn list(&self, conversation_id: &str) -> Result<Vec<Deliverable>> {
        Ok(lock(&self.deliverables, "deliverable store")
            .iter()
            .filter(|d| d.conversation_id == conversation_id)
            .cloned()
            .collect())
    }
}

/// `<dir>/<conversation>/<timestamp>-<instance>.json` per deliverable
pub struct FileDeliverableStore {
    dir: PathBuf,
}

impl FileDeliverableStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Open the store under `$PLURIBOTS_HOME/deliverables`
    pub fn open_default() -> Result<Self> {
        Self::open(Settings::deliverables_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn conversation_dir(&self, conversation_id: &str) -> Result<PathBuf> {
        if conversation_id.is_empty()
            || !conversation_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(PluribotsError::InvalidInput(format!(
                "conversation id '{}' is not a safe file name",
                conversation_id
            )));
        }
        Ok(self.dir.join(conversation_id))
    }
}

#[async_trait]
impl DeliverableStore for FileDeliverableStore {
    async fn save(&self, deliverable: &Deliverable) -> Result<()> {
        let dir = self.conversation_dir(&deliverable.conversation_id)?;
        tokio::fs::create_dir_all(&dir).await?;
        let name = format!(
            "{}-{}.json",
            deliverable.created_at.format("%Y%m%dT%H%M%S%.6f"),
            deliverable.id.simple()
        );
        tokio::fs::write(dir.join(name), serde_json::to_string_pretty(deliverable)?).await?;
        Ok(())
    }

    async fn list(&self, conversation_id: &str) -> Result<Vec<Deliverable>> {
        let dir = self.conversation_dir(conversation_id)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut deliverables = Vec::with_capacity(paths.len());
        for path in paths {
            let content = tokio::fs::read_to_string(&path).await?;
            let deliverable = serde_json::from_str(&content).map_err(|e| {
                PluribotsError::Store(format!("corrupt deliverable {}: {}", path.display(), e))
            })?;
            deliverables.push(deliverable);
        }
        Ok(deliverables)
    }
}

/// Usage tracking and credit deduction.
///
/// Calls are side effects the orchestrator does not retry; a failure is
/// logged and the step still completes.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    async fn track_usage(
        &self,
        user_id: &str,
        agent_id: &str,
        model: &str,
        usage: &Usage,
    ) -> Result<()>;

    /// Deduct `credits` and return the new balance
    async fn consume_credits(&self, user_id: &str, credits: u64) -> Result<i64>;
}

/// Per-user balances held in memory
pub struct InMemoryCreditLedger {
    initial_balance: i64,
    balances: Mutex<HashMap<String, i64>>,
    usage: Mutex<Vec<(String, String, Usage)>>,
}

impl InMemoryCreditLedger {
    /// Every user starts with `initial_balance`
    pub fn new(initial_balance: i64) -> Self {
        Self {
            initial_balance,
            balances: Mutex::new(HashMap::new()),
            usage: Mutex::new(Vec::new()),
        }
    }

    pub fn balance(&self, user_id: &str) -> i64 {
        lock(&self.balances, "credit ledger")
            .get(user_id)
            .copied()
            .unwrap_or(self.initial_balance)
    }

    /// Recorded `(user, agent, usage)` rows
    pub fn usage_rows(&self) -> Vec<(String, String, Usage)> {
        lock(&self.usage, "credit ledger").clone()
    }
}

impl Default for InMemoryCreditLedger {
    fn default() -> Self {
        Self::new(0)
    }
}

#[async_trait]
impl CreditLedger for InMemoryCreditLedger {
    async fn track_usage(
        &self,
        user_id: &str,
        agent_id: &str,
        _model: &str,
        usage: &Usage,
    ) -> Result<()> {
        lock(&self.usage, "credit ledger").push((
            user_id.to_string(),
            agent_id.to_string(),
            *usage,
        ));
        Ok(())
    }

    async fn consume_credits(&self, user_id: &str, credits: u64) -> Result<i64> {
        let mut balances = lock(&self.balances, "credit ledger");
        let balance = balances
            .entry(user_id.to_string())
            .or_insert(self.initial_balance);
        *balance -= i64::try_from(credits)
            .map_err(|_| PluribotsError::Credit(format!("{} credits out of range", credits)))?;
        Ok(*balance)
    }
}

/// Credits charged for `usage`: total tokens at `per_1k` credits per thousand,
/// rounded up
pub fn credits_for(usage: &Usage, per_1k: u64) -> u64 {
    let tokens = u64::from(usage.input_tokens) + u64::from(usage.output_tokens);
    (tokens * per_1k).div_ceil(1000)
}

/// Runs the tools agents ask for
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute `name`; errors are reported back to the model as text
    async fn execute(&self, name: &str, input: serde_json::Value) -> Result<String>;
}

/// Executor for deployments without tool backends
#[derive(Debug, Default, Clone, Copy)]
pub struct NoToolExecutor;

#[async_trait]
impl ToolExecutor for NoToolExecutor {
    async fn execute(&self, name: &str, _input: serde_json::Value) -> Result<String> {
        Err(PluribotsError::ToolExecution(format!(
            "tool '{}' is not available",
            name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn deliverable(conversation_id: &str, instance_id: &str) -> Deliverable {
        Deliverable {
            id: Uuid::new_v4(),
            conversation_id: conversation_id.into(),
            instance_id: instance_id.into(),
            agent_id: "seo".into(),
            title: "SEO Specialist".into(),
            kind: DeliverableKind::Html,
            content: "<html></html>".into(),
            artifact: None,
            refined: false,
            created_at: Utc::now(),
        }
    }

    fn usage(input: u32, output: u32) -> Usage {
        Usage {
            input_tokens: input,
            output_tokens: output,
            ..Default::default()
        }
    }

    // ===== Deliverable Store Tests =====

    #[tokio::test]
    async fn test_memory_deliverables_by_conversation() {
        let store = InMemoryDeliverableStore::new();
        store.save(&deliverable("a", "seo-1")).await.unwrap();
        store.save(&deliverable("b", "seo-1")).await.unwrap();
        store.save(&deliverable("a", "dev-1")).await.unwrap();

        let listed = store.list("a").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[1].instance_id, "dev-1");
    }

    #[tokio::test]
    async fn test_file_deliverables_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileDeliverableStore::open(dir.path()).unwrap();
        let first = deliverable("conv", "seo-1");
        store.save(&first).await.unwrap();

        let listed = store.list("conv").await.unwrap();
        assert_eq!(listed, vec![first]);
        assert!(store.list("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_deliverables_reject_unsafe_ids() {
        let dir = TempDir::new().unwrap();
        let store = FileDeliverableStore::open(dir.path()).unwrap();
        let err = store.save(&deliverable("../x", "a")).await.unwrap_err();
        assert!(matches!(err, PluribotsError::InvalidInput(_)));
    }

    // ===== Credit Tests =====

    #[test]
    fn test_credits_for_rounds_up() {
        assert_eq!(credits_for(&usage(0, 0), 1), 0);
        assert_eq!(credits_for(&usage(1, 0), 1), 1);
        assert_eq!(credits_for(&usage(600, 400), 1), 1);
        assert_eq!(credits_for(&usage(600, 401), 1), 2);
        assert_eq!(credits_for(&usage(1000, 1000), 5), 10);
    }

    #[tokio::test]
    async fn test_ledger_balances() {
        let ledger = InMemoryCreditLedger::new(100);
        assert_eq!(ledger.consume_credits("u1", 3).await.unwrap(), 97);
        assert_eq!(ledger.consume_credits("u1", 7).await.unwrap(), 90);
        assert_eq!(ledger.balance("u2"), 100);

        ledger
            .track_usage("u1", "seo", "m", &usage(5, 5))
            .await
            .unwrap();
        assert_eq!(ledger.usage_rows().len(), 1);
    }

    // ===== Tool Executor Tests =====

    #[tokio::test]
    async fn test_no_tool_executor_errors() {
        let err = NoToolExecutor
            .execute("web_search", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("web_search"));
    }

    #[tokio::test]
    async fn test_mock_tool_executor() {
        let mut tools = MockToolExecutor::new();
        tools
            .expect_execute()
            .withf(|name, _| name == "web_search")
            .times(1)
            .returning(|_, input| Ok(format!("results for {}", input["query"])));

        let out = tools
            .execute("web_search", serde_json::json!({"query": "rust"}))
            .await
            .unwrap();
        assert_eq!(out, "results for \"rust\"");
    }
}
