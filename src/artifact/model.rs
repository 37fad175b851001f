// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Multi-file project artifacts and their merge rules

use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{ACTION_CLOSE, ARTIFACT_CLOSE};
use crate::utils::truncate_chars;

/// Per-file character budget when an artifact is summarized for a prompt
pub const CONTEXT_FILE_BUDGET: usize = 3000;

/// One file of a project artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactFile {
    pub file_path: String,
    pub content: String,
    pub language: String,
}

impl ArtifactFile {
    /// File with the language derived from its extension
    pub fn new(file_path: impl Into<String>, content: impl Into<String>) -> Self {
        let file_path = file_path.into();
        let language = language_for_path(&file_path).to_string();
        Self {
            file_path,
            content: content.into(),
            language,
        }
    }
}

/// A versioned snapshot of a multi-file deliverable
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectArtifact {
    pub id: String,
    pub title: String,
    pub files: Vec<ArtifactFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell_commands: Option<Vec<String>>,
}

impl ProjectArtifact {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_file(mut self, file_path: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.push(ArtifactFile::new(file_path, content));
        self
    }

    pub fn file(&self, file_path: &str) -> Option<&ArtifactFile> {
        self.files.iter().find(|f| f.file_path == file_path)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Fold `update` into `self`.
    ///
    /// Files with a known path are replaced in place, new paths are appended,
    /// and files missing from `update` are kept. Shell commands concatenate.
    /// `id` and `title` come from `update` unless it leaves them empty.
    pub fn merge(&self, update: &ProjectArtifact) -> ProjectArtifact {
        let mut files = self.files.clone();
        for file in &update.files {
            match files.iter_mut().find(|f| f.file_path == file.file_path) {
                Some(existing) => *existing = file.clone(),
                None => files.push(file.clone()),
            }
        }

        let commands: Vec<String> = self
            .shell_commands
            .iter()
            .chain(update.shell_commands.iter())
            .flatten()
            .cloned()
            .collect();

        ProjectArtifact {
            id: prefer(&update.id, &self.id),
            title: prefer(&update.title, &self.title),
            files,
            shell_commands: if commands.is_empty() {
                None
            } else {
                Some(commands)
            },
        }
    }

    /// Deterministic summary for priming a refinement prompt.
    ///
    /// Each file's content is cut at [`CONTEXT_FILE_BUDGET`] characters with a
    /// marker counting what was left out.
    pub fn format_as_context(&self) -> String {
        let mut out = String::new();
        let title = if self.title.is_empty() {
            "Untitled project"
        } else {
            &self.title
        };
        let _ = writeln!(out, "## {} ({} files)", title, self.files.len());
        out.push('\n');
        out.push_str("Files:\n");
        for file in &self.files {
            let _ = writeln!(out, "- {}", file.file_path);
        }

        for file in &self.files {
            let _ = writeln!(out, "\n### {}", file.file_path);
            let _ = writeln!(out, "```{}", file.language);
            let shown = truncate_chars(&file.content, CONTEXT_FILE_BUDGET);
            out.push_str(shown);
            if !shown.ends_with('\n') {
                out.push('\n');
            }
            let remaining = file.content.chars().count() - shown.chars().count();
            if remaining > 0 {
                let _ = writeln!(out, "... [{} more characters]", remaining);
            }
            out.push_str("```\n");
        }
        out
    }

    /// Render back into the tagged file protocol
    pub fn to_markup(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "<pluriArtifact id=\"{}\" title=\"{}\">",
            escape_attr(&self.id),
            escape_attr(&self.title)
        );
        for file in &self.files {
            let _ = writeln!(
                out,
                "<pluriAction type=\"file\" filePath=\"{}\">",
                escape_attr(&file.file_path)
            );
            out.push_str(&file.content);
            out.push('\n');
            let _ = writeln!(out, "{}", ACTION_CLOSE);
        }
        for command in self.shell_commands.iter().flatten() {
            let _ = writeln!(
                out,
                "<pluriAction type=\"shell\" command=\"{}\" />",
                escape_attr(command)
            );
        }
        out.push_str(ARTIFACT_CLOSE);
        out
    }
}

fn prefer(primary: &str, fallback: &str) -> String {
    if primary.is_empty() {
        fallback.to_string()
    } else {
        primary.to_string()
    }
}

pub(crate) fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub(crate) fn unescape_attr(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Highlighting language for a file path, from its extension
pub fn language_for_path(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("ts") => "typescript",
        Some("tsx") => "tsx",
        Some("js" | "mjs" | "cjs") => "javascript",
        Some("jsx") => "jsx",
        Some("html" | "htm") => "html",
        Some("css") => "css",
        Some("scss") => "scss",
        Some("json") => "json",
        Some("md" | "markdown") => "markdown",
        Some("py") => "python",
        Some("rs") => "rust",
        Some("go") => "go",
        Some("yml" | "yaml") => "yaml",
        Some("toml") => "toml",
        Some("sh") => "bash",
        Some("svg" | "xml") => "xml",
        Some("sql") => "sql",
        Some("vue") => "vue",
        Some("svelte") => "svelte",
        _ => "plaintext",
    }
}
