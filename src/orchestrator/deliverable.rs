// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Turning a finished step output into something a user can open

use std::sync::OnceLock;

use pulldown_cmark::{html, Options, Parser};
use regex::Regex;

use super::services::DeliverableKind;
use crate::artifact::{parse_artifact, ProjectArtifact};

/// What a step produced
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractedDeliverable {
    /// A project artifact with at least one file
    Project(ProjectArtifact),
    /// A complete HTML document
    Html(String),
}

impl ExtractedDeliverable {
    pub fn kind(&self) -> DeliverableKind {
        match self {
            ExtractedDeliverable::Project(_) => DeliverableKind::Project,
            ExtractedDeliverable::Html(_) => DeliverableKind::Html,
        }
    }
}

fn html_fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```html[ \t]*\r?\n(.*?)```").unwrap())
}

fn document_start_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<!doctype\s+html|<html[\s>]").unwrap())
}

fn document_end_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)</html\s*>").unwrap())
}

/// Pick the deliverable out of `text`.
///
/// A file artifact wins; then an HTML document, fenced or raw; anything else
/// is treated as markdown and wrapped in a styled page titled `title`.
pub fn extract_deliverable(title: &str, text: &str) -> ExtractedDeliverable {
    if let Some(artifact) = parse_artifact(text).filter(|a| !a.is_empty()) {
        return ExtractedDeliverable::Project(artifact);
    }
    if let Some(document) = find_html_document(text) {
        return ExtractedDeliverable::Html(document);
    }
    ExtractedDeliverable::Html(wrap_markdown(title, text))
}

/// The HTML document embedded in `text`, if any
pub fn find_html_document(text: &str) -> Option<String> {
    if let Some(body) = html_fence_regex()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|body| !body.is_empty())
    {
        return Some(body.to_string());
    }

    let start = document_start_regex().find(text)?.start();
    let rest = &text[start..];
    let end = document_end_regex()
        .find(rest)
        .map(|m| m.end())
        .unwrap_or(rest.len());
    Some(rest[..end].trim().to_string())
}

/// Render markdown into a standalone, styled HTML page
pub fn wrap_markdown(title: &str, markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut body = String::new();
    html::push_html(&mut body, Parser::new_ext(markdown, options));

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
<style>
body {{ font-family: system-ui, -apple-system, sans-serif; max-width: 52rem; margin: 2rem auto; padding: 0 1rem; line-height: 1.6; color: #1f2937; }}
h1, h2, h3 {{ line-height: 1.25; }}
table {{ border-collapse: collapse; width: 100%; }}
th, td {{ border: 1px solid #d1d5db; padding: .4rem .6rem; text-align: left; }}
pre {{ background: #f3f4f6; padding: 1rem; overflow-x: auto; }}
code {{ font-family: ui-monospace, monospace; }}
</style>
</head>
<body>
{body}</body>
</html>
"#,
        title = escape_html(title),
        body = body
    )
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
