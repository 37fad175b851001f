// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Built-in agents
//!
//! - seo: search audits and keyword strategy
//! - branding: brand identity guides
//! - web-design: a single rendered landing page (visual, design producer)
//! - ads: ad campaign copy
//! - dev: multi-file web projects (project, code consumer)
//! - video: video scripts and shot lists

use std::sync::OnceLock;

use serde_json::json;

use super::types::{AgentDefinition, OutputKind};
use crate::llm::factory::{ModelChoice, Vendor};
use crate::llm::provider::ToolDefinition;

const SEO_PROMPT: &str = r#"You are an SEO specialist. Produce a structured audit in markdown:
keyword opportunities, on-page recommendations, technical issues, and a
prioritized action list. Use the web_search tool when you need current data."#;

const BRANDING_PROMPT: &str = r#"You are a brand strategist. Produce a brand guide in markdown:
positioning, voice and tone, color palette with hex values, typography
pairings, and logo direction."#;

const WEB_DESIGN_PROMPT: &str = r#"You are a web designer. Return ONE complete HTML document that uses
Tailwind via CDN with an inline `tailwind.config` script, Google Fonts <link>
tags, semantic <section> elements with ids, and real image URLs (use the
search_images tool). Return only the document inside a ```html fence."#;

const ADS_PROMPT: &str = r#"You are a performance marketer. Write ad campaigns in markdown:
audiences, three headline and body variants per channel, and calls to action."#;

const DEV_PROMPT: &str = r#"You are a senior front-end engineer. Build the requested project and return
every file inside one artifact:

<pluriArtifact id="project-id" title="Project title">
<pluriAction type="file" filePath="relative/path.ext">
file content
</pluriAction>
<pluriAction type="shell" command="npm install" />
</pluriArtifact>

When design context is provided, reuse its Tailwind config, fonts, images and
section structure exactly."#;

const VIDEO_PROMPT: &str = r#"You are a video producer. Write a script in markdown with scenes, narration,
on-screen text, shot descriptions and durations."#;

static BUILTIN_AGENTS: OnceLock<Vec<AgentDefinition>> = OnceLock::new();

/// The built-in agents in catalog order
pub fn builtin_agents() -> &'static [AgentDefinition] {
    BUILTIN_AGENTS.get_or_init(|| {
        vec![
            AgentDefinition::new("seo", "SEO Specialist", OutputKind::Document, SEO_PROMPT)
                .with_description("Search audits and keyword strategy")
                .with_tool(web_search_tool()),
            AgentDefinition::new(
                "branding",
                "Brand Strategist",
                OutputKind::Document,
                BRANDING_PROMPT,
            )
            .with_description("Brand identity guides"),
            AgentDefinition::new(
                "web-design",
                "Web Designer",
                OutputKind::Visual,
                WEB_DESIGN_PROMPT,
            )
            .with_description("Single-page designs rendered in the preview")
            .with_tool(search_images_tool())
            .design_producer(),
            AgentDefinition::new("ads", "Ads Manager", OutputKind::Document, ADS_PROMPT)
                .with_description("Ad campaign copy"),
            AgentDefinition::new("dev", "Developer", OutputKind::Project, DEV_PROMPT)
                .with_description("Multi-file web projects")
                .with_default_model(ModelChoice::vendor_default(Vendor::Anthropic))
                .code_consumer(),
            AgentDefinition::new("video", "Video Producer", OutputKind::Document, VIDEO_PROMPT)
                .with_description("Video scripts and shot lists"),
        ]
    })
}

fn web_search_tool() -> ToolDefinition {
    ToolDefinition::new(
        "web_search",
        "Search the web and return the top results as text",
        json!({
            "query": {"type": "string", "description": "Search query"}
        }),
        &["query"],
    )
}

fn search_images_tool() -> ToolDefinition {
    ToolDefinition::new(
        "search_images",
        "Find stock photos; returns one image URL per line",
        json!({
            "query": {"type": "string", "description": "What the image should show"},
            "count": {"type": "integer", "description": "How many URLs to return"}
        }),
        &["query"],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_builtin_ids_unique() {
        let ids: HashSet<&str> = builtin_agents().iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids.len(), builtin_agents().len());
    }

    #[test]
    fn test_builtin_flags() {
        let web = builtin_agents().iter().find(|a| a.id == "web-design").unwrap();
        assert!(web.is_visual());
        assert!(web.design_producer);
        assert!(web.uses_tools());

        let dev = builtin_agents().iter().find(|a| a.id == "dev").unwrap();
        assert!(dev.is_project());
        assert!(dev.code_consumer);
        assert!(dev.system_prompt.contains("<pluriArtifact"));
    }

    #[test]
    fn test_exactly_one_visual_builtin() {
        assert_eq!(builtin_agents().iter().filter(|a| a.is_visual()).count(), 1);
    }
}
