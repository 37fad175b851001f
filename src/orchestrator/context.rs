// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Prompt assembly from completed dependency outputs
//!
//! Dependencies contribute their full output, except that a design document
//! feeding a code agent is condensed by [`extract_design_context`].

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::OnceLock;

use regex::Regex;

use crate::agents::AgentCatalog;
use crate::plans::{ExecutingPlan, Step};

/// The user turn for a step's first execution
pub fn build_step_prompt(plan: &ExecutingPlan, step: &Step, catalog: &AgentCatalog) -> String {
    let consumer = catalog.get(&step.agent_id).is_some_and(|a| a.code_consumer);
    let mut seen = HashSet::new();
    let mut sections = Vec::new();

    for dep_id in &step.depends_on {
        if dep_id == &step.instance_id || !seen.insert(dep_id.as_str()) {
            continue;
        }
        let (Some(dep), Some(output)) = (plan.step(dep_id), plan.agent_outputs.get(dep_id)) else {
            continue;
        };
        let producer = catalog.get(&dep.agent_id);
        let name = producer.map(|a| a.name.as_str()).unwrap_or(&dep.agent_id);

        let condensed = if consumer && producer.is_some_and(|a| a.design_producer) {
            extract_design_context(output)
        } else {
            None
        };
        let body = condensed.unwrap_or_else(|| output.clone());
        sections.push(format!("## {} ({})\n\n{}", name, dep.instance_id, body.trim()));
    }

    let task = if step.task.trim().is_empty() {
        step.label()
    } else {
        &step.task
    };

    if sections.is_empty() {
        return task.to_string();
    }
    format!(
        "Context from earlier steps:\n\n{}\n\n## Your task\n\n{}",
        sections.join("\n\n"),
        task
    )
}

fn tailwind_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<script[^>]*>\s*tailwind\.config\s*=.*?</script>").unwrap()
    })
}

fn font_link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)<link[^>]+fonts\.(?:googleapis|gstatic)\.com[^>]*>"#).unwrap())
}

fn img_src_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)<img[^>]+src\s*=\s*["']([^"']+)["']"#).unwrap())
}

fn css_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"url\(\s*['"]?([^'")\s]+)['"]?\s*\)"#).unwrap())
}

fn structure_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<section([^>]*)>|<h([12])[^>]*>(.*?)</h[12]>").unwrap()
    })
}

fn attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)\b(id|class)\s*=\s*["']([^"']*)["']"#).unwrap())
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").unwrap())
}

/// Condense a generated page into what a code agent needs to match it:
/// Tailwind config, font links, image URLs and section/heading structure.
///
/// Returns `None` when nothing recognizable was found.
pub fn extract_design_context(html: &str) -> Option<String> {
    let tailwind = tailwind_regex().find(html).map(|m| m.as_str().trim());

    let fonts: Vec<&str> = dedup(font_link_regex().find_iter(html).map(|m| m.as_str()));

    let images: Vec<&str> = dedup(
        img_src_regex()
            .captures_iter(html)
            .chain(css_url_regex().captures_iter(html))
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .filter(|url| !url.starts_with("data:")),
    );

    let mut structure = Vec::new();
    for caps in structure_regex().captures_iter(html) {
        if let Some(attrs) = caps.get(1) {
            structure.push(format!("- section{}", selector(attrs.as_str())));
        } else if let (Some(level), Some(text)) = (caps.get(2), caps.get(3)) {
            let text = tag_regex().replace_all(text.as_str(), "");
            let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
            if !text.is_empty() {
                structure.push(format!("  - h{}: {}", level.as_str(), text));
            }
        }
    }

    if tailwind.is_none() && fonts.is_empty() && images.is_empty() && structure.is_empty() {
        return None;
    }

    let mut out = String::from("Design context (reuse exactly):\n");
    if let Some(config) = tailwind {
        let _ = write!(out, "\nTailwind config:\n```html\n{}\n```\n", config);
    }
    if !fonts.is_empty() {
        out.push_str("\nFonts:\n");
        for font in fonts {
            let _ = writeln!(out, "{}", font);
        }
    }
    if !images.is_empty() {
        out.push_str("\nImages:\n");
        for url in images {
            let _ = writeln!(out, "- {}", url);
        }
    }
    if !structure.is_empty() {
        out.push_str("\nStructure:\n");
        for line in structure {
            let _ = writeln!(out, "{}", line);
        }
    }
    Some(out)
}

fn selector(attrs: &str) -> String {
    let mut id = String::new();
    let mut classes = String::new();
    for caps in attr_regex().captures_iter(attrs) {
        let value = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        match caps.get(1).map(|m| m.as_str().to_ascii_lowercase()).as_deref() {
            Some("id") if !value.is_empty() => id = format!("#{}", value),
            Some("class") => {
                for class in value.split_whitespace().take(3) {
                    classes.push('.');
                    classes.push_str(class);
                }
            }
            _ => {}
        }
    }
    format!("{}{}", id, classes)
}

fn dedup<'a>(items: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    items.filter(|item| seen.insert(*item)).collect()
}
