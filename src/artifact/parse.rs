// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Whole-text artifact extraction

use super::model::ProjectArtifact;
use super::streamer::{attribute, ArtifactStreamer};
use super::{ACTION_CLOSE, ACTION_OPEN, ARTIFACT_OPEN};

/// Extract the artifact from a finished response.
///
/// Returns `None` when the text holds no artifact opening tag. File contents
/// are parsed exactly as the streamer would parse them token by token.
pub fn parse_artifact(text: &str) -> Option<ProjectArtifact> {
    let start = text.find(ARTIFACT_OPEN)?;
    let tag_end = text[start..].find('>')? + start;
    let open_tag = &text[start..=tag_end];

    let mut streamer = ArtifactStreamer::new();
    streamer.on_token(text);

    let commands = shell_commands(&text[tag_end + 1..]);
    Some(ProjectArtifact {
        id: attribute(open_tag, "id").unwrap_or_default(),
        title: attribute(open_tag, "title").unwrap_or_default(),
        files: streamer.completed_files(),
        shell_commands: if commands.is_empty() {
            None
        } else {
            Some(commands)
        },
    })
}

/// Shell actions, either self-closing with a `command` attribute or with the
/// command as the action body
fn shell_commands(body: &str) -> Vec<String> {
    let mut commands = Vec::new();
    let mut rest = body;

    while let Some(at) = rest.find(ACTION_OPEN) {
        let Some(end) = rest[at..].find('>') else {
            break;
        };
        let tag = &rest[at..at + end + 1];
        rest = &rest[at + end + 1..];

        let is_shell = attribute(tag, "type").as_deref() == Some("shell");
        if tag.ends_with("/>") {
            if is_shell {
                if let Some(command) = attribute(tag, "command") {
                    commands.push(command);
                }
            }
            continue;
        }

        let Some(close) = rest.find(ACTION_CLOSE) else {
            break;
        };
        if is_shell {
            let command = attribute(tag, "command")
                .unwrap_or_else(|| rest[..close].trim().to_string());
            if !command.is_empty() {
                commands.push(command);
            }
        }
        rest = &rest[close + ACTION_CLOSE.len()..];
    }

    commands
}
