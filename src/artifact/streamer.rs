// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Incremental parser for the tagged file protocol
//!
//! Project agents wrap their files in
//!
//! ```text
//! <pluriArtifact id="..." title="...">
//! <pluriAction type="file" filePath="src/main.ts">
//! ...file body...
//! </pluriAction>
//! <pluriAction type="shell" command="npm install" />
//! </pluriArtifact>
//! ```
//!
//! [`ArtifactStreamer::on_token`] accepts fragments of any size, down to a
//! single character, and reports file progress as it arrives.

use serde::Serialize;

use super::model::{language_for_path, unescape_attr, ArtifactFile};
use super::{ACTION_CLOSE, ACTION_OPEN, ARTIFACT_CLOSE, ARTIFACT_OPEN};
use crate::utils::truncate_chars;

/// Characters of new file content between two partial updates
pub const PARTIAL_EMIT_THRESHOLD: usize = 500;

/// Idle buffer cap outside of files
const IDLE_BUFFER_CHARS: usize = 200;

/// Progress of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUpdate {
    pub file_path: String,
    pub content: String,
    pub language: String,
    pub partial: bool,
}

/// Something the caller should broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamerEvent {
    /// The artifact section opened; fires once per streamer lifetime
    ArtifactStart,
    FileUpdate(FileUpdate),
}

#[derive(Debug, Clone)]
struct OpenFile {
    path: String,
    content: String,
    /// Characters in `content`; the partial threshold counts chars, not bytes
    chars: usize,
}

/// Stateful single-pass parser; feed it tokens in arrival order
#[derive(Debug, Default)]
pub struct ArtifactStreamer {
    buffer: String,
    current_file: Option<OpenFile>,
    inside_artifact: bool,
    artifact_started: bool,
    completed_files: Vec<ArtifactFile>,
    /// Character count of the open file at its last partial update
    last_emitted_partial_len: usize,
}

impl ArtifactStreamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an artifact section is currently open
    pub fn is_streaming(&self) -> bool {
        self.inside_artifact
    }

    /// Snapshot of the files finished so far
    pub fn completed_files(&self) -> Vec<ArtifactFile> {
        self.completed_files.clone()
    }

    /// Back to the freshly constructed state
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Feed one fragment and collect the resulting events
    pub fn on_token(&mut self, token: &str) -> Vec<StreamerEvent> {
        self.buffer.push_str(token);
        let mut events = Vec::new();

        loop {
            let progressed = if !self.inside_artifact {
                self.scan_for_artifact(&mut events)
            } else if self.current_file.is_some() {
                self.scan_file_body(&mut events)
            } else {
                self.scan_for_action()
            };
            if !progressed {
                break;
            }
        }

        events
    }

    fn scan_for_artifact(&mut self, events: &mut Vec<StreamerEvent>) -> bool {
        let Some(start) = self.buffer.find(ARTIFACT_OPEN) else {
            self.cap_idle_buffer();
            return false;
        };
        let Some(end) = self.buffer[start..].find('>') else {
            self.buffer.drain(..start);
            return false;
        };

        if !self.artifact_started {
            self.artifact_started = true;
            events.push(StreamerEvent::ArtifactStart);
        }
        self.inside_artifact = true;
        self.buffer.drain(..start + end + 1);
        true
    }

    fn scan_for_action(&mut self) -> bool {
        let action = self.buffer.find(ACTION_OPEN);
        let close = self.buffer.find(ARTIFACT_CLOSE);

        match (action, close) {
            (Some(a), Some(c)) if c < a => self.close_artifact(c),
            (None, Some(c)) => self.close_artifact(c),
            (Some(a), _) => {
                let Some(end) = self.buffer[a..].find('>') else {
                    self.buffer.drain(..a);
                    return false;
                };
                let tag = self.buffer[a..a + end + 1].to_string();
                self.buffer.drain(..a + end + 1);

                if tag.ends_with("/>") {
                    // Self-closing actions (shell commands) produce no file events.
                    return true;
                }
                if attribute(&tag, "type").as_deref() == Some("file") {
                    if let Some(path) = attribute(&tag, "filePath") {
                        self.current_file = Some(OpenFile {
                            path,
                            content: String::new(),
                            chars: 0,
                        });
                        self.last_emitted_partial_len = 0;
                    }
                }
                true
            }
            (None, None) => {
                self.cap_idle_buffer();
                false
            }
        }
    }

    fn close_artifact(&mut self, at: usize) -> bool {
        self.buffer.drain(..at + ARTIFACT_CLOSE.len());
        self.inside_artifact = false;
        true
    }

    fn scan_file_body(&mut self, events: &mut Vec<StreamerEvent>) -> bool {
        let Some(file) = self.current_file.as_mut() else {
            return false;
        };

        if let Some(close) = self.buffer.find(ACTION_CLOSE) {
            file.content.push_str(&self.buffer[..close]);
            self.buffer.drain(..close + ACTION_CLOSE.len());

            let content = trim_one_newline(&file.content).to_string();
            let finished = ArtifactFile::new(file.path.clone(), content.clone());
            events.push(StreamerEvent::FileUpdate(FileUpdate {
                file_path: finished.file_path.clone(),
                content,
                language: finished.language.clone(),
                partial: false,
            }));
            self.completed_files.push(finished);
            self.current_file = None;
            self.last_emitted_partial_len = 0;
            return true;
        }

        // Hold back a possible start of the closing tag.
        let keep = partial_suffix_len(&self.buffer, ACTION_CLOSE);
        let take = self.buffer.len() - keep;
        let taken = &self.buffer[..take];
        file.chars += taken.chars().count();
        file.content.push_str(taken);
        self.buffer.drain(..take);

        if file.chars - self.last_emitted_partial_len > PARTIAL_EMIT_THRESHOLD {
            self.last_emitted_partial_len = file.chars;
            let content = file.content.strip_prefix('\n').unwrap_or(&file.content);
            events.push(StreamerEvent::FileUpdate(FileUpdate {
                file_path: file.path.clone(),
                content: content.to_string(),
                language: language_for_path(&file.path).to_string(),
                partial: true,
            }));
        }
        false
    }

    fn cap_idle_buffer(&mut self) {
        let chars = self.buffer.chars().count();
        if chars > IDLE_BUFFER_CHARS {
            let cut = self.buffer.len() - tail_bytes(&self.buffer, IDLE_BUFFER_CHARS);
            self.buffer.drain(..cut);
        }
    }
}

/// Strip exactly one leading and one trailing newline
fn trim_one_newline(content: &str) -> &str {
    let content = content.strip_prefix('\n').unwrap_or(content);
    content.strip_suffix('\n').unwrap_or(content)
}

/// Length of the longest suffix of `buffer` that is a proper prefix of `tag`
fn partial_suffix_len(buffer: &str, tag: &str) -> usize {
    let max = (tag.len() - 1).min(buffer.len());
    (1..=max)
        .rev()
        .find(|&len| buffer.is_char_boundary(buffer.len() - len) && tag.starts_with(&buffer[buffer.len() - len..]))
        .unwrap_or(0)
}

/// Byte length of the last `chars` characters
fn tail_bytes(text: &str, chars: usize) -> usize {
    let total = text.chars().count();
    let skip = total.saturating_sub(chars);
    text.len() - truncate_chars(text, skip).len()
}

/// Value of `name="..."` inside an opening tag
pub(crate) fn attribute(tag: &str, name: &str) -> Option<String> {
    let needle = format!("{}=\"", name);
    let mut search = 0;
    while let Some(found) = tag[search..].find(&needle) {
        let at = search + found;
        // Reject matches inside a longer attribute name.
        let boundary = tag[..at]
            .chars()
            .last()
            .map(|c| c.is_whitespace())
            .unwrap_or(false);
        let value_start = at + needle.len();
        if boundary {
            let value_end = tag[value_start..].find('"')? + value_start;
            return Some(unescape_attr(&tag[value_start..value_end]));
        }
        search = value_start;
    }
    None
}
