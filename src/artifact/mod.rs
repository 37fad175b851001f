// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Project artifacts: the tagged file protocol, its streaming parser, and
//! merging of successive versions

pub mod model;
pub mod parse;
pub mod streamer;

pub use model::{language_for_path, ArtifactFile, ProjectArtifact, CONTEXT_FILE_BUDGET};
pub use parse::parse_artifact;
pub use streamer::{ArtifactStreamer, FileUpdate, StreamerEvent, PARTIAL_EMIT_THRESHOLD};

pub const ARTIFACT_OPEN: &str = "<pluriArtifact";
pub const ARTIFACT_CLOSE: &str = "</pluriArtifact>";
pub const ACTION_OPEN: &str = "<pluriAction";
pub const ACTION_CLOSE: &str = "</pluriAction>";
