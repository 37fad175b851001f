// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Configuration module for Pluribots
//!
//! Handles loading, saving, and resolving settings.

pub mod settings;

pub use settings::*;
