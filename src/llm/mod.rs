// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! LLM module for Pluribots
//!
//! Provides a uniform streaming abstraction over the supported vendors, the
//! provider instance cache, and health-based model resolution.

pub mod factory;
pub mod health;
pub mod message;
pub mod mock_provider;
pub mod provider;
pub mod providers;
pub mod streaming;

pub use factory::{ModelChoice, ProviderFactory, ProviderRegistry, Vendor};
pub use health::{HealthCache, ModelResolver, ResolvedModel};
pub use message::*;
pub use provider::*;
pub use streaming::{StreamHandler, StreamOutcome};
