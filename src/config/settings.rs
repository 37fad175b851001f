// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Settings management for Pluribots
//!
//! Handles loading and saving settings from ~/.pluribots/settings.json

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

mod io;
mod migration;
mod validation;

/// Main settings structure, stored in ~/.pluribots/settings.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// LLM vendor configurations
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Default request parameters
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Plan execution settings
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
}

/// Configuration for the three supported LLM vendors
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    /// Anthropic Claude configuration
    #[serde(default)]
    pub anthropic: AnthropicConfig,

    /// OpenAI configuration
    #[serde(default)]
    pub openai: OpenAIConfig,

    /// Google Gemini configuration
    #[serde(default)]
    pub google: GoogleConfig,
}

/// Anthropic-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    /// API key (if stored directly, not recommended)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable name for API key
    #[serde(default = "default_anthropic_api_key_env")]
    pub api_key_env: String,

    /// Default model to use
    #[serde(default = "default_anthropic_model")]
    pub default_model: String,

    /// Base URL for API (for custom endpoints)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// OpenAI-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_openai_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_openai_model")]
    pub default_model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Google Gemini configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_google_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_google_model")]
    pub default_model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Default request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Default temperature for LLM
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Default vendor when an agent does not name one
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Maximum tokens for response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

/// Plan execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    /// Rounds allowed in a tool-call loop before the step fails
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,

    /// How long a provider health result stays valid
    #[serde(default = "default_health_ttl_secs")]
    pub health_ttl_secs: u64,

    /// Probe vendors before use; when off every configured vendor counts as healthy
    #[serde(default = "default_true")]
    pub health_check: bool,

    /// Per-vendor fallback order overrides, e.g. {"anthropic": ["google"]}
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub fallback: HashMap<String, Vec<String>>,

    /// Credits charged per thousand tokens (input + output)
    #[serde(default = "default_credits_per_1k_tokens")]
    pub credits_per_1k_tokens: u64,
}

// Default value functions
fn default_anthropic_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_anthropic_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_openai_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o".to_string()
}

fn default_google_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

fn default_google_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_true() -> bool {
    true
}

fn default_provider() -> String {
    "anthropic".to_string()
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_max_tool_rounds() -> u32 {
    25
}

fn default_health_ttl_secs() -> u64 {
    300
}

fn default_credits_per_1k_tokens() -> u64 {
    1
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_anthropic_api_key_env(),
            default_model: default_anthropic_model(),
            base_url: None,
        }
    }
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_openai_api_key_env(),
            default_model: default_openai_model(),
            base_url: None,
        }
    }
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_google_api_key_env(),
            default_model: default_google_model(),
            base_url: None,
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            provider: default_provider(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            health_ttl_secs: default_health_ttl_secs(),
            health_check: true,
            fallback: HashMap::new(),
            credits_per_1k_tokens: default_credits_per_1k_tokens(),
        }
    }
}
