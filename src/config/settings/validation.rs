// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use crate::llm::factory::Vendor;

use super::Settings;

impl Settings {
    /// Get the API key for a vendor, checking its env var first.
    pub fn api_key(&self, vendor: Vendor) -> Option<String> {
        let (env_name, stored) = match vendor {
            Vendor::Anthropic => (
                &self.providers.anthropic.api_key_env,
                &self.providers.anthropic.api_key,
            ),
            Vendor::OpenAi => (
                &self.providers.openai.api_key_env,
                &self.providers.openai.api_key,
            ),
            Vendor::Google => (
                &self.providers.google.api_key_env,
                &self.providers.google.api_key,
            ),
        };

        // Priority: env var > config file.
        std::env::var(env_name)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| stored.clone().filter(|key| !key.trim().is_empty()))
    }

    /// Whether the key for `vendor` came from the process environment.
    pub fn api_key_from_env(&self, vendor: Vendor) -> bool {
        let env_name = match vendor {
            Vendor::Anthropic => &self.providers.anthropic.api_key_env,
            Vendor::OpenAi => &self.providers.openai.api_key_env,
            Vendor::Google => &self.providers.google.api_key_env,
        };
        std::env::var(env_name)
            .map(|key| !key.trim().is_empty())
            .unwrap_or(false)
    }

    /// Get the configured default model for a vendor.
    pub fn default_model(&self, vendor: Vendor) -> &str {
        match vendor {
            Vendor::Anthropic => &self.providers.anthropic.default_model,
            Vendor::OpenAi => &self.providers.openai.default_model,
            Vendor::Google => &self.providers.google.default_model,
        }
    }

    /// Get a custom base URL for a vendor, if one is configured.
    pub fn base_url(&self, vendor: Vendor) -> Option<String> {
        match vendor {
            Vendor::Anthropic => self.providers.anthropic.base_url.clone(),
            Vendor::OpenAi => self.providers.openai.base_url.clone(),
            Vendor::Google => self.providers.google.base_url.clone(),
        }
    }

    /// Check if the given vendor has credentials.
    pub fn is_vendor_configured(&self, vendor: Vendor) -> bool {
        self.api_key(vendor).is_some()
    }

    /// Fallback order for `primary`: the configured override when present,
    /// otherwise the built-in table. Unknown names and the primary itself
    /// are dropped.
    pub fn fallback_order(&self, primary: Vendor) -> Vec<Vendor> {
        match self.orchestration.fallback.get(primary.as_str()) {
            Some(names) => {
                let mut order = Vec::new();
                for name in names {
                    match name.parse::<Vendor>() {
                        Ok(vendor) if vendor != primary && !order.contains(&vendor) => {
                            order.push(vendor)
                        }
                        Ok(_) => {}
                        Err(_) => {
                            tracing::warn!(vendor = %name, "ignoring unknown fallback vendor")
                        }
                    }
                }
                order
            }
            None => primary.default_fallbacks().to_vec(),
        }
    }

    /// The default vendor named in settings, if it is a known one.
    pub fn default_vendor(&self) -> Vendor {
        self.defaults.provider.parse().unwrap_or(Vendor::Anthropic)
    }

    /// Tool rounds allowed per step; a stored 0 still permits one round.
    pub fn max_tool_rounds(&self) -> u32 {
        self.orchestration.max_tool_rounds.max(1)
    }
}
