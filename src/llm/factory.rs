// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Provider factory and instance cache
//!
//! Centralizes vendor selection and provider construction. Constructed
//! providers are memoized by vendor, model and credential so repeated lookups
//! for the same configuration share one instance.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::Settings;
use crate::error::{PluribotsError, Result};
use crate::llm::provider::{LlmProvider, RequestDefaults};
use crate::llm::providers::{AnthropicProvider, GoogleProvider, OpenAiProvider};
use crate::utils::lock;

/// The LLM vendors a step can run against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
    Google,
}

impl Vendor {
    pub const ALL: [Vendor; 3] = [Vendor::Anthropic, Vendor::OpenAi, Vendor::Google];

    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::Anthropic => "anthropic",
            Vendor::OpenAi => "openai",
            Vendor::Google => "google",
        }
    }

    /// Built-in fallback order when this vendor is unavailable
    pub fn default_fallbacks(&self) -> &'static [Vendor] {
        match self {
            Vendor::Anthropic => &[Vendor::OpenAi, Vendor::Google],
            Vendor::OpenAi => &[Vendor::Anthropic, Vendor::Google],
            Vendor::Google => &[Vendor::Anthropic, Vendor::OpenAi],
        }
    }

    /// Guess the vendor from a bare model name
    pub fn infer_from_model(model: &str) -> Option<Vendor> {
        let model = model.to_ascii_lowercase();
        if model.starts_with("claude") {
            Some(Vendor::Anthropic)
        } else if model.starts_with("gpt")
            || model.starts_with("o1")
            || model.starts_with("o3")
            || model.starts_with("o4")
            || model.starts_with("chatgpt")
        {
            Some(Vendor::OpenAi)
        } else if model.starts_with("gemini") {
            Some(Vendor::Google)
        } else {
            None
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Vendor {
    type Err = PluribotsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Vendor::Anthropic),
            "openai" => Ok(Vendor::OpenAi),
            "google" | "gemini" => Ok(Vendor::Google),
            other => Err(PluribotsError::InvalidInput(format!(
                "unknown vendor '{}'",
                other
            ))),
        }
    }
}

/// A vendor plus an optional explicit model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelChoice {
    pub vendor: Vendor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ModelChoice {
    pub fn new(vendor: Vendor, model: impl Into<String>) -> Self {
        Self {
            vendor,
            model: Some(model.into()),
        }
    }

    /// The vendor with whatever model settings name as its default
    pub fn vendor_default(vendor: Vendor) -> Self {
        Self {
            vendor,
            model: None,
        }
    }

    /// Accepts `vendor:model`, `vendor`, or a bare model name with a
    /// recognizable prefix.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if let Some((vendor, model)) = value.split_once(':') {
            let vendor = vendor.parse()?;
            let model = model.trim();
            return Ok(if model.is_empty() {
                Self::vendor_default(vendor)
            } else {
                Self::new(vendor, model)
            });
        }
        if let Ok(vendor) = value.parse::<Vendor>() {
            return Ok(Self::vendor_default(vendor));
        }
        match Vendor::infer_from_model(value) {
            Some(vendor) => Ok(Self::new(vendor, value)),
            None => Err(PluribotsError::InvalidInput(format!(
                "cannot tell which vendor serves model '{}'",
                value
            ))),
        }
    }

    /// Concrete model name, falling back to the vendor default from settings
    pub fn model_or_default<'a>(&'a self, settings: &'a Settings) -> &'a str {
        self.model
            .as_deref()
            .unwrap_or_else(|| settings.default_model(self.vendor))
    }
}

/// Constructs vendor bindings from settings
pub struct ProviderFactory;

impl ProviderFactory {
    /// Build a provider for `vendor`/`model` using the given credential
    pub fn create(
        vendor: Vendor,
        model: &str,
        api_key: &str,
        settings: &Settings,
    ) -> Arc<dyn LlmProvider> {
        let defaults = RequestDefaults {
            max_tokens: settings.defaults.max_tokens,
            temperature: settings.defaults.temperature,
        };
        let base_url = settings.base_url(vendor);

        match vendor {
            Vendor::Anthropic => Arc::new(
                match base_url {
                    Some(url) => AnthropicProvider::with_base_url(api_key, model, url),
                    None => AnthropicProvider::new(api_key, model),
                }
                .with_request_defaults(defaults),
            ),
            Vendor::OpenAi => Arc::new(
                match base_url {
                    Some(url) => OpenAiProvider::with_base_url(api_key, model, url),
                    None => OpenAiProvider::new(api_key, model),
                }
                .with_request_defaults(defaults),
            ),
            Vendor::Google => Arc::new(
                match base_url {
                    Some(url) => GoogleProvider::with_base_url(api_key, model, url),
                    None => GoogleProvider::new(api_key, model),
                }
                .with_request_defaults(defaults),
            ),
        }
    }

    /// List all supported vendor names
    pub fn supported_vendors() -> Vec<&'static str> {
        Vendor::ALL.iter().map(Vendor::as_str).collect()
    }
}

/// Memoized provider instances.
///
/// Keys combine vendor, model and credential: `"env"` when the key came from
/// the process environment, otherwise a digest of the configured key.
/// Providers registered with [`ProviderRegistry::register`] answer for every
/// model of their vendor and take precedence over constructed ones.
#[derive(Default)]
pub struct ProviderRegistry {
    instances: Mutex<HashMap<String, Arc<dyn LlmProvider>>>,
    registered: Mutex<HashMap<Vendor, Arc<dyn LlmProvider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin a ready-made provider for a vendor (dry runs, tests)
    pub fn register(&self, vendor: Vendor, provider: Arc<dyn LlmProvider>) {
        lock(&self.registered, "provider registry").insert(vendor, provider);
    }

    /// Whether `vendor` can be served at all
    pub fn has_credentials(&self, vendor: Vendor, settings: &Settings) -> bool {
        lock(&self.registered, "provider registry").contains_key(&vendor)
            || settings.is_vendor_configured(vendor)
    }

    /// Cache key for a vendor/model under the current credentials
    pub fn cache_key(vendor: Vendor, model: &str, settings: &Settings) -> Option<String> {
        let api_key = settings.api_key(vendor)?;
        let credential = if settings.api_key_from_env(vendor) {
            "env".to_string()
        } else {
            let digest = Sha256::digest(api_key.as_bytes());
            digest
                .iter()
                .take(8)
                .map(|b| format!("{:02x}", b))
                .collect()
        };
        Some(format!("{}:{}:{}", vendor, model, credential))
    }

    /// Fetch or construct the provider for `vendor`/`model`
    pub fn get(
        &self,
        vendor: Vendor,
        model: &str,
        settings: &Settings,
    ) -> Result<Arc<dyn LlmProvider>> {
        if let Some(provider) = lock(&self.registered, "provider registry").get(&vendor) {
            return Ok(provider.clone());
        }

        let (Some(key), Some(api_key)) = (
            Self::cache_key(vendor, model, settings),
            settings.api_key(vendor),
        ) else {
            return Err(PluribotsError::ProviderUnavailable(format!(
                "no API key configured for {}",
                vendor
            )));
        };

        let mut instances = lock(&self.instances, "provider registry");
        let provider = instances.entry(key).or_insert_with_key(|key| {
            tracing::debug!(target: "pluribots.llm", key = %key, "constructing provider");
            ProviderFactory::create(vendor, model, &api_key, settings)
        });
        Ok(provider.clone())
    }

    /// Drop every constructed instance
    pub fn invalidate(&self) {
        lock(&self.instances, "provider registry").clear();
    }

    /// Number of constructed instances currently cached
    pub fn len(&self) -> usize {
        lock(&self.instances, "provider registry").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock_provider::MockProvider;

    fn settings_with_key(vendor: Vendor, key: &str) -> Settings {
        let mut settings = Settings::default();
        let env = format!("PLURIBOTS_TEST_UNSET_{}", vendor.as_str().to_uppercase());
        match vendor {
            Vendor::Anthropic => {
                settings.providers.anthropic.api_key = Some(key.to_string());
                settings.providers.anthropic.api_key_env = env;
            }
            Vendor::OpenAi => {
                settings.providers.openai.api_key = Some(key.to_string());
                settings.providers.openai.api_key_env = env;
            }
            Vendor::Google => {
                settings.providers.google.api_key = Some(key.to_string());
                settings.providers.google.api_key_env = env;
            }
        }
        settings
    }

    // ===== Vendor Tests =====

    #[test]
    fn test_vendor_from_str_aliases() {
        assert_eq!("gemini".parse::<Vendor>().unwrap(), Vendor::Google);
        assert_eq!("OpenAI".parse::<Vendor>().unwrap(), Vendor::OpenAi);
        assert_eq!("anthropic".parse::<Vendor>().unwrap(), Vendor::Anthropic);
        assert!("mistral".parse::<Vendor>().is_err());
    }

    #[test]
    fn test_vendor_serde_names() {
        assert_eq!(serde_json::to_string(&Vendor::OpenAi).unwrap(), "\"openai\"");
        let v: Vendor = serde_json::from_str("\"google\"").unwrap();
        assert_eq!(v, Vendor::Google);
    }

    #[test]
    fn test_default_fallbacks_exclude_self() {
        for vendor in Vendor::ALL {
            assert!(!vendor.default_fallbacks().contains(&vendor));
            assert_eq!(vendor.default_fallbacks().len(), 2);
        }
        assert_eq!(
            Vendor::Anthropic.default_fallbacks(),
            &[Vendor::OpenAi, Vendor::Google]
        );
    }

    // ===== ModelChoice Tests =====

    #[test]
    fn test_model_choice_parse_forms() {
        assert_eq!(
            ModelChoice::parse("openai:gpt-4o-mini").unwrap(),
            ModelChoice::new(Vendor::OpenAi, "gpt-4o-mini")
        );
        assert_eq!(
            ModelChoice::parse("google").unwrap(),
            ModelChoice::vendor_default(Vendor::Google)
        );
        assert_eq!(
            ModelChoice::parse("claude-3-5-haiku-latest").unwrap().vendor,
            Vendor::Anthropic
        );
        assert!(ModelChoice::parse("llama3").is_err());
    }

    #[test]
    fn test_model_or_default() {
        let settings = Settings::default();
        let choice = ModelChoice::vendor_default(Vendor::OpenAi);
        assert_eq!(choice.model_or_default(&settings), "gpt-4o");
    }

    // ===== Registry Tests =====

    #[test]
    fn test_registry_caches_by_configuration() {
        let settings = settings_with_key(Vendor::Anthropic, "sk-ant-1");
        let registry = ProviderRegistry::new();

        let a = registry.get(Vendor::Anthropic, "claude-a", &settings).unwrap();
        let b = registry.get(Vendor::Anthropic, "claude-a", &settings).unwrap();
        let c = registry.get(Vendor::Anthropic, "claude-b", &settings).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 2);
        assert_eq!(c.model(), "claude-b");
    }

    #[test]
    fn test_registry_key_changes_with_api_key() {
        let first = settings_with_key(Vendor::OpenAi, "sk-1");
        let second = settings_with_key(Vendor::OpenAi, "sk-2");
        assert_ne!(
            ProviderRegistry::cache_key(Vendor::OpenAi, "gpt-4o", &first),
            ProviderRegistry::cache_key(Vendor::OpenAi, "gpt-4o", &second)
        );
        let key = ProviderRegistry::cache_key(Vendor::OpenAi, "gpt-4o", &first).unwrap();
        assert!(key.starts_with("openai:gpt-4o:"));
        assert!(!key.contains("sk-1"));
    }

    #[test]
    fn test_registry_invalidate() {
        let settings = settings_with_key(Vendor::Google, "g-key");
        let registry = ProviderRegistry::new();
        let before = registry.get(Vendor::Google, "gemini-2.0-flash", &settings).unwrap();
        registry.invalidate();
        assert!(registry.is_empty());
        let after = registry.get(Vendor::Google, "gemini-2.0-flash", &settings).unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_registry_without_credentials() {
        let mut settings = Settings::default();
        settings.providers.anthropic.api_key = None;
        settings.providers.anthropic.api_key_env = "PLURIBOTS_TEST_NO_SUCH_KEY".to_string();

        let registry = ProviderRegistry::new();
        assert!(!registry.has_credentials(Vendor::Anthropic, &settings));
        assert!(matches!(
            registry.get(Vendor::Anthropic, "claude", &settings),
            Err(PluribotsError::ProviderUnavailable(_))
        ));
    }

    #[test]
    fn test_registered_provider_wins() {
        let settings = Settings::default();
        let registry = ProviderRegistry::new();
        let mock: Arc<dyn LlmProvider> = Arc::new(MockProvider::with_name("anthropic"));
        registry.register(Vendor::Anthropic, mock.clone());

        assert!(registry.has_credentials(Vendor::Anthropic, &settings));
        let got = registry.get(Vendor::Anthropic, "anything", &settings).unwrap();
        assert!(Arc::ptr_eq(&got, &mock));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_supported_vendors() {
        assert_eq!(
            ProviderFactory::supported_vendors(),
            vec!["anthropic", "openai", "google"]
        );
    }
}
