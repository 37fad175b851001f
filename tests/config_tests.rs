// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use pluribots::config::Settings;
use pluribots::llm::factory::Vendor;
use tempfile::TempDir;

#[test]
fn test_settings_default_values() {
    let settings = Settings::default();

    assert_eq!(
        settings.providers.anthropic.default_model,
        "claude-sonnet-4-20250514"
    );
    assert!((settings.defaults.temperature - 0.7).abs() < f32::EPSILON);
    assert_eq!(settings.defaults.max_tokens, 8192);
    assert_eq!(settings.default_vendor(), Vendor::Anthropic);
    assert_eq!(settings.orchestration.credits_per_1k_tokens, 1);
}

#[test]
fn test_settings_api_key_priority() {
    // A dedicated env var name keeps this test independent of the others.
    let mut settings = Settings::default();
    settings.providers.openai.api_key_env = "PLURIBOTS_CONFIG_TEST_OPENAI_KEY".to_string();
    settings.providers.openai.api_key = Some("config-key".to_string());

    std::env::remove_var("PLURIBOTS_CONFIG_TEST_OPENAI_KEY");
    assert_eq!(settings.api_key(Vendor::OpenAi), Some("config-key".to_string()));
    assert!(!settings.api_key_from_env(Vendor::OpenAi));

    std::env::set_var("PLURIBOTS_CONFIG_TEST_OPENAI_KEY", "env-key");
    assert_eq!(settings.api_key(Vendor::OpenAi), Some("env-key".to_string()));
    assert!(settings.api_key_from_env(Vendor::OpenAi));

    std::env::remove_var("PLURIBOTS_CONFIG_TEST_OPENAI_KEY");
}

#[test]
fn test_blank_key_is_not_configured() {
    let mut settings = Settings::default();
    settings.providers.google.api_key_env = "PLURIBOTS_CONFIG_TEST_UNSET".to_string();
    settings.providers.google.api_key = Some("   ".to_string());
    assert!(!settings.is_vendor_configured(Vendor::Google));
}

#[test]
fn test_settings_deserialization_fills_defaults() {
    let json = r#"{
        "providers": {
            "anthropic": { "default_model": "claude-3-5-haiku-20241022" }
        },
        "defaults": { "provider": "google" },
        "orchestration": {
            "max_tool_rounds": 4,
            "fallback": { "google": ["openai", "nonsense", "google"] }
        }
    }"#;

    let settings: Settings = serde_json::from_str(json).expect("Should deserialize from JSON");

    assert_eq!(
        settings.providers.anthropic.default_model,
        "claude-3-5-haiku-20241022"
    );
    assert_eq!(settings.providers.openai.api_key_env, "OPENAI_API_KEY");
    assert_eq!(settings.default_vendor(), Vendor::Google);
    assert_eq!(settings.orchestration.max_tool_rounds, 4);
    assert_eq!(settings.orchestration.health_ttl_secs, 300);
    assert_eq!(settings.fallback_order(Vendor::Google), vec![Vendor::OpenAi]);
}

#[test]
fn test_legacy_gemini_section_is_migrated() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("settings.json");
    std::fs::write(
        &path,
        r#"{"providers":{"gemini":{"default_model":"gemini-1.5-pro","base_url":"http://localhost:9"}}}"#,
    )
    .unwrap();

    let settings = Settings::load_from(&path).unwrap();
    assert_eq!(settings.providers.google.default_model, "gemini-1.5-pro");
    assert_eq!(
        settings.base_url(Vendor::Google).as_deref(),
        Some("http://localhost:9")
    );
}

#[test]
fn test_save_round_trip_keeps_orchestration() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("settings.json");

    let mut settings = Settings::default();
    settings.orchestration.health_check = false;
    settings.orchestration.credits_per_1k_tokens = 3;
    settings.save_to(&path).unwrap();

    let loaded = Settings::load_from(&path).unwrap();
    assert!(!loaded.orchestration.health_check);
    assert_eq!(loaded.orchestration.credits_per_1k_tokens, 3);
}

#[test]
fn test_invalid_json_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("settings.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(Settings::load_from(&path).is_err());
}

#[test]
fn test_zero_tool_rounds_still_allows_one() {
    let mut settings = Settings::default();
    assert_eq!(settings.max_tool_rounds(), 25);

    settings.orchestration.max_tool_rounds = 0;
    assert_eq!(settings.max_tool_rounds(), 1);
}
