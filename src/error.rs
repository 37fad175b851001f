// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Error types for Pluribots
//!
//! This module defines all error types used throughout the engine.

use thiserror::Error;

/// Main error type for plan execution
#[derive(Error, Debug)]
pub enum PluribotsError {
    /// API-related errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Tool execution errors
    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    /// The tool-call loop ran past its round limit
    #[error("Tool loop exceeded {0} rounds without a final answer")]
    ToolLoopExceeded(u32),

    /// No provider could serve the request, including fallbacks
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Plan errors
    #[error("Plan error: {0}")]
    Plan(String),

    /// Agent errors
    #[error("Agent error: {0}")]
    Agent(String),

    /// Persistence collaborator errors
    #[error("Store error: {0}")]
    Store(String),

    /// Credit/usage accounting errors
    #[error("Credit error: {0}")]
    Credit(String),
}

/// API-specific error types
#[derive(Error, Debug)]
pub enum ApiError {
    /// Authentication failed (invalid API key)
    #[error("Authentication failed: invalid API key")]
    AuthenticationFailed,

    /// Rate limited by the API
    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u32),

    /// Requested model not found
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Context window exceeded
    #[error("Context too long: {current} tokens exceeds limit of {limit}")]
    ContextTooLong { current: u32, limit: u32 },

    /// Network connectivity error
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid response from API
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// API returned an error
    #[error("API error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// Timeout waiting for response
    #[error("Request timed out")]
    Timeout,

    /// Streaming error
    #[error("Streaming error: {0}")]
    StreamError(String),
}

/// Result type alias for Pluribots operations
pub type Result<T> = std::result::Result<T, PluribotsError>;

impl PluribotsError {
    /// Whether the error means the provider itself could not be reached or used,
    /// as opposed to a problem with this particular request.
    pub fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            PluribotsError::ProviderUnavailable(_)
                | PluribotsError::Http(_)
                | PluribotsError::Api(ApiError::AuthenticationFailed)
                | PluribotsError::Api(ApiError::Network(_))
                | PluribotsError::Api(ApiError::Timeout)
                | PluribotsError::Api(ApiError::ServerError { .. })
        )
    }
}

impl From<anyhow::Error> for PluribotsError {
    fn from(err: anyhow::Error) -> Self {
        PluribotsError::Agent(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_tool_execution() {
        let err = PluribotsError::ToolExecution("tool failed".to_string());
        assert!(err.to_string().contains("tool failed"));
    }

    #[test]
    fn test_error_tool_loop_exceeded() {
        let err = PluribotsError::ToolLoopExceeded(25);
        assert!(err.to_string().contains("25 rounds"));
    }

    #[test]
    fn test_error_provider_unavailable() {
        let err = PluribotsError::ProviderUnavailable("anthropic, openai".to_string());
        assert!(err.to_string().contains("Provider unavailable"));
        assert!(err.is_provider_failure());
    }

    #[test]
    fn test_error_config() {
        let err = PluribotsError::Config("bad config".to_string());
        assert!(err.to_string().contains("Configuration error"));
        assert!(!err.is_provider_failure());
    }

    #[test]
    fn test_error_plan() {
        let err = PluribotsError::Plan("plan not found".to_string());
        assert!(err.to_string().contains("Plan error"));
    }

    #[test]
    fn test_error_store() {
        let err = PluribotsError::Store("disk full".to_string());
        assert!(err.to_string().contains("Store error"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PluribotsError = io_err.into();
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_error_from_anyhow() {
        let err: PluribotsError = anyhow::anyhow!("boom").into();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_api_error_rate_limited() {
        let err = ApiError::RateLimited(30);
        assert!(err.to_string().contains("Rate limited"));
        assert!(err.to_string().contains("30"));
    }

    #[test]
    fn test_api_error_context_too_long() {
        let err = ApiError::ContextTooLong {
            current: 10000,
            limit: 8192,
        };
        assert!(err.to_string().contains("10000"));
        assert!(err.to_string().contains("8192"));
    }

    #[test]
    fn test_api_error_server_error_is_provider_failure() {
        let err: PluribotsError = ApiError::ServerError {
            status: 503,
            message: "overloaded".to_string(),
        }
        .into();
        assert!(err.to_string().contains("503"));
        assert!(err.is_provider_failure());
    }

    #[test]
    fn test_api_error_model_not_found_is_not_provider_failure() {
        let err: PluribotsError = ApiError::ModelNotFound("gpt-9".to_string()).into();
        assert!(!err.is_provider_failure());
    }

    #[test]
    fn test_result_type_alias() {
        fn test_fn() -> Result<i32> {
            Ok(42)
        }

        assert_eq!(test_fn().unwrap(), 42);
    }
}
