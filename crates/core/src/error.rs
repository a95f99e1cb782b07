//! Error types for the copilot domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for copilot setup: building a provider from config.
///
/// Runtime failures never reach it; they become error results or the
/// Idle error banner instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures of the LLM transport. Surfaced to the user as the Idle error banner.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("No content in LLM response")]
    EmptyResponse,
}

/// Failures of a single tool invocation. Never crosses into the actor:
/// [`crate::tool::execute`] turns every variant into an error result.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool \"{0}\" not found")]
    NotFound(String),

    #[error("Invalid input for tool \"{tool_name}\": {reason}")]
    InvalidArguments { tool_name: String, reason: String },

    #[error("Tool \"{tool_name}\" failed: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool \"{tool_name}\" timed out after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Tool \"{0}\" panicked")]
    Panicked(String),
}

impl ToolError {
    /// Shorthand for executor implementations reporting a failure.
    pub fn failed(tool_name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::ExecutionFailed {
            tool_name: tool_name.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ContextError {
    #[error("Timed out after {timeout_secs}s waiting for markers: {}", missing.join(", "))]
    MarkersTimeout {
        timeout_secs: u64,
        missing: Vec<String>,
    },

    #[error("Context aggregator was dropped")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn tool_error_names_the_tool() {
        let err = ToolError::NotFound("search".into());
        assert_eq!(err.to_string(), "Tool \"search\" not found");

        let err = ToolError::Timeout {
            tool_name: "navigate".into(),
            timeout_secs: 30,
        };
        assert_eq!(err.to_string(), "Tool \"navigate\" timed out after 30s");
    }

    #[test]
    fn markers_timeout_lists_missing_keys() {
        let err = ContextError::MarkersTimeout {
            timeout_secs: 30,
            missing: vec!["search.ready".into(), "bucket.ready".into()],
        };
        assert!(err.to_string().contains("search.ready, bucket.ready"));
    }
}
