//! Error types for LLM assist operations

use thiserror::Error;

/// Errors that can occur while calling the assist model
#[derive(Error, Debug)]
pub enum LlmError {
    /// Failed to connect to LLM service
    #[error("Failed to connect to LLM service: {0}")]
    ConnectionError(String),

    /// Request timeout
    #[error("LLM request timed out after {0} seconds")]
    Timeout(u64),

    /// Invalid response from LLM
    #[error("Invalid LLM response: {0}")]
    InvalidResponse(String),

    /// Failed to parse LLM output as JSON
    #[error("Failed to parse LLM output as JSON: {0}")]
    ParseError(String),

    /// LLM output did not pass validation
    #[error("LLM output validation failed: {0}")]
    ValidationError(String),

    /// Maximum retries exceeded
    #[error("Maximum retries ({0}) exceeded")]
    MaxRetriesExceeded(usize),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Rate limiting
    #[error("Rate limited by LLM service, retry after {0} seconds")]
    RateLimited(u64),

    /// Feature not available
    #[error("LLM feature not available: {0}. Enable with --features {1}")]
    FeatureNotAvailable(String, String),
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::ParseError(err.to_string())
    }
}

/// Result type for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

impl LlmError {
    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            LlmError::ConnectionError(msg) => {
                format!(
                    "Failed to connect to LLM service: {msg}\n\n\
                    Hints:\n\
                    - Check your internet connection\n\
                    - Verify the API endpoint is correct"
                )
            }
            LlmError::Timeout(secs) => {
                format!(
                    "LLM request timed out after {secs} seconds.\n\n\
                    Hints:\n\
                    - The model may be overloaded, try again later\n\
                    - Reduce max_fields_per_prompt\n\
                    - Increase timeout_seconds in the assist configuration"
                )
            }
            LlmError::RateLimited(secs) => {
                format!(
                    "Rate limited by LLM service. Retry after {secs} seconds.\n\n\
                    Hint: Wait and try again, or use a different API key."
                )
            }
            LlmError::ConfigError(msg) => {
                format!(
                    "LLM configuration error: {msg}\n\n\
                    Hints:\n\
                    - Set OPENAI_API_KEY for OpenAI\n\
                    - Set AZURE_OPENAI_API_KEY and AZURE_OPENAI_ENDPOINT for Azure OpenAI"
                )
            }
            LlmError::FeatureNotAvailable(feature, flag) => {
                format!(
                    "LLM feature '{feature}' not available.\n\n\
                    Hint: Rebuild with --features {flag}"
                )
            }
            _ => self.to_string(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::ConnectionError(_)
                | LlmError::Timeout(_)
                | LlmError::RateLimited(_)
                | LlmError::ParseError(_)
                | LlmError::InvalidResponse(_)
        )
    }

    /// Get suggested wait time before retry (in seconds)
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            LlmError::RateLimited(secs) => Some(*secs),
            LlmError::Timeout(_) => Some(5),
            LlmError::ConnectionError(_) => Some(2),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LlmError::ConnectionError("Connection refused".to_string());
        assert_eq!(
            err.to_string(),
            "Failed to connect to LLM service: Connection refused"
        );

        let err = LlmError::Timeout(30);
        assert_eq!(err.to_string(), "LLM request timed out after 30 seconds");

        let err = LlmError::MaxRetriesExceeded(3);
        assert_eq!(err.to_string(), "Maximum retries (3) exceeded");
    }

    #[test]
    fn test_error_from_serde() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let llm_err: LlmError = json_err.into();
        assert!(matches!(llm_err, LlmError::ParseError(_)));
        assert!(llm_err.is_retryable());
    }

    #[test]
    fn test_not_retryable() {
        let err = LlmError::FeatureNotAvailable("Online LLM".into(), "llm-online".into());
        assert!(!err.is_retryable());
        assert!(err.user_message().contains("--features llm-online"));
        assert_eq!(LlmError::RateLimited(7).retry_after(), Some(7));
    }
}
