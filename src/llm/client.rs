//! LLM client trait and the bounded call wrapper
//!
//! This module defines the `LlmClient` trait the assist talks to, and
//! [`complete_with_retry`], which applies the configured timeout and retry budget to a single
//! request.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::config::AssistConfig;
use super::error::{LlmError, LlmResult};

/// Trait for LLM client implementations
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a completion for a system prompt plus the serialized field list
    async fn complete(&self, request: &CompletionRequest) -> LlmResult<String>;

    /// Get the model name being used
    fn model_name(&self) -> &str;
}

/// One assist request: fixed instructions plus the fields to work on
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    /// JSON list of the fields, sent as the user message
    pub field_list: String,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(system_prompt: impl Into<String>, field_list: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            field_list: field_list.into(),
            temperature: 0.0,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Send a request, bounding each attempt by `timeout_seconds` and retrying retryable errors up
/// to `max_retries` times
///
/// The last error is returned when every attempt fails, so a run that only ever timed out
/// reports [`LlmError::Timeout`].
pub async fn complete_with_retry<C: LlmClient + ?Sized>(
    client: &C,
    request: &CompletionRequest,
    config: &AssistConfig,
) -> LlmResult<String> {
    let timeout = Duration::from_secs(config.timeout_seconds);
    let mut last_error = None;
    let mut attempt = 0;

    while attempt <= config.max_retries {
        let outcome = match tokio::time::timeout(timeout, client.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(config.timeout_seconds)),
        };

        match outcome {
            Ok(response) => {
                if config.verbose {
                    debug!(model = client.model_name(), "LLM response:\n{}", response);
                }
                return Ok(response);
            }
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                attempt += 1;
                warn!(
                    model = client.model_name(),
                    attempt,
                    error = %e,
                    "Assist request failed, retrying..."
                );
                tokio::time::sleep(Duration::from_millis(500)).await;
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or(LlmError::MaxRetriesExceeded(config.max_retries)))
}

/// A mock LLM client for testing
#[cfg(test)]
pub struct MockLlmClient {
    response: String,
    model: String,
    should_fail: bool,
    delay: Option<Duration>,
    calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MockLlmClient {
    /// Create a new mock client that returns the given response
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            model: "mock-model".to_string(),
            should_fail: false,
            delay: None,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Create a mock client that fails
    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Self::new("")
        }
    }

    /// Delay every response
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, _request: &CompletionRequest) -> LlmResult<String> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.should_fail {
            Err(LlmError::ConnectionError("Mock failure".to_string()))
        } else {
            Ok(self.response.clone())
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest::new("system", "[]")
    }

    #[tokio::test]
    async fn test_mock_client_success() {
        let client = MockLlmClient::new("Test response");
        assert_eq!(client.model_name(), "mock-model");

        let response = client.complete(&request()).await.unwrap();
        assert_eq!(response, "Test response");
    }

    #[tokio::test]
    async fn test_retry_exhausts_budget() {
        let client = MockLlmClient::failing();
        let config = AssistConfig::default().with_max_retries(1);

        let result = complete_with_retry(&client, &request(), &config).await;
        assert!(matches!(result, Err(LlmError::ConnectionError(_))));
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reported() {
        let client = MockLlmClient::new("late").with_delay(Duration::from_secs(30));
        let config = AssistConfig::default().with_timeout(1).with_max_retries(0);

        let result = complete_with_retry(&client, &request(), &config).await;
        assert!(matches!(result, Err(LlmError::Timeout(1))));
    }
}
