//! OpenAI / Azure OpenAI chat-completions client
//!
//! Both providers share the chat-completions wire format and differ only in URL layout and
//! auth header. HTTP support needs the `llm-online` feature; without it the client still
//! builds from configuration but every call fails with `FeatureNotAvailable`.
//!
//! # Example
//!
//! ```ignore
//! use dax_conversion_sdk::llm::{LlmMode, OpenAiClient};
//!
//! let client = OpenAiClient::from_mode(&LlmMode::openai("gpt-4o"))?.with_timeout(60);
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::client::{CompletionRequest, LlmClient};
use super::config::LlmMode;
use super::error::{LlmError, LlmResult};

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(not(feature = "llm-online"), allow(dead_code))]
enum Auth {
    /// `Authorization: Bearer ...` (OpenAI)
    Bearer(String),
    /// `api-key: ...` (Azure OpenAI)
    ApiKey(String),
}

/// Chat-completions client for OpenAI and Azure OpenAI
#[derive(Debug, Clone)]
#[cfg_attr(not(feature = "llm-online"), allow(dead_code))]
pub struct OpenAiClient {
    /// Full chat-completions URL
    url: String,
    /// Model or deployment name
    model: String,
    auth: Auth,
    /// Request timeout in seconds
    timeout_seconds: u64,
    /// HTTP client
    #[cfg(feature = "llm-online")]
    client: reqwest::Client,
}

/// Request body for the chat-completions endpoint
#[derive(Debug, Serialize)]
#[allow(dead_code)]
struct ChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
#[allow(dead_code)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Response from the chat-completions endpoint
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct ChatContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<usize>,
    #[serde(default)]
    completion_tokens: Option<usize>,
}

impl OpenAiClient {
    /// Build a client for the configured provider, reading the API key from the environment
    pub fn from_mode(mode: &LlmMode) -> LlmResult<Self> {
        let key_for = |var: &str| {
            std::env::var(var)
                .map_err(|_| LlmError::ConfigError(format!("environment variable {var} is not set")))
        };

        match mode {
            LlmMode::None => Err(LlmError::ConfigError(
                "LLM assist is disabled (mode = none)".to_string(),
            )),
            LlmMode::OpenAi {
                model,
                base_url,
                api_key_env,
            } => Ok(Self::new(
                format!("{}/chat/completions", base_url.trim_end_matches('/')),
                model.clone(),
                Auth::Bearer(key_for(api_key_env)?),
            )),
            LlmMode::AzureOpenAi {
                endpoint,
                deployment,
                api_version,
                api_key_env,
            } => Ok(Self::new(
                format!(
                    "{}/openai/deployments/{}/chat/completions?api-version={}",
                    endpoint.trim_end_matches('/'),
                    deployment,
                    api_version
                ),
                deployment.clone(),
                Auth::ApiKey(key_for(api_key_env)?),
            )),
        }
    }

    fn new(url: String, model: String, auth: Auth) -> Self {
        Self {
            url,
            model,
            auth,
            timeout_seconds: 60,
            #[cfg(feature = "llm-online")]
            client: reqwest::Client::new(),
        }
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Chat-completions URL requests are sent to
    pub fn url(&self) -> &str {
        &self.url
    }

    #[cfg_attr(not(feature = "llm-online"), allow(dead_code))]
    fn body<'a>(&'a self, request: &'a CompletionRequest) -> ChatRequest<'a> {
        ChatRequest {
            // Azure takes the deployment from the URL
            model: match self.auth {
                Auth::Bearer(_) => Some(self.model.as_str()),
                Auth::ApiKey(_) => None,
            },
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.field_list,
                },
            ],
            temperature: request.temperature,
        }
    }
}

#[cfg(feature = "llm-online")]
#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> LlmResult<String> {
        let body = self.body(request);

        tracing::debug!("Sending chat completion request to {}", self.url);

        let builder = self
            .client
            .post(&self.url)
            .json(&body)
            .timeout(std::time::Duration::from_secs(self.timeout_seconds));
        let builder = match &self.auth {
            Auth::Bearer(key) => builder.bearer_auth(key),
            Auth::ApiKey(key) => builder.header("api-key", key),
        };

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(self.timeout_seconds)
            } else {
                LlmError::ConnectionError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                return Err(LlmError::RateLimited(60));
            }
            if status.as_u16() == 401 {
                return Err(LlmError::ConfigError(
                    "API key was rejected (invalid, expired or revoked)".to_string(),
                ));
            }
            return Err(LlmError::ConnectionError(format!(
                "Chat completions API error (HTTP {}): {}",
                status, error_text
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        if let Some(usage) = &chat.usage {
            tracing::debug!(
                "Completion used {} prompt tokens, {} completion tokens",
                usage.prompt_tokens.unwrap_or(0),
                usage.completion_tokens.unwrap_or(0)
            );
        }

        chat.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("response has no message content".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(not(feature = "llm-online"))]
#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, _request: &CompletionRequest) -> LlmResult<String> {
        Err(LlmError::FeatureNotAvailable(
            "Online LLM".to_string(),
            "llm-online".to_string(),
        ))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_per_provider() {
        let openai = OpenAiClient::new(
            "https://api.openai.com/v1/chat/completions".into(),
            "gpt-4o".into(),
            Auth::Bearer("k".into()),
        );
        assert_eq!(openai.model_name(), "gpt-4o");
        assert_eq!(openai.url(), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn test_from_mode_none_is_config_error() {
        assert!(matches!(
            OpenAiClient::from_mode(&LlmMode::None),
            Err(LlmError::ConfigError(_))
        ));
    }

    #[test]
    fn test_from_mode_missing_key() {
        let mode = LlmMode::OpenAi {
            model: "gpt-4o".into(),
            base_url: "https://api.openai.com/v1".into(),
            api_key_env: "DAX_CONVERSION_TEST_UNSET_KEY".into(),
        };
        let err = OpenAiClient::from_mode(&mode).unwrap_err();
        assert!(err.to_string().contains("DAX_CONVERSION_TEST_UNSET_KEY"));
    }

    #[test]
    fn test_chat_request_serialize() {
        let client = OpenAiClient::new(
            "https://contoso.openai.azure.com/openai/deployments/dax/chat/completions".into(),
            "dax".into(),
            Auth::ApiKey("k".into()),
        );
        let request = CompletionRequest::new("system text", "[]");
        let json = serde_json::to_string(&client.body(&request)).unwrap();

        assert!(json.contains("system text"));
        assert!(!json.contains("\"model\""));
    }

    #[test]
    fn test_chat_response_deserialize() {
        let json = r#"{
            "choices": [{"message": {"role": "assistant", "content": "[]"}}],
            "usage": {"prompt_tokens": 50, "completion_tokens": 2}
        }"#;
        let response: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.choices[0].message.content.as_deref(), Some("[]"));
    }
}
