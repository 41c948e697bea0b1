//! LLM assist
//!
//! Optional model-backed assistance for classification and DAX generation. The deterministic
//! rules remain the ground truth: every assist answer is validated, and any failure (timeout,
//! transport error, malformed JSON) falls back to the rule-based result.
//!
//! # Features
//!
//! - `llm-online`: HTTP client for OpenAI / Azure OpenAI chat completions

pub mod client;
pub mod config;
pub mod error;
pub mod openai;
pub mod prompt;

pub use client::{CompletionRequest, LlmClient, complete_with_retry};
pub use config::{AssistConfig, AssistScope, LlmMode};
pub use error::{LlmError, LlmResult};
pub use openai::OpenAiClient;
pub use prompt::{
    CLASSIFICATION_PROMPT, COMPILATION_PROMPT, DaxSuggestion, TypeSuggestion, parse_dax_response,
    parse_type_response,
};

use serde::{Deserialize, Serialize};

/// Record of an assist call that did not produce usable output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistFailure {
    /// "classification" or "compilation"
    pub stage: String,
    pub timed_out: bool,
    pub message: String,
}

impl AssistFailure {
    pub fn from_error(stage: impl Into<String>, err: &LlmError) -> Self {
        Self {
            stage: stage.into(),
            timed_out: matches!(err, LlmError::Timeout(_)),
            message: err.to_string(),
        }
    }
}
