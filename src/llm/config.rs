//! Configuration types for the LLM assist
//!
//! The assist is optional. With `LlmMode::None` (the default) every field is classified and
//! compiled by the deterministic rules alone.

use serde::{Deserialize, Serialize};

/// LLM provider selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LlmMode {
    /// Rule-based conversion only
    #[default]
    None,

    /// OpenAI chat completions
    OpenAi {
        /// Model name (e.g., "gpt-4o")
        #[serde(default = "default_openai_model")]
        model: String,
        /// API base URL
        #[serde(default = "default_openai_url")]
        base_url: String,
        /// Environment variable holding the API key
        #[serde(default = "default_openai_key_env")]
        api_key_env: String,
    },

    /// Azure OpenAI deployment
    AzureOpenAi {
        /// Resource endpoint (e.g., "https://my-resource.openai.azure.com")
        endpoint: String,
        /// Deployment name
        deployment: String,
        #[serde(default = "default_azure_api_version")]
        api_version: String,
        /// Environment variable holding the API key
        #[serde(default = "default_azure_key_env")]
        api_key_env: String,
    },
}

fn default_openai_model() -> String {
    "gpt-4o".to_string()
}

fn default_openai_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_azure_api_version() -> String {
    "2024-02-15-preview".to_string()
}

fn default_azure_key_env() -> String {
    "AZURE_OPENAI_API_KEY".to_string()
}

impl LlmMode {
    /// OpenAI with the default endpoint and key variable
    pub fn openai(model: impl Into<String>) -> Self {
        LlmMode::OpenAi {
            model: model.into(),
            base_url: default_openai_url(),
            api_key_env: default_openai_key_env(),
        }
    }

    /// Azure OpenAI with the default API version and key variable
    pub fn azure(endpoint: impl Into<String>, deployment: impl Into<String>) -> Self {
        LlmMode::AzureOpenAi {
            endpoint: endpoint.into(),
            deployment: deployment.into(),
            api_version: default_azure_api_version(),
            api_key_env: default_azure_key_env(),
        }
    }

    /// Pick the provider from the environment
    ///
    /// `CLOUD_PROVIDER=azure` selects Azure OpenAI using `AZURE_OPENAI_ENDPOINT`,
    /// `AZURE_OPENAI_DEPLOYMENT_NAME` and `AZURE_OPENAI_API_VERSION`. Otherwise OpenAI is used
    /// when `OPENAI_API_KEY` is set. With neither, the assist stays off.
    pub fn from_env() -> Self {
        let provider = std::env::var("CLOUD_PROVIDER")
            .map(|p| p.trim().to_lowercase())
            .unwrap_or_default();

        if provider == "azure" {
            let endpoint = std::env::var("AZURE_OPENAI_ENDPOINT").ok();
            let deployment = std::env::var("AZURE_OPENAI_DEPLOYMENT_NAME").ok();
            if let (Some(endpoint), Some(deployment)) = (endpoint, deployment) {
                let mut mode = LlmMode::azure(endpoint, deployment);
                if let (LlmMode::AzureOpenAi { api_version, .. }, Ok(version)) =
                    (&mut mode, std::env::var("AZURE_OPENAI_API_VERSION"))
                {
                    *api_version = version;
                }
                return mode;
            }
            return LlmMode::None;
        }

        if std::env::var(default_openai_key_env()).is_ok() {
            LlmMode::openai(default_openai_model())
        } else {
            LlmMode::None
        }
    }

    /// Check if the assist is enabled
    pub fn is_enabled(&self) -> bool {
        !matches!(self, LlmMode::None)
    }

    /// Name of the environment variable holding the API key
    pub fn api_key_env(&self) -> Option<&str> {
        match self {
            LlmMode::None => None,
            LlmMode::OpenAi { api_key_env, .. } | LlmMode::AzureOpenAi { api_key_env, .. } => {
                Some(api_key_env)
            }
        }
    }
}

/// Which stages consult the assist model
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssistScope {
    /// Measure/column decisions only
    #[default]
    Classification,
    /// DAX generation only
    Compilation,
    Both,
}

impl AssistScope {
    pub fn classification(self) -> bool {
        matches!(self, AssistScope::Classification | AssistScope::Both)
    }

    pub fn compilation(self) -> bool {
        matches!(self, AssistScope::Compilation | AssistScope::Both)
    }
}

/// Configuration for the LLM assist
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistConfig {
    /// LLM mode (none, open_ai, azure_open_ai)
    #[serde(default)]
    pub llm_mode: LlmMode,

    #[serde(default)]
    pub scope: AssistScope,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Maximum retries on failure
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Fields sent per request
    #[serde(default = "default_max_fields_per_prompt")]
    pub max_fields_per_prompt: usize,

    /// Temperature for LLM sampling (0.0 = deterministic)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Enable verbose logging of prompts and responses
    #[serde(default)]
    pub verbose: bool,
}

fn default_timeout_seconds() -> u64 {
    60
}

fn default_max_retries() -> usize {
    2
}

fn default_max_fields_per_prompt() -> usize {
    40
}

fn default_temperature() -> f32 {
    0.0
}

impl Default for AssistConfig {
    fn default() -> Self {
        Self {
            llm_mode: LlmMode::None,
            scope: AssistScope::default(),
            timeout_seconds: default_timeout_seconds(),
            max_retries: default_max_retries(),
            max_fields_per_prompt: default_max_fields_per_prompt(),
            temperature: default_temperature(),
            verbose: false,
        }
    }
}

impl AssistConfig {
    /// Assist through OpenAI
    pub fn with_openai(model: impl Into<String>) -> Self {
        Self {
            llm_mode: LlmMode::openai(model),
            ..Default::default()
        }
    }

    /// Assist through an Azure OpenAI deployment
    pub fn with_azure(endpoint: impl Into<String>, deployment: impl Into<String>) -> Self {
        Self {
            llm_mode: LlmMode::azure(endpoint, deployment),
            ..Default::default()
        }
    }

    pub fn with_scope(mut self, scope: AssistScope) -> Self {
        self.scope = scope;
        self
    }

    /// Set timeout in seconds
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Set maximum retries
    pub fn with_max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_max_fields_per_prompt(mut self, fields: usize) -> Self {
        self.max_fields_per_prompt = fields.max(1);
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    /// Enable verbose logging
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Check if the assist is enabled
    pub fn is_enabled(&self) -> bool {
        self.llm_mode.is_enabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_mode_default() {
        let mode = LlmMode::default();
        assert!(matches!(mode, LlmMode::None));
        assert!(!mode.is_enabled());
        assert_eq!(mode.api_key_env(), None);
    }

    #[test]
    fn test_llm_mode_azure() {
        let mode = LlmMode::azure("https://contoso.openai.azure.com", "dax-gpt");
        match &mode {
            LlmMode::AzureOpenAi {
                api_version,
                api_key_env,
                ..
            } => {
                assert_eq!(api_version, "2024-02-15-preview");
                assert_eq!(api_key_env, "AZURE_OPENAI_API_KEY");
            }
            _ => panic!("Expected AzureOpenAi mode"),
        }
        assert!(mode.is_enabled());
    }

    #[test]
    fn test_llm_mode_deserialize_defaults() {
        let mode: LlmMode = serde_json::from_str(r#"{"mode": "open_ai"}"#).unwrap();
        assert_eq!(mode, LlmMode::openai("gpt-4o"));
        assert_eq!(mode.api_key_env(), Some("OPENAI_API_KEY"));
    }

    #[test]
    fn test_assist_config_default() {
        let config = AssistConfig::default();
        assert!(!config.is_enabled());
        assert_eq!(config.scope, AssistScope::Classification);
        assert_eq!(config.timeout_seconds, 60);
        assert_eq!(config.max_retries, 2);
        assert!(config.temperature.abs() < f32::EPSILON);
    }

    #[test]
    fn test_assist_config_builders() {
        let config = AssistConfig::with_openai("gpt-4o-mini")
            .with_scope(AssistScope::Both)
            .with_timeout(5)
            .with_max_fields_per_prompt(0)
            .with_temperature(9.0);

        assert!(config.is_enabled());
        assert!(config.scope.classification() && config.scope.compilation());
        assert_eq!(config.timeout_seconds, 5);
        assert_eq!(config.max_fields_per_prompt, 1);
        assert!((config.temperature - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_assist_config_from_toml() {
        let config: AssistConfig = toml::from_str(
            r#"
            scope = "compilation"
            timeout_seconds = 10

            [llm_mode]
            mode = "azure_open_ai"
            endpoint = "https://contoso.openai.azure.com"
            deployment = "dax"
            "#,
        )
        .unwrap();

        assert_eq!(config.scope, AssistScope::Compilation);
        assert_eq!(config.timeout_seconds, 10);
        assert_eq!(config.max_retries, 2);
        assert!(matches!(config.llm_mode, LlmMode::AzureOpenAi { .. }));
    }
}
