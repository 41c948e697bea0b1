//! Conversion configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::{ConversionError, ConversionResult};
use crate::compile::ValidationPolicy;
use crate::llm::AssistConfig;

/// Settings for one conversion run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Compile workers; 0 uses the available parallelism, 1 compiles on the calling thread
    #[serde(default)]
    pub workers: usize,

    /// What to do with naked-measure violations in generated DAX
    #[serde(default)]
    pub validation: ValidationPolicy,

    #[serde(default)]
    pub assist: AssistConfig,
}

impl ConversionConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_validation(mut self, validation: ValidationPolicy) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_assist(mut self, assist: AssistConfig) -> Self {
        self.assist = assist;
        self
    }

    /// Worker count after resolving `0`
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Load from a `.toml` or `.json` file
    pub fn load(path: &Path) -> ConversionResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConversionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some("toml") => toml::from_str(&text).map_err(|e| ConversionError::Config(e.to_string())),
            Some("json") => {
                serde_json::from_str(&text).map_err(|e| ConversionError::Config(e.to_string()))
            }
            other => Err(ConversionError::Config(format!(
                "unsupported config format: {}",
                other.unwrap_or("(none)")
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmMode;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_defaults() {
        let config = ConversionConfig::default();
        assert_eq!(config.workers, 0);
        assert_eq!(config.validation, ValidationPolicy::AutoCorrect);
        assert!(!config.assist.is_enabled());
        assert!(config.effective_workers() >= 1);
        assert_eq!(config.with_workers(3).effective_workers(), 3);
    }

    #[test]
    fn test_load_toml() {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
workers = 2
validation = "reject"

[assist]
timeout_seconds = 5

[assist.llm_mode]
mode = "open_ai"
model = "gpt-4o-mini"
"#
        )
        .unwrap();

        let config = ConversionConfig::load(file.path()).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.validation, ValidationPolicy::Reject);
        assert_eq!(config.assist.timeout_seconds, 5);
        assert!(matches!(config.assist.llm_mode, LlmMode::OpenAi { ref model, .. } if model == "gpt-4o-mini"));
    }

    #[test]
    fn test_load_json_and_unknown_extension() {
        let mut file = Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"workers": 1}}"#).unwrap();
        assert_eq!(ConversionConfig::load(file.path()).unwrap().workers, 1);

        let file = Builder::new().suffix(".yaml").tempfile().unwrap();
        assert!(matches!(
            ConversionConfig::load(file.path()),
            Err(ConversionError::Config(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            ConversionConfig::load(Path::new("/nonexistent/dax.toml")),
            Err(ConversionError::Io { .. })
        ));
    }
}
