//! Configuration for the Focal tutoring server.
//!
//! Configuration lives in an optional `focal.json` with camelCase keys. Every
//! key has a default, so a missing file yields a working configuration that
//! talks to Gemini with the key from `GEMINI_API_KEY`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::echo::EchoModel;
use crate::error::{Result, TutorError};
use crate::gateway::GenerationGateway;
use crate::gemini::{GeminiModel, DEFAULT_BASE_URL};
use crate::image::ImageLimits;
use crate::model::LanguageModel;
use crate::options::ResponseOptions;

/// The default config file name.
pub const CONFIG_FILE_NAME: &str = "focal.json";

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    3000
}

const fn default_max_images() -> usize {
    8
}

const fn default_max_image_bytes() -> usize {
    5 * 1024 * 1024
}

const fn default_max_request_bytes() -> usize {
    32 * 1024 * 1024
}

/// Main configuration for the tutoring server and CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Language-model backend.
    #[serde(default)]
    pub llm_provider: LlmProvider,

    /// Model used for answers.
    #[serde(default = "default_model")]
    pub model: String,

    /// Model used for classification; defaults to `model`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier_model: Option<String>,

    /// Base URL of the Gemini REST API.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Address the HTTP server binds to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port the HTTP server listens on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum number of images per submission.
    #[serde(default = "default_max_images")]
    pub max_images: usize,

    /// Maximum decoded size of one image in bytes.
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,

    /// Maximum size of a request body in bytes.
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,

    /// Sections and sliders used when a client does not send its own.
    #[serde(default)]
    pub defaults: ResponseOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm_provider: LlmProvider::default(),
            model: default_model(),
            classifier_model: None,
            api_base_url: default_api_base_url(),
            api_key_env: default_api_key_env(),
            host: default_host(),
            port: default_port(),
            max_images: default_max_images(),
            max_image_bytes: default_max_image_bytes(),
            max_request_bytes: default_max_request_bytes(),
            defaults: ResponseOptions::default(),
        }
    }
}

impl Config {
    /// Loads configuration from `focal.json` in the current working directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is invalid.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            TutorError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_file(&current_dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// A missing file yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigParseError` if the file cannot be read or
    /// contains invalid JSON, and `TutorError::ConfigValidationError` if the
    /// values are out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(TutorError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| TutorError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigValidationError` if any check fails.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(TutorError::config_validation(
                "model must not be empty",
                "Set model to a model name such as \"gemini-2.5-flash\" in your focal.json",
            ));
        }

        if self
            .classifier_model
            .as_deref()
            .is_some_and(|m| m.trim().is_empty())
        {
            return Err(TutorError::config_validation(
                "classifierModel must not be empty",
                "Remove classifierModel to reuse model, or name a model in your focal.json",
            ));
        }

        if self.api_base_url.trim().is_empty() {
            return Err(TutorError::config_validation(
                "apiBaseUrl must not be empty",
                "Remove apiBaseUrl to use the default endpoint",
            ));
        }

        for (name, value) in [
            ("maxImages", self.max_images),
            ("maxImageBytes", self.max_image_bytes),
            ("maxRequestBytes", self.max_request_bytes),
        ] {
            if value == 0 {
                return Err(TutorError::config_validation(
                    format!("{name} must be greater than 0"),
                    format!("Set {name} to a positive number in your focal.json"),
                ));
            }
        }

        self.defaults.validate().map_err(|e| {
            TutorError::config_validation(
                format!("defaults.sliders: {e}"),
                "Use slider values between 0 and 1 in your focal.json",
            )
        })
    }

    /// The model used for classification.
    #[must_use]
    pub fn classifier_model(&self) -> &str {
        self.classifier_model.as_deref().unwrap_or(&self.model)
    }

    /// Image limits for request decoding.
    #[must_use]
    pub const fn image_limits(&self) -> ImageLimits {
        ImageLimits {
            max_images: self.max_images,
            max_image_bytes: self.max_image_bytes,
        }
    }

    /// Builds the generation gateway for the configured provider.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigValidationError` if the Gemini API key
    /// variable is unset or the HTTP client cannot be created.
    pub fn gateway(&self) -> Result<GenerationGateway> {
        let api_key = std::env::var(&self.api_key_env).ok();
        self.gateway_with_key(api_key)
    }

    fn gateway_with_key(&self, api_key: Option<String>) -> Result<GenerationGateway> {
        match self.llm_provider {
            LlmProvider::Echo => Ok(GenerationGateway::single(Arc::new(
                EchoModel::new().with_delay(Duration::from_millis(15)),
            ))),
            LlmProvider::Gemini => {
                let Some(api_key) = api_key.filter(|k| !k.trim().is_empty()) else {
                    return Err(TutorError::config_validation(
                        format!("environment variable {} is not set", self.api_key_env),
                        format!(
                            "Export {} with your Gemini API key, or set \"llmProvider\": \"echo\" for offline use",
                            self.api_key_env
                        ),
                    ));
                };
                let client = reqwest::Client::builder()
                    .connect_timeout(Duration::from_secs(10))
                    .build()
                    .map_err(|e| {
                        TutorError::config_validation(
                            format!("cannot create HTTP client: {e}"),
                            "Check the TLS configuration of this machine",
                        )
                    })?;
                let classifier: Arc<dyn LanguageModel> = Arc::new(GeminiModel::new(
                    client.clone(),
                    &self.api_base_url,
                    self.classifier_model(),
                    api_key.clone(),
                ));
                let answerer: Arc<dyn LanguageModel> = Arc::new(GeminiModel::new(
                    client,
                    &self.api_base_url,
                    &self.model,
                    api_key,
                ));
                Ok(GenerationGateway::new(classifier, answerer))
            }
        }
    }
}

/// Supported language-model backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LlmProvider {
    /// Google Gemini (default).
    #[default]
    Gemini,
    /// Offline echo backend.
    Echo,
}

impl LlmProvider {
    /// Parses a string into an `LlmProvider`, case-insensitively.
    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "gemini" => Some(Self::Gemini),
            "echo" => Some(Self::Echo),
            _ => None,
        }
    }

    /// The provider name as written in `focal.json`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Echo => "echo",
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = TutorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_str_case_insensitive(s).ok_or_else(|| {
            TutorError::config_validation(
                format!("invalid LLM provider '{s}'"),
                "Use one of 'gemini', 'echo'",
            )
        })
    }
}

impl<'de> Deserialize<'de> for LlmProvider {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid LLM provider '{s}': expected one of 'gemini', 'echo'"
            ))
        })
    }
}

impl Serialize for LlmProvider {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::options::{SectionKind, SectionSet};

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.llm_provider, LlmProvider::Gemini);
        assert_eq!(config.model, "gemini-2.5-flash");
        assert_eq!(config.classifier_model(), "gemini-2.5-flash");
        assert_eq!(config.api_key_env, "GEMINI_API_KEY");
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3000);
        assert_eq!(config.max_images, 8);
        assert_eq!(config.max_image_bytes, 5 * 1024 * 1024);
        assert_eq!(
            config.defaults.sections,
            SectionSet::of(&[SectionKind::Summary, SectionKind::Answer])
        );
    }

    #[test]
    fn test_llm_provider_case_insensitive() {
        let config: Config = serde_json::from_str(r#"{"llmProvider": "ECHO"}"#).unwrap();
        assert_eq!(config.llm_provider, LlmProvider::Echo);

        let err = serde_json::from_str::<Config>(r#"{"llmProvider": "claude"}"#).unwrap_err();
        assert!(err.to_string().contains("invalid LLM provider 'claude'"));

        assert_eq!("Gemini".parse::<LlmProvider>().unwrap(), LlmProvider::Gemini);
        assert_eq!(serde_json::to_string(&LlmProvider::Echo).unwrap(), "\"echo\"");
    }

    #[test]
    fn test_config_deserialization_with_overrides() {
        let json = r#"{
            "model": "gemini-2.5-pro",
            "classifierModel": "gemini-2.5-flash-lite",
            "port": 8080,
            "maxImages": 2,
            "defaults": {
                "sections": {"guidance": true},
                "sliders": {"understanding": 0.1}
            }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.model, "gemini-2.5-pro");
        assert_eq!(config.classifier_model(), "gemini-2.5-flash-lite");
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_images, 2);
        assert_eq!(config.image_limits().max_images, 2);
        assert_eq!(config.defaults.sections, SectionSet::of(&[SectionKind::Guidance]));
        assert!((config.defaults.sliders.understanding - 0.1).abs() < f64::EPSILON);
        assert!((config.defaults.sliders.politeness - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.model = "  ".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("model"));

        let mut config = Config::default();
        config.max_image_bytes = 0;
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("maxImageBytes must be greater than 0"));

        let mut config = Config::default();
        config.defaults.sliders.politeness = 2.0;
        assert!(config.validate().unwrap_err().to_string().contains("politeness"));

        let mut config = Config::default();
        config.classifier_model = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_missing_file_returns_defaults() {
        let path = PathBuf::from("/nonexistent/focal.json");
        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.port, 3000);
    }

    #[test]
    fn test_load_from_file_with_invalid_json() {
        let dir = std::env::temp_dir().join("focal_test_config_invalid");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(CONFIG_FILE_NAME);
        std::fs::write(&path, "{ not json").unwrap();

        let err = Config::load_from_file(&path).unwrap_err();
        assert!(matches!(err, TutorError::ConfigParseError { .. }));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_from_file_validates() {
        let dir = std::env::temp_dir().join("focal_test_config_validate");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{"maxImages": 0}"#).unwrap();

        let err = Config::load_from_file(&path).unwrap_err();
        assert!(matches!(err, TutorError::ConfigValidationError { .. }));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_gateway_requires_api_key_for_gemini() {
        let config = Config::default();
        let err = config.gateway_with_key(None).unwrap_err();
        assert!(err.to_string().contains("GEMINI_API_KEY"));

        let gateway = config.gateway_with_key(Some("key".to_string())).unwrap();
        assert_eq!(gateway.provider(), "gemini");
    }

    #[test]
    fn test_gateway_for_echo_needs_no_key() {
        let config = Config {
            llm_provider: LlmProvider::Echo,
            ..Config::default()
        };
        assert_eq!(config.gateway_with_key(None).unwrap().provider(), "echo");
    }
}
