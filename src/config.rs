//! Resolved configuration passed explicitly through every call boundary
//!
//! Two layers:
//! - `ModelInformation` / `Settings` - the notebook's user settings
//!   (provider, credentials, proxy URL), loaded from the settings JSON file
//!   and overlaid with environment variables.
//! - `AgentConfig` - tuning for the decide → execute loop.
//!
//! Nothing below the orchestrator reads settings on its own; callers resolve
//! a `Settings` once and hand the pieces down.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default base URL of the hosted code-generation backend
pub const DEFAULT_API_URL: &str = "https://api.thread.dev";

/// Default OpenAI-compatible API base URL
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default local Ollama server
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Model used for decisions when talking to OpenAI
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

/// Model used when Ollama is selected but no model is configured
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.1";

/// Settings file location, relative to the notebook server root
pub const DEFAULT_SETTINGS_PATH: &str = ".thread-dev/settings.json";

/// Which provider answers decision calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModelType {
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "ollama")]
    Ollama,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::OpenAi => "openai",
            ModelType::Ollama => "ollama",
        }
    }
}

impl std::str::FromStr for ModelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ModelType::OpenAi),
            "ollama" => Ok(ModelType::Ollama),
            other => Err(format!("unknown model type '{}'", other)),
        }
    }
}

/// Provider selection and credentials, passed opaquely through every call
///
/// Empty strings mean "not configured", matching how the notebook stores them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelInformation {
    #[serde(rename = "openAIKey")]
    pub openai_key: String,
    #[serde(rename = "openAIBaseUrl")]
    pub openai_base_url: String,
    pub server_proxy_url: String,
    pub model_type: ModelType,
    pub ollama_url: String,
    pub ollama_model: String,
}

impl ModelInformation {
    /// An API key or a proxy URL lifts the anonymous call budget
    pub fn has_credential(&self) -> bool {
        !self.openai_key.trim().is_empty() || !self.server_proxy_url.trim().is_empty()
    }

    /// Base URL for the code / fix-error execution endpoints
    pub fn execution_base_url(&self) -> String {
        let proxy = self.server_proxy_url.trim();
        if proxy.is_empty() {
            DEFAULT_API_URL.to_string()
        } else {
            proxy.trim_end_matches('/').to_string()
        }
    }

    /// Base URL for decision calls to the selected provider
    pub fn decision_base_url(&self) -> String {
        let (configured, fallback) = match self.model_type {
            ModelType::OpenAi => (self.openai_base_url.trim(), DEFAULT_OPENAI_BASE_URL),
            ModelType::Ollama => (self.ollama_url.trim(), DEFAULT_OLLAMA_URL),
        };
        if configured.is_empty() {
            fallback.to_string()
        } else {
            configured.trim_end_matches('/').to_string()
        }
    }

    /// Model name for decision calls
    pub fn decision_model(&self) -> String {
        match self.model_type {
            ModelType::OpenAi => DEFAULT_OPENAI_MODEL.to_string(),
            ModelType::Ollama => {
                let model = self.ollama_model.trim();
                if model.is_empty() {
                    DEFAULT_OLLAMA_MODEL.to_string()
                } else {
                    model.to_string()
                }
            }
        }
    }
}

/// Error loading the settings file
#[derive(Debug)]
pub enum SettingsError {
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::Io(e) => write!(f, "Failed to read settings: {}", e),
            SettingsError::Parse(e) => write!(f, "Invalid settings file: {}", e),
        }
    }
}

impl std::error::Error for SettingsError {}

impl From<std::io::Error> for SettingsError {
    fn from(e: std::io::Error) -> Self {
        SettingsError::Io(e)
    }
}

impl From<serde_json::Error> for SettingsError {
    fn from(e: serde_json::Error) -> Self {
        SettingsError::Parse(e)
    }
}

/// User settings as stored by the notebook
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    #[serde(flatten)]
    pub model_information: ModelInformation,
    pub auto_execute_generated_code: bool,
    /// Ask the model for a reason alongside every decision
    pub verbose: bool,
}

impl Settings {
    /// Load settings from a JSON file; missing fields take their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Load the file if it exists, otherwise start from defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "No settings file, using defaults");
            Ok(Self::default())
        }
    }

    /// Default settings path under the given notebook root
    pub fn default_path(root: impl Into<PathBuf>) -> PathBuf {
        root.into().join(DEFAULT_SETTINGS_PATH)
    }

    /// Overlay values from the process environment
    pub fn apply_env(self) -> Self {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Overlay values from an arbitrary variable source
    pub fn apply_vars<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let info = &mut self.model_information;
        if let Some(v) = lookup("OPENAI_API_KEY") {
            info.openai_key = v;
        }
        if let Some(v) = lookup("OPENAI_BASE_URL") {
            info.openai_base_url = v;
        }
        if let Some(v) = lookup("NOTEBOOK_AGENT_PROXY_URL") {
            info.server_proxy_url = v;
        }
        if let Some(v) = lookup("NOTEBOOK_AGENT_MODEL_TYPE") {
            match v.parse() {
                Ok(model_type) => info.model_type = model_type,
                Err(e) => tracing::warn!(error = %e, "Ignoring NOTEBOOK_AGENT_MODEL_TYPE"),
            }
        }
        if let Some(v) = lookup("OLLAMA_URL") {
            info.ollama_url = v;
        }
        if let Some(v) = lookup("OLLAMA_MODEL") {
            info.ollama_model = v;
        }
        if let Some(v) = lookup("NOTEBOOK_AGENT_VERBOSE") {
            self.verbose = matches!(v.as_str(), "1" | "true" | "yes");
        }
        self
    }

    /// Agent tuning derived from these settings
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            auto_execute_generated_code: self.auto_execute_generated_code,
            verbose: self.verbose,
            ..AgentConfig::default()
        }
    }
}

/// Configuration for the decide → execute loop
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Characters of serialized history offered to the decision model
    pub history_char_budget: usize,
    /// Output ceiling for the decision call (the answer is a label)
    pub max_output_tokens: u32,
    /// Sampling temperature for the decision call
    pub temperature: f32,
    /// Whether generated code runs without the user confirming it
    pub auto_execute_generated_code: bool,
    /// Request and keep a `reason` with every decision
    pub verbose: bool,
    /// Upper bound on decide → execute iterations per query
    pub max_cycles: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            history_char_budget: 5_000,
            max_output_tokens: 256,
            temperature: 0.0,
            auto_execute_generated_code: false,
            verbose: false,
            max_cycles: 25,
        }
    }
}
