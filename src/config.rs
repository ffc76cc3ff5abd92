use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::{DocweaveError, Result};

/// Top-level configuration, loaded from `docweave.toml`. Every field has a
/// default so an empty file (or no file at all) is a valid configuration;
/// the API key may come from the environment instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocweaveConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiConfig {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// External structural extractor binary; receives the tree root as its
    /// final argument and prints the record mapping as JSON on stdout.
    #[serde(default = "default_extractor_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Maximum simultaneously in-flight LLM requests.
    #[serde(default = "default_rate_limit")]
    pub rate_limit: usize,
    /// How many central classes/functions feed the project main-idea prompt.
    #[serde(default = "default_sample_top_n")]
    pub sample_top_n: usize,
}

fn default_extractor_command() -> String {
    "docweave-extract".to_string()
}

fn default_rate_limit() -> usize {
    4
}

fn default_sample_top_n() -> usize {
    6
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            command: default_extractor_command(),
            args: Vec::new(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            rate_limit: default_rate_limit(),
            sample_top_n: default_sample_top_n(),
        }
    }
}

impl DocweaveConfig {
    /// Load configuration from a TOML file, or fall back to defaults when
    /// `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .map_err(|e| DocweaveError::io(path.display().to_string(), e))?;
        toml::from_str(&text).map_err(|e| DocweaveError::Config(e.to_string()))
    }

    /// API key from the config file, or from `ANTHROPIC_API_KEY`.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api
            .api_key
            .clone()
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
    }
}
