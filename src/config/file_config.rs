//! TOML file configuration.
//!
//! Every field is optional; `AppConfig::resolve` merges these over the CLI
//! values and fills in defaults.

use crate::llm::ProviderKind;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub llm: Option<LlmFileConfig>,
    pub spotify: Option<SpotifyFileConfig>,
    pub classifier: Option<ClassifierFileConfig>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse config file {:?}", path))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LlmFileConfig {
    pub provider: Option<ProviderKind>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpotifyFileConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClassifierFileConfig {
    pub batch_size: Option<usize>,
    pub max_retries: Option<u32>,
    pub parallelism: Option<usize>,
    pub initial_backoff_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
}
