mod file_config;

pub use file_config::{ClassifierFileConfig, FileConfig, LlmFileConfig, SpotifyFileConfig};

use crate::llm::ProviderKind;
use crate::spotify::SpotifyCredentials;
use anyhow::{bail, Result};
use std::env;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML
/// config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub provider: Option<ProviderKind>,
    pub model: Option<String>,
    pub batch_size: usize,
    pub max_retries: u32,
    pub parallelism: usize,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            batch_size: 25,
            max_retries: 3,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmSettings,
    pub spotify: SpotifySettings,
    pub classifier: ClassifierSettings,
}

/// Settings for the LLM backend.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: ProviderKind,
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub timeout_secs: u64,
}

/// Spotify OAuth material.
#[derive(Debug, Clone)]
pub struct SpotifySettings {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl From<&SpotifySettings> for SpotifyCredentials {
    fn from(settings: &SpotifySettings) -> Self {
        SpotifyCredentials {
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            refresh_token: settings.refresh_token.clone(),
        }
    }
}

/// Settings for the classification pipeline.
#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub batch_size: usize,
    /// Total attempt budget per batch, initial call included.
    pub max_retries: u32,
    /// Concurrent batches in flight; 1 means strictly sequential.
    pub parallelism: usize,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            batch_size: 25,
            max_retries: 3,
            parallelism: 1,
            initial_backoff_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file
    /// config. TOML values override CLI values where present; secrets fall
    /// back to environment variables.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let llm_file = file.llm.unwrap_or_default();
        let provider = llm_file.provider.or(cli.provider).unwrap_or_default();
        let base_url = llm_file
            .base_url
            .unwrap_or_else(|| provider.default_base_url().to_string());
        let model = llm_file
            .model
            .or_else(|| cli.model.clone())
            .unwrap_or_else(|| provider.default_model().to_string());
        let api_key_var = match provider {
            ProviderKind::Openai => "OPENAI_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
        };
        let api_key = match llm_file.api_key.or_else(|| env::var(api_key_var).ok()) {
            Some(key) if !key.is_empty() => key,
            _ => bail!(
                "LLM API key must be set via [llm].api_key in the config file or the {} environment variable",
                api_key_var
            ),
        };

        let llm = LlmSettings {
            provider,
            base_url,
            model,
            api_key,
            temperature: llm_file.temperature.unwrap_or(0.1),
            max_tokens: Some(llm_file.max_tokens.unwrap_or(1024)),
            timeout_secs: llm_file.timeout_secs.unwrap_or(60),
        };

        let spotify_file = file.spotify.unwrap_or_default();
        let spotify = SpotifySettings {
            client_id: required_secret(
                spotify_file.client_id,
                "SPOTIFY_CLIENT_ID",
                "[spotify].client_id",
            )?,
            client_secret: required_secret(
                spotify_file.client_secret,
                "SPOTIFY_CLIENT_SECRET",
                "[spotify].client_secret",
            )?,
            refresh_token: required_secret(
                spotify_file.refresh_token,
                "SPOTIFY_REFRESH_TOKEN",
                "[spotify].refresh_token",
            )?,
        };

        let classifier_file = file.classifier.unwrap_or_default();
        let classifier_defaults = ClassifierSettings::default();
        let classifier = ClassifierSettings {
            batch_size: classifier_file.batch_size.unwrap_or(cli.batch_size),
            max_retries: classifier_file.max_retries.unwrap_or(cli.max_retries),
            parallelism: classifier_file.parallelism.unwrap_or(cli.parallelism),
            initial_backoff_ms: classifier_file
                .initial_backoff_ms
                .unwrap_or(classifier_defaults.initial_backoff_ms),
            backoff_multiplier: classifier_file
                .backoff_multiplier
                .unwrap_or(classifier_defaults.backoff_multiplier),
        };

        if classifier.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if classifier.parallelism == 0 {
            bail!("parallelism must be at least 1");
        }
        if classifier.backoff_multiplier < 1.0 {
            bail!("backoff_multiplier must be >= 1.0");
        }

        Ok(Self {
            llm,
            spotify,
            classifier,
        })
    }
}

fn required_secret(file_value: Option<String>, env_var: &str, file_key: &str) -> Result<String> {
    match file_value.or_else(|| env::var(env_var).ok()) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => bail!(
            "{} must be set in the config file or via the {} environment variable",
            file_key,
            env_var
        ),
    }
}
