//! LLM provider abstraction layer.
//!
//! A trait-based abstraction over interchangeable LLM backends (OpenAI,
//! Anthropic), selected once at startup.

mod anthropic;
mod openai;
mod provider;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAIProvider;
pub use provider::{CompletionOptions, LlmError, LlmProvider};

use crate::config::LlmSettings;
use clap::ValueEnum;
use serde::Deserialize;
use std::sync::Arc;

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Openai,
    Anthropic,
}

impl ProviderKind {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::Openai => "https://api.openai.com",
            ProviderKind::Anthropic => "https://api.anthropic.com",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::Openai => "gpt-4o",
            ProviderKind::Anthropic => "claude-3-5-sonnet-20241022",
        }
    }
}

/// Build the configured provider backend.
pub fn create_provider(settings: &LlmSettings) -> Arc<dyn LlmProvider> {
    match settings.provider {
        ProviderKind::Openai => Arc::new(OpenAIProvider::new(
            settings.base_url.clone(),
            settings.api_key.clone(),
            settings.model.clone(),
        )),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(
            settings.base_url.clone(),
            settings.api_key.clone(),
            settings.model.clone(),
        )),
    }
}
