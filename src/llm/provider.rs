//! LLM provider trait definition.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Options for a completion request.
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative).
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Request timeout.
    pub timeout: Duration,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: Some(1024),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Errors that can occur when interacting with an LLM provider.
///
/// All variants are transport-level from the pipeline's point of view and
/// are retried up to the batch attempt budget, never propagated past the
/// batch classifier.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Request timeout")]
    Timeout,
}

/// Trait for LLM providers.
///
/// Implementations connect to different backends (OpenAI, Anthropic) while
/// exposing a single `complete(prompt) -> text` capability. The backend is
/// selected once at startup; nothing downstream branches on provider
/// identity.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// The provider's name (e.g., "openai", "anthropic").
    fn name(&self) -> &str;

    /// The model being used.
    fn model(&self) -> &str;

    /// Send a single-turn prompt and return the raw completion text.
    async fn complete(&self, prompt: &str, options: &CompletionOptions)
        -> Result<String, LlmError>;
}
