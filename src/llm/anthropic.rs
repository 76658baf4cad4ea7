//! Anthropic messages-API provider implementation.

use super::provider::{CompletionOptions, LlmError, LlmProvider};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic LLM provider.
///
/// Talks to the `/v1/messages` endpoint with `x-api-key` auth.
pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl AnthropicProvider {
    /// # Arguments
    /// * `base_url` - API base (e.g., "https://api.anthropic.com").
    /// * `api_key` - API key sent in the `x-api-key` header.
    /// * `model` - Model to use (e.g., "claude-3-5-sonnet-20241022").
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        let url = format!("{}/v1/messages", self.base_url);

        let request = MessagesRequest {
            model: self.model.clone(),
            // max_tokens is mandatory for this API.
            max_tokens: options.max_tokens.unwrap_or(1024),
            temperature: options.temperature,
            messages: vec![MessageParam {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        debug!(
            model = %self.model,
            prompt_len = prompt.len(),
            "Sending completion request to Anthropic"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .timeout(options.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Connection(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let messages_response: MessagesResponse = response.json().await.map_err(|e| {
            LlmError::InvalidResponse(format!("Failed to parse Anthropic response: {}", e))
        })?;

        let text = messages_response
            .content
            .into_iter()
            .find_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
            })
            .ok_or_else(|| {
                LlmError::InvalidResponse("response contained no text blocks".to_string())
            })?;

        debug!(
            stop_reason = ?messages_response.stop_reason,
            "Received completion response from Anthropic"
        );

        Ok(text)
    }
}

// Anthropic API types

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<MessageParam>,
}

#[derive(Debug, Serialize)]
struct MessageParam {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = MessagesRequest {
            model: "claude-3-5-sonnet-20241022".to_string(),
            max_tokens: 500,
            temperature: 0.1,
            messages: vec![MessageParam {
                role: "user".to_string(),
                content: "classify this".to_string(),
            }],
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "claude-3-5-sonnet-20241022");
        assert_eq!(value["max_tokens"], 500);
        assert_eq!(value["messages"][0]["content"], "classify this");
    }

    #[test]
    fn test_response_deserialization() {
        let raw = r#"{
            "content": [{"type": "text", "text": "Track 1: **Bass**"}],
            "stop_reason": "end_turn"
        }"#;
        let response: MessagesResponse = serde_json::from_str(raw).unwrap();
        match &response.content[0] {
            ContentBlock::Text { text } => assert_eq!(text, "Track 1: **Bass**"),
        }
    }
}
