//! Anthropic Provider

use async_trait::async_trait;
use serde_json::json;

use super::{LLMError, LLMProvider, Message, MessageRole, Result};
use crate::config::AnthropicConfig;

pub struct AnthropicProvider {
    config: AnthropicConfig,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicConfig, api_key: impl Into<String>) -> Self {
        Self {
            config,
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn is_local(&self) -> bool {
        false
    }

    fn estimated_cost(&self, tokens: usize) -> f64 {
        // Approx $0.003 per 1k tokens blended for small models
        (tokens as f64 / 1000.0) * 0.003
    }

    async fn check_health(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn generate(&self, messages: &[Message]) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(LLMError::AuthenticationFailed(
                "No Anthropic API key configured".to_string(),
            ));
        }

        let url = format!("{}/v1/messages", self.config.base_url);

        // Anthropic takes the system prompt as a top-level field
        let system: String = messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let api_messages: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .map(|msg| {
                json!({
                    "role": msg.role.to_string(),
                    "content": msg.content
                })
            })
            .collect();

        let mut payload = json!({
            "model": self.config.model,
            "max_tokens": 2048,
            "messages": api_messages,
        });
        if !system.is_empty() {
            payload["system"] = json!(system);
        }

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LLMError::Timeout
                } else {
                    LLMError::NetworkError(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            return match status.as_u16() {
                401 | 403 => Err(LLMError::AuthenticationFailed(text)),
                429 => Err(LLMError::RateLimitExceeded),
                _ => Err(LLMError::InvalidRequest(text)),
            };
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(e.to_string()))?;

        let content = data
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|blocks| blocks.first())
            .and_then(|block| block.get("text"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| LLMError::ParseError("No text block in response".to_string()))?;

        Ok(content.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anthropic_provider_properties() {
        let provider = AnthropicProvider::new(AnthropicConfig::default(), "sk-ant-test");
        assert_eq!(provider.name(), "anthropic");
        assert!(!provider.is_local());
        assert!(provider.estimated_cost(1000) > 0.0);
    }

    #[tokio::test]
    async fn test_missing_key_fails_fast() {
        let provider = AnthropicProvider::new(AnthropicConfig::default(), "");
        let result = provider.generate(&[Message::user("hi")]).await;
        assert!(matches!(result, Err(LLMError::AuthenticationFailed(_))));
    }
}
