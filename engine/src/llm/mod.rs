//! Inference Gateway Abstraction Layer
//!
//! This module provides a common interface for the inference providers the
//! orchestrator consults (Ollama, OpenAI, Anthropic). The LLMProvider trait
//! defines the contract all providers implement, enabling the router to fail
//! over between them transparently.
//!
//! Every response is untrusted text. Callers that expect structured output
//! must go through the extraction helpers at the bottom of this module and
//! treat any parse failure as a recoverable condition with its own fallback,
//! never as a crash.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod anthropic;
pub mod ollama;
pub mod openai;
pub mod router;

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during gateway operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Message in a conversation or prompt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender (user, assistant, system)
    pub role: MessageRole,

    /// Content of the message
    pub content: String,
}

impl Message {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User message
    User,

    /// Assistant message
    Assistant,

    /// System message
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

/// Inference provider trait that all providers must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "ollama", "openai", "anthropic")
    fn name(&self) -> &str;

    /// Returns true if this is a local provider (e.g., Ollama), false for cloud providers
    fn is_local(&self) -> bool;

    /// Returns the estimated cost per 1K tokens in USD.
    /// Local providers should return 0.0.
    fn estimated_cost(&self, tokens: usize) -> f64;

    /// Generate a completion for the given prompt messages.
    ///
    /// Returns the raw response text. Structured output is a caller-level
    /// concern; see the extraction helpers in this module.
    async fn generate(&self, messages: &[Message]) -> Result<String>;

    /// Check if the provider is currently healthy and available.
    /// Default implementation returns true.
    async fn check_health(&self) -> bool {
        true
    }
}

/// Extract a JSON object from untrusted model output.
///
/// Handles the formats providers actually produce:
/// 1. The whole response is the object
/// 2. Fenced JSON (with or without trailing prose): ` ```json\n{...}\n``` `
/// 3. An object embedded in prose — scans for the first balanced `{...}`
pub fn extract_json_object(content: &str) -> Option<serde_json::Value> {
    let trimmed = content.trim();

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if value.is_object() {
            return Some(value);
        }
    }

    if let Some(inner) = extract_fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(inner.trim()) {
            if value.is_object() {
                return Some(value);
            }
        }
    }

    if let Some(pos) = trimmed.find('{') {
        if let Some(candidate) = extract_balanced(&trimmed[pos..], '{', '}') {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(candidate) {
                if value.is_object() {
                    return Some(value);
                }
            }
        }
    }

    None
}

/// Extract a JSON array from untrusted model output.
///
/// Same tolerance as [`extract_json_object`], for array-shaped payloads
/// (task descriptors, content variants, memory updates).
pub fn extract_json_array(content: &str) -> Option<serde_json::Value> {
    let trimmed = content.trim();

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if value.is_array() {
            return Some(value);
        }
    }

    if let Some(inner) = extract_fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(inner.trim()) {
            if value.is_array() {
                return Some(value);
            }
        }
    }

    if let Some(pos) = trimmed.find('[') {
        if let Some(candidate) = extract_balanced(&trimmed[pos..], '[', ']') {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(candidate) {
                if value.is_array() {
                    return Some(value);
                }
            }
        }
    }

    None
}

/// Extract the body of the first markdown code fence in the text.
///
/// Works even when there is trailing prose after the closing ```.
/// Returns `None` if no fenced block is found.
fn extract_fenced_block(content: &str) -> Option<&str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    // Skip the language tag line (e.g. "json\n")
    let body_start_rel = after_opening.find('\n')? + 1;
    let body_start = fence_start + 3 + body_start_rel;

    let closing = content[body_start..].find("```")?;
    let body_end = body_start + closing;

    if body_start >= body_end {
        return None;
    }

    Some(&content[body_start..body_end])
}

/// Extract a balanced `open`..`close` region starting at position 0 of `s`.
///
/// Counts bracket depth, respecting string literals, to find the matching
/// close bracket.
fn extract_balanced(s: &str, open: char, close: char) -> Option<&str> {
    if !s.starts_with(open) {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let user_msg = Message::user("Hello");
        assert_eq!(user_msg.role, MessageRole::User);
        assert_eq!(user_msg.content, "Hello");

        let assistant_msg = Message::assistant("Hi there");
        assert_eq!(assistant_msg.role, MessageRole::Assistant);

        let system_msg = Message::system("You are a helpful assistant");
        assert_eq!(system_msg.role, MessageRole::System);
    }

    #[test]
    fn test_message_serialization() {
        let msg = Message::user("test");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""role":"user""#));
        let deserialized: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, deserialized);
    }

    #[test]
    fn test_extract_object_raw() {
        let value = extract_json_object(r#"{"handler": "campaign", "confidence": 0.9}"#).unwrap();
        assert_eq!(value["handler"], "campaign");
    }

    #[test]
    fn test_extract_object_fenced_with_prose() {
        let content = "Sure, here's the classification:\n```json\n{\"handler\": \"voice\"}\n```\nLet me know!";
        let value = extract_json_object(content).unwrap();
        assert_eq!(value["handler"], "voice");
    }

    #[test]
    fn test_extract_object_embedded_in_prose() {
        let content = r#"The best match is {"handler": "marketing", "confidence": 0.8} based on keywords."#;
        let value = extract_json_object(content).unwrap();
        assert_eq!(value["handler"], "marketing");
    }

    #[test]
    fn test_extract_object_respects_braces_in_strings() {
        let content = r#"{"reasoning": "uses {placeholder} syntax", "handler": "campaign"}"#;
        let value = extract_json_object(content).unwrap();
        assert_eq!(value["reasoning"], "uses {placeholder} syntax");
    }

    #[test]
    fn test_extract_array_raw() {
        let value = extract_json_array(r#"[{"description": "a"}, {"description": "b"}]"#).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_extract_array_fenced() {
        let content = "```json\n[1, 2, 3]\n```";
        let value = extract_json_array(content).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_extract_rejects_garbage() {
        assert!(extract_json_object("no json here").is_none());
        assert!(extract_json_array("still nothing [unclosed").is_none());
        assert!(extract_json_object("{truncated").is_none());
    }

    #[test]
    fn test_extract_object_is_not_fooled_by_array() {
        assert!(extract_json_object("[1, 2]").is_none());
    }
}
