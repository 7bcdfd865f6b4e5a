//! Memory Extraction Pipeline
//!
//! After each handled turn, the extractor asks the inference gateway which
//! facts, preferences, and context items the exchange revealed. Extraction
//! degrades silently: on any gateway or parse failure it returns an empty
//! update list and the conversation continues without new memory.

use crate::llm::router::LLMRouter;
use crate::llm::{extract_json_array, Message};
use crate::memory::{ContextSnapshot, MemoryUpdate, UpdateKind};
use crate::tasks::unix_now;
use serde::Deserialize;
use std::sync::Arc;

/// Intermediate deserialization type for model-produced update items
#[derive(Debug, Deserialize)]
struct RawUpdate {
    #[serde(rename = "type")]
    kind: String,
    key: String,
    value: serde_json::Value,
    confidence: Option<f64>,
    source: Option<String>,
}

pub struct MemoryExtractor {
    gateway: Arc<LLMRouter>,
}

impl MemoryExtractor {
    pub fn new(gateway: Arc<LLMRouter>) -> Self {
        Self { gateway }
    }

    /// Extract memory updates from one exchange.
    ///
    /// Never fails: gateway errors and unparsable output both yield an
    /// empty list.
    pub async fn extract_updates(
        &self,
        user_message: &str,
        handler_response: &str,
        snapshot: &ContextSnapshot,
    ) -> Vec<MemoryUpdate> {
        let system = Message::system(
            "You extract durable memory from a restaurant-guest conversation.\n\
            Output ONLY a JSON array. Each item must have:\n\
            - \"type\": one of \"fact\", \"preference\", \"context\", \"goal\"\n\
            - \"key\": short snake_case key (e.g. \"dietary_restriction\", \"spice_level\")\n\
            - \"value\": the remembered value\n\
            - \"confidence\": number between 0 and 1\n\
            - \"source\": always \"conversation\"\n\n\
            Only include items worth remembering across visits. Output an \
            empty array [] when there is nothing durable. No markdown, no \
            explanation.",
        );
        let user = Message::user(format!(
            "Existing memory:\n{}\nGuest said: {}\nAssistant replied: {}",
            snapshot.format_for_prompt(),
            user_message,
            handler_response
        ));

        let content = match self.gateway.call(&[system, user]).await {
            Ok((content, _provider)) => content,
            Err(e) => {
                tracing::debug!("Memory extraction skipped: {}", e);
                return Vec::new();
            }
        };

        Self::parse_updates(&content)
    }

    /// Parse model output into updates, skipping malformed items
    fn parse_updates(content: &str) -> Vec<MemoryUpdate> {
        let Some(array) = extract_json_array(content) else {
            tracing::debug!("Memory extraction output was not a JSON array");
            return Vec::new();
        };

        let raw_items: Vec<RawUpdate> = match serde_json::from_value(array) {
            Ok(items) => items,
            Err(e) => {
                tracing::debug!("Memory extraction items malformed: {}", e);
                return Vec::new();
            }
        };

        let now = unix_now();
        raw_items
            .into_iter()
            .filter_map(|raw| {
                let kind = UpdateKind::parse(&raw.kind)?;
                if raw.key.is_empty() {
                    return None;
                }
                Some(MemoryUpdate {
                    kind,
                    key: raw.key,
                    value: raw.value,
                    confidence: raw.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
                    source: raw.source.unwrap_or_else(|| "conversation".to_string()),
                    timestamp: now,
                })
            })
            .collect()
    }
}
