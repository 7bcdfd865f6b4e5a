//! Dispatch request/response types
//!
//! These shapes cross the boundary between the orchestrator and handler
//! implementations. The response mirrors what the orchestrator promises its
//! own callers: a response is always returned, and failures arrive as a
//! degraded response rather than an error the caller has to unwrap.

use serde::{Deserialize, Serialize};

/// Request passed to a handler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerRequest {
    /// Conversation the request belongs to
    pub session_id: String,

    /// The user's message or task description
    pub message: String,

    /// Read-only memory context the orchestrator attached (JSON projection)
    #[serde(default)]
    pub context: serde_json::Value,
}

impl HandlerRequest {
    /// Create a new request with empty context
    pub fn new(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            message: message.into(),
            context: serde_json::Value::Null,
        }
    }

    /// Attach a context projection
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

/// Response returned by a handler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerResponse {
    pub success: bool,

    /// Text to surface to the end user
    pub response: String,

    /// Handler's confidence in its own answer, in [0, 1]
    pub confidence: f64,

    /// Classified intent, when the handler produced one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,

    /// Set when the request should be escalated to a human
    #[serde(default)]
    pub needs_human_handoff: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HandlerResponse {
    /// Create a successful response
    pub fn ok(response: impl Into<String>, confidence: f64) -> Self {
        Self {
            success: true,
            response: response.into(),
            confidence: confidence.clamp(0.0, 1.0),
            intent: None,
            needs_human_handoff: false,
            error: None,
        }
    }

    /// Tag the response with a classified intent
    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    /// Create the degraded response the dispatcher substitutes when a
    /// handler fails or times out: near-zero confidence, human handoff set.
    pub fn degraded(error: impl Into<String>) -> Self {
        Self {
            success: false,
            response: "I wasn't able to process that request right now. \
                       A team member will follow up with you."
                .to_string(),
            confidence: 0.0,
            intent: None,
            needs_human_handoff: true,
            error: Some(error.into()),
        }
    }
}
