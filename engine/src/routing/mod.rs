//! Routing Engine
//!
//! Decides which handler should process a request. Two tiers:
//!
//! 1. **Classification** — a prompt naming each known handler and its domain
//!    goes to the inference gateway; the structured result is validated
//!    against the known-handler table.
//! 2. **Keyword fallback** — when the gateway errors, the output doesn't
//!    parse, or the returned handler name is unknown, a deterministic
//!    keyword heuristic over the raw message picks the handler, checked in
//!    fixed priority order. The fallback never fails and never calls an
//!    external service, trading precision for availability.
//!
//! Routing is pure given memory state; it has no side effects.

use crate::llm::router::LLMRouter;
use crate::llm::{extract_json_object, Message};
use crate::memory::ContextSnapshot;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Confidence attached to a keyword-matched fallback decision
pub const FALLBACK_CONFIDENCE: f64 = 0.6;

/// Confidence attached to the default-handler fallback decision
pub const DEFAULT_FALLBACK_CONFIDENCE: f64 = 0.4;

/// Upper bound any fallback-path confidence may reach
pub const FALLBACK_CONFIDENCE_CEILING: f64 = 0.7;

/// Handler that catches everything nothing else claims
pub const DEFAULT_HANDLER: &str = "concierge";

/// A known handler: its registry id, the domain blurb shown to the
/// classifier, and the keywords the fallback heuristic matches on.
pub struct HandlerProfile {
    pub id: &'static str,
    pub domain: &'static str,
    keywords: &'static [&'static str],
}

/// Known handlers in fallback priority order: campaign creation beats
/// voice, voice beats customer/loyalty, customer/loyalty beats marketing,
/// and the concierge catches the rest.
pub const KNOWN_HANDLERS: &[HandlerProfile] = &[
    HandlerProfile {
        id: "campaign",
        domain: "creates and runs outbound marketing campaigns (email/SMS blasts, promotions)",
        keywords: &["campaign", "promotion", "promo", "blast", "announce"],
    },
    HandlerProfile {
        id: "voice",
        domain: "phone and voice interactions: calls, voicemail, call-back requests",
        keywords: &["call", "voice", "phone", "voicemail"],
    },
    HandlerProfile {
        id: "customers",
        domain: "customer records and the loyalty program: points, visits, profiles",
        keywords: &["customer", "loyalty", "points", "guest", "regular", "member"],
    },
    HandlerProfile {
        id: "marketing",
        domain: "marketing content and channels: email copy, SMS copy, newsletters, social posts",
        keywords: &["marketing", "email", "sms", "newsletter", "social"],
    },
    HandlerProfile {
        id: DEFAULT_HANDLER,
        domain: "general restaurant questions: hours, menu, reservations, anything else",
        keywords: &[],
    },
];

/// Look up a known handler by id
pub fn is_known_handler(id: &str) -> bool {
    KNOWN_HANDLERS.iter().any(|h| h.id == id)
}

/// Outcome of routing a message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub handler: String,
    pub confidence: f64,
    pub reasoning: String,
}

/// Intermediate deserialization type for classifier output
#[derive(Debug, Deserialize)]
struct RawDecision {
    handler: String,
    confidence: Option<f64>,
    reasoning: Option<String>,
}

pub struct RoutingEngine {
    gateway: Arc<LLMRouter>,
}

impl RoutingEngine {
    pub fn new(gateway: Arc<LLMRouter>) -> Self {
        Self { gateway }
    }

    /// Route a message to a handler. Never fails.
    pub async fn route(&self, message: &str, snapshot: &ContextSnapshot) -> RoutingDecision {
        let prompt = self.classification_prompt(message, snapshot);

        match self.gateway.call(&prompt).await {
            Ok((content, _provider)) => match Self::parse_decision(&content) {
                Some(decision) => decision,
                None => {
                    tracing::warn!("Classifier output unusable, falling back to keywords");
                    keyword_route(message)
                }
            },
            Err(e) => {
                tracing::warn!("Classifier unavailable ({}), falling back to keywords", e);
                keyword_route(message)
            }
        }
    }

    fn classification_prompt(&self, message: &str, snapshot: &ContextSnapshot) -> Vec<Message> {
        let mut handler_list = String::new();
        for profile in KNOWN_HANDLERS {
            handler_list.push_str(&format!("- \"{}\": {}\n", profile.id, profile.domain));
        }

        let system = Message::system(format!(
            "You route restaurant-guest requests to a handler.\n\
            Handlers:\n{}\n\
            Output ONLY a JSON object:\n\
            {{\"handler\": \"<id>\", \"confidence\": <0..1>, \"reasoning\": \"<one sentence>\"}}\n\
            No markdown, no explanation outside the JSON.",
            handler_list
        ));

        let context = snapshot.format_for_prompt();
        let user = if context.is_empty() {
            Message::user(message.to_string())
        } else {
            Message::user(format!("Context:\n{}\nRequest: {}", context, message))
        };

        vec![system, user]
    }

    /// Parse and validate classifier output. Returns `None` for anything
    /// that should push routing onto the fallback path, including a handler
    /// name that is not in the known-handler table.
    fn parse_decision(content: &str) -> Option<RoutingDecision> {
        let object = extract_json_object(content)?;
        let raw: RawDecision = serde_json::from_value(object).ok()?;

        if !is_known_handler(&raw.handler) {
            tracing::warn!("Classifier chose unknown handler {:?}", raw.handler);
            return None;
        }

        Some(RoutingDecision {
            handler: raw.handler,
            confidence: raw.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
            reasoning: raw
                .reasoning
                .unwrap_or_else(|| "classified by inference".to_string()),
        })
    }
}

/// Deterministic keyword heuristic over the raw message.
///
/// Checks each handler's keyword set in the fixed priority order of
/// `KNOWN_HANDLERS`; the first hit wins. No hit routes to the default
/// handler at a lower fixed confidence.
pub fn keyword_route(message: &str) -> RoutingDecision {
    let lowered = message.to_lowercase();

    for profile in KNOWN_HANDLERS {
        if let Some(keyword) = profile.keywords.iter().find(|k| lowered.contains(*k)) {
            return RoutingDecision {
                handler: profile.id.to_string(),
                confidence: FALLBACK_CONFIDENCE,
                reasoning: format!("keyword heuristic matched {:?}", keyword),
            };
        }
    }

    RoutingDecision {
        handler: DEFAULT_HANDLER.to_string(),
        confidence: DEFAULT_FALLBACK_CONFIDENCE,
        reasoning: "keyword heuristic found no match, using default handler".to_string(),
    }
}
