//! Dispatch Layer
//!
//! Maps a logical handler name to a registered `Handler` implementation and
//! normalizes the outcome. The caller-facing contract: `dispatch` always
//! returns a `HandlerResponse`. Unknown handlers, transport errors, and
//! timeouts all come back as the degraded response (near-zero confidence,
//! human-handoff flag set), never as an error the orchestrator has to
//! special-case.

use sdk::errors::EngineError;
use sdk::handler::Handler;
use sdk::types::{HandlerRequest, HandlerResponse};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::llm::router::LLMRouter;
use crate::llm::Message;

/// Lookup table of registered handlers
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under its own id. A later registration with the
    /// same id replaces the earlier one.
    pub fn register(&mut self, handler: Arc<dyn Handler>) {
        self.handlers.insert(handler.id().to_string(), handler);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(id).map(Arc::clone)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

/// Dispatches requests to handlers with a per-call timeout
pub struct Dispatcher {
    registry: HandlerRegistry,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: HandlerRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// Dispatch a request to the named handler.
    ///
    /// Always returns a response; failures arrive as
    /// `HandlerResponse::degraded`.
    pub async fn dispatch(&self, handler_name: &str, request: HandlerRequest) -> HandlerResponse {
        let Some(handler) = self.registry.get(handler_name) else {
            tracing::error!("Dispatch to unknown handler {:?}", handler_name);
            return HandlerResponse::degraded(format!("unknown handler: {}", handler_name));
        };

        match tokio::time::timeout(self.timeout, handler.handle(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::warn!("Handler {} failed: {}", handler_name, e);
                HandlerResponse::degraded(e.to_string())
            }
            Err(_) => {
                tracing::warn!(
                    "Handler {} timed out after {:?}",
                    handler_name,
                    self.timeout
                );
                HandlerResponse::degraded(format!(
                    "handler {} timed out after {}s",
                    handler_name,
                    self.timeout.as_secs()
                ))
            }
        }
    }
}

/// Gateway-backed handler: answers requests in one domain by prompting the
/// inference gateway with a domain persona and the attached memory context.
///
/// This is the default implementation registered for each known handler id;
/// deployments replace individual entries with handlers that reach real
/// backends (POS, reservation book, CRM).
pub struct LlmHandler {
    id: String,
    domain: String,
    gateway: Arc<LLMRouter>,
}

impl LlmHandler {
    pub fn new(
        id: impl Into<String>,
        domain: impl Into<String>,
        gateway: Arc<LLMRouter>,
    ) -> Self {
        Self {
            id: id.into(),
            domain: domain.into(),
            gateway,
        }
    }
}

#[async_trait::async_trait]
impl Handler for LlmHandler {
    fn id(&self) -> &str {
        &self.id
    }

    fn domain(&self) -> &str {
        &self.domain
    }

    async fn handle(&self, request: HandlerRequest) -> Result<HandlerResponse, EngineError> {
        let system = Message::system(format!(
            "You are the {} assistant for a restaurant. Your domain: {}.\n\
            Answer the guest's request directly and concisely. If the request \
            is outside your domain, say what you can help with instead.",
            self.id, self.domain
        ));

        let user = if request.context.is_null() {
            Message::user(request.message)
        } else {
            Message::user(format!(
                "Guest context: {}\nRequest: {}",
                request.context, request.message
            ))
        };

        let (content, provider) = self
            .gateway
            .call(&[system, user])
            .await
            .map_err(|e| EngineError::Dispatch(e.to_string()))?;

        tracing::debug!("Handler {} answered via {}", self.id, provider);
        Ok(HandlerResponse::ok(content, 0.8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct StubHandler {
        id: &'static str,
        outcome: Result<HandlerResponse, EngineError>,
        delay: Option<Duration>,
    }

    impl StubHandler {
        fn ok(id: &'static str, text: &str) -> Self {
            Self {
                id,
                outcome: Ok(HandlerResponse::ok(text, 0.9)),
                delay: None,
            }
        }

        fn failing(id: &'static str) -> Self {
            Self {
                id,
                outcome: Err(EngineError::Dispatch("backend down".to_string())),
                delay: None,
            }
        }

        fn slow(id: &'static str, delay: Duration) -> Self {
            Self {
                id,
                outcome: Ok(HandlerResponse::ok("too late", 0.9)),
                delay: Some(delay),
            }
        }
    }

    #[async_trait]
    impl Handler for StubHandler {
        fn id(&self) -> &str {
            self.id
        }

        fn domain(&self) -> &str {
            "stub"
        }

        async fn handle(&self, _request: HandlerRequest) -> Result<HandlerResponse, EngineError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match &self.outcome {
                Ok(r) => Ok(r.clone()),
                Err(_) => Err(EngineError::Dispatch("backend down".to_string())),
            }
        }
    }

    fn dispatcher_with(handler: StubHandler) -> Dispatcher {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(handler));
        Dispatcher::new(registry, Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_dispatch_passes_through_success() {
        let dispatcher = dispatcher_with(StubHandler::ok("concierge", "We open at 5pm"));
        let response = dispatcher
            .dispatch("concierge", HandlerRequest::new("s1", "hours?"))
            .await;
        assert!(response.success);
        assert_eq!(response.response, "We open at 5pm");
        assert!(!response.needs_human_handoff);
    }

    #[tokio::test]
    async fn test_dispatch_unknown_handler_degrades() {
        let dispatcher = Dispatcher::new(HandlerRegistry::new(), Duration::from_millis(200));
        let response = dispatcher
            .dispatch("nonexistent", HandlerRequest::new("s1", "hi"))
            .await;
        assert!(!response.success);
        assert_eq!(response.confidence, 0.0);
        assert!(response.needs_human_handoff);
        assert!(response.error.unwrap().contains("unknown handler"));
    }

    #[tokio::test]
    async fn test_dispatch_handler_error_degrades() {
        let dispatcher = dispatcher_with(StubHandler::failing("customers"));
        let response = dispatcher
            .dispatch("customers", HandlerRequest::new("s1", "points?"))
            .await;
        assert!(!response.success);
        assert!(response.needs_human_handoff);
    }

    #[tokio::test]
    async fn test_dispatch_timeout_degrades() {
        let dispatcher = dispatcher_with(StubHandler::slow("voice", Duration::from_secs(5)));
        let response = dispatcher
            .dispatch("voice", HandlerRequest::new("s1", "call me"))
            .await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_registry_replaces_same_id() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(StubHandler::ok("concierge", "first")));
        registry.register(Arc::new(StubHandler::ok("concierge", "second")));
        assert_eq!(registry.ids().len(), 1);

        let dispatcher = Dispatcher::new(registry, Duration::from_millis(200));
        let response = dispatcher
            .dispatch("concierge", HandlerRequest::new("s1", "hi"))
            .await;
        assert_eq!(response.response, "second");
    }
}
