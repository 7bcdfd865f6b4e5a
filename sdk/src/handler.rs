//! Handler capability trait
//!
//! A handler is a specialized processor for one domain of requests
//! (customer management, outbound messaging, operational Q&A, ...). The
//! routing engine and the task executor depend only on this interface;
//! concrete implementations are registered in the engine's dispatch table
//! under their handler id.

use crate::errors::EngineError;
use crate::types::{HandlerRequest, HandlerResponse};
use async_trait::async_trait;

/// Capability interface every specialized handler implements
#[async_trait]
pub trait Handler: Send + Sync {
    /// Stable identifier this handler is registered under (e.g. "campaign")
    fn id(&self) -> &str;

    /// One-line description of the handler's domain, used by the routing
    /// engine when it asks the inference gateway to classify a request.
    fn domain(&self) -> &str;

    /// Process a request.
    ///
    /// An `Err` here is a transport-level failure; the engine's dispatcher
    /// converts it into a degraded `HandlerResponse` so the orchestrator's
    /// callers always receive a response.
    async fn handle(&self, request: HandlerRequest) -> Result<HandlerResponse, EngineError>;
}
