//! Error types and handling
//!
//! This module provides the error types used throughout the Maitre engine.
//! All errors implement the `MaitreErrorExt` trait which provides
//! user-friendly hints and indicates whether errors are recoverable.
//!
//! The split matters operationally: inference and transport failures always
//! have a documented fallback and must never surface as a crash, while an
//! out-of-order workflow call is a programming-contract violation and must.

use thiserror::Error;

/// Trait for Maitre error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait MaitreErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and does not contain
    /// secrets, file paths, or internal implementation details.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors have a fallback path the orchestrator takes
    /// automatically. Non-recoverable errors indicate a contract violation
    /// or missing state that requires caller intervention.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: Invalid or missing configuration
/// - **Database**: SQLite operation failures (logged and swallowed where the
///   contract says conversational continuity must not depend on them)
/// - **Inference**: gateway failures, always recoverable via a named fallback
/// - **Dispatch**: handler lookup/transport failures, converted to degraded
///   responses carrying a human-handoff flag
/// - **Workflow**: out-of-order state machine calls, hard errors
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(String),

    // Inference gateway errors
    #[error("Inference error: {0}")]
    Inference(String),

    #[error("All inference providers exhausted")]
    AllProvidersExhausted,

    // Dispatch errors
    #[error("Unknown handler: {0}")]
    UnknownHandler(String),

    #[error("Handler dispatch failed: {0}")]
    Dispatch(String),

    #[error("Handler call timed out")]
    DispatchTimeout,

    // Campaign workflow errors
    #[error("Workflow step {step} called out of order: {reason}")]
    WorkflowOrder { step: String, reason: String },

    #[error("Campaign not found: {0}")]
    CampaignNotFound(String),

    #[error("Campaign {0} is not awaiting approval")]
    NotAwaitingApproval(String),

    // Messaging errors
    #[error("Messaging error: {0}")]
    Messaging(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MaitreErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",

            Self::Database(_) => "Database operation failed. Check the data directory",

            Self::Inference(_) => "Inference provider unavailable. Check your API keys and network",
            Self::AllProvidersExhausted => "No inference providers available. Check configuration",

            Self::UnknownHandler(_) => "The requested handler is not registered",
            Self::Dispatch(_) => "Handler failed. The request was answered in degraded mode",
            Self::DispatchTimeout => "Handler took too long to respond. Try again",

            Self::WorkflowOrder { .. } => {
                "Campaign steps must run in order. This is a caller bug, not a data problem"
            }
            Self::CampaignNotFound(_) => "No campaign with that id exists",
            Self::NotAwaitingApproval(_) => "Only campaigns paused at the approval gate can be approved",

            Self::Messaging(_) => "Message delivery failed. Check the messaging gateway",

            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Contract violations and missing state require caller intervention
            Self::WorkflowOrder { .. }
            | Self::CampaignNotFound(_)
            | Self::NotAwaitingApproval(_)
            | Self::AllProvidersExhausted => false,

            // All other errors have a documented fallback or retry path
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_order_is_hard_error() {
        let err = EngineError::WorkflowOrder {
            step: "generate_content".to_string(),
            reason: "no customer analysis".to_string(),
        };
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("generate_content"));
    }

    #[test]
    fn test_inference_errors_are_recoverable() {
        let err = EngineError::Inference("timeout".to_string());
        assert!(err.is_recoverable());

        let err = EngineError::Dispatch("connection refused".to_string());
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_user_hints_have_no_internals() {
        let err = EngineError::Database("sqlite: table campaigns has no column x".to_string());
        assert!(!err.user_hint().contains("sqlite"));
    }
}
