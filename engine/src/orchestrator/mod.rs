//! Request Orchestrator
//!
//! Coordinates the per-message data flow: build a memory snapshot, route,
//! dispatch, extract memory updates, log. Complex goals divert into
//! decomposition instead of a single dispatch.
//!
//! Lock discipline: the session lock is held only while reading or writing
//! memory. Snapshots are taken (and the lock released) before any inference
//! or handler call, and updates reacquire the lock afterwards.

use crate::db::conversations::{ConversationLog, NewConversation};
use crate::dispatch::Dispatcher;
use crate::llm::MessageRole;
use crate::memory::{MemoryExtractor, MemoryStore, MemoryUpdate, UpdateKind};
use crate::routing::RoutingEngine;
use crate::tasks::{GoalPlanner, GoalRunSummary, QueuedTask, TaskExecutor, TaskQueue};
use sdk::types::HandlerRequest;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

/// Phrases that mark a message as a complex goal rather than a request a
/// single handler can answer. Deterministic on purpose: goal detection must
/// not depend on the inference gateway being up.
const GOAL_MARKERS: &[&str] = &[
    "set up",
    "plan ",
    "organize",
    "launch",
    "build out",
    "onboarding",
    "end to end",
    "step by step",
    "and then",
];

/// True when a message should go through goal decomposition
pub fn looks_complex(message: &str) -> bool {
    let lowered = message.to_lowercase();
    GOAL_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// What the orchestrator returns for every processed message
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorResponse {
    pub handler: String,
    pub response: String,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    pub needs_human_handoff: bool,
    /// Tasks spawned when the message was treated as a complex goal
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub spawned_tasks: Vec<String>,
}

pub struct Orchestrator {
    store: Arc<MemoryStore>,
    routing: RoutingEngine,
    planner: GoalPlanner,
    executor: TaskExecutor,
    dispatcher: Arc<Dispatcher>,
    extractor: MemoryExtractor,
    conversations: ConversationLog,
    queue: Arc<TaskQueue>,
    recent_n: usize,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<MemoryStore>,
        routing: RoutingEngine,
        planner: GoalPlanner,
        executor: TaskExecutor,
        dispatcher: Arc<Dispatcher>,
        extractor: MemoryExtractor,
        conversations: ConversationLog,
        queue: Arc<TaskQueue>,
        recent_n: usize,
    ) -> Self {
        Self {
            store,
            routing,
            planner,
            executor,
            dispatcher,
            extractor,
            conversations,
            queue,
            recent_n,
        }
    }

    /// Process one inbound message. Always returns a response: routing,
    /// dispatch, and extraction all degrade instead of failing.
    pub async fn process_message(&self, session_id: &str, message: &str) -> OrchestratorResponse {
        let snapshot = self
            .store
            .build_context_snapshot(session_id, self.recent_n)
            .await;
        self.store
            .record_turn(session_id, MessageRole::User, message)
            .await;

        let response = if looks_complex(message) {
            self.pursue_goal(session_id, message).await
        } else {
            let decision = self.routing.route(message, &snapshot).await;
            tracing::info!(
                "Routed session {} to {} (confidence {:.2})",
                session_id,
                decision.handler,
                decision.confidence
            );

            let request =
                HandlerRequest::new(session_id, message).with_context(snapshot.to_json());
            let handler_response = self.dispatcher.dispatch(&decision.handler, request).await;

            OrchestratorResponse {
                handler: decision.handler,
                response: handler_response.response,
                confidence: handler_response.confidence.min(decision.confidence),
                intent: handler_response.intent,
                needs_human_handoff: handler_response.needs_human_handoff,
                spawned_tasks: Vec::new(),
            }
        };

        // Extraction degrades to no updates; memory never blocks the reply
        let updates = self
            .extractor
            .extract_updates(message, &response.response, &snapshot)
            .await;
        if !updates.is_empty() {
            tracing::debug!(
                "Extracted {} memory updates for session {}",
                updates.len(),
                session_id
            );
            self.store.apply_updates(session_id, updates).await;
        }

        self.store
            .record_turn(session_id, MessageRole::Assistant, &response.response)
            .await;

        // Conversation logging is optional; a failed write must not fail
        // the request
        if let Err(e) = self
            .conversations
            .log(&NewConversation {
                session_id: session_id.to_string(),
                channel_identifier: None,
                user_message: message.to_string(),
                handler_response: response.response.clone(),
                intent: response.intent.clone(),
                confidence: response.confidence,
            })
            .await
        {
            tracing::warn!("Failed to log conversation: {}", e);
        }

        response
    }

    /// Decompose a goal into tasks, record them, and execute at most one
    /// ready task (the documented minimal policy; `drain_goal` runs the
    /// rest).
    pub async fn pursue_goal(&self, session_id: &str, goal: &str) -> OrchestratorResponse {
        let snapshot = self
            .store
            .build_context_snapshot(session_id, self.recent_n)
            .await;

        self.store
            .apply_updates(
                session_id,
                vec![MemoryUpdate::new(UpdateKind::Goal, "goal", json!(goal))
                    .with_source("goal_decomposition")],
            )
            .await;

        let tasks = self.planner.decompose(goal, &snapshot).await;
        let task_ids: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
        tracing::info!(
            "Decomposed goal into {} tasks for session {}",
            tasks.len(),
            session_id
        );

        for task in &tasks {
            self.queue
                .push(QueuedTask {
                    session_id: session_id.to_string(),
                    task_id: task.id.clone(),
                    description: task.description.clone(),
                })
                .await;
        }
        self.store.insert_tasks(session_id, tasks).await;

        let first_outcome = self.executor.execute_next(session_id).await;

        let summary = match &first_outcome {
            Some(outcome) if outcome.success => format!(
                "I've broken that into {} tasks and completed the first one: {}",
                task_ids.len(),
                outcome.response
            ),
            Some(_) => format!(
                "I've broken that into {} tasks; the first one failed and may need attention.",
                task_ids.len()
            ),
            None => format!(
                "I've broken that into {} tasks; none are ready to run yet.",
                task_ids.len()
            ),
        };

        OrchestratorResponse {
            handler: "planner".to_string(),
            response: summary,
            confidence: 0.8,
            intent: Some("complex_goal".to_string()),
            needs_human_handoff: first_outcome.map(|o| !o.success).unwrap_or(false),
            spawned_tasks: task_ids,
        }
    }

    /// Drain the session's remaining ready tasks (see
    /// `TaskExecutor::run_goal`)
    pub async fn drain_goal(&self, session_id: &str) -> GoalRunSummary {
        self.executor.run_goal(session_id).await
    }

    /// Explicitly close a goal; never inferred from task completion
    pub async fn complete_goal(&self, session_id: &str, description: &str) -> bool {
        self.store.complete_goal(session_id, description).await
    }

    /// Reset a session's memory
    pub async fn clear_session(&self, session_id: &str) {
        self.store.clear(session_id).await;
    }
}
