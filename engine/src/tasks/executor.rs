//! Task Executor
//!
//! Runs ready tasks from a session's task graph by dispatching each to its
//! assigned handler. The documented minimal policy executes at most one
//! ready task per `execute_next` call; `run_goal` layers the drain loop on
//! top, pulling ready tasks until none remain or failures block further
//! progress, and publishing lifecycle events along the way.
//!
//! Failure policy: the executor never retries and never rolls back
//! dependents. A failed task stays `failed` and everything depending on it
//! stays `pending` until the goal is retried by hand.

use crate::dispatch::Dispatcher;
use crate::events::{Event, ProgressBus};
use crate::memory::MemoryStore;
use crate::tasks::{Task, TaskStatus};
use sdk::types::HandlerRequest;
use serde_json::json;
use std::sync::Arc;

/// Pick the task to run next, if any.
///
/// A task is ready iff every entry in its dependency set is `completed`
/// (a dependency id that does not exist can never complete, so its
/// dependents never become ready). Among ready tasks the highest priority
/// wins; ties go to the first encountered in insertion order.
pub fn select_ready_task(tasks: &[Task]) -> Option<&Task> {
    let is_completed = |id: &str| {
        tasks
            .iter()
            .any(|t| t.id == id && t.status == TaskStatus::Completed)
    };

    let mut best: Option<&Task> = None;
    for task in tasks {
        if task.status != TaskStatus::Pending {
            continue;
        }
        if !task.dependencies.iter().all(|dep| is_completed(dep)) {
            continue;
        }
        match best {
            Some(current) if task.priority <= current.priority => {}
            _ => best = Some(task),
        }
    }
    best
}

/// Result of executing one task
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_id: String,
    pub success: bool,
    pub response: String,
}

/// Tally of one `run_goal` drain
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct GoalRunSummary {
    pub completed: usize,
    pub failed: usize,
    /// Tasks left pending because a dependency failed
    pub blocked: usize,
}

pub struct TaskExecutor {
    store: Arc<MemoryStore>,
    dispatcher: Arc<Dispatcher>,
    bus: Arc<ProgressBus>,
}

impl TaskExecutor {
    pub fn new(store: Arc<MemoryStore>, dispatcher: Arc<Dispatcher>, bus: Arc<ProgressBus>) -> Self {
        Self {
            store,
            dispatcher,
            bus,
        }
    }

    /// Execute at most one ready task for the session.
    ///
    /// Returns `None` when no task is ready. The session lock is held only
    /// while reading/updating the graph, never across the dispatch call.
    pub async fn execute_next(&self, session_id: &str) -> Option<TaskOutcome> {
        let handle = self.store.get_or_create(session_id).await;

        // Claim a ready task under the lock
        let (task_id, description, handler) = {
            let mut memory = handle.lock().await;
            let task = select_ready_task(memory.tasks())?;
            let claim = (
                task.id.clone(),
                task.description.clone(),
                task.handler.clone(),
            );
            if let Some(task) = memory.task_mut(&claim.0) {
                task.set_status(TaskStatus::InProgress);
            }
            claim
        };

        tracing::info!("Executing task {} via handler {}", task_id, handler);
        self.bus
            .publish(Event::TaskStarted {
                session_id: session_id.to_string(),
                task_id: task_id.clone(),
                description: description.clone(),
            })
            .await;

        let request = HandlerRequest::new(session_id, description);
        let response = self.dispatcher.dispatch(&handler, request).await;

        // Record the outcome under the lock
        {
            let mut memory = handle.lock().await;
            if let Some(task) = memory.task_mut(&task_id) {
                if response.success {
                    task.result = Some(json!({
                        "response": response.response,
                        "confidence": response.confidence,
                    }));
                    task.set_status(TaskStatus::Completed);
                } else {
                    task.result = Some(json!({
                        "error": response.error,
                    }));
                    task.set_status(TaskStatus::Failed);
                }
            }
        }

        if response.success {
            self.bus
                .publish(Event::TaskCompleted {
                    session_id: session_id.to_string(),
                    task_id: task_id.clone(),
                })
                .await;
        } else {
            self.bus
                .publish(Event::TaskFailed {
                    session_id: session_id.to_string(),
                    task_id: task_id.clone(),
                    error: response.error.clone().unwrap_or_default(),
                })
                .await;
        }

        Some(TaskOutcome {
            task_id,
            success: response.success,
            response: response.response,
        })
    }

    /// Drain the session's task graph: repeatedly execute ready tasks until
    /// none remain. Failed tasks do not stop the drain; they only leave
    /// their dependents blocked.
    pub async fn run_goal(&self, session_id: &str) -> GoalRunSummary {
        let mut summary = GoalRunSummary::default();

        while let Some(outcome) = self.execute_next(session_id).await {
            if outcome.success {
                summary.completed += 1;
            } else {
                summary.failed += 1;
            }
        }

        // Count what a failed dependency left stranded
        let handle = self.store.get_or_create(session_id).await;
        let memory = handle.lock().await;
        summary.blocked = memory
            .tasks()
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .count();

        summary
    }
}
