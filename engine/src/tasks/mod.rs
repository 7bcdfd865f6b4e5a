//! Task model and task graph types
//!
//! A task is a unit of work with a handler assignment, a priority, and a
//! dependency set. Tasks are produced by goal decomposition, owned by the
//! session that asked for the goal, and executed through the dispatch layer.

pub mod executor;
pub mod planner;

pub use executor::{select_ready_task, GoalRunSummary, TaskExecutor, TaskOutcome};
pub use planner::GoalPlanner;

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

/// Task kind enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Research,
    Action,
    Analysis,
    Communication,
}

impl TaskKind {
    pub fn as_str(&self) -> &str {
        match self {
            TaskKind::Research => "research",
            TaskKind::Action => "action",
            TaskKind::Analysis => "analysis",
            TaskKind::Communication => "communication",
        }
    }

    /// Lenient parse for model-produced kind strings; unknown kinds become
    /// `Action` so a sloppy decomposition still yields runnable tasks.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "research" => TaskKind::Research,
            "analysis" => TaskKind::Analysis,
            "communication" => TaskKind::Communication,
            _ => TaskKind::Action,
        }
    }
}

/// Task status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

/// A unit of work owned by a session's goal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique within the owning session
    pub id: String,

    pub kind: TaskKind,

    pub description: String,

    pub status: TaskStatus,

    /// Higher = more urgent; ties broken by insertion order
    pub priority: i64,

    /// Task ids that must all be `completed` before this task may run
    pub dependencies: Vec<String>,

    /// Handler this task is dispatched to
    pub handler: String,

    /// Result payload once the task has completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    pub created_at: i64,
    pub updated_at: i64,
}

impl Task {
    /// Create a new pending task
    pub fn new(
        id: impl Into<String>,
        kind: TaskKind,
        description: impl Into<String>,
        priority: i64,
        dependencies: Vec<String>,
        handler: impl Into<String>,
    ) -> Self {
        let now = unix_now();
        Self {
            id: id.into(),
            kind,
            description: description.into(),
            status: TaskStatus::Pending,
            priority,
            dependencies,
            handler: handler.into(),
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = unix_now();
    }
}

/// Current unix timestamp in seconds
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Entry on the process-wide task queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTask {
    pub session_id: String,
    pub task_id: String,
    pub description: String,
}

/// Process-wide FIFO of decomposed tasks.
///
/// The queue records tasks in decomposition order and exists for
/// inspection/status only; execution ordering comes from the per-session
/// task graph, never from this queue.
#[derive(Default)]
pub struct TaskQueue {
    inner: Mutex<VecDeque<QueuedTask>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn push(&self, entry: QueuedTask) {
        self.inner.lock().await.push_back(entry);
    }

    /// A point-in-time copy of the queue contents, oldest first
    pub async fn snapshot(&self) -> Vec<QueuedTask> {
        self.inner.lock().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}
