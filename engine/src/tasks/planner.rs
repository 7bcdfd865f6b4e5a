//! Goal Decomposition Planner
//!
//! Interacts with the inference gateway to expand a complex goal into a
//! dependency-tagged set of tasks. On any gateway or parse failure the
//! planner returns a single fallback task assigned to the default handler,
//! so the caller can always make forward progress.

use crate::llm::router::LLMRouter;
use crate::llm::{extract_json_array, Message};
use crate::memory::ContextSnapshot;
use crate::routing::{is_known_handler, DEFAULT_HANDLER, KNOWN_HANDLERS};
use crate::tasks::{Task, TaskKind};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Upper bound on tasks accepted from one decomposition
const MAX_TASKS: usize = 7;

/// Intermediate deserialization type for model-produced task descriptors
#[derive(Debug, Deserialize)]
struct RawTaskSpec {
    id: Option<String>,
    kind: Option<String>,
    description: String,
    priority: Option<i64>,
    #[serde(default)]
    dependencies: Vec<String>,
    handler: Option<String>,
}

pub struct GoalPlanner {
    gateway: Arc<LLMRouter>,
}

impl GoalPlanner {
    pub fn new(gateway: Arc<LLMRouter>) -> Self {
        Self { gateway }
    }

    /// Decompose a goal into tasks. Never fails; never returns an empty set.
    pub async fn decompose(&self, goal: &str, snapshot: &ContextSnapshot) -> Vec<Task> {
        let mut capabilities = String::new();
        for profile in KNOWN_HANDLERS {
            capabilities.push_str(&format!("- \"{}\": {}\n", profile.id, profile.domain));
        }

        let system = Message::system(format!(
            "You break a restaurant operator's goal into 3-7 discrete tasks.\n\
            Available handlers:\n{}\n\
            Output ONLY a JSON array. Each task object must have:\n\
            - \"id\": short id like \"task_1\"\n\
            - \"kind\": one of \"research\", \"action\", \"analysis\", \"communication\"\n\
            - \"description\": what to do\n\
            - \"priority\": integer, higher = more urgent\n\
            - \"dependencies\": array of earlier task ids this depends on\n\
            - \"handler\": id of the handler that should run it\n\n\
            Output ONLY the JSON array, no markdown, no explanation.",
            capabilities
        ));

        let context = snapshot.format_for_prompt();
        let user = if context.is_empty() {
            Message::user(goal.to_string())
        } else {
            Message::user(format!("Context:\n{}\nGoal: {}", context, goal))
        };

        match self.gateway.call(&[system, user]).await {
            Ok((content, _provider)) => match Self::parse_tasks(&content) {
                Some(tasks) => tasks,
                None => {
                    tracing::warn!("Failed to parse decomposition output, using fallback task");
                    Self::fallback_tasks(goal)
                }
            },
            Err(e) => {
                tracing::warn!("Decomposition unavailable ({}), using fallback task", e);
                Self::fallback_tasks(goal)
            }
        }
    }

    /// Parse model output into tasks.
    ///
    /// Descriptor ids are namespaced with a per-decomposition batch tag so
    /// ids stay unique across a session's goals. A dependency may only
    /// reference an earlier descriptor in the same array; self-references,
    /// forward references, and unknown ids are dropped, which also makes
    /// cycles unrepresentable.
    fn parse_tasks(content: &str) -> Option<Vec<Task>> {
        let array = extract_json_array(content)?;
        let raw_specs: Vec<RawTaskSpec> = serde_json::from_value(array).ok()?;
        if raw_specs.is_empty() {
            return None;
        }

        if raw_specs.len() > MAX_TASKS {
            tracing::warn!(
                "Decomposition produced {} tasks, keeping the first {}",
                raw_specs.len(),
                MAX_TASKS
            );
        }

        let batch = uuid::Uuid::new_v4().simple().to_string();
        let batch_tag = &batch[..8];

        let mut id_map: HashMap<String, String> = HashMap::new();
        let mut tasks = Vec::new();

        for (i, raw) in raw_specs.into_iter().take(MAX_TASKS).enumerate() {
            if raw.description.trim().is_empty() {
                continue;
            }

            let raw_id = raw.id.unwrap_or_else(|| format!("task_{}", i + 1));
            let task_id = format!("{}-{}", batch_tag, raw_id);

            let dependencies: Vec<String> = raw
                .dependencies
                .iter()
                .filter_map(|dep| id_map.get(dep).cloned())
                .collect();

            let handler = match raw.handler {
                Some(h) if is_known_handler(&h) => h,
                _ => DEFAULT_HANDLER.to_string(),
            };

            id_map.insert(raw_id, task_id.clone());

            tasks.push(Task::new(
                task_id,
                TaskKind::parse(raw.kind.as_deref().unwrap_or("action")),
                raw.description,
                raw.priority.unwrap_or(1),
                dependencies,
                handler,
            ));
        }

        if tasks.is_empty() {
            None
        } else {
            Some(tasks)
        }
    }

    /// Single-task fallback so the goal can always make forward progress
    fn fallback_tasks(goal: &str) -> Vec<Task> {
        let batch = uuid::Uuid::new_v4().simple().to_string();
        vec![Task::new(
            format!("{}-task_1", &batch[..8]),
            TaskKind::Action,
            goal,
            1,
            vec![],
            DEFAULT_HANDLER,
        )]
    }
}
