//! Session Memory Store
//!
//! Per-session mutable record of message history, facts, preferences,
//! context, goals, and tasks. Exactly one memory record exists per session
//! id; records are created lazily on first reference and never deleted
//! implicitly (only the explicit `clear` operation resets one).
//!
//! Concurrency: the store hands out `Arc<Mutex<SessionMemory>>` handles, so
//! all access to one session is serialized while distinct sessions need no
//! coordination. Callers must not hold a session lock across slow external
//! calls; `build_context_snapshot` returns an owned projection precisely so
//! the lock can be released before the inference gateway is consulted.

pub mod extraction;

pub use extraction::MemoryExtractor;

use crate::llm::MessageRole;
use crate::tasks::{unix_now, Task};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One turn of conversation history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: MessageRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// A remembered fact about the guest or their situation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactEntry {
    pub value: serde_json::Value,
    /// Trust in the extracted value, in [0, 1]
    pub confidence: f64,
    /// Where the fact came from (e.g. "conversation", "crm_import")
    pub source: String,
    pub timestamp: i64,
}

/// A remembered preference (dietary, seating, contact channel, ...)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferenceEntry {
    pub value: serde_json::Value,
    pub confidence: f64,
    pub timestamp: i64,
}

/// Goal status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
    Active,
    Completed,
    Abandoned,
}

impl GoalStatus {
    pub fn as_str(&self) -> &str {
        match self {
            GoalStatus::Active => "active",
            GoalStatus::Completed => "completed",
            GoalStatus::Abandoned => "abandoned",
        }
    }
}

/// A user-level objective, possibly backed by decomposed tasks.
///
/// Goals are advisory: completing their tasks does not auto-complete the
/// goal. Closure is the explicit `complete_goal` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub description: String,
    pub status: GoalStatus,
    pub priority: i64,
}

/// Kind of a memory update, selecting its merge rule
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    Fact,
    Preference,
    Context,
    Goal,
}

impl UpdateKind {
    pub fn as_str(&self) -> &str {
        match self {
            UpdateKind::Fact => "fact",
            UpdateKind::Preference => "preference",
            UpdateKind::Context => "context",
            UpdateKind::Goal => "goal",
        }
    }

    /// Lenient parse for model-produced type strings
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fact" => Some(UpdateKind::Fact),
            "preference" => Some(UpdateKind::Preference),
            "context" => Some(UpdateKind::Context),
            "goal" => Some(UpdateKind::Goal),
            _ => None,
        }
    }
}

/// One update to apply to a session's memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryUpdate {
    pub kind: UpdateKind,
    pub key: String,
    pub value: serde_json::Value,
    pub confidence: f64,
    pub source: String,
    pub timestamp: i64,
}

impl MemoryUpdate {
    pub fn new(kind: UpdateKind, key: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            kind,
            key: key.into(),
            value,
            confidence: 1.0,
            source: "conversation".to_string(),
            timestamp: unix_now(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

/// Read-only projection of a session's memory for prompt context.
///
/// Owned data, detached from the store: holding one of these does not keep
/// any lock, and mutating it cannot affect stored state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub session_id: String,
    /// Most recent facts, newest first, capped at the requested N
    pub recent_facts: Vec<(String, serde_json::Value)>,
    /// All current preferences
    pub preferences: Vec<(String, serde_json::Value)>,
    /// Descriptions of goals still active
    pub active_goals: Vec<String>,
    /// Last N turns, oldest first, as (role, text)
    pub recent_turns: Vec<(String, String)>,
}

impl ContextSnapshot {
    /// JSON form attached to handler requests
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "session_id": self.session_id,
            "facts": self.recent_facts.iter().cloned().collect::<HashMap<_, _>>(),
            "preferences": self.preferences.iter().cloned().collect::<HashMap<_, _>>(),
            "active_goals": self.active_goals,
        })
    }

    /// Compact text form injected into inference prompts
    pub fn format_for_prompt(&self) -> String {
        let mut out = String::new();
        if !self.recent_facts.is_empty() {
            out.push_str("Known facts:\n");
            for (key, value) in &self.recent_facts {
                out.push_str(&format!("- {}: {}\n", key, value));
            }
        }
        if !self.preferences.is_empty() {
            out.push_str("Preferences:\n");
            for (key, value) in &self.preferences {
                out.push_str(&format!("- {}: {}\n", key, value));
            }
        }
        if !self.active_goals.is_empty() {
            out.push_str("Active goals:\n");
            for goal in &self.active_goals {
                out.push_str(&format!("- {}\n", goal));
            }
        }
        if !self.recent_turns.is_empty() {
            out.push_str("Recent conversation:\n");
            for (role, text) in &self.recent_turns {
                out.push_str(&format!("{}: {}\n", role, text));
            }
        }
        out
    }
}

/// Memory record for one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMemory {
    pub session_id: String,
    history: Vec<ChatTurn>,
    facts: HashMap<String, FactEntry>,
    preferences: HashMap<String, PreferenceEntry>,
    context: HashMap<String, serde_json::Value>,
    goals: Vec<Goal>,
    /// Tasks in insertion order; ids are unique within the session
    tasks: Vec<Task>,
}

impl SessionMemory {
    fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            history: Vec::new(),
            facts: HashMap::new(),
            preferences: HashMap::new(),
            context: HashMap::new(),
            goals: Vec::new(),
            tasks: Vec::new(),
        }
    }

    /// Append a turn to the message history
    pub fn record_turn(&mut self, role: MessageRole, text: impl Into<String>) {
        self.history.push(ChatTurn {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        });
    }

    /// Apply one update by its type-specific merge rule.
    ///
    /// Facts, preferences, and context overwrite by key (last write wins,
    /// no confidence merging). Goal updates always append a new goal, even
    /// when an identical description already exists.
    pub fn apply(&mut self, update: MemoryUpdate) {
        match update.kind {
            UpdateKind::Fact => {
                self.facts.insert(
                    update.key,
                    FactEntry {
                        value: update.value,
                        confidence: update.confidence,
                        source: update.source,
                        timestamp: update.timestamp,
                    },
                );
            }
            UpdateKind::Preference => {
                self.preferences.insert(
                    update.key,
                    PreferenceEntry {
                        value: update.value,
                        confidence: update.confidence,
                        timestamp: update.timestamp,
                    },
                );
            }
            UpdateKind::Context => {
                self.context.insert(update.key, update.value);
            }
            UpdateKind::Goal => {
                let description = update
                    .value
                    .as_str()
                    .map(String::from)
                    .unwrap_or_else(|| update.value.to_string());
                self.goals.push(Goal {
                    description,
                    status: GoalStatus::Active,
                    priority: 1,
                });
            }
        }
    }

    /// Reset history, facts, preferences, context, and goals to empty.
    /// Tasks are not part of the clear contract and survive.
    pub fn clear(&mut self) {
        self.history.clear();
        self.facts.clear();
        self.preferences.clear();
        self.context.clear();
        self.goals.clear();
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    pub fn fact(&self, key: &str) -> Option<&FactEntry> {
        self.facts.get(key)
    }

    pub fn preference(&self, key: &str) -> Option<&PreferenceEntry> {
        self.preferences.get(key)
    }

    pub fn context_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.context.get(key)
    }

    pub fn goals(&self) -> &[Goal] {
        &self.goals
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Insert tasks, preserving insertion order. A task whose id already
    /// exists in this session is skipped.
    pub fn insert_tasks(&mut self, tasks: Vec<Task>) {
        for task in tasks {
            if self.task(&task.id).is_none() {
                self.tasks.push(task);
            } else {
                tracing::warn!("Duplicate task id {} ignored", task.id);
            }
        }
    }

    /// Explicitly close the first active goal with the given description.
    /// Returns false when no such goal exists.
    pub fn complete_goal(&mut self, description: &str) -> bool {
        for goal in self.goals.iter_mut() {
            if goal.status == GoalStatus::Active && goal.description == description {
                goal.status = GoalStatus::Completed;
                return true;
            }
        }
        false
    }

    /// Build the read-only projection used as prompt context
    pub fn snapshot(&self, recent_n: usize) -> ContextSnapshot {
        let mut facts: Vec<(&String, &FactEntry)> = self.facts.iter().collect();
        facts.sort_by(|a, b| b.1.timestamp.cmp(&a.1.timestamp));

        ContextSnapshot {
            session_id: self.session_id.clone(),
            recent_facts: facts
                .into_iter()
                .take(recent_n)
                .map(|(k, v)| (k.clone(), v.value.clone()))
                .collect(),
            preferences: self
                .preferences
                .iter()
                .map(|(k, v)| (k.clone(), v.value.clone()))
                .collect(),
            active_goals: self
                .goals
                .iter()
                .filter(|g| g.status == GoalStatus::Active)
                .map(|g| g.description.clone())
                .collect(),
            recent_turns: self
                .history
                .iter()
                .rev()
                .take(recent_n)
                .rev()
                .map(|t| (t.role.to_string(), t.text.clone()))
                .collect(),
        }
    }
}

/// Process-wide store of session memories.
///
/// A concurrent keyed map with per-key locking: the outer lock guards only
/// the map itself, each session's record has its own lock. Swapping in an
/// external backing store means reimplementing this type, not its callers.
#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<String, Arc<Mutex<SessionMemory>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Get the memory handle for a session, creating it lazily.
    /// Repeated calls with the same id return a handle to the same record.
    pub async fn get_or_create(&self, session_id: &str) -> Arc<Mutex<SessionMemory>> {
        let mut sessions = self.sessions.lock().await;
        Arc::clone(
            sessions
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(SessionMemory::new(session_id)))),
        )
    }

    /// Apply a batch of updates under the session lock
    pub async fn apply_updates(&self, session_id: &str, updates: Vec<MemoryUpdate>) {
        if updates.is_empty() {
            return;
        }
        let handle = self.get_or_create(session_id).await;
        let mut memory = handle.lock().await;
        for update in updates {
            memory.apply(update);
        }
    }

    /// Reset a session's memory. Atomic under the session lock: concurrent
    /// readers see either the full record or the empty one, never a
    /// half-cleared state.
    pub async fn clear(&self, session_id: &str) {
        let handle = self.get_or_create(session_id).await;
        handle.lock().await.clear();
    }

    /// Build an owned context projection for prompt assembly
    pub async fn build_context_snapshot(
        &self,
        session_id: &str,
        recent_n: usize,
    ) -> ContextSnapshot {
        let handle = self.get_or_create(session_id).await;
        let memory = handle.lock().await;
        memory.snapshot(recent_n)
    }

    /// Append a conversation turn
    pub async fn record_turn(&self, session_id: &str, role: MessageRole, text: &str) {
        let handle = self.get_or_create(session_id).await;
        handle.lock().await.record_turn(role, text);
    }

    /// Insert decomposed tasks into the session's task graph
    pub async fn insert_tasks(&self, session_id: &str, tasks: Vec<Task>) {
        let handle = self.get_or_create(session_id).await;
        handle.lock().await.insert_tasks(tasks);
    }

    /// Explicit goal closure (see module docs: never inferred from tasks)
    pub async fn complete_goal(&self, session_id: &str, description: &str) -> bool {
        let handle = self.get_or_create(session_id).await;
        let result = handle.lock().await.complete_goal(description);
        result
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let store = MemoryStore::new();
        let a = store.get_or_create("s1").await;
        let b = store.get_or_create("s1").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.session_count().await, 1);

        let c = store.get_or_create("s2").await;
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(store.session_count().await, 2);
    }

    #[tokio::test]
    async fn test_facts_last_write_wins() {
        let store = MemoryStore::new();
        store
            .apply_updates(
                "s1",
                vec![
                    MemoryUpdate::new(UpdateKind::Fact, "party_size", json!(2)).with_confidence(0.9),
                    MemoryUpdate::new(UpdateKind::Fact, "party_size", json!(6)).with_confidence(0.4),
                ],
            )
            .await;

        let handle = store.get_or_create("s1").await;
        let memory = handle.lock().await;
        let stored = memory.fact("party_size").unwrap();
        // Last write wins outright; confidences are not merged
        assert_eq!(stored.value, json!(6));
        assert_eq!(stored.confidence, 0.4);
    }

    #[tokio::test]
    async fn test_goal_updates_always_append() {
        let store = MemoryStore::new();
        let update = MemoryUpdate::new(UpdateKind::Goal, "goal", json!("grow weekday lunch traffic"));
        store.apply_updates("s1", vec![update.clone()]).await;
        store.apply_updates("s1", vec![update]).await;

        let handle = store.get_or_create("s1").await;
        let memory = handle.lock().await;
        // Duplicates permitted; goals are never merged by description
        assert_eq!(memory.goals().len(), 2);
        assert!(memory
            .goals()
            .iter()
            .all(|g| g.status == GoalStatus::Active));
    }

    #[tokio::test]
    async fn test_clear_resets_everything_but_tasks() {
        let store = MemoryStore::new();
        store
            .apply_updates(
                "s1",
                vec![
                    MemoryUpdate::new(UpdateKind::Fact, "name", json!("Dana")),
                    MemoryUpdate::new(UpdateKind::Preference, "seating", json!("patio")),
                    MemoryUpdate::new(UpdateKind::Context, "topic", json!("reservations")),
                    MemoryUpdate::new(UpdateKind::Goal, "goal", json!("book a table")),
                ],
            )
            .await;
        store
            .record_turn("s1", MessageRole::User, "hello")
            .await;
        store
            .insert_tasks(
                "s1",
                vec![crate::tasks::Task::new(
                    "t1",
                    crate::tasks::TaskKind::Action,
                    "do it",
                    1,
                    vec![],
                    "concierge",
                )],
            )
            .await;

        store.clear("s1").await;

        let handle = store.get_or_create("s1").await;
        let memory = handle.lock().await;
        assert!(memory.history().is_empty());
        assert!(memory.fact("name").is_none());
        assert!(memory.preference("seating").is_none());
        assert!(memory.context_value("topic").is_none());
        assert!(memory.goals().is_empty());
        assert_eq!(memory.tasks().len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_projects_recent_state() {
        let store = MemoryStore::new();
        store
            .apply_updates(
                "s1",
                vec![
                    MemoryUpdate::new(UpdateKind::Preference, "dietary", json!("vegetarian")),
                    MemoryUpdate::new(UpdateKind::Preference, "spice_level", json!("spicy")),
                    MemoryUpdate::new(UpdateKind::Goal, "goal", json!("plan anniversary dinner")),
                ],
            )
            .await;
        store
            .record_turn("s1", MessageRole::User, "I am vegetarian and like spicy food")
            .await;
        store
            .record_turn("s1", MessageRole::Assistant, "Noted!")
            .await;

        let snapshot = store.build_context_snapshot("s1", 5).await;
        assert_eq!(snapshot.session_id, "s1");
        assert_eq!(snapshot.preferences.len(), 2);
        assert_eq!(snapshot.active_goals, vec!["plan anniversary dinner"]);
        assert_eq!(snapshot.recent_turns.len(), 2);
        assert_eq!(snapshot.recent_turns[0].0, "user");

        let prompt = snapshot.format_for_prompt();
        assert!(prompt.contains("dietary"));
        assert!(prompt.contains("Active goals"));
    }

    #[tokio::test]
    async fn test_snapshot_caps_facts_at_recent_n() {
        let store = MemoryStore::new();
        let updates = (0..20i64)
            .map(|i| {
                let mut u =
                    MemoryUpdate::new(UpdateKind::Fact, format!("fact_{}", i), json!(i));
                // Monotonic event times so recency ordering is deterministic
                u.timestamp = 1_000 + i;
                u
            })
            .collect();
        store.apply_updates("s1", updates).await;

        let snapshot = store.build_context_snapshot("s1", 5).await;
        assert_eq!(snapshot.recent_facts.len(), 5);
        // Newest first
        assert_eq!(snapshot.recent_facts[0].0, "fact_19");
    }

    #[tokio::test]
    async fn test_insert_tasks_skips_duplicate_ids() {
        let store = MemoryStore::new();
        let make = |id: &str| {
            crate::tasks::Task::new(
                id,
                crate::tasks::TaskKind::Action,
                "x",
                1,
                vec![],
                "concierge",
            )
        };
        store.insert_tasks("s1", vec![make("t1"), make("t2")]).await;
        store.insert_tasks("s1", vec![make("t1"), make("t3")]).await;

        let handle = store.get_or_create("s1").await;
        let memory = handle.lock().await;
        assert_eq!(memory.tasks().len(), 3);
    }

    #[tokio::test]
    async fn test_complete_goal_is_explicit() {
        let store = MemoryStore::new();
        store
            .apply_updates(
                "s1",
                vec![MemoryUpdate::new(UpdateKind::Goal, "goal", json!("hire a pastry chef"))],
            )
            .await;

        assert!(store.complete_goal("s1", "hire a pastry chef").await);
        assert!(!store.complete_goal("s1", "hire a pastry chef").await);
        assert!(!store.complete_goal("s1", "never existed").await);
    }
}
