//! Integration tests for the memory store and extraction pipeline

use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use maitre_engine::config::LLMConfig;
use maitre_engine::llm::{router::LLMRouter, LLMError, LLMProvider, Message};
use maitre_engine::memory::{MemoryExtractor, MemoryStore, MemoryUpdate, UpdateKind};

/// Provider that replays a fixed sequence of responses
struct ScriptedProvider {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
        }
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn is_local(&self) -> bool {
        true
    }

    fn estimated_cost(&self, _tokens: usize) -> f64 {
        0.0
    }

    async fn generate(&self, _messages: &[Message]) -> Result<String, LLMError> {
        self.responses
            .lock()
            .expect("scripted provider lock")
            .pop_front()
            .ok_or_else(|| LLMError::ProviderUnavailable("script exhausted".to_string()))
    }
}

fn scripted_gateway(responses: Vec<&str>) -> Arc<LLMRouter> {
    let provider = Box::new(ScriptedProvider::new(responses)) as Box<dyn LLMProvider>;
    Arc::new(LLMRouter::new(
        vec![provider],
        Arc::new(LLMConfig::default()),
    ))
}

#[tokio::test]
async fn test_dietary_preferences_flow_into_snapshot() {
    // Scenario: "I am vegetarian and like spicy food" yields a dietary
    // preference and a spice-level preference; both show up in the next
    // context snapshot.
    let gateway = scripted_gateway(vec![
        r#"[
            {"type": "preference", "key": "dietary_restriction", "value": "vegetarian", "confidence": 0.95, "source": "conversation"},
            {"type": "preference", "key": "spice_level", "value": "spicy", "confidence": 0.9, "source": "conversation"}
        ]"#,
    ]);

    let store = MemoryStore::new();
    let extractor = MemoryExtractor::new(gateway);

    let snapshot_before = store.build_context_snapshot("s1", 10).await;
    let updates = extractor
        .extract_updates(
            "I am vegetarian and like spicy food",
            "Noted! I'll remember that.",
            &snapshot_before,
        )
        .await;

    assert_eq!(updates.len(), 2);
    assert!(updates.iter().any(|u| u.key.contains("dietary")));
    store.apply_updates("s1", updates).await;

    let snapshot = store.build_context_snapshot("s1", 10).await;
    let keys: Vec<&str> = snapshot
        .preferences
        .iter()
        .map(|(k, _)| k.as_str())
        .collect();
    assert!(keys.contains(&"dietary_restriction"));
    assert!(keys.contains(&"spice_level"));
}

#[tokio::test]
async fn test_extraction_failure_degrades_silently() {
    // Script exhausted on first call: the gateway errors, extraction
    // returns no updates, nothing panics.
    let gateway = scripted_gateway(vec![]);
    let store = MemoryStore::new();
    let extractor = MemoryExtractor::new(gateway);

    let snapshot = store.build_context_snapshot("s1", 10).await;
    let updates = extractor
        .extract_updates("hello", "hi there", &snapshot)
        .await;

    assert!(updates.is_empty());
}

#[tokio::test]
async fn test_last_write_wins_independent_of_other_keys() {
    let store = MemoryStore::new();

    // Interleave writes to different keys; the last write per key wins
    // regardless of ordering between keys.
    store
        .apply_updates(
            "s1",
            vec![
                MemoryUpdate::new(UpdateKind::Fact, "a", json!(1)),
                MemoryUpdate::new(UpdateKind::Fact, "b", json!(10)),
                MemoryUpdate::new(UpdateKind::Fact, "a", json!(2)),
                MemoryUpdate::new(UpdateKind::Preference, "c", json!("x")),
                MemoryUpdate::new(UpdateKind::Fact, "b", json!(20)),
                MemoryUpdate::new(UpdateKind::Preference, "c", json!("y")),
            ],
        )
        .await;

    let handle = store.get_or_create("s1").await;
    let memory = handle.lock().await;
    assert_eq!(memory.fact("a").unwrap().value, json!(2));
    assert_eq!(memory.fact("b").unwrap().value, json!(20));
    assert_eq!(memory.preference("c").unwrap().value, json!("y"));
}

#[tokio::test]
async fn test_concurrent_sessions_are_isolated() {
    let store = Arc::new(MemoryStore::new());

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let session = format!("session-{}", i);
            for j in 0..20 {
                store
                    .apply_updates(
                        &session,
                        vec![MemoryUpdate::new(
                            UpdateKind::Fact,
                            "counter",
                            json!(j),
                        )],
                    )
                    .await;
            }
        }));
    }
    for handle in handles {
        handle.await.expect("writer task");
    }

    assert_eq!(store.session_count().await, 8);
    for i in 0..8 {
        let handle = store.get_or_create(&format!("session-{}", i)).await;
        let memory = handle.lock().await;
        assert_eq!(memory.fact("counter").unwrap().value, json!(19));
    }
}

#[tokio::test]
async fn test_clear_is_atomic_under_concurrent_readers() {
    let store = Arc::new(MemoryStore::new());
    store
        .apply_updates(
            "s1",
            (0..50)
                .map(|i| MemoryUpdate::new(UpdateKind::Fact, format!("k{}", i), json!(i)))
                .collect(),
        )
        .await;

    let reader_store = Arc::clone(&store);
    let reader = tokio::spawn(async move {
        // Snapshots taken while a clear runs must see all-or-nothing
        for _ in 0..50 {
            let snapshot = reader_store.build_context_snapshot("s1", 100).await;
            let n = snapshot.recent_facts.len();
            assert!(n == 0 || n == 50, "observed partially cleared state: {}", n);
        }
    });

    store.clear("s1").await;
    reader.await.expect("reader task");

    let snapshot = store.build_context_snapshot("s1", 100).await;
    assert!(snapshot.recent_facts.is_empty());
}
