//! Property tests for the coordination core

use proptest::prelude::*;
use serde_json::json;
use std::collections::HashMap;

use maitre_engine::memory::{MemoryStore, MemoryUpdate, UpdateKind};
use maitre_engine::routing::{keyword_route, FALLBACK_CONFIDENCE_CEILING};
use maitre_engine::tasks::{select_ready_task, Task, TaskKind, TaskStatus};

proptest! {
    // Property: applying fact updates in any order yields exactly the last
    // value per key, independent of interleaving among different keys.
    #[test]
    fn prop_facts_last_write_wins(
        updates in proptest::collection::vec(
            (0usize..4, any::<i64>()),
            1..40,
        )
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime");

        rt.block_on(async {
            let store = MemoryStore::new();
            let mut expected: HashMap<usize, i64> = HashMap::new();

            let batch: Vec<MemoryUpdate> = updates
                .iter()
                .map(|(key_idx, value)| {
                    expected.insert(*key_idx, *value);
                    MemoryUpdate::new(
                        UpdateKind::Fact,
                        format!("key_{}", key_idx),
                        json!(value),
                    )
                })
                .collect();
            store.apply_updates("s1", batch).await;

            let handle = store.get_or_create("s1").await;
            let memory = handle.lock().await;
            for (key_idx, value) in expected {
                let stored = memory.fact(&format!("key_{}", key_idx)).expect("fact");
                assert_eq!(stored.value, json!(value));
            }
        });
    }

    // Property: the keyword fallback always yields a strictly positive
    // confidence at or below the fixed ceiling, for any input.
    #[test]
    fn prop_fallback_confidence_bounded(message in ".{0,200}") {
        let decision = keyword_route(&message);
        prop_assert!(decision.confidence > 0.0);
        prop_assert!(decision.confidence <= FALLBACK_CONFIDENCE_CEILING);
        prop_assert!(!decision.handler.is_empty());
    }

    // Property: the selected task never has an incomplete dependency, for
    // any graph shape where task i may only depend on tasks before it.
    #[test]
    fn prop_selected_task_dependencies_complete(
        specs in proptest::collection::vec(
            (0u8..4, 0i64..10, proptest::collection::vec(any::<proptest::sample::Index>(), 0..3)),
            1..12,
        )
    ) {
        let mut tasks: Vec<Task> = Vec::new();
        for (i, (status, priority, dep_indices)) in specs.iter().enumerate() {
            let deps: Vec<String> = if i == 0 {
                Vec::new()
            } else {
                dep_indices
                    .iter()
                    .map(|idx| format!("t{}", idx.index(i)))
                    .collect()
            };

            let mut task = Task::new(
                format!("t{}", i),
                TaskKind::Action,
                "generated",
                *priority,
                deps,
                "concierge",
            );
            task.status = match status {
                0 => TaskStatus::Pending,
                1 => TaskStatus::InProgress,
                2 => TaskStatus::Completed,
                _ => TaskStatus::Failed,
            };
            tasks.push(task);
        }

        if let Some(selected) = select_ready_task(&tasks) {
            prop_assert_eq!(selected.status, TaskStatus::Pending);
            for dep in &selected.dependencies {
                let dep_task = tasks.iter().find(|t| &t.id == dep).expect("dep exists");
                prop_assert_eq!(dep_task.status, TaskStatus::Completed);
            }

            // And it carries the maximum priority among ready tasks
            let ready_max = tasks
                .iter()
                .filter(|t| {
                    t.status == TaskStatus::Pending
                        && t.dependencies.iter().all(|d| {
                            tasks
                                .iter()
                                .any(|x| &x.id == d && x.status == TaskStatus::Completed)
                        })
                })
                .map(|t| t.priority)
                .max()
                .expect("at least the selected task is ready");
            prop_assert_eq!(selected.priority, ready_max);
        }
    }
}
