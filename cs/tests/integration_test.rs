//! End-to-end coverage for the behavior that only shows up across the
//! `MemoryManager` actor boundary: durable entity dedup across two
//! conversational threads belonging to the same user, and survival of a
//! cleanup pass for the context types that back that dedup.

use std::sync::Arc;

use memory::{Config, ContextType, DurableStore, EntityRef, MemoryManager, MemoryNode};
use serde_json::json;

fn test_manager() -> MemoryManager {
    let local = memory::LocalStore::open_in_memory().unwrap();
    let durable = memory::SqliteDurableStore::open_in_memory().unwrap();
    MemoryManager::spawn(Config::default(), local, Arc::new(durable))
}

#[tokio::test]
async fn entity_dedups_across_threads_for_the_same_user() {
    let manager = test_manager();
    let now = 1_000_000;

    let acme_on_t1 = MemoryNode::new("n-acme-1", json!({"name": "Acme"}), ContextType::DomainEntity).with_entity_ref(EntityRef {
        entity_id: "001X".to_string(),
        entity_type: "account".to_string(),
        entity_system: "salesforce".to_string(),
    });
    manager.store("thread-1", Some("user-42"), acme_on_t1, now).await.unwrap();

    let acme_on_t2 = MemoryNode::new("n-acme-2", json!({"revenue": 5_000_000}), ContextType::DomainEntity).with_entity_ref(EntityRef {
        entity_id: "001X".to_string(),
        entity_type: "account".to_string(),
        entity_system: "salesforce".to_string(),
    });
    manager.store("thread-2", Some("user-42"), acme_on_t2, now + 1).await.unwrap();

    let results = manager.retrieve_relevant("thread-2", "Acme", 10, now + 1).await.unwrap();
    assert_eq!(results.len(), 1, "the two stores must merge into a single node, not two");

    let node = &results[0].node;
    assert_eq!(node.content["name"], "Acme", "thread-1's fields survive the merge");
    assert_eq!(node.content["revenue"], 5_000_000, "thread-2's fields are merged in");
    assert_eq!(node.update_count, 1, "one merge on top of the original insert");
}

#[tokio::test]
async fn entity_on_a_different_thread_without_shared_user_stays_separate() {
    let manager = test_manager();
    let now = 1_000_000;

    let entity = |node_id: &str| {
        MemoryNode::new(node_id, json!({"name": "Acme"}), ContextType::DomainEntity).with_entity_ref(EntityRef {
            entity_id: "001X".to_string(),
            entity_type: "account".to_string(),
            entity_system: "salesforce".to_string(),
        })
    };

    manager.store("thread-1", Some("user-42"), entity("n-a"), now).await.unwrap();
    manager.store("thread-3", Some("user-99"), entity("n-b"), now).await.unwrap();

    let t1_results = manager.retrieve_relevant("thread-1", "Acme", 10, now).await.unwrap();
    let t3_results = manager.retrieve_relevant("thread-3", "Acme", 10, now).await.unwrap();
    assert_eq!(t1_results.len(), 1);
    assert_eq!(t3_results.len(), 1);
    assert_ne!(t1_results[0].node.id, t3_results[0].node.id, "different users don't share durable entities");
}

#[tokio::test]
async fn domain_entities_outlive_the_thread_that_created_them() {
    let durable = Arc::new(memory::SqliteDurableStore::open_in_memory().unwrap());
    let local = memory::LocalStore::open_in_memory().unwrap();
    let manager = MemoryManager::spawn(Config::default(), local, durable.clone());

    let very_old = 1_000;
    let now = very_old + 1_000 * 60 * 60 * 24 * 365; // a year later

    manager
        .store(
            "thread-1",
            Some("user-1"),
            MemoryNode::new("entity-1", json!({"name": "Acme"}), ContextType::DomainEntity).with_entity_ref(EntityRef {
                entity_id: "001X".to_string(),
                entity_type: "account".to_string(),
                entity_system: "salesforce".to_string(),
            }),
            very_old,
        )
        .await
        .unwrap();

    let removed = manager.cleanup_idle_scopes(now).await.unwrap();

    // `thread-1` itself goes idle and is evicted from the manager's
    // in-process scope table, but the durable store (which a freshly
    // hydrated thread for the same user draws from) keeps the entity
    // regardless of age (§8 "Cleanup preservation").
    assert_eq!(removed, 1);
    let entities = durable.load_entities("user-1").await.unwrap();
    assert_eq!(entities.len(), 1, "the domain entity outlives the scope that created it");
    assert_eq!(entities[0].content["name"], "Acme");
}
